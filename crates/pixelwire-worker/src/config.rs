use std::path::{Path, PathBuf};

use pixelwire_frame::DEFAULT_PACKET_SIZE;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkerError};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 50006;

/// Smallest accepted packet size. Every progress message fits in one frame
/// of this size.
pub const MIN_PACKET_SIZE: usize = 128;

pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Construction-time worker settings. Every field is optional in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub model_base_path: Option<PathBuf>,
    pub max_client_connections: usize,
    pub host: String,
    pub port: u16,
    /// Accepted for compatibility; currently has no effect.
    pub do_timeout: bool,
    pub safety_model: Option<String>,
    pub model_version: Option<String>,
    pub safety_model_path: Option<PathBuf>,
    pub safety_feature_extractor: Option<String>,
    pub safety_feature_extractor_path: Option<PathBuf>,
    pub packet_size: usize,
    pub response_queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            model_base_path: None,
            max_client_connections: 1,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            do_timeout: false,
            safety_model: None,
            model_version: None,
            safety_model_path: None,
            safety_feature_extractor: None,
            safety_feature_extractor_path: None,
            packet_size: DEFAULT_PACKET_SIZE,
            response_queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl WorkerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load settings from a JSON file. Missing keys keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| WorkerError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.packet_size < MIN_PACKET_SIZE {
            return Err(WorkerError::InvalidConfig(format!(
                "packet_size {} is below the minimum of {MIN_PACKET_SIZE}",
                self.packet_size
            )));
        }
        if self.max_client_connections == 0 {
            return Err(WorkerError::InvalidConfig(
                "max_client_connections must be at least 1".to_string(),
            ));
        }
        if self.response_queue_capacity == 0 {
            return Err(WorkerError::InvalidConfig(
                "response_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.host.is_empty() {
            return Err(WorkerError::InvalidConfig("host must not be empty".to_string()));
        }
        Ok(())
    }

    /// `host:port` for a TCP listener.
    pub fn tcp_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
