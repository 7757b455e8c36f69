use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a worker with the built-in demo backend.
    Serve(ServeArgs),
    /// Send one request and optionally print the streamed replies.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args),
        Command::Send(args) => send::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// JSON config file. Flags below override its values.
    #[arg(long, value_name = "FILE", env = "PIXELWIRE_CONFIG")]
    pub config: Option<PathBuf>,
    /// Endpoint to listen on: `unix:<path>` or `<host>:<port>`.
    /// Defaults to the configured host and port.
    #[arg(long, value_name = "ENDPOINT", env = "PIXELWIRE_LISTEN")]
    pub listen: Option<String>,
    /// TCP host, used when --listen is not given.
    #[arg(long, env = "PIXELWIRE_HOST")]
    pub host: Option<String>,
    /// TCP port, used when --listen is not given.
    #[arg(long, env = "PIXELWIRE_PORT")]
    pub port: Option<u16>,
    /// Frame length in bytes.
    #[arg(long, env = "PIXELWIRE_PACKET_SIZE")]
    pub packet_size: Option<usize>,
    /// Capacity of the bounded response queue.
    #[arg(long)]
    pub queue_capacity: Option<usize>,
    /// Accepted for compatibility; has no effect.
    #[arg(long)]
    pub do_timeout: bool,
    /// Delay between demo backend steps, in milliseconds.
    #[arg(long, default_value = "0")]
    pub step_delay_ms: u64,
    /// Exit after serving this many clients.
    #[arg(long, value_name = "N")]
    pub exit_after: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Endpoint to connect to: `unix:<path>` or `<host>:<port>`.
    pub endpoint: String,
    /// JSON request.
    #[arg(long, conflicts_with = "file")]
    pub json: Option<String>,
    /// Read the JSON request from a file.
    #[arg(long, conflicts_with = "json")]
    pub file: Option<PathBuf>,
    /// Frame length in bytes. Must match the worker.
    #[arg(long, default_value = "1024", env = "PIXELWIRE_PACKET_SIZE")]
    pub packet_size: usize,
    /// Print replies until the final image arrives.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for each reply when --wait is set (e.g. 30s, 500ms).
    #[arg(long, default_value = "30s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build information.
    #[arg(long)]
    pub extended: bool,
}
