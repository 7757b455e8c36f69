use std::sync::Arc;
use std::time::Duration;

use pixelwire_frame::{FrameConfig, FrameError, FrameReader};
use pixelwire_transport::{ClientSlot, Endpoint, WireListener, WireStream};
use pixelwire_worker::{
    Backend, BackendFactory, DemoBackend, RouteOutcome, Worker, WorkerConfig,
};
use tracing::{debug, info, warn};

use crate::cmd::ServeArgs;
use crate::exit::{transport_error, worker_error, CliError, CliResult, INTERNAL, SUCCESS};

/// A write to a client that makes no progress for this long fails, which
/// resets the connection.
const CLIENT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let config = resolve_config(&args)?;
    let endpoint = match &args.listen {
        Some(listen) => Endpoint::parse(listen),
        None => Endpoint::parse(&config.tcp_address()),
    }
    .map_err(|err| transport_error("invalid listen endpoint", err))?;

    let listener = WireListener::bind(&endpoint).map_err(|err| transport_error("bind failed", err))?;
    let local = listener.local_endpoint();

    let slot = Arc::new(ClientSlot::new());
    let step_delay = Duration::from_millis(args.step_delay_ms);
    let factory: BackendFactory = Box::new(move || {
        Ok(Arc::new(DemoBackend::with_step_delay(step_delay)) as Arc<dyn Backend>)
    });
    let worker = Arc::new(
        Worker::start(config.clone(), slot.clone(), factory)
            .map_err(|err| worker_error("worker start failed", err))?,
    );
    install_ctrlc_handler(worker.clone(), local.clone())?;
    info!(endpoint = %local, packet_size = config.packet_size, "listening");

    let frame_config = FrameConfig::with_packet_size(config.packet_size);
    let mut served = 0usize;
    while !worker.is_shutting_down() {
        let stream = match listener.accept() {
            Ok(stream) => stream,
            Err(err) => {
                if worker.is_shutting_down() {
                    break;
                }
                return Err(transport_error("accept failed", err));
            }
        };
        if worker.is_shutting_down() {
            break;
        }

        serve_client(stream, &slot, &worker, &frame_config)?;
        served += 1;
        if args.exit_after.is_some_and(|limit| served >= limit) {
            info!(served, "client limit reached");
            break;
        }
    }

    worker.stop();
    Ok(SUCCESS)
}

/// Merge the config file (if any) with command-line overrides.
fn resolve_config(args: &ServeArgs) -> CliResult<WorkerConfig> {
    let mut config = match &args.config {
        Some(path) => WorkerConfig::from_json_file(path)
            .map_err(|err| worker_error("config load failed", err))?,
        None => WorkerConfig::default(),
    };
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(packet_size) = args.packet_size {
        config.packet_size = packet_size;
    }
    if let Some(capacity) = args.queue_capacity {
        config.response_queue_capacity = capacity;
    }
    if args.do_timeout {
        config.do_timeout = true;
    }
    config
        .validate()
        .map_err(|err| worker_error("invalid configuration", err))?;
    Ok(config)
}

/// Run the receive loop for one client until it disconnects or the
/// connection is reset.
fn serve_client(
    stream: WireStream,
    slot: &ClientSlot,
    worker: &Worker,
    frame_config: &FrameConfig,
) -> CliResult<()> {
    let peer = stream.peer_label();
    let reader_stream = stream
        .try_clone()
        .map_err(|err| transport_error("clone client stream failed", err))?;
    if let Err(err) = stream.set_write_timeout(Some(CLIENT_WRITE_TIMEOUT)) {
        warn!(%peer, %err, "could not set client write timeout");
    }
    let connection = slot.attach(stream);
    info!(%peer, %connection, "client connected");

    let mut reader = match FrameReader::with_config(reader_stream, frame_config.clone()) {
        Ok(reader) => reader,
        Err(err) => {
            slot.detach(connection);
            return Err(crate::exit::frame_error("reader setup failed", err));
        }
    };

    loop {
        match reader.read_message() {
            Ok(message) => {
                let outcome = worker.handle(connection, &message);
                match &outcome {
                    RouteOutcome::Dropped(reason) => debug!(%peer, %reason, "request dropped"),
                    other => debug!(%peer, outcome = ?other, "request handled"),
                }
                if worker.is_shutting_down() {
                    break;
                }
            }
            Err(FrameError::ConnectionClosed) => {
                info!(%peer, "client disconnected");
                break;
            }
            Err(err) => {
                warn!(%peer, %err, "receive failed, dropping client");
                break;
            }
        }
    }

    slot.detach(connection);
    Ok(())
}

fn install_ctrlc_handler(worker: Arc<Worker>, local: Endpoint) -> CliResult<()> {
    ctrlc::set_handler(move || {
        info!("interrupt received");
        worker.stop();
        // Wake the blocking accept so the loop sees the shutdown.
        let _ = local.connect();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::CONFIG_INVALID;

    fn args() -> ServeArgs {
        ServeArgs {
            config: None,
            listen: None,
            host: None,
            port: None,
            packet_size: None,
            queue_capacity: None,
            do_timeout: false,
            step_delay_ms: 0,
            exit_after: None,
        }
    }

    #[test]
    fn flags_override_defaults() {
        let config = resolve_config(&ServeArgs {
            host: Some("0.0.0.0".to_string()),
            port: Some(6001),
            packet_size: Some(4096),
            do_timeout: true,
            ..args()
        })
        .unwrap();
        assert_eq!(config.tcp_address(), "0.0.0.0:6001");
        assert_eq!(config.packet_size, 4096);
        assert!(config.do_timeout);
    }

    #[test]
    fn flags_override_file() {
        let path = std::env::temp_dir().join(format!("pxw-serve-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"port": 7000, "packet_size": 512}"#).unwrap();
        let config = resolve_config(&ServeArgs {
            config: Some(path.clone()),
            packet_size: Some(256),
            ..args()
        })
        .unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.packet_size, 256);
    }

    #[test]
    fn tiny_packet_size_is_rejected() {
        let err = resolve_config(&ServeArgs {
            packet_size: Some(8),
            ..args()
        })
        .unwrap_err();
        assert_eq!(err.code, CONFIG_INVALID);
    }
}
