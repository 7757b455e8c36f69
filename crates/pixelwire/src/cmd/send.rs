use std::fs;
use std::time::Duration;

use pixelwire_frame::{frame_count, FrameConfig, FrameError, FrameReader, FrameWriter};
use pixelwire_transport::Endpoint;
use pixelwire_worker::ServerMessage;

use crate::cmd::SendArgs;
use crate::exit::{
    frame_error, io_error, transport_error, CliError, CliResult, DATA_INVALID, SUCCESS, USAGE,
};
use crate::output::{print_message, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = resolve_payload(&args)?;
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let endpoint =
        Endpoint::parse(&args.endpoint).map_err(|err| transport_error("invalid endpoint", err))?;
    let stream = endpoint
        .connect()
        .map_err(|err| transport_error("connect failed", err))?;

    let config = FrameConfig {
        read_timeout: Some(wait_timeout),
        ..FrameConfig::with_packet_size(args.packet_size)
    };
    let reader_stream = stream
        .try_clone()
        .map_err(|err| transport_error("clone stream failed", err))?;
    let mut writer = FrameWriter::with_config_wire(stream, config.clone())
        .map_err(|err| frame_error("writer setup failed", err))?;
    let frames = writer
        .send_message(&payload)
        .map_err(|err| frame_error("send failed", err))?;
    tracing::debug!(frames, bytes = payload.len(), "request sent");

    if !args.wait {
        return Ok(SUCCESS);
    }

    let mut reader = FrameReader::with_config_wire(reader_stream, config)
        .map_err(|err| frame_error("reader setup failed", err))?;
    loop {
        let raw = reader.read_message().map_err(|err| match err {
            FrameError::ConnectionClosed => frame_error("worker closed the connection", err),
            other => frame_error("receive failed", other),
        })?;
        let message: ServerMessage = serde_json::from_slice(&raw).map_err(|err| {
            CliError::new(DATA_INVALID, format!("unexpected reply from worker: {err}"))
        })?;
        print_message(
            &message,
            &raw,
            frame_count(raw.len(), args.packet_size),
            format,
        );
        if message.is_final() {
            return Ok(SUCCESS);
        }
    }
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    let (text, source) = match (&args.json, &args.file) {
        (Some(json), _) => (json.clone(), "--json".to_string()),
        (None, Some(path)) => (
            fs::read_to_string(path)
                .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?,
            path.display().to_string(),
        ),
        (None, None) => return Err(CliError::new(USAGE, "one of --json or --file is required")),
    };
    serde_json::from_str::<serde_json::Value>(&text)
        .map_err(|err| CliError::new(USAGE, format!("{source} is not valid JSON: {err}")))?;
    Ok(text.trim().as_bytes().to_vec())
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(number) => (number, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };
    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
