use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use pixelwire_worker::ServerMessage;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One inbound message as printed by `send --wait`.
#[derive(Serialize)]
struct MessageOutput<'a> {
    kind: &'static str,
    reqtype: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_base64_len: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pos_x: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pos_y: Option<i64>,
    frames: usize,
}

impl<'a> MessageOutput<'a> {
    fn new(message: &'a ServerMessage, frames: usize) -> Self {
        match message {
            ServerMessage::Progress(progress) => Self {
                kind: "progress",
                reqtype: &progress.reqtype,
                step: Some(progress.step),
                total: Some(progress.total),
                image_base64_len: None,
                pos_x: None,
                pos_y: None,
                frames,
            },
            ServerMessage::Image(image) => Self {
                kind: "image",
                reqtype: &image.reqtype,
                step: None,
                total: None,
                image_base64_len: Some(image.image.len()),
                pos_x: Some(image.pos_x),
                pos_y: Some(image.pos_y),
                frames,
            },
        }
    }

    fn detail(&self) -> String {
        match (self.step, self.total, self.image_base64_len) {
            (Some(step), Some(total), _) => format!("step {step}/{total}"),
            (_, _, Some(len)) => format!(
                "{len} base64 bytes at ({}, {})",
                self.pos_x.unwrap_or(0),
                self.pos_y.unwrap_or(0)
            ),
            _ => String::new(),
        }
    }
}

/// Print one decoded server message. `raw` is the reassembled payload and
/// `frames` the number of frames it arrived in, sentinel included.
pub fn print_message(message: &ServerMessage, raw: &[u8], frames: usize, format: OutputFormat) {
    let out = MessageOutput::new(message, frames);
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
        ),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "REQTYPE", "FRAMES", "DETAIL"])
                .add_row(vec![
                    out.kind.to_string(),
                    out.reqtype.to_string(),
                    out.frames.to_string(),
                    out.detail(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!(
            "{} reqtype={} frames={} {}",
            out.kind,
            out.reqtype,
            out.frames,
            out.detail()
        ),
        OutputFormat::Raw => print_raw(raw),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.write_all(b"\n");
    let _ = out.flush();
}
