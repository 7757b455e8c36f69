use std::io::Cursor;

use ::image::{ImageFormat, RgbImage};

use crate::backend::PixelBuffer;
use crate::error::{Result, WorkerError};

/// Turns generated pixels into encoded image bytes.
pub trait ImageCodec: Send + Sync {
    /// Encode an RGB buffer.
    fn encode(&self, pixels: &PixelBuffer) -> Result<Vec<u8>>;

    /// Short name of the output format, for logs.
    fn format_name(&self) -> &'static str;
}

/// 8-bit RGB PNG encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PngCodec;

impl ImageCodec for PngCodec {
    fn encode(&self, pixels: &PixelBuffer) -> Result<Vec<u8>> {
        let rgb = RgbImage::from_raw(pixels.width(), pixels.height(), pixels.data().to_vec())
            .ok_or_else(|| {
                WorkerError::ImageEncode(format!(
                    "{}x{} buffer does not match its data",
                    pixels.width(),
                    pixels.height()
                ))
            })?;

        let mut out = Cursor::new(Vec::new());
        rgb.write_to(&mut out, ImageFormat::Png)
            .map_err(|err| WorkerError::ImageEncode(err.to_string()))?;
        Ok(out.into_inner())
    }

    fn format_name(&self) -> &'static str {
        "png"
    }
}
