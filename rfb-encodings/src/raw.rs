//! Raw encoding decoder - uncompressed pixel data.
//!
//! The simplest encoding (type 0): `width * height * bytes_per_pixel` bytes
//! in the session pixel format, row-major with no padding. Wasteful on the
//! wire but trivial to decode; servers fall back to it when nothing better
//! was negotiated.

use crate::{Decoder, Rectangle, RfbInStream, ZlibStreamSet, ENCODING_RAW};
use anyhow::{Context, Result};
use rfb_canvas::Canvas;
use rfb_common::Rect;
use tokio::io::AsyncRead;

/// Decoder for raw (uncompressed) pixel data.
pub struct RawDecoder;

impl Decoder for RawDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_RAW
    }

    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        canvas: &mut Canvas,
        _zlib: &mut ZlibStreamSet,
    ) -> Result<()> {
        if rect.width == 0 || rect.height == 0 {
            return Ok(());
        }

        let bpp = canvas.translator().bytes_per_pixel();
        let total = rect.width as usize * rect.height as usize * bpp;

        let mut pixel_data = vec![0u8; total];
        stream
            .read_bytes(&mut pixel_data)
            .await
            .context("failed to read raw pixel data")?;

        canvas
            .draw_bytes(
                Rect::new(rect.x as i32, rect.y as i32, rect.width as u32, rect.height as u32),
                &pixel_data,
            )
            .context("failed to write raw pixel data to canvas")
    }
}
