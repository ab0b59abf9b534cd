//! Zlib encoding decoder - raw pixels through one persistent stream.
//!
//! # Wire Format
//!
//! ```text
//! +------------------+
//! | length           |  4 bytes (u32)
//! +------------------+
//! | zlib data        |  'length' bytes
//! +------------------+
//! ```
//!
//! The compressed block inflates to exactly `width * height *
//! bytes_per_pixel` bytes of raw pixel data. One zlib stream serves the whole
//! connection: the first rectangle carries the zlib header, every later
//! rectangle continues the same deflate stream. The stream is never reset
//! between rectangles - dropping it would desynchronise the dictionary and
//! corrupt every subsequent Zlib rectangle.

use crate::{Decoder, Rectangle, RfbInStream, ZlibStreamSet, ENCODING_ZLIB};
use anyhow::{Context, Result};
use rfb_canvas::Canvas;
use rfb_common::Rect;
use tokio::io::AsyncRead;

/// Decoder for the Zlib encoding.
pub struct ZlibDecoder;

impl Decoder for ZlibDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_ZLIB
    }

    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        canvas: &mut Canvas,
        zlib: &mut ZlibStreamSet,
    ) -> Result<()> {
        // The length field is on the wire regardless of rectangle area.
        let compressed_len = stream
            .read_u32()
            .await
            .context("failed to read Zlib block length")?;

        let mut compressed = vec![0u8; compressed_len as usize];
        stream
            .read_bytes(&mut compressed)
            .await
            .with_context(|| format!("failed to read {} Zlib block bytes", compressed_len))?;

        let bpp = canvas.translator().bytes_per_pixel();
        let expected = rect.width as usize * rect.height as usize * bpp;

        if expected == 0 {
            if compressed_len > 0 {
                tracing::warn!(
                    "Zlib rectangle with zero area carried {} compressed bytes",
                    compressed_len
                );
            }
            return Ok(());
        }

        let pixel_data = zlib.inflate_zlib(&compressed, expected)?;

        canvas
            .draw_bytes(
                Rect::new(rect.x as i32, rect.y as i32, rect.width as u32, rect.height as u32),
                &pixel_data,
            )
            .context("failed to write Zlib pixel data to canvas")
    }
}
