//! XCursor pseudo-encoding decoder - X11-style two-colour cursors.
//!
//! # Wire Format
//!
//! Header (x, y) is the hotspot, (width, height) the size. The payload is two
//! RGB triples - foreground then background - followed by a bitmap and a
//! bitmask, each `ceil(width / 8)` bytes per row with bit 7 leftmost. A set
//! bitmap bit paints the foreground colour; the bitmask supplies
//! transparency exactly as in the Cursor encoding.

use crate::{Decoder, Rectangle, RfbInStream, ZlibStreamSet, ENCODING_XCURSOR};
use anyhow::{Context, Result};
use rfb_canvas::Canvas;
use rfb_common::Point;
use tokio::io::AsyncRead;

/// Decoder for the XCursor pseudo-encoding.
pub struct XCursorDecoder;

impl Decoder for XCursorDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_XCURSOR
    }

    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        canvas: &mut Canvas,
        _zlib: &mut ZlibStreamSet,
    ) -> Result<()> {
        let hotspot = Point::new(rect.x as i32, rect.y as i32);

        if rect.width == 0 || rect.height == 0 {
            return canvas.set_cursor(0, 0, Vec::new(), &[], hotspot);
        }

        let mut foreground = [0u8; 3];
        stream
            .read_bytes(&mut foreground)
            .await
            .context("failed to read XCursor foreground colour")?;
        let mut background = [0u8; 3];
        stream
            .read_bytes(&mut background)
            .await
            .context("failed to read XCursor background colour")?;

        let row_bytes = (rect.width as usize).div_ceil(8);
        let plane_len = row_bytes * rect.height as usize;

        let mut bitmap = vec![0u8; plane_len];
        stream
            .read_bytes(&mut bitmap)
            .await
            .context("failed to read XCursor bitmap")?;
        let mut mask = vec![0u8; plane_len];
        stream
            .read_bytes(&mut mask)
            .await
            .context("failed to read XCursor bitmask")?;

        let mut rgba = Vec::with_capacity(rect.width as usize * rect.height as usize * 4);
        for y in 0..rect.height as usize {
            for x in 0..rect.width as usize {
                let bit = (bitmap[y * row_bytes + x / 8] >> (7 - (x % 8))) & 1;
                let colour = if bit != 0 { foreground } else { background };
                rgba.extend_from_slice(&[colour[0], colour[1], colour[2], 255]);
            }
        }

        canvas
            .set_cursor(rect.width, rect.height, rgba, &mask, hotspot)
            .context("failed to install XCursor shape")
    }
}
