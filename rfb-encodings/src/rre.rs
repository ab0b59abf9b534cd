//! RRE encoding decoder - rise-and-run-length encoding.
//!
//! # Wire Format
//!
//! ```text
//! +------------------+
//! | num_subrects     |  4 bytes (u32)
//! +------------------+
//! | background       |  bytes_per_pixel bytes
//! +------------------+
//! | subrects...      |  per subrect:
//! |   pixel          |    bytes_per_pixel bytes
//! |   x, y, w, h     |    2 bytes each (u16)
//! +------------------+
//! ```
//!
//! Sub-rectangle coordinates are relative to the parent rectangle's origin
//! and must stay inside it.

use crate::{Decoder, Rectangle, RfbInStream, ZlibStreamSet, ENCODING_RRE};
use anyhow::{anyhow, Context, Result};
use rfb_canvas::Canvas;
use rfb_common::Rect;
use tokio::io::AsyncRead;

/// Decoder for RRE.
pub struct RREDecoder;

impl Decoder for RREDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_RRE
    }

    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        canvas: &mut Canvas,
        _zlib: &mut ZlibStreamSet,
    ) -> Result<()> {
        let bpp = canvas.translator().bytes_per_pixel();

        let num_subrects = stream
            .read_u32()
            .await
            .context("failed to read RRE sub-rectangle count")?;

        let mut background = vec![0u8; bpp];
        stream
            .read_bytes(&mut background)
            .await
            .context("failed to read RRE background pixel")?;

        if rect.width > 0 && rect.height > 0 {
            canvas
                .fill(
                    Rect::new(rect.x as i32, rect.y as i32, rect.width as u32, rect.height as u32),
                    &background,
                )
                .context("failed to fill RRE background")?;
        }

        for i in 0..num_subrects {
            let mut pixel = vec![0u8; bpp];
            stream
                .read_bytes(&mut pixel)
                .await
                .with_context(|| format!("failed to read pixel for RRE subrect {}", i))?;

            let x = stream.read_u16().await.with_context(|| {
                format!("failed to read x for RRE subrect {}", i)
            })?;
            let y = stream.read_u16().await.with_context(|| {
                format!("failed to read y for RRE subrect {}", i)
            })?;
            let w = stream.read_u16().await.with_context(|| {
                format!("failed to read width for RRE subrect {}", i)
            })?;
            let h = stream.read_u16().await.with_context(|| {
                format!("failed to read height for RRE subrect {}", i)
            })?;

            let right = x
                .checked_add(w)
                .ok_or_else(|| anyhow!("RRE subrect {} x+width overflows", i))?;
            let bottom = y
                .checked_add(h)
                .ok_or_else(|| anyhow!("RRE subrect {} y+height overflows", i))?;
            if right > rect.width || bottom > rect.height {
                return Err(anyhow!(
                    "RRE subrect {} [{},{} {}x{}] leaves the {}x{} parent",
                    i,
                    x,
                    y,
                    w,
                    h,
                    rect.width,
                    rect.height
                ));
            }

            if w == 0 || h == 0 {
                continue;
            }

            canvas
                .fill(
                    Rect::new(
                        rect.x as i32 + x as i32,
                        rect.y as i32 + y as i32,
                        w as u32,
                        h as u32,
                    ),
                    &pixel,
                )
                .with_context(|| format!("failed to fill RRE subrect {}", i))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfb_canvas::PixelFormat;
    use std::io::Cursor;

    fn canvas(w: u32, h: u32) -> Canvas {
        Canvas::new(w, h, PixelFormat::rgb888()).unwrap()
    }

    fn rect(x: u16, y: u16, w: u16, h: u16) -> Rectangle {
        Rectangle {
            x,
            y,
            width: w,
            height: h,
            encoding: ENCODING_RRE,
        }
    }

    fn pixel(c: &Canvas, x: u32, y: u32) -> [u8; 4] {
        let offset = ((y * c.width() + x) * 4) as usize;
        c.data()[offset..offset + 4].try_into().unwrap()
    }

    const RED: [u8; 4] = [0x00, 0x00, 0xFF, 0x00]; // wire-format LE pixels
    const BLUE: [u8; 4] = [0xFF, 0x00, 0x00, 0x00];

    #[tokio::test]
    async fn test_background_with_framed_subrect() {
        // Red background with one blue subrect leaves a red frame around
        // a 10x10 blue block at (15, 15).
        let decoder = RREDecoder;
        let mut fb = canvas(40, 40);
        let mut zlib = ZlibStreamSet::new();

        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&RED); // background
        data.extend_from_slice(&BLUE); // subrect colour
        data.extend_from_slice(&5u16.to_be_bytes());
        data.extend_from_slice(&5u16.to_be_bytes());
        data.extend_from_slice(&10u16.to_be_bytes());
        data.extend_from_slice(&10u16.to_be_bytes());

        let mut stream = RfbInStream::new(Cursor::new(data));
        decoder
            .decode(&mut stream, &rect(10, 10, 20, 20), &mut fb, &mut zlib)
            .await
            .unwrap();

        assert_eq!(pixel(&fb, 10, 10), [255, 0, 0, 255]); // frame
        assert_eq!(pixel(&fb, 14, 14), [255, 0, 0, 255]); // frame inner edge
        assert_eq!(pixel(&fb, 15, 15), [0, 0, 255, 255]); // blue block
        assert_eq!(pixel(&fb, 24, 24), [0, 0, 255, 255]);
        assert_eq!(pixel(&fb, 25, 25), [255, 0, 0, 255]); // frame again
    }

    #[tokio::test]
    async fn test_zero_subrects_is_plain_fill() {
        let decoder = RREDecoder;
        let mut fb = canvas(8, 8);
        let mut zlib = ZlibStreamSet::new();

        let mut data = Vec::new();
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&RED);

        let mut stream = RfbInStream::new(Cursor::new(data));
        decoder
            .decode(&mut stream, &rect(0, 0, 8, 8), &mut fb, &mut zlib)
            .await
            .unwrap();
        assert_eq!(pixel(&fb, 7, 7), [255, 0, 0, 255]);
    }

    #[tokio::test]
    async fn test_subrect_escaping_parent_is_error() {
        let decoder = RREDecoder;
        let mut fb = canvas(16, 16);
        let mut zlib = ZlibStreamSet::new();

        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&RED);
        data.extend_from_slice(&BLUE);
        data.extend_from_slice(&6u16.to_be_bytes()); // x=6, w=4 > parent width 8
        data.extend_from_slice(&0u16.to_be_bytes());
        data.extend_from_slice(&4u16.to_be_bytes());
        data.extend_from_slice(&2u16.to_be_bytes());

        let mut stream = RfbInStream::new(Cursor::new(data));
        let err = decoder
            .decode(&mut stream, &rect(0, 0, 8, 8), &mut fb, &mut zlib)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("leaves the"));
    }

    #[tokio::test]
    async fn test_truncated_subrect() {
        let decoder = RREDecoder;
        let mut fb = canvas(8, 8);
        let mut zlib = ZlibStreamSet::new();

        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&RED);
        data.extend_from_slice(&BLUE);
        data.extend_from_slice(&0u16.to_be_bytes()); // then EOF

        let mut stream = RfbInStream::new(Cursor::new(data));
        let err = decoder
            .decode(&mut stream, &rect(0, 0, 8, 8), &mut fb, &mut zlib)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("RRE subrect 0"));
    }
}
