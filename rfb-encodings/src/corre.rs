//! CoRRE encoding decoder - RRE with compact sub-rectangle fields.
//!
//! Identical to RRE except each sub-rectangle header packs x, y, width, and
//! height into single bytes, so no sub-rectangle exceeds 255x255. Servers are
//! not supposed to pick CoRRE for parents wider or taller than 255; a parent
//! that large still decodes fine here since the byte fields stay relative to
//! its origin.

use crate::{Decoder, Rectangle, RfbInStream, ZlibStreamSet, ENCODING_CORRE};
use anyhow::{anyhow, Context, Result};
use rfb_canvas::Canvas;
use rfb_common::Rect;
use tokio::io::AsyncRead;

/// Decoder for CoRRE.
pub struct CoRREDecoder;

impl Decoder for CoRREDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_CORRE
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
            .context("failed to read CoRRE sub-rectangle count")?;

        let mut background = vec![0u8; bpp];
        stream
            .read_bytes(&mut background)
            .await
            .context("failed to read CoRRE background pixel")?;

        if rect.width > 0 && rect.height > 0 {
            canvas
                .fill(
                    Rect::new(rect.x as i32, rect.y as i32, rect.width as u32, rect.height as u32),
                    &background,
                )
                .context("failed to fill CoRRE background")?;
        }

        for i in 0..num_subrects {
            let mut pixel = vec![0u8; bpp];
            stream
                .read_bytes(&mut pixel)
                .await
                .with_context(|| format!("failed to read pixel for CoRRE subrect {}", i))?;

            let x = stream.read_u8().await.with_context(|| {
                format!("failed to read x for CoRRE subrect {}", i)
            })? as u16;
            let y = stream.read_u8().await.with_context(|| {
                format!("failed to read y for CoRRE subrect {}", i)
            })? as u16;
            let w = stream.read_u8().await.with_context(|| {
                format!("failed to read width for CoRRE subrect {}", i)
            })? as u16;
            let h = stream.read_u8().await.with_context(|| {
                format!("failed to read height for CoRRE subrect {}", i)
            })? as u16;

            if x + w > rect.width || y + h > rect.height {
                return Err(anyhow!(
                    "CoRRE subrect {} [{},{} {}x{}] leaves the {}x{} parent",
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
                .with_context(|| format!("failed to fill CoRRE subrect {}", i))?;
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
            encoding: ENCODING_CORRE,
        }
    }

    fn pixel(c: &Canvas, x: u32, y: u32) -> [u8; 4] {
        let offset = ((y * c.width() + x) * 4) as usize;
        c.data()[offset..offset + 4].try_into().unwrap()
    }

    #[tokio::test]
    async fn test_byte_fields_decode() {
        let decoder = CoRREDecoder;
        let mut fb = canvas(20, 20);
        let mut zlib = ZlibStreamSet::new();

        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&[0x00, 0x00, 0xFF, 0x00]); // red background
        data.extend_from_slice(&[0xFF, 0x00, 0x00, 0x00]); // blue subrect
        data.extend_from_slice(&[2, 3, 4, 5]); // x, y, w, h as bytes

        let mut stream = RfbInStream::new(Cursor::new(data));
        decoder
            .decode(&mut stream, &rect(1, 1, 10, 10), &mut fb, &mut zlib)
            .await
            .unwrap();

        assert_eq!(pixel(&fb, 1, 1), [255, 0, 0, 255]);
        assert_eq!(pixel(&fb, 3, 4), [0, 0, 255, 255]); // (1+2, 1+3)
        assert_eq!(pixel(&fb, 6, 8), [0, 0, 255, 255]); // bottom-right of subrect
        assert_eq!(pixel(&fb, 7, 9), [255, 0, 0, 255]);
    }

    #[tokio::test]
    async fn test_subrect_escaping_parent_is_error() {
        let decoder = CoRREDecoder;
        let mut fb = canvas(20, 20);
        let mut zlib = ZlibStreamSet::new();

        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&[0; 4]);
        data.extend_from_slice(&[0; 4]);
        data.extend_from_slice(&[7, 0, 4, 1]); // x=7, w=4 > parent width 10

        let mut stream = RfbInStream::new(Cursor::new(data));
        let err = decoder
            .decode(&mut stream, &rect(0, 0, 10, 10), &mut fb, &mut zlib)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("leaves the"));
    }

    #[tokio::test]
    async fn test_truncated_count() {
        let decoder = CoRREDecoder;
        let mut fb = canvas(4, 4);
        let mut zlib = ZlibStreamSet::new();

        let mut stream = RfbInStream::new(Cursor::new(vec![0, 0]));
        let err = decoder
            .decode(&mut stream, &rect(0, 0, 2, 2), &mut fb, &mut zlib)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("sub-rectangle count"));
    }
}
