//! CopyRect encoding decoder - copy a rectangle from elsewhere on the canvas.
//!
//! # Wire Format
//!
//! 4 bytes: `src_x`, `src_y` as u16. The rectangle header gives the
//! destination; nothing else travels, which makes this the cheapest encoding
//! for scrolls and window drags. Source and destination may overlap - the
//! canvas copy is required to behave like a copy through a temporary buffer.

use crate::{Decoder, Rectangle, RfbInStream, ZlibStreamSet, ENCODING_COPY_RECT};
use anyhow::{Context, Result};
use rfb_canvas::Canvas;
use rfb_common::{Point, Rect};
use tokio::io::AsyncRead;

/// Decoder for CopyRect.
pub struct CopyRectDecoder;

impl Decoder for CopyRectDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_COPY_RECT
    }

    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        canvas: &mut Canvas,
        _zlib: &mut ZlibStreamSet,
    ) -> Result<()> {
        // The source position is on the wire even for a zero-area rectangle.
        let src_x = stream
            .read_u16()
            .await
            .context("failed to read CopyRect src_x")?;
        let src_y = stream
            .read_u16()
            .await
            .context("failed to read CopyRect src_y")?;

        if rect.width == 0 || rect.height == 0 {
            return Ok(());
        }

        canvas
            .copy(
                Point::new(src_x as i32, src_y as i32),
                Rect::new(rect.x as i32, rect.y as i32, rect.width as u32, rect.height as u32),
            )
            .context("CopyRect blit failed")
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
            encoding: ENCODING_COPY_RECT,
        }
    }

    fn pixel(c: &Canvas, x: u32, y: u32) -> [u8; 4] {
        let offset = ((y * c.width() + x) * 4) as usize;
        c.data()[offset..offset + 4].try_into().unwrap()
    }

    #[tokio::test]
    async fn test_copy_red_block() {
        let decoder = CopyRectDecoder;
        let mut fb = canvas(16, 16);
        let mut zlib = ZlibStreamSet::new();
        fb.fill_rgba(Rect::new(0, 0, 4, 4), [255, 0, 0, 255]).unwrap();

        // Copy (0,0) 4x4 to (4,0).
        let mut stream = RfbInStream::new(Cursor::new(vec![0, 0, 0, 0]));
        decoder
            .decode(&mut stream, &rect(4, 0, 4, 4), &mut fb, &mut zlib)
            .await
            .unwrap();

        for x in 4..8 {
            for y in 0..4 {
                assert_eq!(pixel(&fb, x, y), [255, 0, 0, 255], "({}, {})", x, y);
            }
        }
        assert_eq!(pixel(&fb, 8, 0), [0, 0, 0, 255]);
    }

    #[tokio::test]
    async fn test_empty_rect_still_consumes_source() {
        let decoder = CopyRectDecoder;
        let mut fb = canvas(8, 8);
        let mut zlib = ZlibStreamSet::new();

        let mut stream = RfbInStream::new(Cursor::new(vec![0, 5, 0, 5, 0xAB]));
        decoder
            .decode(&mut stream, &rect(0, 0, 0, 0), &mut fb, &mut zlib)
            .await
            .unwrap();

        // The 4 source bytes are gone; the next byte is still there.
        assert_eq!(stream.read_u8().await.unwrap(), 0xAB);
    }

    #[tokio::test]
    async fn test_overlapping_copy() {
        let decoder = CopyRectDecoder;
        let mut fb = canvas(16, 1);
        let mut zlib = ZlibStreamSet::new();
        for x in 0..5 {
            fb.fill_rgba(Rect::new(x, 0, 1, 1), [x as u8 * 50, 0, 0, 255])
                .unwrap();
        }

        // Shift right by two: src (0,0), dst (2,0) 5x1.
        let mut stream = RfbInStream::new(Cursor::new(vec![0, 0, 0, 0]));
        decoder
            .decode(&mut stream, &rect(2, 0, 5, 1), &mut fb, &mut zlib)
            .await
            .unwrap();

        for x in 0..5u32 {
            assert_eq!(pixel(&fb, x + 2, 0)[0], x as u8 * 50);
        }
    }

    #[tokio::test]
    async fn test_source_out_of_bounds() {
        let decoder = CopyRectDecoder;
        let mut fb = canvas(8, 8);
        let mut zlib = ZlibStreamSet::new();

        let mut stream = RfbInStream::new(Cursor::new(vec![0, 6, 0, 6]));
        let err = decoder
            .decode(&mut stream, &rect(0, 0, 4, 4), &mut fb, &mut zlib)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("blit failed"));
    }

    #[tokio::test]
    async fn test_truncated_header() {
        let decoder = CopyRectDecoder;
        let mut fb = canvas(8, 8);
        let mut zlib = ZlibStreamSet::new();

        let mut stream = RfbInStream::new(Cursor::new(vec![0, 1]));
        let err = decoder
            .decode(&mut stream, &rect(0, 0, 2, 2), &mut fb, &mut zlib)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("src_y"));
    }
}
