//! Cursor pseudo-encoding decoder - rich cursor shape updates.
//!
//! # Wire Format
//!
//! The rectangle header repurposes its fields: (x, y) is the hotspot and
//! (width, height) the cursor size. The payload is `width * height *
//! bytes_per_pixel` pixels in the session format followed by a packed 1-bit
//! transparency mask, `ceil(width / 8)` bytes per row, bit 7 leftmost, a set
//! bit meaning opaque.
//!
//! A zero-area cursor removes the shape entirely - that is how servers turn
//! the client-side cursor off.

use crate::{Decoder, Rectangle, RfbInStream, ZlibStreamSet, ENCODING_CURSOR};
use anyhow::{Context, Result};
use rfb_canvas::Canvas;
use rfb_common::Point;
use tokio::io::AsyncRead;

/// Decoder for the Cursor pseudo-encoding.
pub struct CursorDecoder;

impl Decoder for CursorDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_CURSOR
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

        let pixel_count = rect.width as usize * rect.height as usize;
        let bpp = canvas.translator().bytes_per_pixel();

        let mut pixels = vec![0u8; pixel_count * bpp];
        stream
            .read_bytes(&mut pixels)
            .await
            .context("failed to read cursor pixels")?;

        let mask_len = (rect.width as usize).div_ceil(8) * rect.height as usize;
        let mut mask = vec![0u8; mask_len];
        stream
            .read_bytes(&mut mask)
            .await
            .context("failed to read cursor mask")?;

        let rgba = canvas.translator().rgba_image(&pixels, pixel_count);
        canvas
            .set_cursor(rect.width, rect.height, rgba, &mask, hotspot)
            .context("failed to install cursor shape")
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

    fn cursor_rect(hx: u16, hy: u16, w: u16, h: u16) -> Rectangle {
        Rectangle {
            x: hx,
            y: hy,
            width: w,
            height: h,
            encoding: ENCODING_CURSOR,
        }
    }

    fn pixel(c: &Canvas, x: u32, y: u32) -> [u8; 4] {
        let offset = ((y * c.width() + x) * 4) as usize;
        c.data()[offset..offset + 4].try_into().unwrap()
    }

    #[tokio::test]
    async fn test_install_and_composite() {
        let decoder = CursorDecoder;
        let mut fb = canvas(8, 8);
        let mut zlib = ZlibStreamSet::new();

        // 2x2 white cursor, left column opaque, hotspot (0, 0).
        let mut data = Vec::new();
        for _ in 0..4 {
            data.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0x00]);
        }
        data.extend_from_slice(&[0b1000_0000, 0b1000_0000]);

        let mut stream = RfbInStream::new(Cursor::new(data));
        decoder
            .decode(&mut stream, &cursor_rect(0, 0, 2, 2), &mut fb, &mut zlib)
            .await
            .unwrap();

        assert!(fb.has_cursor());
        fb.move_cursor(4, 4);
        fb.show_cursor();

        assert_eq!(pixel(&fb, 4, 4), [255, 255, 255, 255]);
        assert_eq!(pixel(&fb, 5, 4), [0, 0, 0, 255]); // masked out
        assert_eq!(pixel(&fb, 4, 5), [255, 255, 255, 255]);
    }

    #[tokio::test]
    async fn test_hotspot_offsets_paint_position() {
        let decoder = CursorDecoder;
        let mut fb = canvas(8, 8);
        let mut zlib = ZlibStreamSet::new();

        let mut data = Vec::new();
        data.extend_from_slice(&[0x00, 0x00, 0xFF, 0x00]); // red 1x1
        data.push(0b1000_0000);

        let mut stream = RfbInStream::new(Cursor::new(data));
        decoder
            .decode(&mut stream, &cursor_rect(1, 1, 1, 1), &mut fb, &mut zlib)
            .await
            .unwrap();

        fb.move_cursor(5, 5);
        fb.show_cursor();
        // Hotspot (1,1) shifts the image up-left of the pointer position.
        assert_eq!(pixel(&fb, 4, 4), [255, 0, 0, 255]);
        assert_eq!(pixel(&fb, 5, 5), [0, 0, 0, 255]);
    }

    #[tokio::test]
    async fn test_empty_cursor_clears_shape() {
        let decoder = CursorDecoder;
        let mut fb = canvas(8, 8);
        let mut zlib = ZlibStreamSet::new();

        let mut data = Vec::new();
        data.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0x00]);
        data.push(0b1000_0000);
        let mut stream = RfbInStream::new(Cursor::new(data));
        decoder
            .decode(&mut stream, &cursor_rect(0, 0, 1, 1), &mut fb, &mut zlib)
            .await
            .unwrap();
        assert!(fb.has_cursor());

        let mut stream = RfbInStream::new(Cursor::new(Vec::new()));
        decoder
            .decode(&mut stream, &cursor_rect(0, 0, 0, 0), &mut fb, &mut zlib)
            .await
            .unwrap();
        assert!(!fb.has_cursor());
    }

    #[tokio::test]
    async fn test_truncated_mask() {
        let decoder = CursorDecoder;
        let mut fb = canvas(8, 8);
        let mut zlib = ZlibStreamSet::new();

        let mut data = Vec::new();
        for _ in 0..4 {
            data.extend_from_slice(&[0u8; 4]);
        }
        data.push(0b1111_0000); // 1 of 2 mask bytes

        let mut stream = RfbInStream::new(Cursor::new(data));
        let err = decoder
            .decode(&mut stream, &cursor_rect(0, 0, 2, 2), &mut fb, &mut zlib)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("cursor mask"));
    }
}
