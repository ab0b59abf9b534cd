//! The client-side framebuffer surface.
//!
//! [`Canvas`] owns an RGBA8888 buffer (row stride = width * 4) plus the
//! session's [`PixelTranslator`] and the cursor layer. Decoders hand it pixel
//! data in the wire format; it lands in the buffer already normalized.
//!
//! Lifecycle: created once the server-init metadata is known, resized only by
//! a DesktopSize pseudo-rectangle, dropped with the session. The buffer is
//! never shared - readers take a [`Snapshot`] copy at update boundaries.

use crate::cursor::{apply_mask, CursorLayer, CursorShape};
use crate::format::{PixelFormat, PixelFormatError};
use crate::translate::PixelTranslator;
use anyhow::{anyhow, bail, Result};
use rfb_common::{Point, Rect};

/// A deep copy of the canvas contents, taken between updates.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub width: u32,
    pub height: u32,
    /// RGBA8888, row-major, stride = width * 4.
    pub data: Vec<u8>,
}

/// The RGBA framebuffer with fill/blit/copy/palette operations and a
/// composited cursor layer.
pub struct Canvas {
    width: u32,
    height: u32,
    data: Vec<u8>,
    translator: PixelTranslator,
    cursor: CursorLayer,
}

fn opaque_black(width: u32, height: u32) -> Vec<u8> {
    let mut data = vec![0u8; width as usize * height as usize * 4];
    for px in data.chunks_exact_mut(4) {
        px[3] = 255;
    }
    data
}

impl Canvas {
    /// Create a canvas for the given session pixel format.
    ///
    /// The surface starts out opaque black.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self, PixelFormatError> {
        let translator = PixelTranslator::new(format)?;
        Ok(Self {
            width,
            height,
            data: opaque_black(width, height),
            translator,
            cursor: CursorLayer::new(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// The session pixel format pixels arrive in.
    pub fn format(&self) -> &PixelFormat {
        self.translator.format()
    }

    /// The translation layer (decoders use it for CPIXEL reads).
    pub fn translator(&self) -> &PixelTranslator {
        &self.translator
    }

    /// Replace the session pixel format (SetPixelFormat handler).
    ///
    /// Revalidates the format and re-derives the CPIXEL mode; the colour map
    /// is kept, since a SetPixelFormat does not clear server palette state.
    pub fn set_pixel_format(&mut self, format: PixelFormat) -> Result<(), PixelFormatError> {
        self.translator.set_format(format)
    }

    /// Install colour-map entries (SetColourMapEntries handler).
    pub fn set_color_map_entries(&mut self, first: u16, colors: &[(u16, u16, u16)]) {
        self.translator.set_color_map_entries(first, colors);
    }

    /// Raw view of the RGBA buffer (tests and renderers).
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Deep-copy the surface. Only meaningful between updates; the session
    /// enforces that boundary.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            width: self.width,
            height: self.height,
            data: self.data.clone(),
        }
    }

    fn bounds_check(&self, rect: &Rect) -> Result<()> {
        if rect.x < 0
            || rect.y < 0
            || rect.right() > self.width as i32
            || rect.bottom() > self.height as i32
        {
            return Err(anyhow!(
                "rectangle {:?} out of bounds (canvas {}x{})",
                rect,
                self.width,
                self.height
            ));
        }
        Ok(())
    }

    /// Fill a rectangle with one wire-format pixel.
    pub fn fill(&mut self, rect: Rect, color: &[u8]) -> Result<()> {
        let bpp = self.translator.bytes_per_pixel();
        if color.len() != bpp {
            bail!(
                "fill colour is {} bytes, pixel format needs {}",
                color.len(),
                bpp
            );
        }
        self.fill_rgba(rect, self.translator.rgba(color))
    }

    /// Fill a rectangle with an already-converted RGBA pixel.
    pub fn fill_rgba(&mut self, rect: Rect, rgba: [u8; 4]) -> Result<()> {
        self.bounds_check(&rect)?;
        for y in 0..rect.height as usize {
            let row = ((rect.y as usize + y) * self.width as usize + rect.x as usize) * 4;
            for x in 0..rect.width as usize {
                let offset = row + x * 4;
                self.data[offset..offset + 4].copy_from_slice(&rgba);
            }
        }
        Ok(())
    }

    /// Blit `width * height` wire-format pixels, row-major with no padding.
    pub fn draw_bytes(&mut self, rect: Rect, pixel_bytes: &[u8]) -> Result<()> {
        self.bounds_check(&rect)?;
        let bpp = self.translator.bytes_per_pixel();
        let expected = rect.area() as usize * bpp;
        if pixel_bytes.len() != expected {
            bail!(
                "draw_bytes got {} bytes for {}x{} at {} bpp (expected {})",
                pixel_bytes.len(),
                rect.width,
                rect.height,
                bpp * 8,
                expected
            );
        }

        let row_pixels = rect.width as usize;
        for y in 0..rect.height as usize {
            let src = &pixel_bytes[y * row_pixels * bpp..(y + 1) * row_pixels * bpp];
            let dst = ((rect.y as usize + y) * self.width as usize + rect.x as usize) * 4;
            for (x, chunk) in src.chunks_exact(bpp).enumerate() {
                let offset = dst + x * 4;
                self.data[offset..offset + 4].copy_from_slice(&self.translator.rgba(chunk));
            }
        }
        Ok(())
    }

    /// Blit an already-decoded RGBA block (JPEG/PNG paths, expanded tiles).
    pub fn draw_image(&mut self, rect: Rect, rgba: &[u8]) -> Result<()> {
        self.bounds_check(&rect)?;
        let expected = rect.area() as usize * 4;
        if rgba.len() != expected {
            bail!(
                "draw_image got {} bytes for {}x{} RGBA (expected {})",
                rgba.len(),
                rect.width,
                rect.height,
                expected
            );
        }

        let row_bytes = rect.width as usize * 4;
        for y in 0..rect.height as usize {
            let dst = ((rect.y as usize + y) * self.width as usize + rect.x as usize) * 4;
            self.data[dst..dst + row_bytes]
                .copy_from_slice(&rgba[y * row_bytes..(y + 1) * row_bytes]);
        }
        Ok(())
    }

    /// Expand packed palette indices against an inline RGBA palette.
    ///
    /// `bits_per_index` must be 1 (rows padded to whole bytes, bit 7 first)
    /// or 8 (one byte per pixel); no other widths exist on the wire.
    pub fn draw_palette(
        &mut self,
        rect: Rect,
        indices: &[u8],
        palette: &[[u8; 4]],
        bits_per_index: u8,
    ) -> Result<()> {
        self.bounds_check(&rect)?;
        let width = rect.width as usize;
        let height = rect.height as usize;

        let mut rgba = Vec::with_capacity(width * height * 4);
        match bits_per_index {
            1 => {
                let stride = width.div_ceil(8);
                if indices.len() < stride * height {
                    bail!(
                        "palette index data too short: {} bytes for {} rows of {}",
                        indices.len(),
                        height,
                        stride
                    );
                }
                for y in 0..height {
                    for x in 0..width {
                        let bit = (indices[y * stride + x / 8] >> (7 - (x % 8))) & 1;
                        let entry = palette.get(bit as usize).ok_or_else(|| {
                            anyhow!("palette index {} out of range ({} entries)", bit, palette.len())
                        })?;
                        rgba.extend_from_slice(entry);
                    }
                }
            }
            8 => {
                if indices.len() < width * height {
                    bail!(
                        "palette index data too short: {} bytes for {} pixels",
                        indices.len(),
                        width * height
                    );
                }
                for &index in &indices[..width * height] {
                    let entry = palette.get(index as usize).ok_or_else(|| {
                        anyhow!(
                            "palette index {} out of range ({} entries)",
                            index,
                            palette.len()
                        )
                    })?;
                    rgba.extend_from_slice(entry);
                }
            }
            other => bail!("unsupported palette index width {} bits", other),
        }

        self.draw_image(rect, &rgba)
    }

    /// In-surface blit from `src` to `dest`; regions may overlap.
    ///
    /// Row copy order is chosen so an overlapping copy produces the same
    /// output as copying through a temporary buffer.
    pub fn copy(&mut self, src: Point, dest: Rect) -> Result<()> {
        self.bounds_check(&dest)?;
        let src_rect = Rect::new(src.x, src.y, dest.width, dest.height);
        self.bounds_check(&src_rect)?;

        if dest.is_empty() {
            return Ok(());
        }

        let row_bytes = dest.width as usize * 4;
        let copy_row = |data: &mut Vec<u8>, y: usize, width: usize| {
            let from = ((src_rect.y as usize + y) * width + src_rect.x as usize) * 4;
            let to = ((dest.y as usize + y) * width + dest.x as usize) * 4;
            data.copy_within(from..from + row_bytes, to);
        };

        // Copying downward overwrites unread source rows unless we walk
        // bottom-up; copy_within handles overlap inside a single row.
        let width = self.width as usize;
        if src.y < dest.y {
            for y in (0..dest.height as usize).rev() {
                copy_row(&mut self.data, y, width);
            }
        } else {
            for y in 0..dest.height as usize {
                copy_row(&mut self.data, y, width);
            }
        }
        Ok(())
    }

    /// Reallocate for a DesktopSize change; contents reset to opaque black.
    ///
    /// Outstanding snapshots keep the old dimensions; the composited cursor
    /// state is invalidated along with the pixels it saved.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.data = opaque_black(width, height);
        self.cursor.invalidate();
    }

    // Cursor layer ---------------------------------------------------------

    /// Install a cursor shape from decoded RGBA and a packed 1-bit mask.
    ///
    /// An empty (0x0) shape clears the cursor, which is how servers switch
    /// the wire cursor off.
    pub fn set_cursor(
        &mut self,
        width: u16,
        height: u16,
        mut rgba: Vec<u8>,
        mask: &[u8],
        hotspot: Point,
    ) -> Result<()> {
        self.hide_cursor();

        if width == 0 || height == 0 {
            self.cursor.set_shape(None);
            return Ok(());
        }

        let w = width as u32;
        let h = height as u32;
        if rgba.len() != (w * h * 4) as usize {
            bail!(
                "cursor image is {} bytes, expected {} for {}x{}",
                rgba.len(),
                w * h * 4,
                w,
                h
            );
        }
        let mask_len = (width as usize).div_ceil(8) * height as usize;
        if mask.len() != mask_len {
            bail!(
                "cursor mask is {} bytes, expected {} for {}x{}",
                mask.len(),
                mask_len,
                w,
                h
            );
        }

        apply_mask(&mut rgba, mask, w, h);
        self.cursor.set_shape(Some(CursorShape {
            width: w,
            height: h,
            rgba,
            hotspot,
        }));
        Ok(())
    }

    /// Move the cursor; repaints immediately if it was visible.
    pub fn move_cursor(&mut self, x: i32, y: i32) {
        let was_shown = self.cursor.is_shown();
        self.hide_cursor();
        self.cursor.set_position(Point::new(x, y));
        if was_shown {
            self.show_cursor();
        }
    }

    /// Restore the pixels under the cursor.
    pub fn hide_cursor(&mut self) {
        self.cursor.restore(&mut self.data, self.width);
    }

    /// Composite the cursor onto the surface.
    pub fn show_cursor(&mut self) {
        self.cursor.paint(&mut self.data, self.width, self.height);
    }

    pub fn cursor_visible(&self) -> bool {
        self.cursor.is_shown()
    }

    pub fn cursor_position(&self) -> Point {
        self.cursor.position()
    }

    pub fn has_cursor(&self) -> bool {
        self.cursor.has_shape()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canvas(w: u32, h: u32) -> Canvas {
        Canvas::new(w, h, PixelFormat::rgb888()).unwrap()
    }

    fn pixel(c: &Canvas, x: u32, y: u32) -> [u8; 4] {
        let offset = ((y * c.width() + x) * 4) as usize;
        c.data()[offset..offset + 4].try_into().unwrap()
    }

    #[test]
    fn test_new_canvas_is_opaque_black() {
        let c = canvas(4, 4);
        assert_eq!(pixel(&c, 0, 0), [0, 0, 0, 255]);
        assert_eq!(pixel(&c, 3, 3), [0, 0, 0, 255]);
    }

    #[test]
    fn test_fill_converts_wire_pixel() {
        let mut c = canvas(10, 10);
        // 0x00FF0000 little-endian = red in rgb888
        c.fill(Rect::new(2, 2, 3, 3), &[0x00, 0x00, 0xFF, 0x00])
            .unwrap();
        assert_eq!(pixel(&c, 2, 2), [255, 0, 0, 255]);
        assert_eq!(pixel(&c, 4, 4), [255, 0, 0, 255]);
        assert_eq!(pixel(&c, 5, 5), [0, 0, 0, 255]);
    }

    #[test]
    fn test_fill_rejects_wrong_width() {
        let mut c = canvas(10, 10);
        assert!(c.fill(Rect::new(0, 0, 1, 1), &[0xFF, 0x00]).is_err());
    }

    #[test]
    fn test_draw_bytes_blue_then_green() {
        // Matches the wire layout of a 2x1 Raw rectangle in rgb888-le.
        let mut c = canvas(4, 1);
        c.draw_bytes(
            Rect::new(0, 0, 2, 1),
            &[0xFF, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x00, 0x00],
        )
        .unwrap();
        assert_eq!(pixel(&c, 0, 0), [0, 0, 255, 255]); // blue
        assert_eq!(pixel(&c, 1, 0), [0, 255, 0, 255]); // green
    }

    #[test]
    fn test_draw_bytes_out_of_bounds() {
        let mut c = canvas(4, 4);
        let data = vec![0u8; 5 * 5 * 4];
        assert!(c.draw_bytes(Rect::new(2, 2, 5, 5), &data).is_err());
    }

    #[test]
    fn test_draw_image_rgba_block() {
        let mut c = canvas(3, 3);
        c.draw_image(Rect::new(1, 1, 1, 1), &[9, 8, 7, 255]).unwrap();
        assert_eq!(pixel(&c, 1, 1), [9, 8, 7, 255]);
    }

    #[test]
    fn test_draw_palette_8bit() {
        let mut c = canvas(4, 1);
        let palette = [[255, 0, 0, 255], [0, 255, 0, 255]];
        c.draw_palette(Rect::new(0, 0, 4, 1), &[0, 1, 1, 0], &palette, 8)
            .unwrap();
        assert_eq!(pixel(&c, 0, 0), [255, 0, 0, 255]);
        assert_eq!(pixel(&c, 1, 0), [0, 255, 0, 255]);
        assert_eq!(pixel(&c, 3, 0), [255, 0, 0, 255]);
    }

    #[test]
    fn test_draw_palette_1bit_row_padded() {
        let mut c = canvas(9, 2);
        let palette = [[0, 0, 0, 255], [255, 255, 255, 255]];
        // Row stride is 2 bytes for width 9.
        let indices = [0b1000_0000, 0b1000_0000, 0b0000_0001, 0b0000_0000];
        c.draw_palette(Rect::new(0, 0, 9, 2), &indices, &palette, 1)
            .unwrap();
        assert_eq!(pixel(&c, 0, 0), [255, 255, 255, 255]);
        assert_eq!(pixel(&c, 8, 0), [255, 255, 255, 255]);
        assert_eq!(pixel(&c, 1, 0), [0, 0, 0, 255]);
        assert_eq!(pixel(&c, 7, 1), [255, 255, 255, 255]);
    }

    #[test]
    fn test_draw_palette_rejects_other_widths() {
        let mut c = canvas(4, 1);
        let palette = [[0u8, 0, 0, 255]; 4];
        assert!(c
            .draw_palette(Rect::new(0, 0, 4, 1), &[0, 0], &palette, 2)
            .is_err());
    }

    #[test]
    fn test_copy_non_overlapping() {
        let mut c = canvas(16, 16);
        c.fill_rgba(Rect::new(0, 0, 4, 4), [255, 0, 0, 255]).unwrap();
        c.copy(Point::new(0, 0), Rect::new(8, 8, 4, 4)).unwrap();
        assert_eq!(pixel(&c, 8, 8), [255, 0, 0, 255]);
        assert_eq!(pixel(&c, 11, 11), [255, 0, 0, 255]);
        assert_eq!(pixel(&c, 12, 12), [0, 0, 0, 255]);
    }

    #[test]
    fn test_copy_overlapping_right_matches_naive() {
        let mut c = canvas(16, 1);
        for x in 0..5u32 {
            c.fill_rgba(Rect::new(x as i32, 0, 1, 1), [x as u8 * 10, 0, 0, 255])
                .unwrap();
        }
        // Shift the 5-pixel strip right by 2.
        c.copy(Point::new(0, 0), Rect::new(2, 0, 5, 1)).unwrap();
        for x in 0..5u32 {
            assert_eq!(pixel(&c, x + 2, 0)[0], x as u8 * 10, "column {}", x + 2);
        }
    }

    #[test]
    fn test_copy_overlapping_down_matches_naive() {
        let mut c = canvas(1, 16);
        for y in 0..5u32 {
            c.fill_rgba(Rect::new(0, y as i32, 1, 1), [0, y as u8 * 10, 0, 255])
                .unwrap();
        }
        c.copy(Point::new(0, 0), Rect::new(0, 3, 1, 5)).unwrap();
        for y in 0..5u32 {
            assert_eq!(pixel(&c, 0, y + 3)[1], y as u8 * 10, "row {}", y + 3);
        }
    }

    #[test]
    fn test_copy_source_out_of_bounds() {
        let mut c = canvas(8, 8);
        assert!(c.copy(Point::new(6, 6), Rect::new(0, 0, 4, 4)).is_err());
    }

    #[test]
    fn test_resize_clears_and_invalidates_cursor() {
        let mut c = canvas(4, 4);
        c.fill_rgba(Rect::new(0, 0, 4, 4), [1, 2, 3, 255]).unwrap();
        let rgba = vec![255u8; 4];
        c.set_cursor(1, 1, rgba, &[0x80], Point::new(0, 0)).unwrap();
        c.show_cursor();
        assert!(c.cursor_visible());

        c.resize(6, 2);
        assert_eq!(c.dimensions(), (6, 2));
        assert!(!c.cursor_visible());
        assert_eq!(pixel(&c, 0, 0), [0, 0, 0, 255]);
        assert_eq!(c.data().len(), 6 * 2 * 4);
    }

    #[test]
    fn test_cursor_hide_restores_decode_surface() {
        let mut c = canvas(8, 8);
        c.fill_rgba(Rect::new(0, 0, 8, 8), [10, 20, 30, 255]).unwrap();

        let rgba = vec![255u8; 2 * 2 * 4];
        c.set_cursor(2, 2, rgba, &[0xC0, 0xC0], Point::new(0, 0))
            .unwrap();
        c.move_cursor(4, 4);
        c.show_cursor();
        assert_eq!(pixel(&c, 4, 4), [255, 255, 255, 255]);

        c.hide_cursor();
        assert_eq!(pixel(&c, 4, 4), [10, 20, 30, 255]);
    }

    #[test]
    fn test_empty_cursor_clears_shape() {
        let mut c = canvas(8, 8);
        let rgba = vec![255u8; 4];
        c.set_cursor(1, 1, rgba, &[0x80], Point::new(0, 0)).unwrap();
        assert!(c.has_cursor());
        c.set_cursor(0, 0, Vec::new(), &[], Point::new(0, 0)).unwrap();
        assert!(!c.has_cursor());
    }

    #[test]
    fn test_snapshot_is_independent_copy() {
        let mut c = canvas(2, 2);
        let snap = c.snapshot();
        c.fill_rgba(Rect::new(0, 0, 2, 2), [255, 255, 255, 255])
            .unwrap();
        assert_eq!(snap.data[0..4], [0, 0, 0, 255]);
        assert_eq!((snap.width, snap.height), (2, 2));
    }
}
