//! Cursor layer with save-under compositing.
//!
//! The wire cursor is conceptually a layer above the framebuffer. Painting it
//! records the pixels it covers; hiding restores them. The dispatcher hides
//! the cursor before every rectangle decode and repaints it afterwards, so
//! decoded pixel data never mixes with the overlay.

use rfb_common::{Point, Rect};

/// An installed cursor image.
///
/// `rgba` carries the transparency already folded in: alpha is 255 where the
/// wire bitmask bit was set, 0 elsewhere.
#[derive(Debug, Clone)]
pub struct CursorShape {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
    pub hotspot: Point,
}

/// Fold a packed 1-bit transparency mask into the alpha channel of `rgba`.
///
/// Mask rows are padded to whole bytes (`ceil(width / 8)` per row); bit 7 of
/// each byte is the leftmost pixel and a set bit means opaque.
pub fn apply_mask(rgba: &mut [u8], mask: &[u8], width: u32, height: u32) {
    let mask_stride = (width as usize).div_ceil(8);
    for y in 0..height as usize {
        for x in 0..width as usize {
            let bit = (mask[y * mask_stride + x / 8] >> (7 - (x % 8))) & 1;
            rgba[(y * width as usize + x) * 4 + 3] = if bit != 0 { 255 } else { 0 };
        }
    }
}

/// Pixels the painted cursor replaced, for restore-on-hide.
#[derive(Debug, Clone)]
struct SavedRegion {
    rect: Rect,
    pixels: Vec<u8>,
}

/// Cursor state and the compositing operations over a raw RGBA buffer.
#[derive(Debug, Default)]
pub(crate) struct CursorLayer {
    shape: Option<CursorShape>,
    position: Point,
    shown: bool,
    saved: Option<SavedRegion>,
}

impl CursorLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new shape (or clear with `None`). The caller restores the
    /// old cursor from the canvas before swapping shapes.
    pub fn set_shape(&mut self, shape: Option<CursorShape>) {
        debug_assert!(!self.shown);
        self.shape = shape;
    }

    pub fn has_shape(&self) -> bool {
        self.shape.is_some()
    }

    pub fn set_position(&mut self, position: Point) {
        debug_assert!(!self.shown);
        self.position = position;
    }

    pub fn position(&self) -> Point {
        self.position
    }

    pub fn is_shown(&self) -> bool {
        self.shown
    }

    /// Drop all composited state without touching the buffer. Used on resize,
    /// where the underlying pixels are gone anyway.
    pub fn invalidate(&mut self) {
        self.shown = false;
        self.saved = None;
    }

    /// The canvas rectangle the cursor would cover at its current position,
    /// clipped to the canvas bounds. The shape sits at the pointer position
    /// pulled back by the hotspot offset.
    fn screen_rect(&self, canvas_w: u32, canvas_h: u32) -> Option<Rect> {
        let shape = self.shape.as_ref()?;
        let placed = Rect::new(0, 0, shape.width, shape.height).translated(
            self.position.x - shape.hotspot.x,
            self.position.y - shape.hotspot.y,
        );
        placed.intersect(&Rect::new(0, 0, canvas_w, canvas_h))
    }

    /// Composite the cursor onto `data`, saving the pixels underneath.
    ///
    /// No-op when no shape is installed, the cursor is already painted, or it
    /// is entirely off screen.
    pub fn paint(&mut self, data: &mut [u8], canvas_w: u32, canvas_h: u32) {
        if self.shown {
            return;
        }
        let Some(visible) = self.screen_rect(canvas_w, canvas_h) else {
            return;
        };
        let shape = self.shape.as_ref().expect("screen_rect requires a shape");

        // Save what we are about to overwrite.
        let mut saved = vec![0u8; visible.area() as usize * 4];
        for row in 0..visible.height as usize {
            let src = ((visible.y as usize + row) * canvas_w as usize + visible.x as usize) * 4;
            let dst = row * visible.width as usize * 4;
            let len = visible.width as usize * 4;
            saved[dst..dst + len].copy_from_slice(&data[src..src + len]);
        }

        // Blend: the mask is binary, so any non-zero alpha pixel wins.
        let origin_x = self.position.x - shape.hotspot.x;
        let origin_y = self.position.y - shape.hotspot.y;
        for row in 0..visible.height as usize {
            for col in 0..visible.width as usize {
                let cx = (visible.x - origin_x) as usize + col;
                let cy = (visible.y - origin_y) as usize + row;
                let src = (cy * shape.width as usize + cx) * 4;
                if shape.rgba[src + 3] == 0 {
                    continue;
                }
                let dst = ((visible.y as usize + row) * canvas_w as usize
                    + (visible.x as usize + col))
                    * 4;
                data[dst..dst + 3].copy_from_slice(&shape.rgba[src..src + 3]);
                data[dst + 3] = 255;
            }
        }

        self.saved = Some(SavedRegion {
            rect: visible,
            pixels: saved,
        });
        self.shown = true;
    }

    /// Restore the pixels the cursor covered.
    pub fn restore(&mut self, data: &mut [u8], canvas_w: u32) {
        if !self.shown {
            return;
        }
        if let Some(saved) = self.saved.take() {
            for row in 0..saved.rect.height as usize {
                let dst =
                    ((saved.rect.y as usize + row) * canvas_w as usize + saved.rect.x as usize) * 4;
                let src = row * saved.rect.width as usize * 4;
                let len = saved.rect.width as usize * 4;
                data[dst..dst + len].copy_from_slice(&saved.pixels[src..src + len]);
            }
        }
        self.shown = false;
    }
}
