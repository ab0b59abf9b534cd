//! Wire-pixel to RGBA translation.
//!
//! Every decoder funnels its pixel bytes through a [`PixelTranslator`] built
//! from the validated session [`PixelFormat`]. True-colour pixels are split
//! into channels and scaled to 0..255 with rounding; paletted pixels index a
//! [`ColorMap`] maintained by the SetColourMapEntries handler. Alpha is
//! always 255 - RFB has no transparency on the main surface.
//!
//! # CPIXEL
//!
//! ZRLE and Tight transmit a compact 3-byte pixel when the session format is
//! 32bpp with depth <= 24 and every significant bit falls inside one 3-byte
//! window of the pixel value. [`CPixelMode`] is derived once per format, so
//! the first ZRLE or Tight rectangle of a session already reads the right
//! width.

use crate::format::{PixelFormat, PixelFormatError};

/// Palette for non-true-colour sessions.
///
/// Entries are stored as 8-bit RGB; the wire form carries 16-bit channels
/// which are scaled down on entry. Indices outside the populated range decode
/// as opaque black - some servers emit a few garbage pixels before the first
/// palette update, so this is deliberately not fatal.
#[derive(Debug, Clone)]
pub struct ColorMap {
    entries: [[u8; 3]; 256],
    populated: [bool; 256],
}

impl Default for ColorMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ColorMap {
    /// Create an empty colour map.
    pub fn new() -> Self {
        Self {
            entries: [[0; 3]; 256],
            populated: [false; 256],
        }
    }

    /// Install entries starting at `first`, as sent by SetColourMapEntries.
    ///
    /// Channels are 16-bit on the wire; only the high byte is kept. Entries
    /// that would land past index 255 are ignored with a warning.
    pub fn set_entries(&mut self, first: u16, colors: &[(u16, u16, u16)]) {
        for (i, &(r, g, b)) in colors.iter().enumerate() {
            let index = first as usize + i;
            if index > 255 {
                tracing::warn!(
                    "colour map entry {} out of range, ignoring remaining {}",
                    index,
                    colors.len() - i
                );
                break;
            }
            self.entries[index] = [(r >> 8) as u8, (g >> 8) as u8, (b >> 8) as u8];
            self.populated[index] = true;
        }
    }

    /// Look up an index. `None` when the entry was never populated.
    pub fn lookup(&self, index: usize) -> Option<[u8; 3]> {
        if index < 256 && self.populated[index] {
            Some(self.entries[index])
        } else {
            None
        }
    }
}

/// Compact-pixel width for ZRLE and Tight payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CPixelMode {
    /// Full pixel width; no compaction possible.
    None,
    /// Significant bits live in the low 24 bits of the pixel value.
    Low3,
    /// Significant bits live in the high 24 bits of the pixel value.
    High3,
}

impl CPixelMode {
    /// Derive the mode from a validated format.
    pub fn detect(pf: &PixelFormat) -> Self {
        if pf.bits_per_pixel != 32 || pf.depth > 24 || !pf.true_color {
            return Self::None;
        }

        let max_pixel = pf.max_pixel_value();
        if max_pixel < (1 << 24) {
            Self::Low3
        } else if max_pixel & 0xFF == 0 {
            Self::High3
        } else {
            Self::None
        }
    }
}

/// Converts session-format pixel bytes into normalized RGBA.
#[derive(Debug, Clone)]
pub struct PixelTranslator {
    format: PixelFormat,
    color_map: ColorMap,
    cpixel: CPixelMode,
}

impl PixelTranslator {
    /// Build a translator, validating the format first.
    pub fn new(format: PixelFormat) -> Result<Self, PixelFormatError> {
        format.validate()?;
        let cpixel = CPixelMode::detect(&format);
        Ok(Self {
            format,
            color_map: ColorMap::new(),
            cpixel,
        })
    }

    /// The session pixel format.
    pub fn format(&self) -> &PixelFormat {
        &self.format
    }

    /// Swap in a new session format (SetPixelFormat), keeping the colour map.
    ///
    /// Re-derives the CPIXEL mode so the next ZRLE or Tight rectangle reads
    /// the correct compact width.
    pub fn set_format(&mut self, format: PixelFormat) -> Result<(), PixelFormatError> {
        format.validate()?;
        self.cpixel = CPixelMode::detect(&format);
        self.format = format;
        Ok(())
    }

    /// Storage bytes per wire pixel.
    pub fn bytes_per_pixel(&self) -> usize {
        self.format.bytes_per_pixel()
    }

    /// The derived compact-pixel mode.
    pub fn cpixel_mode(&self) -> CPixelMode {
        self.cpixel
    }

    /// Bytes per CPIXEL (3 when compaction applies, else the full width).
    pub fn cpixel_len(&self) -> usize {
        match self.cpixel {
            CPixelMode::None => self.bytes_per_pixel(),
            CPixelMode::Low3 | CPixelMode::High3 => 3,
        }
    }

    /// Update the colour map from a SetColourMapEntries message.
    pub fn set_color_map_entries(&mut self, first: u16, colors: &[(u16, u16, u16)]) {
        self.color_map.set_entries(first, colors);
    }

    /// Assemble a raw 32-bit pixel value from wire bytes.
    ///
    /// `bytes` must hold exactly one pixel; shorter widths zero-extend.
    pub fn raw_value(&self, bytes: &[u8]) -> u32 {
        debug_assert_eq!(bytes.len(), self.bytes_per_pixel());
        if self.format.big_endian {
            bytes.iter().fold(0u32, |v, &b| (v << 8) | b as u32)
        } else {
            bytes
                .iter()
                .enumerate()
                .fold(0u32, |v, (i, &b)| v | (b as u32) << (i * 8))
        }
    }

    /// Convert one wire pixel to RGBA.
    pub fn rgba(&self, bytes: &[u8]) -> [u8; 4] {
        self.rgba_from_raw(self.raw_value(bytes))
    }

    /// Convert an assembled pixel value to RGBA.
    pub fn rgba_from_raw(&self, raw: u32) -> [u8; 4] {
        if self.format.true_color {
            let r = (raw >> self.format.red_shift) & self.format.red_max as u32;
            let g = (raw >> self.format.green_shift) & self.format.green_max as u32;
            let b = (raw >> self.format.blue_shift) & self.format.blue_max as u32;
            [
                scale_channel(r, self.format.red_max),
                scale_channel(g, self.format.green_max),
                scale_channel(b, self.format.blue_max),
                255,
            ]
        } else {
            match self.color_map.lookup(raw as usize) {
                Some([r, g, b]) => [r, g, b, 255],
                None => {
                    tracing::warn!("palette index {} has no colour map entry, using black", raw);
                    [0, 0, 0, 255]
                }
            }
        }
    }

    /// Convert one CPIXEL (`cpixel_len()` bytes) to RGBA.
    pub fn rgba_from_cpixel(&self, bytes: &[u8]) -> [u8; 4] {
        debug_assert_eq!(bytes.len(), self.cpixel_len());
        let raw = match self.cpixel {
            CPixelMode::None => return self.rgba(bytes),
            CPixelMode::Low3 => {
                // The wire carries the 3 pixel bytes that hold bits 0..24,
                // in the same order the full pixel would use.
                if self.format.big_endian {
                    (bytes[0] as u32) << 16 | (bytes[1] as u32) << 8 | bytes[2] as u32
                } else {
                    bytes[0] as u32 | (bytes[1] as u32) << 8 | (bytes[2] as u32) << 16
                }
            }
            CPixelMode::High3 => {
                if self.format.big_endian {
                    (bytes[0] as u32) << 24 | (bytes[1] as u32) << 16 | (bytes[2] as u32) << 8
                } else {
                    (bytes[0] as u32) << 8 | (bytes[1] as u32) << 16 | (bytes[2] as u32) << 24
                }
            }
        };
        self.rgba_from_raw(raw)
    }

    /// Convert a tightly packed run of wire pixels to an RGBA buffer.
    pub fn rgba_image(&self, bytes: &[u8], pixel_count: usize) -> Vec<u8> {
        let bpp = self.bytes_per_pixel();
        debug_assert!(bytes.len() >= pixel_count * bpp);
        let mut out = Vec::with_capacity(pixel_count * 4);
        for chunk in bytes.chunks_exact(bpp).take(pixel_count) {
            out.extend_from_slice(&self.rgba(chunk));
        }
        out
    }
}

/// Scale a channel value in `0..=max` to `0..=255`, rounding.
fn scale_channel(value: u32, max: u16) -> u8 {
    ((value * 255 + max as u32 / 2) / max as u32) as u8
}
