//! Validated session pixel format.
//!
//! The wire form ([`rfb_protocol::messages::types::PixelFormat`]) is a bag of
//! bytes; this module is where its invariants are actually enforced:
//!
//! - bits-per-pixel is 8, 16, or 32
//! - depth never exceeds bits-per-pixel
//! - on a true-colour format every channel max is non-zero and the shifted
//!   channel fits inside the pixel's storage bits
//!
//! A format that fails validation is rejected before the first pixel is
//! decoded - a zero channel max would otherwise divide by zero in the scaler,
//! and an oversized shift would silently drop colour bits.

use thiserror::Error;

/// Reasons a negotiated pixel format is unusable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PixelFormatError {
    #[error("unsupported bits-per-pixel {0} (must be 8, 16, or 32)")]
    UnsupportedBitsPerPixel(u8),

    #[error("depth {depth} exceeds bits-per-pixel {bits_per_pixel}")]
    DepthExceedsStorage { depth: u8, bits_per_pixel: u8 },

    #[error("{channel} channel max is zero on a true-colour format")]
    ZeroChannelMax { channel: &'static str },

    #[error(
        "{channel} channel (max {max}, shift {shift}) does not fit in {bits_per_pixel} bits"
    )]
    ChannelOverflow {
        channel: &'static str,
        max: u16,
        shift: u8,
        bits_per_pixel: u8,
    },
}

/// Session pixel format with native boolean fields.
///
/// Construct via [`PixelFormat::try_from`] on the wire form, or directly for
/// tests, then pass to [`crate::PixelTranslator::new`] which runs
/// [`validate`](Self::validate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    /// Storage bits per pixel: 8, 16, or 32.
    pub bits_per_pixel: u8,

    /// Significant colour bits (<= bits_per_pixel).
    pub depth: u8,

    /// Multi-byte pixels arrive most-significant byte first.
    pub big_endian: bool,

    /// Direct colour vs. colour-map indices.
    pub true_color: bool,

    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,

    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl PixelFormat {
    /// The common 32bpp little-endian true-colour format (R at bit 16).
    pub fn rgb888() -> Self {
        Self {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: false,
            true_color: true,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        }
    }

    /// Storage bytes per pixel (1, 2, or 4 for a valid format).
    pub fn bytes_per_pixel(&self) -> usize {
        self.bits_per_pixel.div_ceil(8) as usize
    }

    /// Check the structural invariants of the format.
    pub fn validate(&self) -> Result<(), PixelFormatError> {
        if !matches!(self.bits_per_pixel, 8 | 16 | 32) {
            return Err(PixelFormatError::UnsupportedBitsPerPixel(
                self.bits_per_pixel,
            ));
        }
        if self.depth > self.bits_per_pixel {
            return Err(PixelFormatError::DepthExceedsStorage {
                depth: self.depth,
                bits_per_pixel: self.bits_per_pixel,
            });
        }

        if self.true_color {
            for (channel, max, shift) in [
                ("red", self.red_max, self.red_shift),
                ("green", self.green_max, self.green_shift),
                ("blue", self.blue_max, self.blue_shift),
            ] {
                if max == 0 {
                    return Err(PixelFormatError::ZeroChannelMax { channel });
                }
                let top_bit = 16 - max.leading_zeros() as u8; // bits needed for max
                if shift as u32 + top_bit as u32 > self.bits_per_pixel as u32 {
                    return Err(PixelFormatError::ChannelOverflow {
                        channel,
                        max,
                        shift,
                        bits_per_pixel: self.bits_per_pixel,
                    });
                }
            }
        }

        Ok(())
    }

    /// The highest pixel value a true-colour format can produce.
    ///
    /// Used by CPIXEL detection to decide whether every significant bit fits
    /// in a single 3-byte window.
    pub fn max_pixel_value(&self) -> u32 {
        ((self.red_max as u32) << self.red_shift)
            | ((self.green_max as u32) << self.green_shift)
            | ((self.blue_max as u32) << self.blue_shift)
    }
}

impl From<rfb_protocol::messages::types::PixelFormat> for PixelFormat {
    fn from(pf: rfb_protocol::messages::types::PixelFormat) -> Self {
        Self {
            bits_per_pixel: pf.bits_per_pixel,
            depth: pf.depth,
            big_endian: pf.big_endian != 0,
            true_color: pf.true_color != 0,
            red_max: pf.red_max,
            green_max: pf.green_max,
            blue_max: pf.blue_max,
            red_shift: pf.red_shift,
            green_shift: pf.green_shift,
            blue_shift: pf.blue_shift,
        }
    }
}
