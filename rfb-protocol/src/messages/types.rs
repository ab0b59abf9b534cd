//! Core wire types: pixel format and rectangle header.

use crate::io::RfbInStream;
use tokio::io::AsyncRead;

/// RFB pixel format as it appears on the wire.
///
/// # Wire Format
///
/// 16 bytes:
/// - 1 byte: bits_per_pixel
/// - 1 byte: depth
/// - 1 byte: big_endian (0 or 1)
/// - 1 byte: true_color (0 or 1)
/// - 2 bytes each: red_max, green_max, blue_max
/// - 1 byte each: red_shift, green_shift, blue_shift
/// - 3 bytes: padding (must be zero)
///
/// This is the raw negotiated form; semantic validation (bpp in {8,16,32},
/// depth <= bpp, channel maxima) happens in the translation layer, which also
/// converts the u8 booleans into real `bool`s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub depth: u8,
    pub big_endian: u8, // boolean: must be 0 or 1
    pub true_color: u8, // boolean: must be 0 or 1
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl PixelFormat {
    /// Storage bytes per pixel, rounded up to whole bytes.
    pub fn bytes_per_pixel(&self) -> u8 {
        self.bits_per_pixel.div_ceil(8)
    }

    /// Read a PixelFormat from the stream, validating booleans and padding.
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        let bits_per_pixel = stream.read_u8().await?;
        let depth = stream.read_u8().await?;
        let big_endian = stream.read_u8().await?;
        let true_color = stream.read_u8().await?;

        if big_endian > 1 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("big_endian must be 0 or 1, got {}", big_endian),
            ));
        }
        if true_color > 1 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("true_color must be 0 or 1, got {}", true_color),
            ));
        }

        let red_max = stream.read_u16().await?;
        let green_max = stream.read_u16().await?;
        let blue_max = stream.read_u16().await?;
        let red_shift = stream.read_u8().await?;
        let green_shift = stream.read_u8().await?;
        let blue_shift = stream.read_u8().await?;

        let mut padding = [0u8; 3];
        stream.read_bytes(&mut padding).await?;
        if padding != [0, 0, 0] {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("pixel format padding must be zero, got {:?}", padding),
            ));
        }

        Ok(Self {
            bits_per_pixel,
            depth,
            big_endian,
            true_color,
            red_max,
            green_max,
            blue_max,
            red_shift,
            green_shift,
            blue_shift,
        })
    }
}

/// Rectangle header inside a `FramebufferUpdate` message.
///
/// # Wire Format
///
/// 12 bytes: x, y, width, height as u16 followed by the encoding tag as a
/// signed i32. Pixel data (if any) follows and is owned by the matching
/// decoder.
///
/// For pseudo-encodings the position and size fields carry per-tag meaning:
/// Cursor/XCursor use (x, y) as the hotspot, PointerPos as the new pointer
/// position, DesktopSize uses (width, height) as the new framebuffer size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rectangle {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    pub encoding: i32,
}

impl Rectangle {
    /// Read a rectangle header (and only the header) from the stream.
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        Ok(Self {
            x: stream.read_u16().await?,
            y: stream.read_u16().await?,
            width: stream.read_u16().await?,
            height: stream.read_u16().await?,
            encoding: stream.read_i32().await?,
        })
    }
}
