//! Rectangle decoders for RFB (VNC) framebuffer updates.
//!
//! Each server-chosen encoding gets one [`Decoder`] implementation. A decoder
//! reads exactly the wire bytes of a single rectangle from an
//! [`RfbInStream`], translates pixels through the session format, and writes
//! the result into the [`Canvas`]. Staying byte-accurate is the contract:
//! the next rectangle header begins immediately after this rectangle's
//! payload, so one over- or under-read desynchronises the connection.
//!
//! # Shared compression state
//!
//! Zlib, ZRLE, and Tight all keep inflate dictionaries alive across
//! rectangles. That state lives in a session-owned [`ZlibStreamSet`] passed
//! by mutable borrow into every decode call; the decoders themselves are
//! stateless values, which is what lets the registry hold them in a plain
//! enum.
//!
//! # Error policy
//!
//! Decoders fail fast with [`anyhow`] errors carrying the structural reason;
//! nothing is retried and no defensive fallback is attempted, because a
//! malformed rectangle leaves the stream position unknowable. The single
//! soft error in the pipeline (an unpopulated colour-map index) is handled
//! below this layer, in the pixel translator.

use anyhow::Result;
use rfb_canvas::Canvas;
use tokio::io::AsyncRead;

pub use rfb_canvas::{CPixelMode, PixelFormat};
pub use rfb_protocol::io::RfbInStream;
pub use rfb_protocol::messages::types::Rectangle;

pub mod zstream;
pub use zstream::{InflateError, ZlibStreamSet};

pub mod raw;
pub use raw::RawDecoder;

pub mod copyrect;
pub use copyrect::CopyRectDecoder;

pub mod rre;
pub use rre::RREDecoder;

pub mod corre;
pub use corre::CoRREDecoder;

pub mod hextile;
pub use hextile::HextileDecoder;

pub mod zlib;
pub use zlib::ZlibDecoder;

pub mod zrle;
pub use zrle::ZRLEDecoder;

pub mod tight;
pub use tight::TightDecoder;

pub mod cursor;
pub use cursor::CursorDecoder;

pub mod xcursor;
pub use xcursor::XCursorDecoder;

pub mod pointer_pos;
pub use pointer_pos::PointerPosDecoder;

// Standard pixel encodings
/// Raw encoding: uncompressed pixel data.
pub const ENCODING_RAW: i32 = 0;

/// CopyRect encoding: copy a rectangle from elsewhere on the canvas.
pub const ENCODING_COPY_RECT: i32 = 1;

/// RRE: background fill plus coloured sub-rectangles (u16 fields).
pub const ENCODING_RRE: i32 = 2;

/// CoRRE: RRE with compact u8 sub-rectangle fields.
pub const ENCODING_CORRE: i32 = 4;

/// Hextile: 16x16 tiles with per-tile sub-encodings.
pub const ENCODING_HEXTILE: i32 = 5;

/// Zlib: raw pixels through one persistent zlib stream.
pub const ENCODING_ZLIB: i32 = 6;

/// Tight: zlib/JPEG with filtering over four persistent streams.
pub const ENCODING_TIGHT: i32 = 7;

/// ZRLE: zlib-compressed run-length encoding in 64x64 tiles.
pub const ENCODING_ZRLE: i32 = 16;

// Pseudo-encodings (negative tags carry metadata instead of pixels)
/// Desktop resize notification; (width, height) of the header apply.
pub const ENCODING_DESKTOP_SIZE: i32 = -223;

/// Terminates the update regardless of the advertised rectangle count.
pub const ENCODING_LAST_RECT: i32 = -224;

/// Rich cursor shape update; (x, y) of the header is the hotspot.
pub const ENCODING_CURSOR: i32 = -239;

/// X11-style two-colour cursor shape update.
pub const ENCODING_XCURSOR: i32 = -240;

/// Server-side pointer movement; (x, y) of the header is the new position.
pub const ENCODING_POINTER_POS: i32 = -258;

/// Tight variant that may carry PNG-compressed rectangles.
pub const ENCODING_TIGHT_PNG: i32 = -260;

/// Desktop name change; payload is a length-prefixed UTF-8 string.
pub const ENCODING_DESKTOP_NAME: i32 = -307;

/// One rectangle decoder.
///
/// # Contract
///
/// - consume exactly the wire bytes of this rectangle, including fields that
///   are present even when the rectangle area is zero
/// - translate pixels through the canvas's session format
/// - fail fast with a clear error; never guess at malformed input
#[allow(async_fn_in_trait)]
pub trait Decoder {
    /// The encoding tag this decoder handles (one of the `ENCODING_*`
    /// constants).
    fn encoding_type(&self) -> i32;

    /// Decode a single rectangle from `stream` into `canvas`.
    ///
    /// `zlib` is the session's persistent inflate state; decoders that do
    /// not use compression ignore it.
    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        canvas: &mut Canvas,
        zlib: &mut ZlibStreamSet,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_constants() {
        assert_eq!(ENCODING_RAW, 0);
        assert_eq!(ENCODING_COPY_RECT, 1);
        assert_eq!(ENCODING_RRE, 2);
        assert_eq!(ENCODING_CORRE, 4);
        assert_eq!(ENCODING_HEXTILE, 5);
        assert_eq!(ENCODING_ZLIB, 6);
        assert_eq!(ENCODING_TIGHT, 7);
        assert_eq!(ENCODING_ZRLE, 16);
        assert_eq!(ENCODING_DESKTOP_SIZE, -223);
        assert_eq!(ENCODING_LAST_RECT, -224);
        assert_eq!(ENCODING_CURSOR, -239);
        assert_eq!(ENCODING_XCURSOR, -240);
        assert_eq!(ENCODING_POINTER_POS, -258);
        assert_eq!(ENCODING_TIGHT_PNG, -260);
        assert_eq!(ENCODING_DESKTOP_NAME, -307);
    }
}
