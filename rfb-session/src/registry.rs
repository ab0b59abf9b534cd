//! Decoder registry: encoding tag to decoder instance.
//!
//! The encoding set is closed, so the registry stores a tagged enum rather
//! than boxed trait objects - the `decode` match is exhaustiveness-checked
//! and the `Decoder` trait keeps its generic async method. Pseudo-encodings
//! that touch session state rather than the canvas (DesktopSize,
//! DesktopName, LastRect) are handled by the dispatcher and never appear
//! here.

use anyhow::Result;
use rfb_canvas::Canvas;
use rfb_encodings as enc;
use rfb_encodings::{Decoder, Rectangle, RfbInStream, ZlibStreamSet};
use std::collections::HashMap;
use tokio::io::AsyncRead;

/// Human-readable name for an encoding tag, for logs and errors.
pub fn encoding_name(tag: i32) -> &'static str {
    match tag {
        enc::ENCODING_RAW => "Raw",
        enc::ENCODING_COPY_RECT => "CopyRect",
        enc::ENCODING_RRE => "RRE",
        enc::ENCODING_CORRE => "CoRRE",
        enc::ENCODING_HEXTILE => "Hextile",
        enc::ENCODING_ZLIB => "Zlib",
        enc::ENCODING_TIGHT => "Tight",
        enc::ENCODING_ZRLE => "ZRLE",
        enc::ENCODING_DESKTOP_SIZE => "DesktopSize",
        enc::ENCODING_LAST_RECT => "LastRect",
        enc::ENCODING_CURSOR => "Cursor",
        enc::ENCODING_XCURSOR => "XCursor",
        enc::ENCODING_POINTER_POS => "PointerPos",
        enc::ENCODING_TIGHT_PNG => "TightPNG",
        enc::ENCODING_DESKTOP_NAME => "DesktopName",
        _ => "unknown",
    }
}

/// One registered decoder.
pub enum DecoderEntry {
    Raw(enc::RawDecoder),
    CopyRect(enc::CopyRectDecoder),
    RRE(enc::RREDecoder),
    CoRRE(enc::CoRREDecoder),
    Hextile(enc::HextileDecoder),
    Zlib(enc::ZlibDecoder),
    ZRLE(enc::ZRLEDecoder),
    Tight(enc::TightDecoder),
    TightPng(enc::TightDecoder),
    Cursor(enc::CursorDecoder),
    XCursor(enc::XCursorDecoder),
    PointerPos(enc::PointerPosDecoder),
}

impl DecoderEntry {
    pub fn encoding_type(&self) -> i32 {
        match self {
            Self::Raw(d) => d.encoding_type(),
            Self::CopyRect(d) => d.encoding_type(),
            Self::RRE(d) => d.encoding_type(),
            Self::CoRRE(d) => d.encoding_type(),
            Self::Hextile(d) => d.encoding_type(),
            Self::Zlib(d) => d.encoding_type(),
            Self::ZRLE(d) => d.encoding_type(),
            Self::Tight(d) => d.encoding_type(),
            Self::TightPng(d) => d.encoding_type(),
            Self::Cursor(d) => d.encoding_type(),
            Self::XCursor(d) => d.encoding_type(),
            Self::PointerPos(d) => d.encoding_type(),
        }
    }

    pub async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        canvas: &mut Canvas,
        zlib: &mut ZlibStreamSet,
    ) -> Result<()> {
        match self {
            Self::Raw(d) => d.decode(stream, rect, canvas, zlib).await,
            Self::CopyRect(d) => d.decode(stream, rect, canvas, zlib).await,
            Self::RRE(d) => d.decode(stream, rect, canvas, zlib).await,
            Self::CoRRE(d) => d.decode(stream, rect, canvas, zlib).await,
            Self::Hextile(d) => d.decode(stream, rect, canvas, zlib).await,
            Self::Zlib(d) => d.decode(stream, rect, canvas, zlib).await,
            Self::ZRLE(d) => d.decode(stream, rect, canvas, zlib).await,
            Self::Tight(d) => d.decode(stream, rect, canvas, zlib).await,
            Self::TightPng(d) => d.decode(stream, rect, canvas, zlib).await,
            Self::Cursor(d) => d.decode(stream, rect, canvas, zlib).await,
            Self::XCursor(d) => d.decode(stream, rect, canvas, zlib).await,
            Self::PointerPos(d) => d.decode(stream, rect, canvas, zlib).await,
        }
    }
}

/// Registry keyed by wire tag.
#[derive(Default)]
pub struct DecoderRegistry {
    decoders: HashMap<i32, DecoderEntry>,
}

impl DecoderRegistry {
    /// A registry with every supported encoding registered.
    pub fn with_standard() -> Self {
        let mut registry = Self::default();
        registry.register(DecoderEntry::Raw(enc::RawDecoder));
        registry.register(DecoderEntry::CopyRect(enc::CopyRectDecoder));
        registry.register(DecoderEntry::RRE(enc::RREDecoder));
        registry.register(DecoderEntry::CoRRE(enc::CoRREDecoder));
        registry.register(DecoderEntry::Hextile(enc::HextileDecoder));
        registry.register(DecoderEntry::Zlib(enc::ZlibDecoder));
        registry.register(DecoderEntry::ZRLE(enc::ZRLEDecoder));
        registry.register(DecoderEntry::Tight(enc::TightDecoder::new()));
        registry.register(DecoderEntry::TightPng(enc::TightDecoder::tight_png()));
        registry.register(DecoderEntry::Cursor(enc::CursorDecoder));
        registry.register(DecoderEntry::XCursor(enc::XCursorDecoder));
        registry.register(DecoderEntry::PointerPos(enc::PointerPosDecoder));
        registry
    }

    /// Register (or replace) a decoder under its own tag.
    pub fn register(&mut self, decoder: DecoderEntry) {
        self.decoders.insert(decoder.encoding_type(), decoder);
    }

    /// Look up the decoder for a wire tag.
    pub fn get(&self, encoding: i32) -> Option<&DecoderEntry> {
        self.decoders.get(&encoding)
    }
}
