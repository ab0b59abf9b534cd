//! The typed error surface of the decode pipeline.
//!
//! Every error here is terminal for the connection: once a rectangle fails
//! to parse, the byte stream cannot be realigned and the owner of the socket
//! is expected to close it. Nothing in this layer retries.

use rfb_canvas::PixelFormatError;
use rfb_protocol::messages::types::Rectangle;
use thiserror::Error;

/// Why a framebuffer update could not be applied.
///
/// Variants that concern a specific rectangle carry its header and encoding
/// for diagnostics - by the time an error surfaces the stream position is
/// gone, so this is the only context anyone will ever get.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The stream ended in the middle of a protocol field.
    #[error("stream ended mid-field: {0}")]
    UnexpectedEof(#[source] std::io::Error),

    /// Any other transport-level read failure.
    #[error("read failed: {0}")]
    Io(#[source] std::io::Error),

    /// The server sent an encoding tag nothing is registered for.
    #[error("unsupported encoding {0}")]
    UnsupportedEncoding(i32),

    /// The session pixel format failed validation.
    #[error("invalid pixel format: {0}")]
    InvalidPixelFormat(#[from] PixelFormatError),

    /// A pixel-carrying rectangle does not fit the canvas.
    #[error(
        "{name} rectangle [{x},{y} {width}x{height}] exceeds the {canvas_width}x{canvas_height} canvas"
    )]
    OutOfBounds {
        name: &'static str,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        canvas_width: u32,
        canvas_height: u32,
    },

    /// A persistent zlib stream rejected its input.
    #[error("zlib stream {stream} failed in {name} rectangle [{x},{y} {width}x{height}]: {cause}")]
    Decompression {
        stream: &'static str,
        cause: String,
        name: &'static str,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
    },

    /// Any structural violation inside a rectangle's payload.
    #[error("malformed {name} rectangle [{x},{y} {width}x{height}] (tag {encoding}): {source}")]
    MalformedEncoding {
        name: &'static str,
        encoding: i32,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        #[source]
        source: anyhow::Error,
    },
}

impl DecodeError {
    /// Wrap a transport read error, separating a mid-field EOF from other
    /// I/O failures.
    pub(crate) fn from_io(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::UnexpectedEof(err)
        } else {
            Self::Io(err)
        }
    }

    /// Classify a decoder failure for the given rectangle.
    ///
    /// Walks the error chain so a zlib failure or EOF keeps its identity no
    /// matter how much context decoders stacked on top.
    pub(crate) fn from_decoder(err: anyhow::Error, name: &'static str, rect: &Rectangle) -> Self {
        for cause in err.chain() {
            if let Some(inflate) = cause.downcast_ref::<rfb_encodings::InflateError>() {
                return Self::Decompression {
                    stream: inflate.stream,
                    cause: inflate.cause.clone(),
                    name,
                    x: rect.x,
                    y: rect.y,
                    width: rect.width,
                    height: rect.height,
                };
            }
            if let Some(io) = cause.downcast_ref::<std::io::Error>() {
                if io.kind() == std::io::ErrorKind::UnexpectedEof {
                    return Self::UnexpectedEof(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("{:#}", err),
                    ));
                }
            }
        }

        Self::MalformedEncoding {
            name,
            encoding: rect.encoding,
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            source: err,
        }
    }
}
