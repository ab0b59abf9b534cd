//! Server-to-client message bodies the decode core consumes.
//!
//! Only the pieces the pipeline needs are here: the message pump reads the
//! 1-byte message type and hands the stream to the matching parser. The
//! `FramebufferUpdate` body itself is not materialised as a struct - its
//! rectangles interleave headers with encoding payloads, so the dispatcher
//! walks it in place.

use crate::io::RfbInStream;
use tokio::io::AsyncRead;

/// One entry of a SetColourMapEntries message: 16-bit RGB channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorMapEntry {
    pub red: u16,
    pub green: u16,
    pub blue: u16,
}

/// Body of the SetColourMapEntries message (type 1).
///
/// # Wire Format
///
/// - 1 byte: padding
/// - 2 bytes: first colour index
/// - 2 bytes: number of colours
/// - 6 bytes per colour: red, green, blue as u16
///
/// Servers running a non-true-colour session send this before any paletted
/// pixel is decoded; the session folds the entries into its [`ColorMap`]
/// (the 16-bit channels are scaled down to 8-bit there).
///
/// [`ColorMap`]: https://docs.rs/rfb-canvas
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorMapEntries {
    pub first_color: u16,
    pub colors: Vec<ColorMapEntry>,
}

impl ColorMapEntries {
    /// Read the message body (the message type byte is already consumed).
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        stream.skip(1).await?; // padding
        let first_color = stream.read_u16().await?;
        let count = stream.read_u16().await? as usize;

        let mut colors = Vec::with_capacity(count);
        for _ in 0..count {
            colors.push(ColorMapEntry {
                red: stream.read_u16().await?,
                green: stream.read_u16().await?,
                blue: stream.read_u16().await?,
            });
        }

        Ok(Self {
            first_color,
            colors,
        })
    }
}
