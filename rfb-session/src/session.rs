//! Session state and the framebuffer-update dispatcher.

use crate::errors::DecodeError;
use crate::registry::{encoding_name, DecoderRegistry};
use rfb_canvas::{Canvas, PixelFormat, Snapshot};
use rfb_common::Rect;
use rfb_encodings as enc;
use rfb_encodings::ZlibStreamSet;
use rfb_protocol::io::RfbInStream;
use rfb_protocol::messages::server::ColorMapEntries;
use rfb_protocol::messages::types::Rectangle;
use tokio::io::AsyncRead;

/// What a completed update did, for the caller driving requests.
#[derive(Debug, Clone, Default)]
pub struct UpdateOutcome {
    /// A DesktopSize rectangle changed the framebuffer dimensions; the next
    /// FramebufferUpdateRequest must use the new size.
    pub resized: bool,
    /// Pixel-carrying rectangles applied, in wire order.
    pub damage: Vec<Rect>,
}

/// One RFB session's decode state: the canvas, the persistent zlib streams,
/// the decoder registry, and the desktop name.
///
/// The pipeline is strictly sequential - one update at a time, rectangles in
/// wire order, nothing visible to readers until the rectangle that produced
/// it has completed. Readers take [`snapshot`](Self::snapshot) copies between
/// updates; the zlib streams and cursor state are never exposed.
pub struct Session {
    canvas: Canvas,
    zlib: ZlibStreamSet,
    registry: DecoderRegistry,
    desktop_name: Option<String>,
}

impl Session {
    /// Create a session from the server-init metadata.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self, DecodeError> {
        let canvas = Canvas::new(width, height, format)?;
        Ok(Self {
            canvas,
            zlib: ZlibStreamSet::new(),
            registry: DecoderRegistry::with_standard(),
            desktop_name: None,
        })
    }

    /// The canvas (read-only; mutations go through updates).
    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    /// The most recent DesktopName update, if any.
    pub fn desktop_name(&self) -> Option<&str> {
        self.desktop_name.as_deref()
    }

    /// Copy the framebuffer. Call between updates only - the update loop
    /// holds `&mut self`, so the borrow checker enforces the boundary.
    pub fn snapshot(&self) -> Snapshot {
        self.canvas.snapshot()
    }

    /// The persistent zlib streams (read-only observability).
    pub fn zlib_streams(&self) -> &ZlibStreamSet {
        &self.zlib
    }

    /// Handle a SetPixelFormat message.
    pub fn set_pixel_format(&mut self, format: PixelFormat) -> Result<(), DecodeError> {
        self.canvas.set_pixel_format(format)?;
        Ok(())
    }

    /// Handle a SetColourMapEntries message.
    pub fn set_color_map(&mut self, entries: &ColorMapEntries) {
        let colors: Vec<(u16, u16, u16)> = entries
            .colors
            .iter()
            .map(|c| (c.red, c.green, c.blue))
            .collect();
        self.canvas.set_color_map_entries(entries.first_color, &colors);
    }

    /// Apply one `FramebufferUpdate` message body.
    ///
    /// `stream` must be positioned at the first byte after the message type.
    /// Reads the padding byte and rectangle count, then decodes up to that
    /// many rectangles. A LastRect pseudo-rectangle stops iteration early;
    /// when the count is the 0xFFFF placeholder, LastRect is the only valid
    /// terminator.
    ///
    /// On error the canvas may hold a partial update but the session must be
    /// discarded - the stream position is unrecoverable.
    pub async fn apply_update<R: AsyncRead + Unpin>(
        &mut self,
        stream: &mut RfbInStream<R>,
    ) -> Result<UpdateOutcome, DecodeError> {
        stream.skip(1).await.map_err(DecodeError::from_io)?; // padding
        let count = stream.read_u16().await.map_err(DecodeError::from_io)?;
        let placeholder = count == 0xFFFF;

        tracing::debug!(
            "framebuffer update with {} rectangles{}",
            count,
            if placeholder { " (placeholder count)" } else { "" }
        );

        let mut outcome = UpdateOutcome::default();
        let mut applied = 0u16;

        while placeholder || applied < count {
            let rect = Rectangle::read_from(stream)
                .await
                .map_err(DecodeError::from_io)?;
            let name = encoding_name(rect.encoding);

            tracing::trace!(
                "rectangle [{},{} {}x{}] encoding {} ({})",
                rect.x,
                rect.y,
                rect.width,
                rect.height,
                rect.encoding,
                name
            );

            match rect.encoding {
                enc::ENCODING_LAST_RECT => break,
                enc::ENCODING_DESKTOP_SIZE => {
                    self.canvas.hide_cursor();
                    self.canvas.resize(rect.width as u32, rect.height as u32);
                    outcome.resized = true;
                }
                enc::ENCODING_DESKTOP_NAME => {
                    self.read_desktop_name(stream, &rect).await?;
                }
                tag => {
                    let decoder = self
                        .registry
                        .get(tag)
                        .ok_or(DecodeError::UnsupportedEncoding(tag))?;

                    if carries_pixels(tag) {
                        self.check_bounds(&rect, name)?;
                    }

                    self.canvas.hide_cursor();
                    let result = decoder
                        .decode(stream, &rect, &mut self.canvas, &mut self.zlib)
                        .await;
                    self.canvas.show_cursor();
                    result.map_err(|e| DecodeError::from_decoder(e, name, &rect))?;

                    if carries_pixels(tag) {
                        outcome.damage.push(Rect::new(
                            rect.x as i32,
                            rect.y as i32,
                            rect.width as u32,
                            rect.height as u32,
                        ));
                    }
                }
            }

            applied = applied.saturating_add(1);
        }

        // The canvas is fully updated; make sure the cursor overlay is back.
        self.canvas.show_cursor();
        Ok(outcome)
    }

    async fn read_desktop_name<R: AsyncRead + Unpin>(
        &mut self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
    ) -> Result<(), DecodeError> {
        let len = stream.read_u32().await.map_err(DecodeError::from_io)?;
        let mut bytes = vec![0u8; len as usize];
        stream
            .read_bytes(&mut bytes)
            .await
            .map_err(DecodeError::from_io)?;

        let name = String::from_utf8(bytes).map_err(|e| DecodeError::MalformedEncoding {
            name: "DesktopName",
            encoding: rect.encoding,
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            source: anyhow::anyhow!("desktop name is not UTF-8: {}", e),
        })?;

        tracing::debug!("desktop name is now {:?}", name);
        self.desktop_name = Some(name);
        Ok(())
    }

    fn check_bounds(&self, rect: &Rectangle, name: &'static str) -> Result<(), DecodeError> {
        let (canvas_width, canvas_height) = self.canvas.dimensions();
        if rect.x as u32 + rect.width as u32 > canvas_width
            || rect.y as u32 + rect.height as u32 > canvas_height
        {
            return Err(DecodeError::OutOfBounds {
                name,
                x: rect.x,
                y: rect.y,
                width: rect.width,
                height: rect.height,
                canvas_width,
                canvas_height,
            });
        }
        Ok(())
    }
}

/// Whether a tag's rectangle writes framebuffer pixels (as opposed to
/// cursor/metadata side effects).
fn carries_pixels(tag: i32) -> bool {
    tag >= 0 || tag == enc::ENCODING_TIGHT_PNG
}
