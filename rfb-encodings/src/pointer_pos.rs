//! PointerPos pseudo-encoding decoder - server-side pointer movement.
//!
//! No payload: the rectangle header's (x, y) is the new pointer position.
//! The cursor compositor repaints at the new position offset by the shape's
//! hotspot.

use crate::{Decoder, Rectangle, RfbInStream, ZlibStreamSet, ENCODING_POINTER_POS};
use anyhow::Result;
use rfb_canvas::Canvas;
use tokio::io::AsyncRead;

/// Decoder for the PointerPos pseudo-encoding.
pub struct PointerPosDecoder;

impl Decoder for PointerPosDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_POINTER_POS
    }

    async fn decode<R: AsyncRead + Unpin>(
        &self,
        _stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        canvas: &mut Canvas,
        _zlib: &mut ZlibStreamSet,
    ) -> Result<()> {
        canvas.move_cursor(rect.x as i32, rect.y as i32);
        Ok(())
    }
}
