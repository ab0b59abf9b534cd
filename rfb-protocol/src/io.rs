//! Byte-accurate input stream for RFB protocol data.
//!
//! An RFB connection interleaves two very different read shapes: tiny
//! big-endian header fields (message types, rectangle headers, lengths) and
//! bulk pixel payloads that can run to megabytes for a single Raw rectangle.
//! [`RfbInStream`] treats them differently:
//!
//! - **Field reads** ([`read_u8`](RfbInStream::read_u8) ..
//!   [`read_i32`](RfbInStream::read_i32)) go through a small internal buffer
//!   so a 12-byte rectangle header does not cost six socket reads.
//! - **Payload reads** ([`read_bytes`](RfbInStream::read_bytes)) drain
//!   whatever the field buffer already holds, then read the remainder
//!   straight into the caller's slice - pixel data is never staged through
//!   an intermediate buffer.
//!
//! Either way a read consumes exactly the bytes of the requested field. The
//! decode pipeline depends on that: the next rectangle header begins
//! immediately after the previous payload, and one stray byte desynchronises
//! the whole connection.
//!
//! # Example
//!
//! ```no_run
//! use rfb_protocol::io::RfbInStream;
//!
//! # async fn example<R: tokio::io::AsyncRead + Unpin>(reader: R) -> std::io::Result<()> {
//! let mut stream = RfbInStream::new(reader);
//! stream.skip(1).await?; // padding
//! let rect_count = stream.read_u16().await?;
//! # Ok(())
//! # }
//! ```

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Field-buffer capacity. Headers are at most a handful of bytes each; this
/// just has to amortise socket reads across a burst of small fields.
const FIELD_CAPACITY: usize = 4096;

/// Buffered big-endian reader over any tokio [`AsyncRead`].
pub struct RfbInStream<R> {
    reader: R,
    fields: BytesMut,
}

impl<R: AsyncRead + Unpin> RfbInStream<R> {
    /// Wrap a reader positioned inside an RFB byte stream.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            fields: BytesMut::with_capacity(FIELD_CAPACITY),
        }
    }

    /// Make sure a whole `need`-byte field is buffered.
    ///
    /// An EOF inside a field is fatal - there is no way to resume a
    /// half-delivered header.
    async fn buffer_field(&mut self, need: usize) -> std::io::Result<()> {
        while self.fields.len() < need {
            if self.reader.read_buf(&mut self.fields).await? == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "stream ended {} bytes into a {}-byte field",
                        self.fields.len(),
                        need
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Read a single byte.
    pub async fn read_u8(&mut self) -> std::io::Result<u8> {
        self.buffer_field(1).await?;
        Ok(self.fields.get_u8())
    }

    /// Read a big-endian u16.
    pub async fn read_u16(&mut self) -> std::io::Result<u16> {
        self.buffer_field(2).await?;
        Ok(self.fields.get_u16())
    }

    /// Read a big-endian u32.
    pub async fn read_u32(&mut self) -> std::io::Result<u32> {
        self.buffer_field(4).await?;
        Ok(self.fields.get_u32())
    }

    /// Read a big-endian i32 (encoding tags are signed).
    pub async fn read_i32(&mut self) -> std::io::Result<i32> {
        self.buffer_field(4).await?;
        Ok(self.fields.get_i32())
    }

    /// Read exactly `buf.len()` payload bytes.
    ///
    /// Bytes already sitting in the field buffer come first (a payload often
    /// starts life in the same socket read as its header); the rest is read
    /// directly into `buf`, so large pixel runs are copied once.
    pub async fn read_bytes(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        let staged = self.fields.len().min(buf.len());
        if staged > 0 {
            self.fields.copy_to_slice(&mut buf[..staged]);
        }
        if staged < buf.len() {
            self.reader.read_exact(&mut buf[staged..]).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("stream ended inside a {}-byte payload", buf.len()),
                    )
                } else {
                    e
                }
            })?;
        }
        Ok(())
    }

    /// Discard `n` bytes (padding and deferred payloads).
    pub async fn skip(&mut self, n: usize) -> std::io::Result<()> {
        let staged = self.fields.len().min(n);
        self.fields.advance(staged);

        let mut left = n - staged;
        let mut scratch = [0u8; 256];
        while left > 0 {
            let take = left.min(scratch.len());
            self.read_bytes(&mut scratch[..take]).await?;
            left -= take;
        }
        Ok(())
    }

    /// Consume the stream and return the underlying reader.
    ///
    /// The message pump takes the socket back this way when it tears the
    /// connection down.
    pub fn into_inner(self) -> R {
        self.reader
    }
}
