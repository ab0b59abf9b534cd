//! Wire-level reading for the RFB (VNC) protocol.
//!
//! This crate provides the byte-accurate input side of the protocol as the
//! decode pipeline consumes it:
//!
//! - [`io::RfbInStream`] - buffered big-endian reader over any tokio
//!   [`AsyncRead`](tokio::io::AsyncRead)
//! - [`messages::types::PixelFormat`] - the 16-byte wire pixel format
//! - [`messages::types::Rectangle`] - the 12-byte rectangle header
//! - [`messages::server::ColorMapEntries`] - SetColourMapEntries body
//!
//! The handshake, security negotiation, transport, and all client-to-server
//! messages live outside this repository; the decode core is handed a reader
//! positioned at the start of a `FramebufferUpdate` body together with the
//! negotiated pixel format.

pub mod io;
pub mod messages;

pub use io::RfbInStream;
