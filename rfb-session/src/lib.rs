//! Framebuffer-update dispatch for an RFB (VNC) client session.
//!
//! The external message pump reads the 1-byte message type; on a
//! `FramebufferUpdate` it hands the stream to [`Session::apply_update`],
//! which walks the rectangle list, dispatches each rectangle to the decoder
//! registered for its encoding tag, and keeps the cursor overlay out of the
//! way while pixels land. SetPixelFormat and SetColourMapEntries messages
//! route through [`Session::set_pixel_format`] and
//! [`Session::set_color_map`].
//!
//! All multi-rectangle ordering, the LastRect / 0xFFFF placeholder handling,
//! DesktopSize resizes, and DesktopName updates live here; the per-encoding
//! wire formats live in `rfb-encodings`.
//!
//! # Failure model
//!
//! Every [`DecodeError`] is fatal to the connection. The dispatcher adds the
//! rectangle header and encoding to whatever the decoder reported, then gives
//! up; realigning an RFB stream after a parse error is not possible.

pub mod errors;
pub mod registry;
pub mod session;

pub use errors::DecodeError;
pub use registry::{encoding_name, DecoderRegistry};
pub use session::{Session, UpdateOutcome};

pub use rfb_canvas::{Canvas, PixelFormat, Snapshot};
