//! RGBA canvas and pixel translation for the RFB decode core.
//!
//! The remote framebuffer arrives in whatever pixel format the session
//! negotiated; this crate normalizes everything to RGBA8888 at decode time:
//!
//! - [`PixelFormat`] - validated session pixel format (bool-typed, unlike the
//!   raw wire form)
//! - [`PixelTranslator`] - converts wire pixels and CPIXELs to RGBA, using a
//!   [`ColorMap`] when the session is not true-colour
//! - [`Canvas`] - the framebuffer surface with fill/blit/copy/palette-expand
//!   operations and a cursor layer composited with save-under semantics
//!
//! The canvas is a single-writer resource owned by the decode pipeline.
//! External readers get a [`Snapshot`] copy at update boundaries; the pixel
//! buffer itself is never shared.

pub mod canvas;
pub mod cursor;
pub mod format;
pub mod translate;

pub use canvas::{Canvas, Snapshot};
pub use format::{PixelFormat, PixelFormatError};
pub use translate::{ColorMap, CPixelMode, PixelTranslator};
