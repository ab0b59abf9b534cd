//! RFB message and field types consumed by the decode pipeline.

pub mod server;
pub mod types;
