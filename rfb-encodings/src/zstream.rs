//! Session-scoped persistent zlib inflate state.
//!
//! Three encodings carry zlib data and none of them frame it per rectangle:
//!
//! - **Tight** multiplexes four streams (ids 0..3). A rectangle's compressed
//!   block continues whatever dictionary the stream accumulated from earlier
//!   rectangles; only an explicit reset bit in the compression control byte
//!   starts a stream over.
//! - **Zlib** uses a single stream, reset once at connection start and never
//!   again.
//! - **ZRLE** likewise appends every rectangle to one dedicated stream.
//!
//! Because the state outlives any one rectangle, it lives here as session
//! state. The session owns one [`ZlibStreamSet`] and lends it to each decode
//! call; decoders never own streams.

use flate2::{Decompress, FlushDecompress, Status};
use thiserror::Error;

/// Number of multiplexed Tight streams.
pub const TIGHT_STREAM_COUNT: usize = 4;

/// A zlib failure on a specific stream.
///
/// Kept as a concrete type (rather than a bare `anyhow` message) so the
/// dispatcher can classify it when it surfaces a decode error.
#[derive(Debug, Error)]
#[error("zlib stream {stream} failed: {cause}")]
pub struct InflateError {
    /// Which stream broke: `tight-0`..`tight-3`, `zlib`, or `zrle`.
    pub stream: &'static str,
    pub cause: String,
}

const TIGHT_STREAM_NAMES: [&str; TIGHT_STREAM_COUNT] =
    ["tight-0", "tight-1", "tight-2", "tight-3"];

/// The persistent inflate contexts of one session.
pub struct ZlibStreamSet {
    tight: [Option<Decompress>; TIGHT_STREAM_COUNT],
    zlib: Option<Decompress>,
    zrle: Option<Decompress>,
}

impl Default for ZlibStreamSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ZlibStreamSet {
    /// Fresh state, as at connection start. Streams initialise lazily on
    /// first use, so the first block of each must carry a zlib header.
    pub fn new() -> Self {
        Self {
            tight: [None, None, None, None],
            zlib: None,
            zrle: None,
        }
    }

    /// Drop Tight stream `id`; the next block starts a new zlib stream.
    pub fn reset_tight(&mut self, id: usize) {
        tracing::debug!("resetting tight zlib stream {}", id);
        self.tight[id] = None;
    }

    /// Whether Tight stream `id` holds accumulated state.
    pub fn tight_stream_active(&self, id: usize) -> bool {
        self.tight[id].is_some()
    }

    /// Inflate a Tight block through stream `id`, expecting an exact output
    /// size.
    pub fn inflate_tight(
        &mut self,
        id: usize,
        input: &[u8],
        expected: usize,
    ) -> Result<Vec<u8>, InflateError> {
        let stream = self.tight[id].get_or_insert_with(|| Decompress::new(true));
        inflate_exact(stream, TIGHT_STREAM_NAMES[id], input, expected)
    }

    /// Inflate a Zlib-encoding block, expecting an exact output size.
    pub fn inflate_zlib(&mut self, input: &[u8], expected: usize) -> Result<Vec<u8>, InflateError> {
        let stream = self.zlib.get_or_insert_with(|| Decompress::new(true));
        inflate_exact(stream, "zlib", input, expected)
    }

    /// Inflate a ZRLE block; output size is only known after decoding the
    /// tile stream, so this grows the buffer as the inflater produces data.
    pub fn inflate_zrle(&mut self, input: &[u8]) -> Result<Vec<u8>, InflateError> {
        let stream = self.zrle.get_or_insert_with(|| Decompress::new(true));

        let mut output = Vec::new();
        let mut chunk = vec![0u8; 64 * 1024];
        let mut in_pos = 0;

        while in_pos < input.len() {
            let before_in = stream.total_in();
            let before_out = stream.total_out();

            let status = stream
                .decompress(&input[in_pos..], &mut chunk, FlushDecompress::Sync)
                .map_err(|e| InflateError {
                    stream: "zrle",
                    cause: e.to_string(),
                })?;

            let consumed = (stream.total_in() - before_in) as usize;
            let produced = (stream.total_out() - before_out) as usize;
            in_pos += consumed;
            output.extend_from_slice(&chunk[..produced]);

            match status {
                Status::StreamEnd => break,
                _ if consumed == 0 && produced == 0 => {
                    return Err(InflateError {
                        stream: "zrle",
                        cause: format!(
                            "inflater stalled with {} input bytes left",
                            input.len() - in_pos
                        ),
                    });
                }
                _ => {}
            }
        }

        Ok(output)
    }
}

/// One decompress step; returns (input consumed, output produced, status).
fn inflate_step(
    stream: &mut Decompress,
    name: &'static str,
    input: &[u8],
    output: &mut [u8],
) -> Result<(usize, usize, Status), InflateError> {
    let before_in = stream.total_in();
    let before_out = stream.total_out();

    let status = stream
        .decompress(input, output, FlushDecompress::Sync)
        .map_err(|e| InflateError {
            stream: name,
            cause: e.to_string(),
        })?;

    Ok((
        (stream.total_in() - before_in) as usize,
        (stream.total_out() - before_out) as usize,
        status,
    ))
}

/// Feed `input` through `stream`, requiring exactly `expected` output bytes.
///
/// The whole block is consumed even once the output is complete - a sync
/// flush trailer produces nothing but still advances the stream, and the
/// next rectangle continues right after it.
fn inflate_exact(
    stream: &mut Decompress,
    name: &'static str,
    input: &[u8],
    expected: usize,
) -> Result<Vec<u8>, InflateError> {
    let mut output = vec![0u8; expected];
    let mut in_pos = 0;
    let mut out_pos = 0;

    while in_pos < input.len() {
        let (consumed, produced, status) =
            inflate_step(stream, name, &input[in_pos..], &mut output[out_pos..])?;
        in_pos += consumed;
        out_pos += produced;

        if matches!(status, Status::StreamEnd) {
            break;
        }
        if consumed == 0 && produced == 0 {
            if out_pos < expected {
                return Err(InflateError {
                    stream: name,
                    cause: format!(
                        "inflater stalled at {} of {} output bytes",
                        out_pos, expected
                    ),
                });
            }
            // Output is complete but trailer bytes remain; step through them
            // with scratch space. Any real output here means the block is
            // bigger than the rectangle claims.
            let mut scratch = [0u8; 64];
            let (c, p, s) = inflate_step(stream, name, &input[in_pos..], &mut scratch)?;
            if p > 0 {
                return Err(InflateError {
                    stream: name,
                    cause: format!("block inflates past the expected {} bytes", expected),
                });
            }
            in_pos += c;
            if matches!(s, Status::StreamEnd) {
                break;
            }
            if c == 0 {
                return Err(InflateError {
                    stream: name,
                    cause: format!(
                        "inflater stalled with {} trailer bytes left",
                        input.len() - in_pos
                    ),
                });
            }
        }
    }

    if out_pos != expected {
        return Err(InflateError {
            stream: name,
            cause: format!("block inflated to {} bytes, expected {}", out_pos, expected),
        });
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::{Compress, Compression, FlushCompress};
    use std::io::Write;

    fn compress(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_inflate_exact_round_trip() {
        let mut streams = ZlibStreamSet::new();
        let payload = b"the quick brown fox jumps over the lazy dog";
        let out = streams
            .inflate_tight(0, &compress(payload), payload.len())
            .unwrap();
        assert_eq!(&out, payload);
        assert!(streams.tight_stream_active(0));
        assert!(!streams.tight_stream_active(1));
    }

    #[test]
    fn test_inflate_exact_rejects_short_output() {
        let mut streams = ZlibStreamSet::new();
        let payload = b"12345678";
        let err = streams
            .inflate_tight(0, &compress(payload), payload.len() + 4)
            .unwrap_err();
        assert_eq!(err.stream, "tight-0");
        assert!(err.cause.contains("expected"));
    }

    #[test]
    fn test_inflate_exact_rejects_garbage() {
        let mut streams = ZlibStreamSet::new();
        assert!(streams.inflate_zlib(&[0x12, 0x34, 0x56], 8).is_err());
    }

    #[test]
    fn test_tight_streams_are_independent() {
        let mut streams = ZlibStreamSet::new();
        let a = b"stream zero payload";
        let b = b"stream one payload!";
        assert_eq!(streams.inflate_tight(0, &compress(a), a.len()).unwrap(), a);
        assert_eq!(streams.inflate_tight(1, &compress(b), b.len()).unwrap(), b);
    }

    #[test]
    fn test_reset_allows_fresh_header() {
        let mut streams = ZlibStreamSet::new();
        let first = b"first block";
        streams.inflate_tight(2, &compress(first), first.len()).unwrap();

        streams.reset_tight(2);
        assert!(!streams.tight_stream_active(2));

        // A new header after reset must parse cleanly.
        let second = b"second, unrelated block";
        let out = streams.inflate_tight(2, &compress(second), second.len()).unwrap();
        assert_eq!(&out, second);
    }

    #[test]
    fn test_zrle_stream_continues_across_blocks() {
        // Two sync-flushed chunks of a single deflate stream, fed as two
        // rectangle payloads: the second has no zlib header.
        let part1 = b"tile data for rectangle one ";
        let part2 = b"and a continuation for rectangle two";

        let mut compressor = Compress::new(Compression::default(), true);
        let mut block1 = vec![0u8; 256];
        let mut block2 = vec![0u8; 256];
        compressor
            .compress(part1, &mut block1, FlushCompress::Sync)
            .unwrap();
        let in1 = compressor.total_in() as usize;
        let len1 = compressor.total_out() as usize;
        assert_eq!(in1, part1.len());
        compressor
            .compress(part2, &mut block2, FlushCompress::Sync)
            .unwrap();
        let len2 = compressor.total_out() as usize - len1;

        let mut streams = ZlibStreamSet::new();
        assert_eq!(streams.inflate_zrle(&block1[..len1]).unwrap(), part1);
        assert_eq!(streams.inflate_zrle(&block2[..len2]).unwrap(), part2);
    }
}
