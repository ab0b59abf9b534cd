//! Tight encoding decoder - filtered zlib, JPEG, and (TightPNG) PNG.
//!
//! # Compression control byte
//!
//! Every rectangle leads with one control byte. Bits 0..3 are stream-reset
//! flags: bit N set drops persistent zlib stream N before anything else
//! happens. The upper nibble selects the mode:
//!
//! ```text
//! 0x8  Fill   one CPIXEL fills the rectangle
//! 0x9  JPEG   compact length + JPEG image
//! 0xA  PNG    compact length + PNG image (TightPNG sessions only)
//! 0x0-0x7     basic: nibble bits 0-1 pick the read stream (0..3),
//!             nibble bit 2 means an explicit filter id byte follows
//! ```
//!
//! # Basic-mode filters
//!
//! - **Copy** (0, also implied when no filter byte is present): a raw CPIXEL
//!   stream, `width * height * cpixel_len` bytes.
//! - **Palette** (1): palette size byte (N-1), N CPIXELs, then indices -
//!   1 bit per pixel with byte-padded rows when N = 2, one byte per pixel
//!   otherwise.
//! - **Gradient** (2): prediction filter; rendering is deferred, but the
//!   `width * height * bytes_per_pixel` filtered bytes are still consumed so
//!   the stream stays aligned.
//!
//! # The 12-byte rule
//!
//! Basic-mode payloads whose uncompressed size is under 12 bytes are sent
//! uncompressed with no length prefix; everything else is a compact length
//! followed by zlib data through the selected stream. This threshold is load
//! bearing - without it small palette and copy rectangles cannot be framed.
//!
//! # Compact lengths
//!
//! 1-3 bytes, 7 bits per byte with the high bit as a continuation flag; the
//! third byte contributes all 8 of its bits.

use crate::{
    Decoder, Rectangle, RfbInStream, ZlibStreamSet, ENCODING_TIGHT, ENCODING_TIGHT_PNG,
};
use anyhow::{anyhow, bail, Context, Result};
use rfb_canvas::Canvas;
use rfb_common::Rect;
use std::io::Cursor;
use tokio::io::AsyncRead;

const TIGHT_FILL: u8 = 0x08;
const TIGHT_JPEG: u8 = 0x09;
const TIGHT_PNG: u8 = 0x0A;
const TIGHT_EXPLICIT_FILTER: u8 = 0x04;

const FILTER_COPY: u8 = 0;
const FILTER_PALETTE: u8 = 1;
const FILTER_GRADIENT: u8 = 2;

/// Payloads below this size skip zlib framing entirely.
const TIGHT_MIN_TO_COMPRESS: usize = 12;

/// Decoder for Tight (7) and TightPNG (-260).
///
/// The two tags share everything except that PNG mode is only legal on a
/// TightPNG session.
pub struct TightDecoder {
    encoding: i32,
    png_allowed: bool,
}

impl Default for TightDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl TightDecoder {
    /// Standard Tight: PNG rectangles are a protocol error.
    pub fn new() -> Self {
        Self {
            encoding: ENCODING_TIGHT,
            png_allowed: false,
        }
    }

    /// TightPNG variant: mode 0xA carries a PNG image.
    pub fn tight_png() -> Self {
        Self {
            encoding: ENCODING_TIGHT_PNG,
            png_allowed: true,
        }
    }

    /// Read a Tight compact length (1-3 bytes).
    async fn read_compact_length<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> Result<usize> {
        let b0 = stream
            .read_u8()
            .await
            .context("failed to read compact length byte 0")?;
        if b0 & 0x80 == 0 {
            return Ok(b0 as usize);
        }

        let b1 = stream
            .read_u8()
            .await
            .context("failed to read compact length byte 1")?;
        let mut length = (b0 & 0x7F) as usize | ((b1 & 0x7F) as usize) << 7;
        if b1 & 0x80 == 0 {
            return Ok(length);
        }

        let b2 = stream
            .read_u8()
            .await
            .context("failed to read compact length byte 2")?;
        length |= (b2 as usize) << 14;
        Ok(length)
    }

    /// Fetch a basic-mode payload of known uncompressed size, honouring the
    /// 12-byte rule.
    async fn read_payload<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
        zlib: &mut ZlibStreamSet,
        stream_id: usize,
        size: usize,
    ) -> Result<Vec<u8>> {
        if size < TIGHT_MIN_TO_COMPRESS {
            let mut data = vec![0u8; size];
            stream
                .read_bytes(&mut data)
                .await
                .with_context(|| format!("failed to read {} uncompressed Tight bytes", size))?;
            return Ok(data);
        }

        let compressed_len = Self::read_compact_length(stream).await?;
        let mut compressed = vec![0u8; compressed_len];
        stream
            .read_bytes(&mut compressed)
            .await
            .with_context(|| {
                format!("failed to read {} compressed Tight bytes", compressed_len)
            })?;
        Ok(zlib.inflate_tight(stream_id, &compressed, size)?)
    }
}

impl Decoder for TightDecoder {
    fn encoding_type(&self) -> i32 {
        self.encoding
    }

    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        canvas: &mut Canvas,
        zlib: &mut ZlibStreamSet,
    ) -> Result<()> {
        let comp_ctl = stream
            .read_u8()
            .await
            .context("failed to read Tight compression control byte")?;

        // Reset bits apply before the mode is even considered.
        for id in 0..4 {
            if comp_ctl & (1 << id) != 0 {
                zlib.reset_tight(id);
            }
        }

        let dest = Rect::new(rect.x as i32, rect.y as i32, rect.width as u32, rect.height as u32);
        let width = rect.width as usize;
        let height = rect.height as usize;

        let comp_type = comp_ctl >> 4;
        match comp_type {
            TIGHT_FILL => {
                let cpixel_len = canvas.translator().cpixel_len();
                let mut colour = vec![0u8; cpixel_len];
                stream
                    .read_bytes(&mut colour)
                    .await
                    .context("failed to read Tight fill colour")?;
                let rgba = canvas.translator().rgba_from_cpixel(&colour);
                canvas
                    .fill_rgba(dest, rgba)
                    .context("failed to fill Tight rectangle")
            }
            TIGHT_JPEG => {
                let len = Self::read_compact_length(stream).await?;
                let mut jpeg_data = vec![0u8; len];
                stream
                    .read_bytes(&mut jpeg_data)
                    .await
                    .with_context(|| format!("failed to read {} Tight JPEG bytes", len))?;

                let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(&jpeg_data));
                let pixels = decoder.decode().context("Tight JPEG data did not decode")?;
                let info = decoder
                    .info()
                    .ok_or_else(|| anyhow!("JPEG decoder produced no metadata"))?;

                if info.width != rect.width || info.height != rect.height {
                    bail!(
                        "Tight JPEG is {}x{} but the rectangle is {}x{}",
                        info.width,
                        info.height,
                        rect.width,
                        rect.height
                    );
                }
                if info.pixel_format != jpeg_decoder::PixelFormat::RGB24 {
                    bail!(
                        "unsupported Tight JPEG pixel format {:?}",
                        info.pixel_format
                    );
                }

                let mut rgba = Vec::with_capacity(width * height * 4);
                for rgb in pixels.chunks_exact(3) {
                    rgba.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
                }
                canvas
                    .draw_image(dest, &rgba)
                    .context("failed to blit Tight JPEG rectangle")
            }
            TIGHT_PNG => {
                if !self.png_allowed {
                    bail!("PNG compression is only valid on a TightPNG session");
                }

                let len = Self::read_compact_length(stream).await?;
                let mut png_data = vec![0u8; len];
                stream
                    .read_bytes(&mut png_data)
                    .await
                    .with_context(|| format!("failed to read {} Tight PNG bytes", len))?;

                let decoder = png::Decoder::new(Cursor::new(&png_data));
                let mut reader = decoder
                    .read_info()
                    .context("Tight PNG header did not parse")?;
                let mut buf = vec![0u8; reader.output_buffer_size()];
                let frame = reader
                    .next_frame(&mut buf)
                    .context("Tight PNG data did not decode")?;

                if frame.width != rect.width as u32 || frame.height != rect.height as u32 {
                    bail!(
                        "Tight PNG is {}x{} but the rectangle is {}x{}",
                        frame.width,
                        frame.height,
                        rect.width,
                        rect.height
                    );
                }
                if frame.bit_depth != png::BitDepth::Eight {
                    bail!("unsupported Tight PNG bit depth {:?}", frame.bit_depth);
                }

                let rgba = match frame.color_type {
                    png::ColorType::Rgb => {
                        let mut rgba = Vec::with_capacity(width * height * 4);
                        for rgb in buf[..frame.buffer_size()].chunks_exact(3) {
                            rgba.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
                        }
                        rgba
                    }
                    png::ColorType::Rgba => {
                        let mut rgba = buf[..frame.buffer_size()].to_vec();
                        // The main surface carries no transparency.
                        for px in rgba.chunks_exact_mut(4) {
                            px[3] = 255;
                        }
                        rgba
                    }
                    other => bail!("unsupported Tight PNG colour type {:?}", other),
                };
                canvas
                    .draw_image(dest, &rgba)
                    .context("failed to blit Tight PNG rectangle")
            }
            0x0B..=0x0F => bail!("invalid Tight compression type {:#x}", comp_type),
            _ => {
                // Basic compression.
                let stream_id = (comp_type & 0x03) as usize;
                let filter = if comp_type & TIGHT_EXPLICIT_FILTER != 0 {
                    stream
                        .read_u8()
                        .await
                        .context("failed to read Tight filter id")?
                } else {
                    FILTER_COPY
                };

                match filter {
                    FILTER_COPY => {
                        let cpixel_len = canvas.translator().cpixel_len();
                        let size = width * height * cpixel_len;
                        let data = Self::read_payload(stream, zlib, stream_id, size).await?;

                        let rgba = {
                            let t = canvas.translator();
                            let mut buf = Vec::with_capacity(width * height * 4);
                            for cpixel in data.chunks_exact(cpixel_len) {
                                buf.extend_from_slice(&t.rgba_from_cpixel(cpixel));
                            }
                            buf
                        };
                        canvas
                            .draw_image(dest, &rgba)
                            .context("failed to blit Tight copy rectangle")
                    }
                    FILTER_PALETTE => {
                        let palette_size = stream
                            .read_u8()
                            .await
                            .context("failed to read Tight palette size")?
                            as usize
                            + 1;

                        let cpixel_len = canvas.translator().cpixel_len();
                        let mut palette_bytes = vec![0u8; palette_size * cpixel_len];
                        stream
                            .read_bytes(&mut palette_bytes)
                            .await
                            .context("failed to read Tight palette colours")?;

                        let palette: Vec<[u8; 4]> = {
                            let t = canvas.translator();
                            palette_bytes
                                .chunks_exact(cpixel_len)
                                .map(|c| t.rgba_from_cpixel(c))
                                .collect()
                        };

                        let (bits, index_size) = if palette_size == 2 {
                            (1u8, width.div_ceil(8) * height)
                        } else {
                            (8u8, width * height)
                        };
                        let indices =
                            Self::read_payload(stream, zlib, stream_id, index_size).await?;

                        canvas
                            .draw_palette(dest, &indices, &palette, bits)
                            .context("failed to expand Tight palette rectangle")
                    }
                    FILTER_GRADIENT => {
                        // Rendering is deferred; the filtered bytes still
                        // travel and must leave the stream.
                        let bpp = canvas.translator().bytes_per_pixel();
                        let size = width * height * bpp;
                        let _ = Self::read_payload(stream, zlib, stream_id, size).await?;
                        tracing::debug!(
                            "discarded {} gradient-filtered bytes for rect at ({}, {})",
                            size,
                            rect.x,
                            rect.y
                        );
                        Ok(())
                    }
                    other => bail!("invalid Tight filter id {}", other),
                }
            }
        }
    }
}
