//! ZRLE encoding decoder - zlib-compressed run-length encoding.
//!
//! # Wire Format
//!
//! ```text
//! +------------------+
//! | length           |  4 bytes (u32)
//! +------------------+
//! | zlib data        |  'length' bytes, appended to the ZRLE stream
//! +------------------+
//! ```
//!
//! The inflated data is a sequence of 64x64 tiles in row-major order (edge
//! tiles truncated), each led by a sub-encoding byte:
//!
//! ```text
//! 0         raw: tile_w * tile_h CPIXELs
//! 1         solid: one CPIXEL fills the tile
//! 2..=16    packed palette of that size; indices are 1, 2, or 4 bits,
//!           rows padded to whole bytes
//! 17..=127  reserved - error
//! 128       plain RLE: (CPIXEL, run-length) pairs
//! 129       reserved - error
//! 130..=255 palette RLE of size N-128: index bytes, high bit marking runs
//! ```
//!
//! Run lengths accumulate: 1 plus the sum of length bytes, where a 255 byte
//! means another follows.
//!
//! Pixels inside the tile stream are CPIXELs: 3 bytes instead of 4 when the
//! session format allows it (see the translator's CPIXEL mode). The mode is
//! derived from the pixel format before the first rectangle, never from the
//! data.

use crate::{Decoder, Rectangle, RfbInStream, ZlibStreamSet, ENCODING_ZRLE};
use anyhow::{anyhow, bail, Context, Result};
use rfb_canvas::{Canvas, PixelTranslator};
use rfb_common::Rect;
use tokio::io::AsyncRead;

/// ZRLE tile edge length; the last column/row may be smaller.
const TILE_SIZE: u16 = 64;

/// Decoder for ZRLE.
///
/// The zlib stream is session state: every rectangle's block continues the
/// same deflate stream, so only the first block of a connection carries a
/// zlib header.
pub struct ZRLEDecoder;

impl Decoder for ZRLEDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_ZRLE
    }

    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        canvas: &mut Canvas,
        zlib: &mut ZlibStreamSet,
    ) -> Result<()> {
        let compressed_len = stream
            .read_u32()
            .await
            .context("failed to read ZRLE block length")?;

        let mut compressed = vec![0u8; compressed_len as usize];
        stream
            .read_bytes(&mut compressed)
            .await
            .with_context(|| format!("failed to read {} ZRLE block bytes", compressed_len))?;

        let decompressed = zlib.inflate_zrle(&compressed)?;
        let mut cursor = DataCursor::new(&decompressed);

        let mut ty = 0u16;
        while ty < rect.height {
            let tile_h = TILE_SIZE.min(rect.height - ty);

            let mut tx = 0u16;
            while tx < rect.width {
                let tile_w = TILE_SIZE.min(rect.width - tx);
                let tile = Rect::new(
                    rect.x as i32 + tx as i32,
                    rect.y as i32 + ty as i32,
                    tile_w as u32,
                    tile_h as u32,
                );

                decode_tile(&mut cursor, tile, canvas).with_context(|| {
                    format!("failed to decode ZRLE tile at ({}, {})", tx, ty)
                })?;

                tx += TILE_SIZE;
            }
            ty += TILE_SIZE;
        }

        // Anything left over means we mis-parsed the tile stream.
        if cursor.remaining() > 0 {
            bail!(
                "{} trailing bytes after the last ZRLE tile",
                cursor.remaining()
            );
        }

        Ok(())
    }
}

/// Decode a single tile from the inflated stream.
fn decode_tile(cursor: &mut DataCursor, tile: Rect, canvas: &mut Canvas) -> Result<()> {
    let area = tile.area() as usize;
    let subencoding = cursor
        .read_u8()
        .context("failed to read ZRLE sub-encoding byte")?;

    match subencoding {
        0 => {
            let rgba = {
                let t = canvas.translator();
                let mut buf = Vec::with_capacity(area * 4);
                for _ in 0..area {
                    buf.extend_from_slice(&read_cpixel(cursor, t)?);
                }
                buf
            };
            canvas.draw_image(tile, &rgba)
        }
        1 => {
            let colour = read_cpixel(cursor, canvas.translator())?;
            canvas.fill_rgba(tile, colour)
        }
        2..=16 => {
            let pal_size = subencoding as usize;
            let rgba = {
                let t = canvas.translator();
                let palette = read_palette(cursor, t, pal_size)?;

                let bits = if pal_size == 2 {
                    1
                } else if pal_size <= 4 {
                    2
                } else {
                    4
                };

                let mut buf = Vec::with_capacity(area * 4);
                for _ in 0..tile.height {
                    let row_bytes = (tile.width as usize * bits).div_ceil(8);
                    let packed = cursor
                        .read_exact(row_bytes)
                        .context("failed to read packed palette row")?;

                    let mut bit_pos = 0usize;
                    for _ in 0..tile.width {
                        let byte = packed[bit_pos / 8];
                        let shift = 8 - bits - (bit_pos % 8);
                        let index = ((byte >> shift) & ((1 << bits) - 1)) as usize;
                        let entry = palette.get(index).ok_or_else(|| {
                            anyhow!("packed palette index {} out of range ({})", index, pal_size)
                        })?;
                        buf.extend_from_slice(entry);
                        bit_pos += bits;
                    }
                }
                buf
            };
            canvas.draw_image(tile, &rgba)
        }
        17..=127 => bail!("reserved ZRLE sub-encoding {}", subencoding),
        128 => {
            let rgba = {
                let t = canvas.translator();
                let mut buf = Vec::with_capacity(area * 4);
                let mut count = 0usize;
                while count < area {
                    let colour = read_cpixel(cursor, t)?;
                    let run = read_run_length(cursor)?;
                    if count + run > area {
                        bail!(
                            "RLE run of {} overflows the tile ({} of {} pixels done)",
                            run,
                            count,
                            area
                        );
                    }
                    for _ in 0..run {
                        buf.extend_from_slice(&colour);
                    }
                    count += run;
                }
                buf
            };
            canvas.draw_image(tile, &rgba)
        }
        129 => bail!("reserved ZRLE sub-encoding 129"),
        130..=255 => {
            let pal_size = (subencoding - 128) as usize;
            let rgba = {
                let t = canvas.translator();
                let palette = read_palette(cursor, t, pal_size)?;

                let mut buf = Vec::with_capacity(area * 4);
                let mut count = 0usize;
                while count < area {
                    let code = cursor
                        .read_u8()
                        .context("failed to read palette RLE code")?;

                    let (index, run) = if code & 0x80 == 0 {
                        (code as usize, 1)
                    } else {
                        ((code & 0x7F) as usize, read_run_length(cursor)?)
                    };

                    let entry = palette.get(index).ok_or_else(|| {
                        anyhow!("palette RLE index {} out of range ({})", index, pal_size)
                    })?;
                    if count + run > area {
                        bail!(
                            "palette RLE run of {} overflows the tile ({} of {} pixels done)",
                            run,
                            count,
                            area
                        );
                    }
                    for _ in 0..run {
                        buf.extend_from_slice(entry);
                    }
                    count += run;
                }
                buf
            };
            canvas.draw_image(tile, &rgba)
        }
    }
}

/// Read one CPIXEL and convert to RGBA.
fn read_cpixel(cursor: &mut DataCursor, translator: &PixelTranslator) -> Result<[u8; 4]> {
    let bytes = cursor.read_exact(translator.cpixel_len())?;
    Ok(translator.rgba_from_cpixel(bytes))
}

/// Read a palette of CPIXELs as RGBA entries.
fn read_palette(
    cursor: &mut DataCursor,
    translator: &PixelTranslator,
    size: usize,
) -> Result<Vec<[u8; 4]>> {
    let mut palette = Vec::with_capacity(size);
    for _ in 0..size {
        palette.push(read_cpixel(cursor, translator)?);
    }
    Ok(palette)
}

/// Accumulate a run length: 1 + sum of bytes, a 255 byte continues the run.
fn read_run_length(cursor: &mut DataCursor) -> Result<usize> {
    let mut length = 1usize;
    loop {
        let byte = cursor.read_u8().context("failed to read run-length byte")?;
        length = length
            .checked_add(byte as usize)
            .ok_or_else(|| anyhow!("run length overflows"))?;
        if byte != 255 {
            return Ok(length);
        }
    }
}

/// Byte cursor over the inflated tile stream.
struct DataCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DataCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_u8(&mut self) -> Result<u8> {
        if self.pos >= self.data.len() {
            bail!("tile stream ended early: need 1 byte, have 0");
        }
        let value = self.data[self.pos];
        self.pos += 1;
        Ok(value)
    }

    fn read_exact(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.pos + count > self.data.len() {
            bail!(
                "tile stream ended early: need {} bytes, have {}",
                count,
                self.remaining()
            );
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use rfb_canvas::PixelFormat;
    use std::io::Cursor;
    use std::io::Write;

    fn canvas(w: u32, h: u32) -> Canvas {
        // rgb888 with depth 24: CPIXELs are 3 bytes, [B, G, R] on the wire.
        Canvas::new(w, h, PixelFormat::rgb888()).unwrap()
    }

    fn rect(x: u16, y: u16, w: u16, h: u16) -> Rectangle {
        Rectangle {
            x,
            y,
            width: w,
            height: h,
            encoding: ENCODING_ZRLE,
        }
    }

    fn pixel(c: &Canvas, x: u32, y: u32) -> [u8; 4] {
        let offset = ((y * c.width() + x) * 4) as usize;
        c.data()[offset..offset + 4].try_into().unwrap()
    }

    /// Compress a tile stream and frame it as a ZRLE rectangle body.
    fn zrle_body(tiles: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(tiles).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut body = Vec::new();
        body.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
        body.extend_from_slice(&compressed);
        body
    }

    const GREEN: [u8; 3] = [0x00, 0xFF, 0x00]; // B, G, R
    const RED: [u8; 3] = [0x00, 0x00, 0xFF];
    const BLUE: [u8; 3] = [0xFF, 0x00, 0x00];

    #[tokio::test]
    async fn test_solid_tile_single_pixel() {
        // One 1x1 tile, sub-encoding 1, CPIXEL = green.
        let decoder = ZRLEDecoder;
        let mut fb = canvas(1, 1);
        let mut zlib = ZlibStreamSet::new();

        let mut tiles = vec![1u8];
        tiles.extend_from_slice(&GREEN);

        let mut stream = RfbInStream::new(Cursor::new(zrle_body(&tiles)));
        decoder
            .decode(&mut stream, &rect(0, 0, 1, 1), &mut fb, &mut zlib)
            .await
            .unwrap();

        assert_eq!(pixel(&fb, 0, 0), [0, 255, 0, 255]);
    }

    #[tokio::test]
    async fn test_raw_tile() {
        let decoder = ZRLEDecoder;
        let mut fb = canvas(2, 2);
        let mut zlib = ZlibStreamSet::new();

        let mut tiles = vec![0u8];
        for colour in [RED, GREEN, BLUE, [0, 0, 0]] {
            tiles.extend_from_slice(&colour);
        }

        let mut stream = RfbInStream::new(Cursor::new(zrle_body(&tiles)));
        decoder
            .decode(&mut stream, &rect(0, 0, 2, 2), &mut fb, &mut zlib)
            .await
            .unwrap();

        assert_eq!(pixel(&fb, 0, 0), [255, 0, 0, 255]);
        assert_eq!(pixel(&fb, 1, 0), [0, 255, 0, 255]);
        assert_eq!(pixel(&fb, 0, 1), [0, 0, 255, 255]);
        assert_eq!(pixel(&fb, 1, 1), [0, 0, 0, 255]);
    }

    #[tokio::test]
    async fn test_packed_palette_2bit() {
        // 4 colours -> 2-bit indices. One row of 4 pixels: 0b00_01_10_11.
        let decoder = ZRLEDecoder;
        let mut fb = canvas(4, 1);
        let mut zlib = ZlibStreamSet::new();

        let mut tiles = vec![4u8];
        for colour in [RED, GREEN, BLUE, [0xFF, 0xFF, 0xFF]] {
            tiles.extend_from_slice(&colour);
        }
        tiles.push(0x1B);

        let mut stream = RfbInStream::new(Cursor::new(zrle_body(&tiles)));
        decoder
            .decode(&mut stream, &rect(0, 0, 4, 1), &mut fb, &mut zlib)
            .await
            .unwrap();

        assert_eq!(pixel(&fb, 0, 0), [255, 0, 0, 255]);
        assert_eq!(pixel(&fb, 1, 0), [0, 255, 0, 255]);
        assert_eq!(pixel(&fb, 2, 0), [0, 0, 255, 255]);
        assert_eq!(pixel(&fb, 3, 0), [255, 255, 255, 255]);
    }

    #[tokio::test]
    async fn test_packed_palette_1bit_rows_padded() {
        // 2 colours, 9 wide: each row uses two index bytes.
        let decoder = ZRLEDecoder;
        let mut fb = canvas(9, 2);
        let mut zlib = ZlibStreamSet::new();

        let mut tiles = vec![2u8];
        tiles.extend_from_slice(&RED);
        tiles.extend_from_slice(&GREEN);
        tiles.extend_from_slice(&[0b1000_0000, 0b1000_0000]); // row 0: green at 0 and 8
        tiles.extend_from_slice(&[0b0000_0000, 0b0000_0000]); // row 1: all red

        let mut stream = RfbInStream::new(Cursor::new(zrle_body(&tiles)));
        decoder
            .decode(&mut stream, &rect(0, 0, 9, 2), &mut fb, &mut zlib)
            .await
            .unwrap();

        assert_eq!(pixel(&fb, 0, 0), [0, 255, 0, 255]);
        assert_eq!(pixel(&fb, 8, 0), [0, 255, 0, 255]);
        assert_eq!(pixel(&fb, 4, 0), [255, 0, 0, 255]);
        assert_eq!(pixel(&fb, 8, 1), [255, 0, 0, 255]);
    }

    #[tokio::test]
    async fn test_plain_rle_runs() {
        // 3x3 tile: 5 red then 4 blue.
        let decoder = ZRLEDecoder;
        let mut fb = canvas(3, 3);
        let mut zlib = ZlibStreamSet::new();

        let mut tiles = vec![128u8];
        tiles.extend_from_slice(&RED);
        tiles.push(4); // run of 5
        tiles.extend_from_slice(&BLUE);
        tiles.push(3); // run of 4

        let mut stream = RfbInStream::new(Cursor::new(zrle_body(&tiles)));
        decoder
            .decode(&mut stream, &rect(0, 0, 3, 3), &mut fb, &mut zlib)
            .await
            .unwrap();

        assert_eq!(pixel(&fb, 1, 1), [255, 0, 0, 255]); // pixel 4
        assert_eq!(pixel(&fb, 2, 1), [0, 0, 255, 255]); // pixel 5
        assert_eq!(pixel(&fb, 2, 2), [0, 0, 255, 255]);
    }

    #[tokio::test]
    async fn test_palette_rle() {
        // Palette of 2; pattern: red x1, green x4, red x1 on a 6x1 tile.
        let decoder = ZRLEDecoder;
        let mut fb = canvas(6, 1);
        let mut zlib = ZlibStreamSet::new();

        let mut tiles = vec![130u8];
        tiles.extend_from_slice(&RED);
        tiles.extend_from_slice(&GREEN);
        tiles.push(0); // single red
        tiles.push(0x81); // run of palette index 1
        tiles.push(3); // run length 4
        tiles.push(0); // single red

        let mut stream = RfbInStream::new(Cursor::new(zrle_body(&tiles)));
        decoder
            .decode(&mut stream, &rect(0, 0, 6, 1), &mut fb, &mut zlib)
            .await
            .unwrap();

        assert_eq!(pixel(&fb, 0, 0), [255, 0, 0, 255]);
        for x in 1..5 {
            assert_eq!(pixel(&fb, x, 0), [0, 255, 0, 255], "column {}", x);
        }
        assert_eq!(pixel(&fb, 5, 0), [255, 0, 0, 255]);
    }

    #[tokio::test]
    async fn test_multiple_tiles_row_major() {
        // 128x1 spans two 64-wide tiles: solid red, then solid blue.
        let decoder = ZRLEDecoder;
        let mut fb = canvas(128, 1);
        let mut zlib = ZlibStreamSet::new();

        let mut tiles = vec![1u8];
        tiles.extend_from_slice(&RED);
        tiles.push(1);
        tiles.extend_from_slice(&BLUE);

        let mut stream = RfbInStream::new(Cursor::new(zrle_body(&tiles)));
        decoder
            .decode(&mut stream, &rect(0, 0, 128, 1), &mut fb, &mut zlib)
            .await
            .unwrap();

        assert_eq!(pixel(&fb, 63, 0), [255, 0, 0, 255]);
        assert_eq!(pixel(&fb, 64, 0), [0, 0, 255, 255]);
    }

    #[tokio::test]
    async fn test_stream_persists_across_rectangles() {
        use flate2::{Compress, FlushCompress};

        let decoder = ZRLEDecoder;
        let mut fb = canvas(1, 2);
        let mut zlib = ZlibStreamSet::new();

        let mut tiles1 = vec![1u8];
        tiles1.extend_from_slice(&RED);
        let mut tiles2 = vec![1u8];
        tiles2.extend_from_slice(&GREEN);

        // Two sync-flushed chunks of one deflate stream.
        let mut compressor = Compress::new(Compression::default(), true);
        let frame = |payload: &[u8], compressor: &mut Compress| {
            let before = compressor.total_out() as usize;
            let mut block = vec![0u8; 128];
            compressor
                .compress(payload, &mut block, FlushCompress::Sync)
                .unwrap();
            let len = compressor.total_out() as usize - before;
            let mut body = Vec::new();
            body.extend_from_slice(&(len as u32).to_be_bytes());
            body.extend_from_slice(&block[..len]);
            body
        };

        let body1 = frame(&tiles1, &mut compressor);
        let body2 = frame(&tiles2, &mut compressor);

        let mut stream = RfbInStream::new(Cursor::new(body1));
        decoder
            .decode(&mut stream, &rect(0, 0, 1, 1), &mut fb, &mut zlib)
            .await
            .unwrap();
        let mut stream = RfbInStream::new(Cursor::new(body2));
        decoder
            .decode(&mut stream, &rect(0, 1, 1, 1), &mut fb, &mut zlib)
            .await
            .unwrap();

        assert_eq!(pixel(&fb, 0, 0), [255, 0, 0, 255]);
        assert_eq!(pixel(&fb, 0, 1), [0, 255, 0, 255]);
    }

    #[tokio::test]
    async fn test_reserved_subencoding_is_error() {
        let decoder = ZRLEDecoder;
        let mut fb = canvas(1, 1);
        let mut zlib = ZlibStreamSet::new();

        let mut stream = RfbInStream::new(Cursor::new(zrle_body(&[42u8])));
        let err = decoder
            .decode(&mut stream, &rect(0, 0, 1, 1), &mut fb, &mut zlib)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("reserved ZRLE sub-encoding 42"));
    }

    #[tokio::test]
    async fn test_subencoding_129_is_error() {
        let decoder = ZRLEDecoder;
        let mut fb = canvas(1, 1);
        let mut zlib = ZlibStreamSet::new();

        let mut tiles = vec![129u8];
        tiles.extend_from_slice(&RED);
        let mut stream = RfbInStream::new(Cursor::new(zrle_body(&tiles)));
        let err = decoder
            .decode(&mut stream, &rect(0, 0, 1, 1), &mut fb, &mut zlib)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("129"));
    }

    #[tokio::test]
    async fn test_run_overflowing_tile_is_error() {
        let decoder = ZRLEDecoder;
        let mut fb = canvas(1, 1);
        let mut zlib = ZlibStreamSet::new();

        let mut tiles = vec![128u8];
        tiles.extend_from_slice(&RED);
        tiles.push(4); // run of 5 in a 1-pixel tile

        let mut stream = RfbInStream::new(Cursor::new(zrle_body(&tiles)));
        let err = decoder
            .decode(&mut stream, &rect(0, 0, 1, 1), &mut fb, &mut zlib)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("overflows the tile"));
    }

    #[tokio::test]
    async fn test_trailing_bytes_are_error() {
        let decoder = ZRLEDecoder;
        let mut fb = canvas(1, 1);
        let mut zlib = ZlibStreamSet::new();

        let mut tiles = vec![1u8];
        tiles.extend_from_slice(&GREEN);
        tiles.push(0xAA); // junk after the last tile

        let mut stream = RfbInStream::new(Cursor::new(zrle_body(&tiles)));
        let err = decoder
            .decode(&mut stream, &rect(0, 0, 1, 1), &mut fb, &mut zlib)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("trailing"));
    }

    #[tokio::test]
    async fn test_long_run_with_255_continuation() {
        // 64x5 tile filled by one run of 320: length bytes [255, 64].
        let decoder = ZRLEDecoder;
        let mut fb = canvas(64, 5);
        let mut zlib = ZlibStreamSet::new();

        let mut tiles = vec![128u8];
        tiles.extend_from_slice(&GREEN);
        tiles.extend_from_slice(&[255, 64]); // 1 + 255 + 64 = 320

        let mut stream = RfbInStream::new(Cursor::new(zrle_body(&tiles)));
        decoder
            .decode(&mut stream, &rect(0, 0, 64, 5), &mut fb, &mut zlib)
            .await
            .unwrap();

        assert_eq!(pixel(&fb, 63, 4), [0, 255, 0, 255]);
    }
}
