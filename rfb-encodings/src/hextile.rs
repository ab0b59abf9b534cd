//! Hextile encoding decoder - 16x16 tiles with per-tile sub-encodings.
//!
//! The rectangle is walked in 16x16 tiles, row-major, with edge tiles
//! truncated. Each tile leads with a flag byte:
//!
//! ```text
//! 0x01 RAW                   tile is tile_w * tile_h raw pixels; other
//!                            flags are ignored
//! 0x02 BACKGROUND_SPECIFIED  one pixel follows, replacing the carried bg
//! 0x04 FOREGROUND_SPECIFIED  one pixel follows, replacing the carried fg
//! 0x08 ANY_SUBRECTS          a count byte and that many subrects follow
//! 0x10 SUBRECTS_COLOURED     each subrect carries its own pixel (else fg)
//! ```
//!
//! Sub-rectangles pack position and size into two bytes:
//! `xy = (x << 4) | y`, `wh = ((w - 1) << 4) | (h - 1)`.
//!
//! # Colour carry-over
//!
//! `bg` and `fg` persist from tile to tile within one rectangle. A tile that
//! relies on a colour no tile has specified yet is malformed - there is no
//! sane default and inventing one would hide a desynchronised stream.

use crate::{Decoder, Rectangle, RfbInStream, ZlibStreamSet, ENCODING_HEXTILE};
use anyhow::{anyhow, Context, Result};
use rfb_canvas::Canvas;
use rfb_common::Rect;
use tokio::io::AsyncRead;

const TILE_RAW: u8 = 1 << 0;
const TILE_BACKGROUND_SPECIFIED: u8 = 1 << 1;
const TILE_FOREGROUND_SPECIFIED: u8 = 1 << 2;
const TILE_ANY_SUBRECTS: u8 = 1 << 3;
const TILE_SUBRECTS_COLOURED: u8 = 1 << 4;

/// Tile edge length; the last column/row may be smaller.
const TILE_SIZE: u16 = 16;

/// Decoder for Hextile.
pub struct HextileDecoder;

impl Decoder for HextileDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_HEXTILE
    }

    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        canvas: &mut Canvas,
        _zlib: &mut ZlibStreamSet,
    ) -> Result<()> {
        if rect.width == 0 || rect.height == 0 {
            return Ok(());
        }

        let bpp = canvas.translator().bytes_per_pixel();

        // Carried across tiles within this rectangle only.
        let mut background: Option<Vec<u8>> = None;
        let mut foreground: Option<Vec<u8>> = None;

        let mut ty = 0u16;
        while ty < rect.height {
            let tile_h = TILE_SIZE.min(rect.height - ty);

            let mut tx = 0u16;
            while tx < rect.width {
                let tile_w = TILE_SIZE.min(rect.width - tx);
                let abs_x = rect.x as i32 + tx as i32;
                let abs_y = rect.y as i32 + ty as i32;
                let tile_rect = Rect::new(abs_x, abs_y, tile_w as u32, tile_h as u32);

                let tile_type = stream.read_u8().await.with_context(|| {
                    format!("failed to read Hextile tile type at tile ({}, {})", tx, ty)
                })?;

                if tile_type & TILE_RAW != 0 {
                    let total = tile_w as usize * tile_h as usize * bpp;
                    let mut raw = vec![0u8; total];
                    stream.read_bytes(&mut raw).await.with_context(|| {
                        format!(
                            "failed to read {} raw bytes for Hextile tile ({}, {})",
                            total, tx, ty
                        )
                    })?;
                    canvas.draw_bytes(tile_rect, &raw).with_context(|| {
                        format!("failed to blit raw Hextile tile ({}, {})", tx, ty)
                    })?;
                    tx += TILE_SIZE;
                    continue;
                }

                if tile_type & TILE_BACKGROUND_SPECIFIED != 0 {
                    let mut bg = vec![0u8; bpp];
                    stream.read_bytes(&mut bg).await.with_context(|| {
                        format!("failed to read Hextile background at tile ({}, {})", tx, ty)
                    })?;
                    background = Some(bg);
                }

                let bg = background.as_ref().ok_or_else(|| {
                    anyhow!(
                        "Hextile tile ({}, {}) needs a background but none was ever specified",
                        tx,
                        ty
                    )
                })?;
                canvas.fill(tile_rect, bg).with_context(|| {
                    format!("failed to fill Hextile tile ({}, {})", tx, ty)
                })?;

                if tile_type & TILE_FOREGROUND_SPECIFIED != 0 {
                    let mut fg = vec![0u8; bpp];
                    stream.read_bytes(&mut fg).await.with_context(|| {
                        format!("failed to read Hextile foreground at tile ({}, {})", tx, ty)
                    })?;
                    foreground = Some(fg);
                }

                if tile_type & TILE_ANY_SUBRECTS != 0 {
                    let count = stream.read_u8().await.with_context(|| {
                        format!("failed to read Hextile subrect count at tile ({}, {})", tx, ty)
                    })?;
                    let coloured = tile_type & TILE_SUBRECTS_COLOURED != 0;

                    if count > 0 && !coloured && foreground.is_none() {
                        return Err(anyhow!(
                            "Hextile tile ({}, {}) has monochrome subrects but no foreground was ever specified",
                            tx,
                            ty
                        ));
                    }

                    for i in 0..count {
                        let colour = if coloured {
                            let mut c = vec![0u8; bpp];
                            stream.read_bytes(&mut c).await.with_context(|| {
                                format!(
                                    "failed to read colour for Hextile subrect {} at tile ({}, {})",
                                    i, tx, ty
                                )
                            })?;
                            c
                        } else {
                            foreground.clone().unwrap()
                        };

                        let xy = stream.read_u8().await.with_context(|| {
                            format!(
                                "failed to read position for Hextile subrect {} at tile ({}, {})",
                                i, tx, ty
                            )
                        })?;
                        let wh = stream.read_u8().await.with_context(|| {
                            format!(
                                "failed to read size for Hextile subrect {} at tile ({}, {})",
                                i, tx, ty
                            )
                        })?;

                        let sx = (xy >> 4) as u16;
                        let sy = (xy & 0x0F) as u16;
                        let sw = ((wh >> 4) + 1) as u16;
                        let sh = ((wh & 0x0F) + 1) as u16;

                        if sx + sw > tile_w || sy + sh > tile_h {
                            return Err(anyhow!(
                                "Hextile subrect {} [{},{} {}x{}] leaves its {}x{} tile at ({}, {})",
                                i,
                                sx,
                                sy,
                                sw,
                                sh,
                                tile_w,
                                tile_h,
                                tx,
                                ty
                            ));
                        }

                        canvas
                            .fill(
                                Rect::new(
                                    abs_x + sx as i32,
                                    abs_y + sy as i32,
                                    sw as u32,
                                    sh as u32,
                                ),
                                &colour,
                            )
                            .with_context(|| {
                                format!(
                                    "failed to fill Hextile subrect {} at tile ({}, {})",
                                    i, tx, ty
                                )
                            })?;
                    }
                }

                tx += TILE_SIZE;
            }
            ty += TILE_SIZE;
        }

        Ok(())
    }
}
