//! Precompiled bitmap fonts.
//!
//! Layout, all integers little endian:
//!
//! ```text
//! magic        b"FGBF"
//! version      u16 (1)
//! atlas_width  u16
//! atlas_height u16
//! size_px      u16
//! ascent       f32    baseline distance from the top of the line
//! weight       u16
//! style        u8     0 normal, 1 oblique, 2 italic
//! family_len   u8
//! family       [u8; family_len] utf-8
//! glyph_count  u32
//! glyphs       [Glyph; glyph_count], sorted by codepoint
//! rle_len      u32
//! rle          [[run, value]; rle_len / 2]
//! ```
//!
//! Each glyph record is `codepoint u32, x u16, y u16, w u16, h u16,
//! advance f32, bearing_x f32, bearing_y f32`. The RLE stream decodes to
//! `atlas_width * atlas_height` coverage bytes; runs are `1..=255` long.
use std::collections::HashMap;

use thiserror::Error;

use super::{AtlasImage, FontKey, FontStyle, FontWeight, GlyphInfo, RasterizedFont};

const MAGIC: &[u8; 4] = b"FGBF";
const VERSION: u16 = 1;

/// Errors decoding a bitmap font.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BitmapFontError {
    #[error("not a bitmap font")]
    BadMagic,
    #[error("unsupported bitmap font version {0}")]
    UnsupportedVersion(u16),
    #[error("bitmap font truncated")]
    Truncated,
    #[error("invalid family name")]
    BadFamily,
    #[error("coverage decodes to {actual} bytes, expected {expected}")]
    CoverageMismatch { expected: usize, actual: usize },
}

/// One glyph of a bitmap font, in atlas pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BitmapGlyph {
    pub codepoint: u32,
    pub x: u16,
    pub y: u16,
    pub w: u16,
    pub h: u16,
    pub advance: f32,
    /// Distance from the pen to the left edge of the bitmap.
    pub bearing_x: f32,
    /// Distance from the baseline up to the top edge of the bitmap.
    pub bearing_y: f32,
}

/// A decoded bitmap font.
#[derive(Debug, Clone, PartialEq)]
pub struct BitmapFont {
    pub family: String,
    pub weight: FontWeight,
    pub style: FontStyle,
    pub size_px: u16,
    pub ascent: f32,
    pub width: u16,
    pub height: u16,
    pub glyphs: Vec<BitmapGlyph>,
    /// One coverage byte per atlas pixel.
    pub coverage: Vec<u8>,
}

/// Run-length encodes `data` as `[run, value]` pairs.
pub fn rle_encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut iter = data.iter().copied().peekable();
    while let Some(value) = iter.next() {
        let mut run = 1u8;
        while run < u8::MAX && iter.peek() == Some(&value) {
            iter.next();
            run += 1;
        }
        out.extend_from_slice(&[run, value]);
    }
    out
}

/// Expands `[run, value]` pairs.
pub fn rle_decode(data: &[u8]) -> Result<Vec<u8>, BitmapFontError> {
    if data.len() % 2 != 0 {
        return Err(BitmapFontError::Truncated);
    }
    let mut out = Vec::with_capacity(data.len());
    for pair in data.chunks_exact(2) {
        out.extend(std::iter::repeat(pair[1]).take(pair[0] as usize));
    }
    Ok(out)
}

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], BitmapFontError> {
        if self.data.len() < n {
            return Err(BitmapFontError::Truncated);
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], BitmapFontError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, BitmapFontError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, BitmapFontError> {
        self.array().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> Result<u32, BitmapFontError> {
        self.array().map(u32::from_le_bytes)
    }

    fn f32(&mut self) -> Result<f32, BitmapFontError> {
        self.array().map(f32::from_le_bytes)
    }
}

impl BitmapFont {
    /// Decodes a bitmap font.
    pub fn parse(data: &[u8]) -> Result<Self, BitmapFontError> {
        let mut r = Reader { data };

        if r.take(4)? != MAGIC {
            return Err(BitmapFontError::BadMagic);
        }
        match r.u16()? {
            VERSION => {},
            v => return Err(BitmapFontError::UnsupportedVersion(v)),
        }

        let width = r.u16()?;
        let height = r.u16()?;
        let size_px = r.u16()?;
        let ascent = r.f32()?;
        let weight = FontWeight(r.u16()?);
        let style = match r.u8()? {
            1 => FontStyle::Oblique,
            2 => FontStyle::Italic,
            _ => FontStyle::Normal,
        };
        let family_len = r.u8()? as usize;
        let family = std::str::from_utf8(r.take(family_len)?)
            .map_err(|_| BitmapFontError::BadFamily)?
            .to_string();

        let glyph_count = r.u32()? as usize;
        let mut glyphs = Vec::with_capacity(glyph_count.min(1 << 16));
        for _ in 0..glyph_count {
            glyphs.push(BitmapGlyph {
                codepoint: r.u32()?,
                x: r.u16()?,
                y: r.u16()?,
                w: r.u16()?,
                h: r.u16()?,
                advance: r.f32()?,
                bearing_x: r.f32()?,
                bearing_y: r.f32()?,
            });
        }

        let rle_len = r.u32()? as usize;
        let coverage = rle_decode(r.take(rle_len)?)?;
        let expected = width as usize * height as usize;
        if coverage.len() != expected {
            return Err(BitmapFontError::CoverageMismatch { expected, actual: coverage.len() });
        }

        Ok(Self { family, weight, style, size_px, ascent, width, height, glyphs, coverage })
    }

    /// Encodes the font.
    pub fn to_bytes(&self) -> Vec<u8> {
        let family = &self.family.as_bytes()[..self.family.len().min(u8::MAX as usize)];
        let rle = rle_encode(&self.coverage);

        let mut out = Vec::with_capacity(32 + self.glyphs.len() * 28 + rle.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&self.width.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(&self.size_px.to_le_bytes());
        out.extend_from_slice(&self.ascent.to_le_bytes());
        out.extend_from_slice(&self.weight.0.to_le_bytes());
        out.push(match self.style {
            FontStyle::Normal => 0,
            FontStyle::Oblique => 1,
            FontStyle::Italic => 2,
        });
        out.push(family.len() as u8);
        out.extend_from_slice(family);

        out.extend_from_slice(&(self.glyphs.len() as u32).to_le_bytes());
        for g in &self.glyphs {
            out.extend_from_slice(&g.codepoint.to_le_bytes());
            for v in [g.x, g.y, g.w, g.h] {
                out.extend_from_slice(&v.to_le_bytes());
            }
            for v in [g.advance, g.bearing_x, g.bearing_y] {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }

        out.extend_from_slice(&(rle.len() as u32).to_le_bytes());
        out.extend_from_slice(&rle);
        out
    }

    /// Key the font registers under.
    pub fn key(&self) -> FontKey {
        FontKey::new(&self.family, self.weight, self.style, self.size_px as u32)
    }

    /// Expands the coverage atlas into an uploadable image and glyph table.
    pub fn to_atlas(&self) -> RasterizedFont {
        let (w, h) = (self.width as u32, self.height as u32);
        let mut image = AtlasImage::new(w, h);
        for (i, &c) in self.coverage.iter().enumerate() {
            image.set_coverage(i as u32 % w, i as u32 / w, c);
        }

        let glyphs: HashMap<u32, GlyphInfo> = self
            .glyphs
            .iter()
            .map(|g| {
                let info = GlyphInfo {
                    u0: g.x as f32 / w as f32,
                    v0: g.y as f32 / h as f32,
                    u1: (g.x + g.w) as f32 / w as f32,
                    v1: (g.y + g.h) as f32 / h as f32,
                    advance: g.advance,
                    offset_x: g.bearing_x.round() as i32,
                    offset_y: (self.ascent - g.bearing_y).round() as i32,
                };
                (g.codepoint, info)
            })
            .collect();

        RasterizedFont { image, glyphs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BitmapFont {
        let mut coverage = vec![0u8; 16 * 8];
        coverage[..4].fill(200);
        coverage[20] = 255;
        BitmapFont {
            family: "Tiny".into(),
            weight: FontWeight::BOLD,
            style: FontStyle::Italic,
            size_px: 8,
            ascent: 6.0,
            width: 16,
            height: 8,
            glyphs: vec![
                BitmapGlyph {
                    codepoint: 'A' as u32,
                    x: 0,
                    y: 0,
                    w: 4,
                    h: 6,
                    advance: 5.0,
                    bearing_x: 0.0,
                    bearing_y: 6.0,
                },
                BitmapGlyph {
                    codepoint: 'g' as u32,
                    x: 5,
                    y: 0,
                    w: 4,
                    h: 7,
                    advance: 4.5,
                    bearing_x: 1.0,
                    bearing_y: 4.0,
                },
            ],
            coverage,
        }
    }

    #[test]
    fn rle_splits_long_runs() {
        let data = vec![7u8; 600];
        let rle = rle_encode(&data);
        assert_eq!(rle, vec![255, 7, 255, 7, 90, 7]);
        assert_eq!(rle_decode(&rle).unwrap(), data);
        assert_eq!(rle_decode(&[1, 2, 3]), Err(BitmapFontError::Truncated));
    }

    #[test]
    fn encoded_font_decodes_to_the_same_font() {
        let font = sample();
        assert_eq!(BitmapFont::parse(&font.to_bytes()).unwrap(), font);
    }

    #[test]
    fn rejects_corrupt_input() {
        let bytes = sample().to_bytes();
        assert_eq!(BitmapFont::parse(b"NOPE"), Err(BitmapFontError::BadMagic));
        assert_eq!(BitmapFont::parse(&bytes[..bytes.len() - 1]), Err(BitmapFontError::Truncated));

        let mut wrong_version = bytes.clone();
        wrong_version[4] = 9;
        assert_eq!(BitmapFont::parse(&wrong_version), Err(BitmapFontError::UnsupportedVersion(9)));
    }

    #[test]
    fn atlas_places_glyphs_below_the_line_top() {
        let font = sample();
        let atlas = font.to_atlas();
        let a = atlas.glyphs[&('A' as u32)];
        let g = atlas.glyphs[&('g' as u32)];
        assert_eq!(a.offset_y, 0);
        assert_eq!(g.offset_y, 2);
        assert_eq!(g.offset_x, 1);
        assert_eq!((g.u0, g.u1), (5.0 / 16.0, 9.0 / 16.0));
        assert_eq!(atlas.image.coverage(0, 0), 200);
        assert_eq!(atlas.image.coverage(4, 1), 255);
        assert_eq!(font.key(), FontKey::new("tiny", FontWeight::BOLD, FontStyle::Italic, 8));
    }
}
