//! DirectWrite glyph rasterizer over the system font collection.
use std::collections::HashMap;
use std::mem::ManuallyDrop;
use std::ops::Range;

use tracing::{debug, trace, warn};
use windows::core::{Error, Result, HSTRING};
use windows::Win32::Foundation::{BOOL, E_POINTER, RECT};
use windows::Win32::Graphics::DirectWrite::*;

use super::{
    AtlasImage, AtlasPacker, FontKey, FontStyle, GlyphInfo, GlyphRasterizer, RasterizedFont,
};

/// Rasterizes glyphs through a shared DirectWrite factory.
///
/// Coverage is produced with ClearType analysis and collapsed to a single
/// alpha channel by averaging the three subpixels.
pub struct DirectWriteRasterizer {
    factory: IDWriteFactory,
    collection: IDWriteFontCollection,
}

// DirectWrite factories are free-threaded.
unsafe impl Send for DirectWriteRasterizer {}

impl DirectWriteRasterizer {
    pub fn new() -> Result<Self> {
        let factory: IDWriteFactory = unsafe { DWriteCreateFactory(DWRITE_FACTORY_TYPE_SHARED) }?;
        let mut collection = None;
        unsafe { factory.GetSystemFontCollection(&mut collection, false) }?;
        let collection = collection.ok_or_else(|| Error::from(E_POINTER))?;
        debug!("System font collection: {} families", unsafe { collection.GetFontFamilyCount() });
        Ok(Self { factory, collection })
    }

    fn font_face(&self, key: &FontKey) -> Option<IDWriteFontFace> {
        let mut index = 0u32;
        let mut exists = BOOL(0);
        let name = HSTRING::from(key.family());
        unsafe { self.collection.FindFamilyName(&name, &mut index, &mut exists) }.ok()?;
        if !exists.as_bool() {
            debug!("Font family {:?} not installed", key.family());
            return None;
        }

        let style = match key.style {
            FontStyle::Normal => DWRITE_FONT_STYLE_NORMAL,
            FontStyle::Oblique => DWRITE_FONT_STYLE_OBLIQUE,
            FontStyle::Italic => DWRITE_FONT_STYLE_ITALIC,
        };

        let face = unsafe {
            let family = self.collection.GetFontFamily(index).ok()?;
            let font = family
                .GetFirstMatchingFont(
                    DWRITE_FONT_WEIGHT(key.weight.0 as _),
                    DWRITE_FONT_STRETCH_NORMAL,
                    style,
                )
                .ok()?;
            font.CreateFontFace()
        };

        match face {
            Ok(face) => Some(face),
            Err(e) => {
                warn!("CreateFontFace for {key}: {e:?}");
                None
            },
        }
    }

    fn analyze(
        &self,
        face: &IDWriteFontFace,
        glyph_index: u16,
        size_px: f32,
        baseline: f32,
    ) -> Result<(IDWriteGlyphRunAnalysis, RECT)> {
        let run = DWRITE_GLYPH_RUN {
            fontFace: ManuallyDrop::new(Some(face.clone())),
            fontEmSize: size_px,
            glyphCount: 1,
            glyphIndices: &glyph_index,
            glyphAdvances: std::ptr::null(),
            glyphOffsets: std::ptr::null(),
            isSideways: false.into(),
            bidiLevel: 0,
        };

        let analysis = unsafe {
            self.factory.CreateGlyphRunAnalysis(
                &run,
                1.0,
                None,
                DWRITE_RENDERING_MODE_CLEARTYPE_NATURAL,
                DWRITE_MEASURING_MODE_NATURAL,
                0.0,
                baseline,
            )
        };
        let _ = ManuallyDrop::into_inner(run.fontFace);
        let analysis = analysis?;
        let bounds = unsafe { analysis.GetAlphaTextureBounds(DWRITE_TEXTURE_CLEARTYPE_3x1) }?;
        Ok((analysis, bounds))
    }
}

impl GlyphRasterizer for DirectWriteRasterizer {
    fn rasterize(
        &mut self,
        key: &FontKey,
        packer: &mut AtlasPacker,
        range: Range<u32>,
    ) -> Option<RasterizedFont> {
        let face = self.font_face(key)?;

        let mut metrics = DWRITE_FONT_METRICS::default();
        unsafe { face.GetMetrics(&mut metrics) };
        let scale = key.size_px as f32 / metrics.designUnitsPerEm.max(1) as f32;
        let ascent = (metrics.ascent as f32 * scale).round();

        let mut image = AtlasImage::new(packer.width(), packer.height());
        let mut glyphs = HashMap::new();
        let mut coverage = Vec::new();

        for cp in range {
            let mut glyph_index = 0u16;
            let found = unsafe { face.GetGlyphIndices(&cp, 1, &mut glyph_index) }.is_ok();
            if !found || glyph_index == 0 {
                continue;
            }

            let mut gm = DWRITE_GLYPH_METRICS::default();
            if unsafe { face.GetDesignGlyphMetrics(&glyph_index, 1, &mut gm, false) }.is_err() {
                continue;
            }
            let advance = gm.advanceWidth as f32 * scale;

            let size = key.size_px as f32;
            let (analysis, bounds) = match self.analyze(&face, glyph_index, size, ascent) {
                Ok(r) => r,
                Err(e) => {
                    trace!("Glyph run analysis for U+{cp:04X}: {e:?}");
                    continue;
                },
            };

            let w = (bounds.right - bounds.left).max(0) as u32;
            let h = (bounds.bottom - bounds.top).max(0) as u32;
            if w == 0 || h == 0 {
                // Whitespace: advance only.
                glyphs.insert(cp, GlyphInfo {
                    u0: 0.0,
                    v0: 0.0,
                    u1: 0.0,
                    v1: 0.0,
                    advance,
                    offset_x: 0,
                    offset_y: 0,
                });
                continue;
            }

            let Some((x, y)) = packer.place(w, h) else {
                warn!("Atlas for {key} full at U+{cp:04X}");
                break;
            };

            coverage.clear();
            coverage.resize((w * h * 3) as usize, 0u8);
            if unsafe {
                analysis.CreateAlphaTexture(DWRITE_TEXTURE_CLEARTYPE_3x1, &bounds, &mut coverage)
            }
            .is_err()
            {
                continue;
            }

            for (i, px) in coverage.chunks_exact(3).enumerate() {
                let alpha = (px[0] as u32 + px[1] as u32 + px[2] as u32) / 3;
                let (dx, dy) = (i as u32 % w, i as u32 / w);
                image.set_coverage(x + dx, y + dy, alpha as u8);
            }

            let [u0, v0, u1, v1] = packer.uv(x, y, w, h);
            glyphs.insert(cp, GlyphInfo {
                u0,
                v0,
                u1,
                v1,
                advance,
                offset_x: bounds.left,
                offset_y: bounds.top,
            });
        }

        debug!("Rasterized {} glyphs for {key}", glyphs.len());
        Some(RasterizedFont { image, glyphs })
    }

    fn families(&self) -> Vec<String> {
        let count = unsafe { self.collection.GetFontFamilyCount() };
        (0..count)
            .filter_map(|i| unsafe {
                let names = self.collection.GetFontFamily(i).ok()?.GetFamilyNames().ok()?;
                let len = names.GetStringLength(0).ok()?;
                let mut buf = vec![0u16; len as usize + 1];
                names.GetString(0, &mut buf).ok()?;
                Some(String::from_utf16_lossy(&buf[..len as usize]))
            })
            .collect()
    }
}
