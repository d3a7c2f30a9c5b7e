//! Font atlases.
//!
//! A font is identified by a [`FontKey`] and referred to by a [`FontHandle`].
//! The first request for a key rasterizes the configured codepoint range into
//! a single-texture atlas through a [`GlyphRasterizer`]; later requests return
//! the cached handle.
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Range;

use tracing::{debug, warn};

use crate::renderer::TextureId;

pub mod bitmap;
#[cfg(windows)]
pub mod dwrite;

/// Opaque font identifier. `0` means "no font".
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FontHandle(pub u16);

impl FontHandle {
    /// The "no font" sentinel.
    pub const NONE: FontHandle = FontHandle(0);

    /// Whether this handle refers to a font.
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// Font weight on the usual 100..=900 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FontWeight(pub u16);

impl FontWeight {
    pub const THIN: FontWeight = FontWeight(100);
    pub const LIGHT: FontWeight = FontWeight(300);
    pub const NORMAL: FontWeight = FontWeight(400);
    pub const MEDIUM: FontWeight = FontWeight(500);
    pub const SEMI_BOLD: FontWeight = FontWeight(600);
    pub const BOLD: FontWeight = FontWeight(700);
    pub const BLACK: FontWeight = FontWeight(900);
}

/// Font slant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FontStyle {
    Normal,
    Oblique,
    Italic,
}

/// Identity of a rasterized font.
///
/// Family names compare case-insensitively and ignore surrounding
/// whitespace.
#[derive(Debug, Clone)]
pub struct FontKey {
    family: String,
    folded: String,
    pub weight: FontWeight,
    pub style: FontStyle,
    pub size_px: u32,
}

impl FontKey {
    pub fn new(family: &str, weight: FontWeight, style: FontStyle, size_px: u32) -> Self {
        let family = family.trim().to_string();
        let folded = family.to_lowercase();
        Self { family, folded, weight, style, size_px }
    }

    /// Family name as given, trimmed.
    pub fn family(&self) -> &str {
        &self.family
    }
}

impl PartialEq for FontKey {
    fn eq(&self, other: &Self) -> bool {
        self.folded == other.folded
            && self.weight == other.weight
            && self.style == other.style
            && self.size_px == other.size_px
    }
}

impl Eq for FontKey {}

impl Hash for FontKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded.hash(state);
        self.weight.hash(state);
        self.style.hash(state);
        self.size_px.hash(state);
    }
}

impl fmt::Display for FontKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {:?} {}px", self.family, self.weight.0, self.style, self.size_px)
    }
}

/// Placement of one glyph inside its atlas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphInfo {
    pub u0: f32,
    pub v0: f32,
    pub u1: f32,
    pub v1: f32,
    /// Horizontal pen advance in pixels.
    pub advance: f32,
    /// Offset from the pen position to the left edge of the bitmap.
    pub offset_x: i32,
    /// Offset from the top of the line to the top edge of the bitmap.
    pub offset_y: i32,
}

/// RGBA8 image destined for a GPU texture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtlasImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl AtlasImage {
    /// Fully transparent white image.
    pub fn new(width: u32, height: u32) -> Self {
        let mut pixels = vec![0u8; (width * height * 4) as usize];
        pixels.chunks_exact_mut(4).for_each(|px| px[..3].fill(0xff));
        Self { width, height, pixels }
    }

    /// Sets the coverage of one pixel. Color stays white so the draw color
    /// tints the glyph.
    pub fn set_coverage(&mut self, x: u32, y: u32, coverage: u8) {
        if x < self.width && y < self.height {
            self.pixels[((y * self.width + x) * 4 + 3) as usize] = coverage;
        }
    }

    pub fn coverage(&self, x: u32, y: u32) -> u8 {
        self.pixels[((y * self.width + x) * 4 + 3) as usize]
    }
}

/// Row-based packer placing glyph cells left to right, top to bottom.
#[derive(Debug, Clone)]
pub struct AtlasPacker {
    width: u32,
    height: u32,
    padding: u32,
    cursor_x: u32,
    cursor_y: u32,
    line_height: u32,
    full: bool,
}

impl AtlasPacker {
    pub fn new(width: u32, height: u32, padding: u32) -> Self {
        Self { width, height, padding, cursor_x: 0, cursor_y: 0, line_height: 0, full: false }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Set once a cell did not fit vertically. No further cells are placed.
    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Reserves a `w`×`h` cell and returns its top-left corner.
    ///
    /// Wraps to a new row when the cell plus padding does not fit
    /// horizontally and gives up for good when it does not fit vertically.
    pub fn place(&mut self, w: u32, h: u32) -> Option<(u32, u32)> {
        if self.full {
            return None;
        }

        if self.cursor_x + w + self.padding > self.width {
            self.cursor_x = 0;
            self.cursor_y += self.line_height + self.padding;
            self.line_height = 0;
        }

        if self.cursor_y + h + self.padding > self.height || w + self.padding > self.width {
            self.full = true;
            return None;
        }

        let pos = (self.cursor_x, self.cursor_y);
        self.cursor_x += w + self.padding;
        self.line_height = self.line_height.max(h);
        Some(pos)
    }

    /// Normalized UV rectangle of a cell.
    pub fn uv(&self, x: u32, y: u32, w: u32, h: u32) -> [f32; 4] {
        let (aw, ah) = (self.width as f32, self.height as f32);
        [x as f32 / aw, y as f32 / ah, (x + w) as f32 / aw, (y + h) as f32 / ah]
    }
}

/// A rasterized font ready for upload.
#[derive(Debug, Clone)]
pub struct RasterizedFont {
    pub image: AtlasImage,
    pub glyphs: HashMap<u32, GlyphInfo>,
}

/// Source of glyph bitmaps.
pub trait GlyphRasterizer: Send {
    /// Rasterizes `range` for `key` into an atlas laid out by `packer`.
    ///
    /// Returns `None` when the family cannot be resolved or rasterization
    /// fails.
    fn rasterize(
        &mut self,
        key: &FontKey,
        packer: &mut AtlasPacker,
        range: Range<u32>,
    ) -> Option<RasterizedFont>;

    /// Names of the families this rasterizer can resolve.
    fn families(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A font that has been uploaded.
#[derive(Debug)]
pub struct FontAtlas {
    pub key: FontKey,
    pub glyphs: HashMap<u32, GlyphInfo>,
    pub width: u32,
    pub height: u32,
    pub texture: TextureId,
}

impl FontAtlas {
    /// Pixel size of a glyph's bitmap.
    pub fn glyph_size(&self, glyph: &GlyphInfo) -> (f32, f32) {
        (
            ((glyph.u1 - glyph.u0) * self.width as f32).round(),
            ((glyph.v1 - glyph.v0) * self.height as f32).round(),
        )
    }
}

/// Key→handle map and handle→atlas storage.
#[derive(Debug)]
pub struct FontRegistry {
    max_fonts: usize,
    by_key: HashMap<FontKey, FontHandle>,
    failed: HashSet<FontKey>,
    atlases: Vec<FontAtlas>,
}

impl FontRegistry {
    pub fn new(max_fonts: usize) -> Self {
        Self {
            max_fonts: max_fonts.min(u16::MAX as usize),
            by_key: HashMap::new(),
            failed: HashSet::new(),
            atlases: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.atlases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atlases.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.atlases.len() >= self.max_fonts
    }

    /// Cached handle for `key`. Keys that failed to build resolve to
    /// [`FontHandle::NONE`].
    pub fn lookup(&self, key: &FontKey) -> Option<FontHandle> {
        if self.failed.contains(key) {
            return Some(FontHandle::NONE);
        }
        self.by_key.get(key).copied()
    }

    /// Remembers that `key` cannot be built.
    pub fn mark_failed(&mut self, key: FontKey) {
        warn!("Font {key} could not be built");
        self.failed.insert(key);
    }

    /// Registers an uploaded atlas and returns its handle, or
    /// [`FontHandle::NONE`] at capacity.
    pub fn insert(
        &mut self,
        key: FontKey,
        glyphs: HashMap<u32, GlyphInfo>,
        size: (u32, u32),
        texture: TextureId,
    ) -> FontHandle {
        if let Some(handle) = self.by_key.get(&key) {
            return *handle;
        }

        if self.is_full() {
            warn!("Font registry full ({} fonts), {key} not registered", self.max_fonts);
            return FontHandle::NONE;
        }

        let handle = FontHandle(self.atlases.len() as u16 + 1);
        debug!("Font {key} -> {handle:?}, {} glyphs", glyphs.len());
        self.by_key.insert(key.clone(), handle);
        self.atlases.push(FontAtlas { key, glyphs, width: size.0, height: size.1, texture });
        handle
    }

    pub fn atlas(&self, handle: FontHandle) -> Option<&FontAtlas> {
        if !handle.is_valid() {
            return None;
        }
        self.atlases.get(handle.0 as usize - 1)
    }

    pub fn glyph(&self, handle: FontHandle, codepoint: u32) -> Option<&GlyphInfo> {
        self.atlas(handle)?.glyphs.get(&codepoint)
    }
}
