//! Tunables for the overlay.
use std::ops::Range;

use crate::fonts::{FontKey, FontStyle, FontWeight};

/// Runtime configuration for the overlay.
///
/// Every value has a sensible default; override individual fields with the
/// `with_*` methods.
///
/// ```
/// use flashhook::config::OverlayConfig;
///
/// let config = OverlayConfig::default().with_buffer_count(2).with_srv_capacity(64);
/// assert_eq!(config.buffer_count, 2);
/// ```
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    /// Swapchain buffers created by the standalone target.
    pub buffer_count: u32,
    /// Size of each frame's upload arena, in bytes.
    pub arena_bytes: usize,
    /// Number of slots in the shader-visible SRV heap.
    pub srv_capacity: u32,
    /// Maximum number of distinct fonts.
    pub max_fonts: usize,
    /// Side of the square glyph atlas, in pixels.
    pub atlas_size: u32,
    /// Gutter between packed glyphs, in pixels.
    pub atlas_padding: u32,
    /// Codepoints rasterized into each atlas.
    pub glyph_range: Range<u32>,
    /// Client size of the standalone window.
    pub window_size: (i32, i32),
    /// How far into the swapchain object the command queue is searched for.
    pub scan_bound: usize,
    /// Font used by the GUI and by text drawn without an explicit font.
    pub default_font: FontKey,
    /// Enables the D3D12 debug layer before the standalone device is
    /// created. Needs the Graphics Tools optional feature installed.
    pub debug_layer: bool,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            buffer_count: 4,
            arena_bytes: 64 * 1024,
            srv_capacity: 128,
            max_fonts: 256,
            atlas_size: 512,
            atlas_padding: 1,
            glyph_range: 0..127,
            window_size: (800, 600),
            scan_bound: crate::vtable::DEFAULT_SCAN_BOUND,
            default_font: FontKey::new("Segoe UI", FontWeight::NORMAL, FontStyle::Normal, 14),
            debug_layer: false,
        }
    }
}

impl OverlayConfig {
    /// Sets the standalone swapchain buffer count.
    pub fn with_buffer_count(mut self, buffer_count: u32) -> Self {
        self.buffer_count = buffer_count.max(2);
        self
    }

    /// Sets the per-frame upload arena size.
    pub fn with_arena_bytes(mut self, arena_bytes: usize) -> Self {
        self.arena_bytes = arena_bytes;
        self
    }

    /// Sets the SRV heap capacity.
    pub fn with_srv_capacity(mut self, srv_capacity: u32) -> Self {
        self.srv_capacity = srv_capacity;
        self
    }

    /// Sets the font registry capacity.
    pub fn with_max_fonts(mut self, max_fonts: usize) -> Self {
        self.max_fonts = max_fonts.min(u16::MAX as usize);
        self
    }

    /// Sets the glyph atlas side and padding.
    pub fn with_atlas(mut self, atlas_size: u32, atlas_padding: u32) -> Self {
        self.atlas_size = atlas_size;
        self.atlas_padding = atlas_padding;
        self
    }

    /// Sets the rasterized codepoint range.
    pub fn with_glyph_range(mut self, glyph_range: Range<u32>) -> Self {
        self.glyph_range = glyph_range;
        self
    }

    /// Sets the standalone window client size.
    pub fn with_window_size(mut self, width: i32, height: i32) -> Self {
        self.window_size = (width, height);
        self
    }

    /// Sets the command queue scan bound.
    pub fn with_scan_bound(mut self, scan_bound: usize) -> Self {
        self.scan_bound = scan_bound;
        self
    }

    /// Sets the default font.
    pub fn with_default_font(mut self, default_font: FontKey) -> Self {
        self.default_font = default_font;
        self
    }

    pub fn with_debug_layer(mut self, debug_layer: bool) -> Self {
        self.debug_layer = debug_layer;
        self
    }
}
