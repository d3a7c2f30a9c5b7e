//! Renderer front end.
//!
//! [`Renderer`] owns the shape lists and fonts and exposes the draw API. The
//! GPU side sits behind [`RenderBackend`]; the D3D12 implementation lives in
//! [`dx12`].
use std::error::Error as StdError;
use std::sync::Arc;

use tracing::{error, trace, warn};

use crate::config::OverlayConfig;
use crate::fonts::bitmap::BitmapFont;
use crate::fonts::{AtlasImage, AtlasPacker, FontHandle, FontKey, FontRegistry, GlyphRasterizer};
use crate::math::{Color, Vec2, WHITE};
use crate::process::ProcessState;
use crate::shapes::{Partition, PartitionKey, ShapeInstance, ShapeList, QUAD_INDEX_COUNT};

#[cfg(windows)]
pub mod dx12;
pub mod shaders;

/// Descriptor slot of an uploaded texture.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// Outcome of [`RenderBackend::begin_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Recording started; `end_frame` must follow.
    Ready,
    /// Nothing to render into right now.
    Skipped,
}

/// A partition handed to the backend.
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    pub partition: Partition<'a>,
    /// Texture bound for the draw; `None` selects the white texture.
    pub texture: Option<TextureId>,
}

/// One instanced draw issued by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawRecord {
    pub key: PartitionKey,
    pub index_count: u32,
    pub instance_count: u32,
}

impl DrawRecord {
    pub fn quads(key: PartitionKey, instance_count: u32) -> Self {
        Self { key, index_count: QUAD_INDEX_COUNT, instance_count }
    }
}

/// Swapchain geometry after a `ResizeBuffers` call. Zero fields keep the
/// previous value, as in DXGI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeRequest {
    pub buffer_count: u32,
    pub width: u32,
    pub height: u32,
    /// Raw `DXGI_FORMAT`; `0` is `DXGI_FORMAT_UNKNOWN`.
    pub format: u32,
}

/// GPU side of the renderer.
pub trait RenderBackend {
    type Error: StdError + 'static;

    /// Waits for the current buffer's previous frame and opens its command
    /// list.
    fn begin_frame(&mut self) -> Result<FrameStatus, Self::Error>;

    /// Uploads the batches, records one instanced draw per batch and submits.
    fn end_frame(&mut self, batches: &[Batch<'_>]) -> Result<(), Self::Error>;

    /// Advances to the swapchain's next buffer. Called after the real
    /// `Present`.
    fn post_present(&mut self);

    /// Creates a persistent sampled texture.
    fn create_texture(&mut self, image: &AtlasImage) -> Result<TextureId, Self::Error>;

    /// Drops every view of the swapchain buffers. Called before the real
    /// `ResizeBuffers`.
    fn release_backbuffers(&mut self) -> Result<(), Self::Error>;

    /// Rebuilds the swapchain-derived state. Called after a successful
    /// `ResizeBuffers`.
    fn recreate_backbuffers(&mut self, request: &ResizeRequest) -> Result<(), Self::Error>;

    /// Number of swapchain buffers currently viewed.
    fn backbuffer_count(&self) -> u32;

    /// Current render target size.
    fn viewport_size(&self) -> (u32, u32);
}

/// Draw API and per-frame orchestration over a [`RenderBackend`].
pub struct Renderer<B: RenderBackend> {
    backend: B,
    process: Arc<ProcessState>,
    config: OverlayConfig,
    shapes: ShapeList,
    fonts: FontRegistry,
    rasterizer: Option<Box<dyn GlyphRasterizer>>,
    default_font: Option<FontHandle>,
    in_frame: bool,
}

impl<B: RenderBackend> Renderer<B> {
    pub fn new(backend: B, process: Arc<ProcessState>, config: OverlayConfig) -> Self {
        let fonts = FontRegistry::new(config.max_fonts);
        Self {
            backend,
            process,
            config,
            shapes: ShapeList::new(),
            fonts,
            rasterizer: None,
            default_font: None,
            in_frame: false,
        }
    }

    /// Sets the source used by [`get_or_create_font`](Renderer::get_or_create_font).
    pub fn with_rasterizer(mut self, rasterizer: Box<dyn GlyphRasterizer>) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn process(&self) -> &Arc<ProcessState> {
        &self.process
    }

    pub fn fonts(&self) -> &FontRegistry {
        &self.fonts
    }

    pub fn shapes(&self) -> &ShapeList {
        &self.shapes
    }

    /// Starts a frame. Returns false when the frame is skipped, in which case
    /// draw calls are dropped until the next successful `begin_frame`.
    pub fn begin_frame(&mut self) -> bool {
        self.shapes.clear_transient();

        if self.process.needs_resize() {
            trace!("Frame skipped: resize pending");
            return false;
        }

        match self.backend.begin_frame() {
            Ok(FrameStatus::Ready) => {
                self.in_frame = true;
                true
            },
            Ok(FrameStatus::Skipped) => false,
            Err(e) => {
                error!("begin_frame: {e}");
                false
            },
        }
    }

    /// Submits everything drawn since [`begin_frame`](Renderer::begin_frame).
    pub fn end_frame(&mut self) {
        if !self.in_frame {
            self.shapes.clear_transient();
            return;
        }
        self.in_frame = false;

        let batches: Vec<Batch<'_>> = self
            .shapes
            .partitions()
            .into_iter()
            .map(|partition| Batch {
                texture: self.fonts.atlas(partition.key.font).map(|atlas| atlas.texture),
                partition,
            })
            .collect();

        if let Err(e) = self.backend.end_frame(&batches) {
            error!("end_frame: {e}");
        }
        self.shapes.clear_transient();
    }

    fn accepts_draws(&self) -> bool {
        !self.process.needs_resize()
    }

    /// Queues a raw instance.
    pub fn draw_shape(&mut self, instance: ShapeInstance, font: FontHandle, persist: bool) {
        if self.accepts_draws() {
            self.shapes.push(instance, font, persist);
        }
    }

    pub fn draw_quad(&mut self, pos: impl Into<Vec2>, size: impl Into<Vec2>, color: Color) {
        let instance = ShapeInstance::quad(xy(pos), xy(size), color);
        self.draw_shape(instance, FontHandle::NONE, false);
    }

    pub fn draw_quad_outline(&mut self, pos: impl Into<Vec2>, size: impl Into<Vec2>, color: Color) {
        let instance = ShapeInstance::quad_outline(xy(pos), xy(size), color, 1.0);
        self.draw_shape(instance, FontHandle::NONE, false);
    }

    pub fn draw_circle(&mut self, center: impl Into<Vec2>, radius: f32, color: Color) {
        let instance = ShapeInstance::circle(xy(center), radius, color);
        self.draw_shape(instance, FontHandle::NONE, false);
    }

    pub fn draw_circle_outline(
        &mut self,
        center: impl Into<Vec2>,
        radius: f32,
        color: Color,
        stroke_width: f32,
    ) {
        let instance =
            ShapeInstance::circle_outline(xy(center), radius, color, stroke_width);
        self.draw_shape(instance, FontHandle::NONE, false);
    }

    pub fn draw_line(
        &mut self,
        start: impl Into<Vec2>,
        end: impl Into<Vec2>,
        color: Color,
        thickness: f32,
    ) {
        let instance = ShapeInstance::line(xy(start), xy(end), color, thickness);
        self.draw_shape(instance, FontHandle::NONE, false);
    }

    /// Lays `text` out from `pos` (top of the line) and returns the advance.
    ///
    /// Codepoints missing from the atlas are skipped.
    pub fn draw_text(
        &mut self,
        text: &str,
        pos: impl Into<Vec2>,
        font: FontHandle,
        color: Color,
    ) -> f32 {
        let pos = pos.into();
        let Some(atlas) = self.fonts.atlas(font) else {
            return 0.0;
        };

        let mut pen = pos.x;
        let mut instances = Vec::with_capacity(text.len());
        for c in text.chars() {
            let Some(glyph) = atlas.glyphs.get(&(c as u32)) else {
                continue;
            };
            let (w, h) = atlas.glyph_size(glyph);
            if w > 0.0 && h > 0.0 {
                instances.push(ShapeInstance::text_quad(
                    [(pen + glyph.offset_x as f32).round(), pos.y + glyph.offset_y as f32],
                    [w, h],
                    color,
                    [glyph.u0, glyph.v0, glyph.u1, glyph.v1],
                ));
            }
            pen += glyph.advance;
        }

        for instance in instances {
            self.draw_shape(instance, font, false);
        }
        pen - pos.x
    }

    /// Sum of the advances `draw_text` would produce.
    pub fn measure_text(&self, text: &str, font: FontHandle) -> f32 {
        let Some(atlas) = self.fonts.atlas(font) else {
            return 0.0;
        };
        text.chars().filter_map(|c| atlas.glyphs.get(&(c as u32))).map(|g| g.advance).sum()
    }

    /// Drops every instance queued with `persist`.
    pub fn clear_persistent(&mut self) {
        self.shapes.clear_persistent();
    }

    /// Returns the handle for a font, building its atlas on first use.
    ///
    /// Returns [`FontHandle::NONE`] when the registry is full or the font
    /// cannot be built; failed keys are not retried.
    pub fn get_or_create_font(&mut self, key: &FontKey) -> FontHandle {
        if let Some(handle) = self.fonts.lookup(key) {
            return handle;
        }

        if self.fonts.is_full() {
            warn!("Font registry full, cannot create {key}");
            return FontHandle::NONE;
        }

        let Some(rasterizer) = self.rasterizer.as_mut() else {
            self.fonts.mark_failed(key.clone());
            return FontHandle::NONE;
        };

        let size = self.config.atlas_size;
        let mut packer = AtlasPacker::new(size, size, self.config.atlas_padding);
        let Some(font) = rasterizer.rasterize(key, &mut packer, self.config.glyph_range.clone())
        else {
            self.fonts.mark_failed(key.clone());
            return FontHandle::NONE;
        };

        match self.backend.create_texture(&font.image) {
            Ok(texture) => self.fonts.insert(
                key.clone(),
                font.glyphs,
                (font.image.width, font.image.height),
                texture,
            ),
            Err(e) => {
                error!("Font atlas upload for {key}: {e}");
                FontHandle::NONE
            },
        }
    }

    /// Registers a precompiled font under its own key.
    pub fn load_bitmap_font(&mut self, font: &BitmapFont) -> FontHandle {
        let key = font.key();
        if let Some(handle) = self.fonts.lookup(&key).filter(|h| h.is_valid()) {
            return handle;
        }
        if self.fonts.is_full() {
            warn!("Font registry full, cannot load {key}");
            return FontHandle::NONE;
        }

        let atlas = font.to_atlas();
        match self.backend.create_texture(&atlas.image) {
            Ok(texture) => {
                let size = (atlas.image.width, atlas.image.height);
                self.fonts.insert(key, atlas.glyphs, size, texture)
            },
            Err(e) => {
                error!("Bitmap font upload for {key}: {e}");
                FontHandle::NONE
            },
        }
    }

    /// Handle of the configured default font, built on first use.
    pub fn default_font(&mut self) -> FontHandle {
        if let Some(handle) = self.default_font {
            return handle;
        }
        let key = self.config.default_font.clone();
        let handle = self.get_or_create_font(&key);
        self.default_font = Some(handle);
        handle
    }

    /// Makes `handle` the font used where none is given.
    pub fn set_default_font(&mut self, handle: FontHandle) {
        self.default_font = Some(handle);
    }

    /// Families the rasterizer knows about.
    pub fn enumerate_families(&self) -> Vec<String> {
        self.rasterizer.as_ref().map(|r| r.families()).unwrap_or_default()
    }

    /// Draws `text` in the default font.
    pub fn draw_default_text(&mut self, text: &str, pos: impl Into<Vec2>, color: Color) -> f32 {
        let font = self.default_font();
        self.draw_text(text, pos, font, color)
    }
}

impl<B: RenderBackend> crate::gui::Canvas for Renderer<B> {
    fn quad(&mut self, pos: crate::math::Vec2i, size: crate::math::Vec2i, color: Color) {
        self.draw_quad(pos, size, color);
    }

    fn quad_outline(&mut self, pos: crate::math::Vec2i, size: crate::math::Vec2i, color: Color) {
        self.draw_quad_outline(pos, size, color);
    }

    fn line(&mut self, from: crate::math::Vec2i, to: crate::math::Vec2i, color: Color) {
        self.draw_line(from, to, color, 1.0);
    }

    fn text(&mut self, text: &str, pos: crate::math::Vec2i, color: Color) {
        self.draw_default_text(text, pos, color);
    }
}

fn xy(v: impl Into<Vec2>) -> [f32; 2] {
    let v: Vec2 = v.into();
    v.into()
}

/// White 1×1 texture bound for untextured partitions.
pub fn white_texture() -> AtlasImage {
    AtlasImage { width: 1, height: 1, pixels: WHITE.map(|c| (c * 255.0) as u8).to_vec() }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::*;
    use crate::fonts::tests::BoxRasterizer;
    use crate::fonts::{FontStyle, FontWeight};
    use crate::shapes::ShapeKind;

    #[derive(Default)]
    struct NullBackend {
        frames: Vec<Vec<(PartitionKey, u32, Option<TextureId>)>>,
        textures: u32,
    }

    impl RenderBackend for NullBackend {
        type Error = Infallible;

        fn begin_frame(&mut self) -> Result<FrameStatus, Infallible> {
            Ok(FrameStatus::Ready)
        }

        fn end_frame(&mut self, batches: &[Batch<'_>]) -> Result<(), Infallible> {
            self.frames.push(
                batches
                    .iter()
                    .map(|b| (b.partition.key, b.partition.instance_count(), b.texture))
                    .collect(),
            );
            Ok(())
        }

        fn post_present(&mut self) {}

        fn create_texture(&mut self, _: &AtlasImage) -> Result<TextureId, Infallible> {
            self.textures += 1;
            Ok(TextureId(self.textures))
        }

        fn release_backbuffers(&mut self) -> Result<(), Infallible> {
            Ok(())
        }

        fn recreate_backbuffers(&mut self, _: &ResizeRequest) -> Result<(), Infallible> {
            Ok(())
        }

        fn backbuffer_count(&self) -> u32 {
            2
        }

        fn viewport_size(&self) -> (u32, u32) {
            (800, 600)
        }
    }

    fn renderer() -> Renderer<NullBackend> {
        let config = OverlayConfig::default().with_max_fonts(2).with_atlas(128, 1);
        Renderer::new(NullBackend::default(), Arc::new(ProcessState::detached(800, 600)), config)
            .with_rasterizer(Box::new(BoxRasterizer::new(&["mono", "sans"])))
    }

    fn key(family: &str, size: u32) -> FontKey {
        FontKey::new(family, FontWeight::NORMAL, FontStyle::Normal, size)
    }

    #[test]
    fn font_lookup_is_cached_and_capped() {
        let mut r = renderer();
        let mono = r.get_or_create_font(&key("Mono", 12));
        assert_eq!(mono, FontHandle(1));
        assert_eq!(r.get_or_create_font(&key("mono", 12)), mono);
        assert_eq!(r.backend().textures, 1);

        assert_eq!(r.get_or_create_font(&key("Missing", 12)), FontHandle::NONE);
        assert_eq!(r.get_or_create_font(&key("Sans", 12)), FontHandle(2));
        assert_eq!(r.get_or_create_font(&key("Sans", 13)), FontHandle::NONE);
        assert_eq!(r.fonts().len(), 2);
    }

    #[test]
    fn families_come_from_the_rasterizer() {
        assert_eq!(renderer().enumerate_families(), ["mono", "sans"]);

        let bare = Renderer::new(
            NullBackend::default(),
            Arc::new(ProcessState::detached(800, 600)),
            OverlayConfig::default(),
        );
        assert!(bare.enumerate_families().is_empty());
    }

    #[test]
    fn text_emits_one_quad_per_glyph_in_the_font_partition() {
        let mut r = renderer();
        let font = r.get_or_create_font(&key("Mono", 8));
        assert!(r.begin_frame());
        let advance = r.draw_text("ab\u{2603}c", Vec2::new(10.0, 20.0), font, WHITE);
        assert_eq!(advance, 15.0);
        assert_eq!(r.measure_text("ab\u{2603}c", font), advance);
        r.end_frame();

        let frame = &r.backend().frames[0];
        assert_eq!(frame.len(), 1);
        let (partition, count, texture) = frame[0];
        assert_eq!(partition, PartitionKey::new(ShapeKind::TextQuad, font));
        assert_eq!(count, 3);
        assert_eq!(texture, Some(TextureId(1)));
    }

    #[test]
    fn draws_are_dropped_while_resizing() {
        let mut r = renderer();
        r.process().begin_resize();
        assert!(!r.begin_frame());
        r.draw_quad(Vec2::new(0.0, 0.0), Vec2::new(10.0, 10.0), WHITE);
        r.end_frame();
        assert!(r.backend().frames.is_empty());
        assert_eq!(r.shapes().transient_len(), 0);

        r.process().resize_complete(800, 600);
        assert!(r.begin_frame());
        r.draw_quad(Vec2::new(0.0, 0.0), Vec2::new(10.0, 10.0), WHITE);
        r.end_frame();
        assert_eq!(r.backend().frames.len(), 1);
    }

    #[test]
    fn persistent_shapes_survive_frames() {
        let mut r = renderer();
        r.draw_shape(ShapeInstance::quad([0.0; 2], [4.0; 2], WHITE), FontHandle::NONE, true);
        for _ in 0..3 {
            assert!(r.begin_frame());
            r.draw_quad(Vec2::new(5.0, 5.0), Vec2::new(1.0, 1.0), WHITE);
            r.end_frame();
        }
        assert!(r.backend().frames.iter().all(|f| f.len() == 1 && f[0].1 == 2));

        r.clear_persistent();
        assert!(r.begin_frame());
        r.end_frame();
        assert!(r.backend().frames.last().unwrap().is_empty());
    }
}
