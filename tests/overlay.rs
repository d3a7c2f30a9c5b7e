use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use flashhook::error::FrameError;
use flashhook::fonts::bitmap::{BitmapFont, BitmapGlyph};
use flashhook::fonts::{AtlasImage, FontHandle, FontStyle, FontWeight};
use flashhook::frame::{FrameRing, UploadArena};
use flashhook::gui::Window;
use flashhook::hooks::{InterceptorState, PresentInterceptor};
use flashhook::math::{rgba, Vec2, WHITE};
use flashhook::process::ProcessState;
use flashhook::renderer::{
    Batch, DrawRecord, FrameStatus, RenderBackend, Renderer, ResizeRequest, TextureId,
};
use flashhook::shapes::{PartitionKey, ShapeInstance, ShapeKind, QUAD_INDEX_COUNT};
use flashhook::OverlayConfig;

const ARENA_BYTES: usize = 64 * 1024;
const CHAIN: usize = 0x5000;

struct HeapFrame {
    _memory: Box<[u8]>,
    arena: UploadArena,
}

impl HeapFrame {
    fn new() -> Self {
        let mut memory = vec![0u8; ARENA_BYTES].into_boxed_slice();
        let arena =
            unsafe { UploadArena::from_raw_parts(memory.as_mut_ptr(), 0x1000, ARENA_BYTES) };
        Self { _memory: memory, arena }
    }
}

#[derive(Default)]
struct Events {
    draws: Vec<Vec<DrawRecord>>,
    instances: Vec<Vec<ShapeInstance>>,
    uploaded: Vec<usize>,
    order: Vec<String>,
}

/// Backend that uploads into heap arenas and records the draws it would
/// issue.
struct RecordingBackend {
    events: Arc<Mutex<Events>>,
    frames: FrameRing<HeapFrame>,
    index: u32,
    size: (u32, u32),
    textures: u32,
}

impl RecordingBackend {
    fn new(events: Arc<Mutex<Events>>, buffers: u32) -> Self {
        let frames = FrameRing::new(buffers, |_| Ok::<_, Infallible>(HeapFrame::new())).unwrap();
        Self { events, frames, index: 0, size: (800, 600), textures: 0 }
    }
}

impl RenderBackend for RecordingBackend {
    type Error = FrameError;

    fn begin_frame(&mut self) -> Result<FrameStatus, FrameError> {
        self.frames.get_mut(self.index)?.arena.reset();
        Ok(FrameStatus::Ready)
    }

    fn end_frame(&mut self, batches: &[Batch<'_>]) -> Result<(), FrameError> {
        let arena = &mut self.frames.get_mut(self.index)?.arena;
        let mut draws = Vec::new();
        let mut instances = Vec::new();
        for batch in batches {
            let parts: [&[u8]; 2] = [
                bytemuck::cast_slice(batch.partition.persistent),
                bytemuck::cast_slice(batch.partition.transient),
            ];
            arena.push_parts(&parts, 16)?;
            draws.push(DrawRecord::quads(batch.partition.key, batch.partition.instance_count()));

            // Read the uploaded bytes back the way the vertex fetch sees them.
            let uploaded = parts.concat();
            instances.extend(
                uploaded
                    .chunks_exact(std::mem::size_of::<ShapeInstance>())
                    .map(bytemuck::pod_read_unaligned::<ShapeInstance>),
            );
        }
        let used = arena.cursor();
        arena.seal();

        let mut events = self.events.lock().unwrap();
        events.draws.push(draws);
        events.instances.push(instances);
        events.uploaded.push(used);
        events.order.push("submit".into());
        Ok(())
    }

    fn post_present(&mut self) {
        self.index = (self.index + 1) % self.frames.len();
    }

    fn create_texture(&mut self, _: &AtlasImage) -> Result<TextureId, FrameError> {
        self.textures += 1;
        Ok(TextureId(self.textures))
    }

    fn release_backbuffers(&mut self) -> Result<(), FrameError> {
        self.events.lock().unwrap().order.push("release".into());
        Ok(())
    }

    fn recreate_backbuffers(&mut self, request: &ResizeRequest) -> Result<(), FrameError> {
        if request.buffer_count != 0 && request.buffer_count != self.frames.len() {
            self.frames =
                FrameRing::new(request.buffer_count, |_| Ok::<_, Infallible>(HeapFrame::new()))
                    .unwrap();
            self.index = 0;
        }
        if request.width != 0 && request.height != 0 {
            self.size = (request.width, request.height);
        }
        self.events.lock().unwrap().order.push(format!("recreate:{}", self.frames.len()));
        Ok(())
    }

    fn backbuffer_count(&self) -> u32 {
        self.frames.len()
    }

    fn viewport_size(&self) -> (u32, u32) {
        self.size
    }
}

fn process() -> Arc<ProcessState> {
    Arc::new(ProcessState::detached(800, 600))
}

fn start(
    events: &Arc<Mutex<Events>>,
    scene: impl FnMut(&mut Renderer<RecordingBackend>) + Send + 'static,
) -> PresentInterceptor<RecordingBackend> {
    let mut overlay = PresentInterceptor::new(process(), scene);
    let backend_events = Arc::clone(events);
    overlay.present(
        CHAIN,
        move |process| {
            let backend = RecordingBackend::new(backend_events, 2);
            Ok(Renderer::new(backend, Arc::clone(process), OverlayConfig::default()))
        },
        || (),
    );
    assert_eq!(overlay.state(), InterceptorState::Active);
    overlay
}

fn present(overlay: &mut PresentInterceptor<RecordingBackend>) {
    overlay.present(CHAIN, |_| unreachable!("already initialized"), || ());
}

#[test]
fn one_instanced_draw_per_partition() {
    let events = Arc::new(Mutex::new(Events::default()));
    let mut overlay = start(&events, |r| {
        for i in 0..100 {
            r.draw_quad(Vec2::new(i as f32, 0.0), Vec2::new(4.0, 4.0), WHITE);
        }
        r.draw_circle(Vec2::new(50.0, 50.0), 10.0, WHITE);
        r.draw_circle(Vec2::new(80.0, 50.0), 10.0, WHITE);
        r.draw_line(Vec2::new(0.0, 0.0), Vec2::new(800.0, 600.0), WHITE, 2.0);
    });
    present(&mut overlay);

    let events = events.lock().unwrap();
    assert_eq!(events.draws.len(), 2);
    for frame in &events.draws {
        assert_eq!(frame, &vec![
            DrawRecord::quads(PartitionKey::new(ShapeKind::Quad, FontHandle::NONE), 100),
            DrawRecord::quads(PartitionKey::new(ShapeKind::Circle, FontHandle::NONE), 2),
            DrawRecord::quads(PartitionKey::new(ShapeKind::Line, FontHandle::NONE), 1),
        ]);
        assert!(frame.iter().all(|d| d.index_count == QUAD_INDEX_COUNT));
    }

    let instance = std::mem::size_of::<ShapeInstance>();
    assert!(events.uploaded.iter().all(|&used| used >= 103 * instance));
}

#[test]
fn a_single_quad_uploads_one_instance_as_drawn() {
    let red = rgba(255, 0, 0, 255);
    let events = Arc::new(Mutex::new(Events::default()));
    let mut overlay = start(&events, move |r| {
        r.draw_quad(Vec2::new(0.0, 0.0), Vec2::new(100.0, 100.0), red);
    });
    present(&mut overlay);

    let events = events.lock().unwrap();
    for (draws, instances) in events.draws.iter().zip(&events.instances) {
        assert_eq!(draws, &vec![DrawRecord::quads(
            PartitionKey::new(ShapeKind::Quad, FontHandle::NONE),
            1
        )]);
        assert_eq!(draws[0].index_count, 6);

        assert_eq!(instances.len(), 1);
        let quad = instances[0];
        assert_eq!(quad.kind(), Some(ShapeKind::Quad));
        assert_eq!(quad.pos, [0.0, 0.0]);
        assert_eq!(quad.size, [100.0, 100.0]);
        assert_eq!(quad.rotation, 0.0);
        assert_eq!(quad.color, red);
    }
}

#[test]
fn uploaded_instances_keep_their_inputs_across_partitions() {
    let events = Arc::new(Mutex::new(Events::default()));
    let mut overlay = start(&events, |r| {
        r.draw_circle(Vec2::new(50.0, 40.0), 10.0, WHITE);
        r.draw_quad(Vec2::new(12.5, 7.0), Vec2::new(30.0, 4.0), WHITE);
        r.draw_line(Vec2::new(1.0, 2.0), Vec2::new(300.0, 200.0), WHITE, 3.0);
    });
    present(&mut overlay);

    let events = events.lock().unwrap();
    let instances = events.instances.last().unwrap();
    let kinds: Vec<_> = instances.iter().map(|i| i.kind()).collect();
    assert_eq!(kinds, vec![Some(ShapeKind::Quad), Some(ShapeKind::Circle), Some(ShapeKind::Line)]);

    assert_eq!((instances[0].pos, instances[0].size), ([12.5, 7.0], [30.0, 4.0]));
    assert_eq!((instances[1].pos, instances[1].size), ([40.0, 30.0], [20.0, 20.0]));
    assert_eq!((instances[2].pos, instances[2].size), ([1.0, 2.0], [300.0, 200.0]));
    assert_eq!(instances[2].stroke_width, 3.0);
    assert!(instances.iter().all(|i| i.rotation == 0.0));
}

#[test]
fn instances_past_the_arena_are_dropped_for_that_frame_only() {
    let events = Arc::new(Mutex::new(Events::default()));
    let flood = Arc::new(Mutex::new(true));
    let scene_flood = Arc::clone(&flood);
    let mut overlay = start(&events, move |r| {
        let count = if *scene_flood.lock().unwrap() { 10_000 } else { 10 };
        for _ in 0..count {
            r.draw_quad(Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0), WHITE);
        }
    });

    *flood.lock().unwrap() = false;
    present(&mut overlay);

    let events = events.lock().unwrap();
    // The flooded frame fails to upload and records nothing; the renderer
    // keeps going.
    assert_eq!(events.draws.len(), 1);
    assert_eq!(events.draws[0][0].instance_count, 10);
    assert_eq!(overlay.renderer().unwrap().shapes().transient_len(), 0);
}

#[test]
fn menu_and_text_share_the_frame() {
    let font = BitmapFont {
        family: "Tiny".into(),
        weight: FontWeight::NORMAL,
        style: FontStyle::Normal,
        size_px: 8,
        ascent: 6.0,
        width: 16,
        height: 16,
        glyphs: ('a'..='z')
            .map(|c| BitmapGlyph {
                codepoint: c as u32,
                x: 0,
                y: 0,
                w: 4,
                h: 6,
                advance: 5.0,
                bearing_x: 0.0,
                bearing_y: 6.0,
            })
            .collect(),
        coverage: vec![255; 16 * 16],
    };

    let window = Arc::new(Mutex::new(Window::new("flash hook", (10, 10), (450, 450))));
    let scene_window = Arc::clone(&window);
    let events = Arc::new(Mutex::new(Events::default()));
    let mut loaded = false;
    let mut overlay = start(&events, move |r| {
        if !loaded {
            let handle = r.load_bitmap_font(&font);
            r.set_default_font(handle);
            loaded = true;
        }
        scene_window.lock().unwrap().draw(r);
    });
    present(&mut overlay);

    let events = events.lock().unwrap();
    let frame = events.draws.last().unwrap();
    let kinds: Vec<ShapeKind> = frame.iter().map(|d| d.key.kind).collect();
    assert_eq!(kinds, vec![
        ShapeKind::Quad,
        ShapeKind::QuadOutline,
        ShapeKind::Line,
        ShapeKind::TextQuad
    ]);

    // "flash" and "hook", one quad per glyph.
    let text = frame.last().unwrap();
    assert_eq!(text.instance_count, 9);
    assert!(text.key.font.is_valid());
}

#[test]
fn resize_rebuilds_the_ring_between_frames() {
    let events = Arc::new(Mutex::new(Events::default()));
    let mut overlay = start(&events, |r| {
        r.draw_quad(Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0), WHITE);
    });

    let request = ResizeRequest { buffer_count: 3, width: 1280, height: 720, format: 0 };
    overlay.resize_buffers(CHAIN, request, || true, |ok| *ok);
    present(&mut overlay);

    let renderer = overlay.renderer().unwrap();
    assert_eq!(renderer.backend().backbuffer_count(), 3);
    assert_eq!(renderer.backend().viewport_size(), (1280, 720));
    assert_eq!(overlay.process().size(), flashhook::math::Vec2i::new(1280, 720));

    let events = events.lock().unwrap();
    assert_eq!(events.order, ["submit", "release", "recreate:3", "submit"]);
}
