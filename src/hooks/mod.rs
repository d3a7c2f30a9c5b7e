//! Function interception and the `Present`/`ResizeBuffers` state machine.
//!
//! The detours in [`dx12`] are thin: they recover their arguments, then hand
//! the real call to a [`PresentInterceptor`] as a closure. Everything that
//! happens around that call lives here and does not depend on how the
//! detour was installed.
use std::ffi::c_void;
use std::fmt;
use std::hint;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, trace};

use crate::error::SetupError;
use crate::process::ProcessState;
use crate::renderer::{RenderBackend, Renderer, ResizeRequest};
use crate::vtable::HookInfo;

#[cfg(windows)]
pub mod dx12;

/// Installs detours over function entry points.
///
/// Implement this to swap the hooking mechanism; [`crate::mh::MinHook`] is
/// the one used by the DLL entry point.
pub trait Interceptor {
    type Error: fmt::Debug;

    /// Creates a disabled detour from `target` to `detour` and returns the
    /// trampoline that calls the original code.
    ///
    /// # Safety
    ///
    /// `target` and `detour` must be functions with the same signature and
    /// calling convention.
    unsafe fn create(
        &mut self,
        target: *mut c_void,
        detour: *mut c_void,
    ) -> Result<*mut c_void, Self::Error>;

    /// Enables every created detour.
    ///
    /// # Safety
    ///
    /// Patches live code.
    unsafe fn enable_all(&mut self) -> Result<(), Self::Error>;

    /// Disables every created detour.
    ///
    /// # Safety
    ///
    /// Patches live code.
    unsafe fn disable_all(&mut self) -> Result<(), Self::Error>;
}

/// Entry points of the original `Present` and `ResizeBuffers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trampolines {
    pub present: usize,
    pub resize_buffers: usize,
}

/// Creates the two swapchain detours.
///
/// # Safety
///
/// The detours must match the signatures of the functions at `info`.
pub unsafe fn install<I: Interceptor>(
    interceptor: &mut I,
    info: &HookInfo,
    present_detour: *mut c_void,
    resize_buffers_detour: *mut c_void,
) -> Result<Trampolines, I::Error> {
    let present = interceptor.create(info.present as *mut c_void, present_detour)?;
    let resize_buffers =
        interceptor.create(info.resize_buffers as *mut c_void, resize_buffers_detour)?;

    debug!("Present trampoline {present:p}, ResizeBuffers trampoline {resize_buffers:p}");
    Ok(Trampolines { present: present as usize, resize_buffers: resize_buffers as usize })
}

/// Counts the threads running a detour so teardown can wait for all of
/// them to return.
pub(crate) struct CallFence(AtomicUsize);

impl CallFence {
    pub(crate) const fn new() -> Self {
        Self(AtomicUsize::new(0))
    }

    /// Raised until every returned guard is dropped.
    pub(crate) fn lock(&self) -> CallFenceGuard<'_> {
        self.0.fetch_add(1, Ordering::SeqCst);
        CallFenceGuard(self)
    }

    pub(crate) fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst) != 0
    }

    pub(crate) fn callers(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// Spins until no guard is alive.
    pub(crate) fn wait(&self) {
        while self.is_raised() {
            hint::spin_loop();
        }
    }
}

pub(crate) struct CallFenceGuard<'a>(&'a CallFence);

impl Drop for CallFenceGuard<'_> {
    fn drop(&mut self) {
        self.0 .0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Lifecycle of the overlay inside the host's present calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptorState {
    /// No `Present` seen yet.
    Uninitialized,
    /// The render context exists and draws every frame.
    Active,
    /// Initialization failed or the overlay was torn down. The host's calls
    /// pass straight through.
    Failed,
}

enum State<B: RenderBackend> {
    Uninitialized,
    Active(Renderer<B>),
    Failed,
}

/// Hook-side driver of a [`Renderer`].
///
/// The render context is created lazily on the first `Present`, from the
/// swapchain handed to that call. That swapchain is the only one the overlay
/// draws on; calls for any other chain in the host pass straight through.
pub struct PresentInterceptor<B: RenderBackend> {
    state: State<B>,
    process: Arc<ProcessState>,
    scene: Box<dyn FnMut(&mut Renderer<B>) + Send>,
    target: Option<usize>,
}

impl<B: RenderBackend> PresentInterceptor<B> {
    /// `scene` is invoked every frame between `begin_frame` and `end_frame`.
    pub fn new(
        process: Arc<ProcessState>,
        scene: impl FnMut(&mut Renderer<B>) + Send + 'static,
    ) -> Self {
        Self { state: State::Uninitialized, process, scene: Box::new(scene), target: None }
    }

    /// Address of the swapchain the render context was built for.
    pub fn target(&self) -> Option<usize> {
        self.target
    }

    fn is_foreign(&self, target: usize) -> bool {
        self.target.is_some_and(|adopted| adopted != target)
    }

    pub fn state(&self) -> InterceptorState {
        match self.state {
            State::Uninitialized => InterceptorState::Uninitialized,
            State::Active(_) => InterceptorState::Active,
            State::Failed => InterceptorState::Failed,
        }
    }

    pub fn process(&self) -> &Arc<ProcessState> {
        &self.process
    }

    pub fn renderer(&self) -> Option<&Renderer<B>> {
        match &self.state {
            State::Active(renderer) => Some(renderer),
            _ => None,
        }
    }

    pub fn renderer_mut(&mut self) -> Option<&mut Renderer<B>> {
        match &mut self.state {
            State::Active(renderer) => Some(renderer),
            _ => None,
        }
    }

    /// Wraps one host `Present` on the swapchain at `target`.
    ///
    /// `init` builds the render context on the first call and adopts
    /// `target`; `original` is the real `Present` and is always invoked
    /// exactly once.
    pub fn present<R>(
        &mut self,
        target: usize,
        init: impl FnOnce(&Arc<ProcessState>) -> Result<Renderer<B>, SetupError>,
        original: impl FnOnce() -> R,
    ) -> R {
        if self.is_foreign(target) {
            trace!("Present on foreign swapchain {target:#x}");
            return original();
        }

        if let State::Uninitialized = self.state {
            self.state = match init(&self.process) {
                Ok(renderer) => {
                    info!("Overlay initialized on swapchain {target:#x}");
                    self.target = Some(target);
                    State::Active(renderer)
                },
                Err(e) => {
                    error!("Overlay initialization failed: {e}");
                    State::Failed
                },
            };
        }

        if let State::Active(renderer) = &mut self.state {
            if renderer.begin_frame() {
                (self.scene)(renderer);
                renderer.end_frame();
            }
        }

        trace!("Calling original Present");
        let result = original();

        if let State::Active(renderer) = &mut self.state {
            renderer.backend_mut().post_present();
        }

        result
    }

    /// Wraps one host `ResizeBuffers` on the swapchain at `target`.
    ///
    /// Swapchain views are released before `original` runs and rebuilt only
    /// when `succeeded` accepts its result. A failed resize leaves drawing
    /// suspended until the next successful one.
    pub fn resize_buffers<R>(
        &mut self,
        target: usize,
        request: ResizeRequest,
        original: impl FnOnce() -> R,
        succeeded: impl FnOnce(&R) -> bool,
    ) -> R {
        if self.is_foreign(target) {
            trace!("ResizeBuffers on foreign swapchain {target:#x}");
            return original();
        }

        let State::Active(renderer) = &mut self.state else {
            return original();
        };

        self.process.begin_resize();
        if let Err(e) = renderer.backend_mut().release_backbuffers() {
            error!("Releasing backbuffers: {e}");
        }

        trace!("Calling original ResizeBuffers");
        let result = original();

        if !succeeded(&result) {
            error!("ResizeBuffers failed, overlay suspended until the next resize");
            return result;
        }

        match renderer.backend_mut().recreate_backbuffers(&request) {
            Ok(()) => {
                let (width, height) = renderer.backend().viewport_size();
                self.process.resize_complete(width, height);
            },
            Err(e) => error!("Recreating backbuffers: {e}"),
        }

        result
    }

    /// Drops the render context. Later calls pass straight through.
    pub fn teardown(&mut self) -> Option<Renderer<B>> {
        match std::mem::replace(&mut self.state, State::Failed) {
            State::Active(renderer) => Some(renderer),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::Mutex;

    use super::*;
    use crate::config::OverlayConfig;
    use crate::fonts::AtlasImage;
    use crate::math::WHITE;
    use crate::math::Vec2;
    use crate::renderer::{Batch, FrameStatus, TextureId};

    type Log = Arc<Mutex<Vec<String>>>;

    const CHAIN: usize = 0x5000;
    const OTHER_CHAIN: usize = 0x6000;

    struct LogBackend {
        log: Log,
        size: (u32, u32),
        buffers: u32,
    }

    impl LogBackend {
        fn push(&self, event: impl Into<String>) {
            self.log.lock().unwrap().push(event.into());
        }
    }

    impl RenderBackend for LogBackend {
        type Error = Infallible;

        fn begin_frame(&mut self) -> Result<FrameStatus, Infallible> {
            self.push("begin_frame");
            Ok(FrameStatus::Ready)
        }

        fn end_frame(&mut self, batches: &[Batch<'_>]) -> Result<(), Infallible> {
            self.push(format!("end_frame:{}", batches.len()));
            Ok(())
        }

        fn post_present(&mut self) {
            self.push("post_present");
        }

        fn create_texture(&mut self, _: &AtlasImage) -> Result<TextureId, Infallible> {
            Ok(TextureId(1))
        }

        fn release_backbuffers(&mut self) -> Result<(), Infallible> {
            self.push(format!("release:{}", self.buffers));
            self.buffers = 0;
            Ok(())
        }

        fn recreate_backbuffers(&mut self, request: &ResizeRequest) -> Result<(), Infallible> {
            self.buffers = request.buffer_count;
            self.size = (request.width, request.height);
            self.push(format!("recreate:{}", self.buffers));
            Ok(())
        }

        fn backbuffer_count(&self) -> u32 {
            self.buffers
        }

        fn viewport_size(&self) -> (u32, u32) {
            self.size
        }
    }

    fn interceptor(log: &Log) -> PresentInterceptor<LogBackend> {
        let scene_log = log.clone();
        PresentInterceptor::new(Arc::new(ProcessState::detached(800, 600)), move |r| {
            scene_log.lock().unwrap().push("scene".into());
            r.draw_quad(Vec2::new(0.0, 0.0), Vec2::new(10.0, 10.0), WHITE);
        })
    }

    fn init(
        log: &Log,
    ) -> impl FnOnce(&Arc<ProcessState>) -> Result<Renderer<LogBackend>, SetupError> {
        let log = log.clone();
        move |process| {
            log.lock().unwrap().push("init".into());
            let backend = LogBackend { log, size: (800, 600), buffers: 2 };
            Ok(Renderer::new(backend, process.clone(), OverlayConfig::default()))
        }
    }

    fn original(log: &Log, event: &'static str) -> impl FnOnce() -> i32 {
        let log = log.clone();
        move || {
            log.lock().unwrap().push(event.into());
            0
        }
    }

    fn drain(log: &Log) -> Vec<String> {
        std::mem::take(&mut *log.lock().unwrap())
    }

    #[derive(Default)]
    struct FakeInterceptor {
        created: Vec<(usize, usize)>,
        fail_on: Option<usize>,
    }

    impl Interceptor for FakeInterceptor {
        type Error = &'static str;

        unsafe fn create(
            &mut self,
            target: *mut c_void,
            detour: *mut c_void,
        ) -> Result<*mut c_void, &'static str> {
            if self.fail_on == Some(target as usize) {
                return Err("refused");
            }
            self.created.push((target as usize, detour as usize));
            Ok((target as usize + 1) as *mut c_void)
        }

        unsafe fn enable_all(&mut self) -> Result<(), &'static str> {
            Ok(())
        }

        unsafe fn disable_all(&mut self) -> Result<(), &'static str> {
            Ok(())
        }
    }

    #[test]
    fn install_detours_both_entry_points() {
        let info =
            HookInfo { present: 0x1000, resize_buffers: 0x2000, command_queue_offset: 0x118 };
        let mut fake = FakeInterceptor::default();
        let trampolines =
            unsafe { install(&mut fake, &info, 0xa000 as *mut c_void, 0xb000 as *mut c_void) }
                .unwrap();

        assert_eq!(fake.created, vec![(0x1000, 0xa000), (0x2000, 0xb000)]);
        assert_eq!(trampolines, Trampolines { present: 0x1001, resize_buffers: 0x2001 });

        let mut refusing = FakeInterceptor { fail_on: Some(0x2000), ..Default::default() };
        let result =
            unsafe { install(&mut refusing, &info, 0xa000 as *mut c_void, 0xb000 as *mut c_void) };
        assert_eq!(result, Err("refused"));
    }

    #[test]
    fn present_wraps_the_original_call() {
        let log = Log::default();
        let mut hook = interceptor(&log);
        assert_eq!(hook.state(), InterceptorState::Uninitialized);

        hook.present(CHAIN, init(&log), original(&log, "present"));
        assert_eq!(hook.state(), InterceptorState::Active);
        assert_eq!(drain(&log), vec![
            "init",
            "begin_frame",
            "scene",
            "end_frame:1",
            "present",
            "post_present"
        ]);

        hook.present(CHAIN, init(&log), original(&log, "present"));
        assert_eq!(drain(&log), vec![
            "begin_frame",
            "scene",
            "end_frame:1",
            "present",
            "post_present"
        ]);
    }

    #[test]
    fn failed_initialization_is_not_retried() {
        let log = Log::default();
        let mut hook = interceptor(&log);

        for _ in 0..2 {
            hook.present(CHAIN, |_| Err(SetupError::NoFeatureLevel), original(&log, "present"));
        }
        assert_eq!(hook.state(), InterceptorState::Failed);
        assert_eq!(drain(&log), vec!["present", "present"]);
    }

    #[test]
    fn resize_releases_before_and_recreates_after() {
        let log = Log::default();
        let mut hook = interceptor(&log);
        hook.present(CHAIN, init(&log), original(&log, "present"));
        drain(&log);

        let request = ResizeRequest { buffer_count: 3, width: 1024, height: 768, format: 0 };
        hook.resize_buffers(CHAIN, request, original(&log, "resize"), |r| *r == 0);

        assert_eq!(drain(&log), vec!["release:2", "resize", "recreate:3"]);
        assert!(!hook.process().needs_resize());
        assert_eq!(hook.process().size(), crate::math::Vec2i::new(1024, 768));
        assert_eq!(hook.renderer().unwrap().backend().backbuffer_count(), 3);
    }

    #[test]
    fn failed_resize_suspends_drawing() {
        let log = Log::default();
        let mut hook = interceptor(&log);
        hook.present(CHAIN, init(&log), original(&log, "present"));
        drain(&log);

        let request = ResizeRequest { buffer_count: 0, width: 1024, height: 768, format: 0 };
        hook.resize_buffers(CHAIN, request, original(&log, "resize"), |_| false);
        assert_eq!(drain(&log), vec!["release:2", "resize"]);
        assert!(hook.process().needs_resize());

        hook.present(CHAIN, init(&log), original(&log, "present"));
        assert_eq!(drain(&log), vec!["present", "post_present"]);
    }

    #[test]
    fn resize_before_first_present_passes_through() {
        let log = Log::default();
        let mut hook = interceptor(&log);
        let request = ResizeRequest { buffer_count: 2, width: 640, height: 480, format: 0 };
        hook.resize_buffers(CHAIN, request, original(&log, "resize"), |_| true);
        assert_eq!(drain(&log), vec!["resize"]);
        assert!(!hook.process().needs_resize());
    }

    #[test]
    fn teardown_stops_drawing() {
        let log = Log::default();
        let mut hook = interceptor(&log);
        hook.present(CHAIN, init(&log), original(&log, "present"));
        assert!(hook.teardown().is_some());
        drain(&log);

        hook.present(CHAIN, init(&log), original(&log, "present"));
        assert_eq!(drain(&log), vec!["present"]);
        assert_eq!(hook.state(), InterceptorState::Failed);
    }

    #[test]
    fn other_swapchains_pass_through() {
        let log = Log::default();
        let mut hook = interceptor(&log);
        hook.present(CHAIN, init(&log), original(&log, "present"));
        assert_eq!(hook.target(), Some(CHAIN));
        drain(&log);

        hook.present(OTHER_CHAIN, init(&log), original(&log, "present"));
        assert_eq!(drain(&log), vec!["present"]);

        let request = ResizeRequest { buffer_count: 3, width: 640, height: 480, format: 0 };
        hook.resize_buffers(OTHER_CHAIN, request, original(&log, "resize"), |_| true);
        assert_eq!(drain(&log), vec!["resize"]);
        assert!(!hook.process().needs_resize());
        assert_eq!(hook.renderer().unwrap().backend().backbuffer_count(), 2);

        hook.present(CHAIN, init(&log), original(&log, "present"));
        assert_eq!(drain(&log), vec![
            "begin_frame",
            "scene",
            "end_frame:1",
            "present",
            "post_present"
        ]);
    }

    #[test]
    fn failed_initialization_adopts_no_swapchain() {
        let log = Log::default();
        let mut hook = interceptor(&log);
        hook.present(CHAIN, |_| Err(SetupError::NoFeatureLevel), original(&log, "present"));
        assert_eq!(hook.target(), None);
    }

    #[test]
    fn call_fence_lowers_when_the_guard_drops() {
        let fence = CallFence::new();
        {
            let _guard = fence.lock();
            assert!(fence.is_raised());
        }
        assert!(!fence.is_raised());
        fence.wait();
    }

    #[test]
    fn call_fence_stays_raised_while_any_caller_is_inside() {
        let fence = Arc::new(CallFence::new());
        let first = fence.lock();
        let second = fence.lock();
        assert_eq!(fence.callers(), 2);

        drop(first);
        assert!(fence.is_raised());

        let waiter = {
            let fence = Arc::clone(&fence);
            std::thread::spawn(move || fence.wait())
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(!waiter.is_finished());

        drop(second);
        waiter.join().unwrap();
        assert_eq!(fence.callers(), 0);
    }
}
