//! Detours for `IDXGISwapChain::Present` and `IDXGISwapChain::ResizeBuffers`.
use std::ffi::c_void;
use std::mem;
use std::sync::Arc;

use parking_lot::{const_mutex, const_rwlock, Mutex, RwLock};
use tracing::{error, info, trace, warn};
use windows::core::{Interface, HRESULT};
use windows::Win32::Graphics::Direct3D12::ID3D12CommandQueue;
use windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT;
use windows::Win32::Graphics::Dxgi::{IDXGISwapChain3, DXGI_ERROR_INVALID_CALL};

use crate::config::OverlayConfig;
use crate::error::SetupError;
use crate::fonts::dwrite::DirectWriteRasterizer;
use crate::hooks::{
    self, CallFence, Interceptor, InterceptorState, PresentInterceptor, Trampolines,
};
use crate::process::ProcessState;
use crate::renderer::dx12::DeviceContext;
use crate::renderer::{Renderer, ResizeRequest};
use crate::util;
use crate::vtable::HookInfo;

type PresentFn =
    unsafe extern "system" fn(this: *mut c_void, sync_interval: u32, flags: u32) -> HRESULT;

type ResizeBuffersFn = unsafe extern "system" fn(
    this: *mut c_void,
    buffer_count: u32,
    width: u32,
    height: u32,
    new_format: DXGI_FORMAT,
    flags: u32,
) -> HRESULT;

struct HookState {
    present: PresentFn,
    resize_buffers: ResizeBuffersFn,
    command_queue_offset: usize,
    config: OverlayConfig,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Global singletons
////////////////////////////////////////////////////////////////////////////////////////////////////

static HOOK_STATE: RwLock<Option<HookState>> = const_rwlock(None);
static OVERLAY: Mutex<Option<PresentInterceptor<DeviceContext>>> = const_mutex(None);
static ON_INIT_FAILURE: Mutex<Option<Box<dyn FnOnce() + Send>>> = const_mutex(None);

static PRESENT_RUNNING: CallFence = CallFence::new();
static RBUF_RUNNING: CallFence = CallFence::new();

////////////////////////////////////////////////////////////////////////////////////////////////////
// Hook entry points
////////////////////////////////////////////////////////////////////////////////////////////////////

unsafe extern "system" fn present_impl(
    this: *mut c_void,
    sync_interval: u32,
    flags: u32,
) -> HRESULT {
    let _fence = PRESENT_RUNNING.lock();

    let Some((present, offset)) =
        HOOK_STATE.read().as_ref().map(|state| (state.present, state.command_queue_offset))
    else {
        return DXGI_ERROR_INVALID_CALL;
    };

    trace!("IDXGISwapChain::Present({sync_interval}, {flags:#x}) invoked");
    let original = || present(this, sync_interval, flags);

    // The resize detour or teardown owns the overlay right now.
    let Some(mut overlay) = OVERLAY.try_lock() else {
        return original();
    };
    let Some(interceptor) = overlay.as_mut() else {
        return original();
    };
    let Some(swap_chain) = IDXGISwapChain3::from_raw_borrowed(&this) else {
        return original();
    };

    let first_call = interceptor.state() == InterceptorState::Uninitialized;
    let init = |process: &Arc<ProcessState>| create_renderer(this, swap_chain, offset, process);
    let result = interceptor.present(this as usize, init, original);

    if first_call && interceptor.state() == InterceptorState::Failed {
        if let Some(on_failure) = ON_INIT_FAILURE.lock().take() {
            warn!("Overlay could not start, unloading");
            on_failure();
        }
    }

    if let Err(e) = result.ok() {
        error!("Present failed: {e:?}");
        if let Some(renderer) = interceptor.renderer() {
            renderer.backend().log_device_removed_reason();
        }
        util::print_dxgi_debug_messages();
    }

    result
}

unsafe extern "system" fn resize_buffers_impl(
    this: *mut c_void,
    buffer_count: u32,
    width: u32,
    height: u32,
    new_format: DXGI_FORMAT,
    flags: u32,
) -> HRESULT {
    let _fence = RBUF_RUNNING.lock();

    let Some(resize_buffers) = HOOK_STATE.read().as_ref().map(|state| state.resize_buffers) else {
        return DXGI_ERROR_INVALID_CALL;
    };

    trace!("IDXGISwapChain::ResizeBuffers({buffer_count}, {width}, {height}) invoked");
    let original = || resize_buffers(this, buffer_count, width, height, new_format, flags);

    let mut overlay = OVERLAY.lock();
    let Some(interceptor) = overlay.as_mut() else {
        return original();
    };

    let request = ResizeRequest { buffer_count, width, height, format: new_format.0 as u32 };
    let result = interceptor.resize_buffers(this as usize, request, original, |hr| hr.is_ok());
    if let Err(e) = result.ok() {
        error!("ResizeBuffers failed: {e:?}");
        util::print_dxgi_debug_messages();
    }
    result
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Render context creation
////////////////////////////////////////////////////////////////////////////////////////////////////

fn create_renderer(
    this: *mut c_void,
    swap_chain: &IDXGISwapChain3,
    command_queue_offset: usize,
    process: &Arc<ProcessState>,
) -> Result<Renderer<DeviceContext>, SetupError> {
    let config = HOOK_STATE
        .read()
        .as_ref()
        .map(|state| state.config.clone())
        .ok_or(SetupError::NotInstalled)?;

    let command_queue = unsafe { command_queue_at(this, command_queue_offset) }
        .ok_or(SetupError::CommandQueueMissing { offset: command_queue_offset })?;

    let context = DeviceContext::hooked(swap_chain, &command_queue, &config)?;
    let renderer = Renderer::new(context, Arc::clone(process), config);

    Ok(match DirectWriteRasterizer::new() {
        Ok(rasterizer) => renderer.with_rasterizer(Box::new(rasterizer)),
        Err(e) => {
            warn!("DirectWrite unavailable, only bitmap fonts will load: {e:?}");
            renderer
        },
    })
}

/// Reads the command queue pointer stored inside the swapchain object.
///
/// # Safety
///
/// `swap_chain` must be a live swapchain and `offset` must lie inside it.
unsafe fn command_queue_at(swap_chain: *mut c_void, offset: usize) -> Option<ID3D12CommandQueue> {
    let raw = *((swap_chain as *const u8).add(offset) as *const *mut c_void);
    ID3D12CommandQueue::from_raw_borrowed(&raw).cloned()
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Installation
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The installed `Present` and `ResizeBuffers` detours.
pub struct Dx12Hooks<I: Interceptor> {
    interceptor: I,
    trampolines: Trampolines,
}

impl<I: Interceptor> Dx12Hooks<I> {
    /// Creates both detours, disabled, and hands `overlay` to them.
    ///
    /// # Safety
    ///
    /// `info` must come from [`crate::vtable::discover`] in this process.
    pub unsafe fn new(
        mut interceptor: I,
        info: &HookInfo,
        overlay: PresentInterceptor<DeviceContext>,
        config: OverlayConfig,
    ) -> Result<Self, I::Error> {
        let trampolines = hooks::install(
            &mut interceptor,
            info,
            present_impl as *mut c_void,
            resize_buffers_impl as *mut c_void,
        )?;

        *HOOK_STATE.write() = Some(HookState {
            present: mem::transmute::<usize, PresentFn>(trampolines.present),
            resize_buffers: mem::transmute::<usize, ResizeBuffersFn>(trampolines.resize_buffers),
            command_queue_offset: info.command_queue_offset,
            config,
        });
        *OVERLAY.lock() = Some(overlay);

        Ok(Self { interceptor, trampolines })
    }

    /// Runs `f` once if the render context cannot be created.
    pub fn on_init_failure(&self, f: impl FnOnce() + Send + 'static) {
        *ON_INIT_FAILURE.lock() = Some(Box::new(f));
    }

    pub fn trampolines(&self) -> Trampolines {
        self.trampolines
    }

    pub fn interceptor(&self) -> &I {
        &self.interceptor
    }

    /// Enables both detours.
    ///
    /// # Safety
    ///
    /// Patches the host's DXGI code.
    pub unsafe fn hook(&mut self) -> Result<(), I::Error> {
        self.interceptor.enable_all()?;
        info!("DirectX 12 hooks enabled");
        Ok(())
    }

    /// Disables both detours, waits for running calls to return and drops
    /// the render context.
    ///
    /// # Safety
    ///
    /// Patches the host's DXGI code.
    pub unsafe fn unhook(&mut self) -> Result<(), I::Error> {
        trace!("Disabling hooks...");
        let result = self.interceptor.disable_all();

        trace!(
            "Waiting on {} Present and {} ResizeBuffers calls",
            PRESENT_RUNNING.callers(),
            RBUF_RUNNING.callers()
        );
        PRESENT_RUNNING.wait();
        RBUF_RUNNING.wait();

        trace!("Cleaning up renderer...");
        let overlay = OVERLAY.lock().take();
        drop(overlay);
        *HOOK_STATE.write() = None;
        drop(ON_INIT_FAILURE.lock().take());

        util::disable_dxgi_debug();
        result
    }
}
