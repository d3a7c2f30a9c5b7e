use std::mem::MaybeUninit;
use std::ptr::null;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{error, trace};
use windows::core::{s, ComInterface, PCSTR};
use windows::Win32::Foundation::{HWND, LPARAM, LRESULT, RECT, WPARAM};
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_11_0;
use windows::Win32::Graphics::Direct3D12::{
    D3D12CreateDevice, ID3D12CommandQueue, ID3D12Device, D3D12_COMMAND_LIST_TYPE_DIRECT,
    D3D12_COMMAND_QUEUE_DESC, D3D12_COMMAND_QUEUE_FLAG_NONE,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_ALPHA_MODE_UNSPECIFIED, DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_FORMAT_UNKNOWN,
    DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory2, IDXGIFactory2, IDXGISwapChain1, IDXGISwapChain3, DXGI_SCALING_STRETCH,
    DXGI_SWAP_CHAIN_DESC1, DXGI_SWAP_EFFECT_FLIP_DISCARD, DXGI_USAGE_RENDER_TARGET_OUTPUT,
};
use windows::Win32::Graphics::Gdi::HBRUSH;
use windows::Win32::System::LibraryLoader::GetModuleHandleA;
use windows::Win32::UI::WindowsAndMessaging::{
    AdjustWindowRect, CreateWindowExA, DefWindowProcA, DestroyWindow, DispatchMessageA,
    PeekMessageA, PostQuitMessage, RegisterClassA, TranslateMessage, CS_HREDRAW, CS_OWNDC,
    CS_VREDRAW, HMENU, PM_REMOVE, WINDOW_EX_STYLE, WM_DESTROY, WM_QUIT, WNDCLASSA,
    WS_OVERLAPPEDWINDOW, WS_VISIBLE,
};

/// A host application presenting an empty D3D12 swapchain in a loop, the
/// way a game would.
pub struct Dx12Harness {
    child: Option<JoinHandle<()>>,
    done: Arc<AtomicBool>,
    presents: Arc<AtomicU32>,
    resize: Arc<Mutex<Option<(u32, u32)>>>,
}

impl Dx12Harness {
    #[allow(unused)]
    pub fn new(caption: &'static str) -> Self {
        let done = Arc::new(AtomicBool::new(false));
        let presents = Arc::new(AtomicU32::new(0));
        let resize = Arc::new(Mutex::new(None));

        let child = Some(thread::spawn({
            let done = Arc::clone(&done);
            let presents = Arc::clone(&presents);
            let resize = Arc::clone(&resize);

            move || {
                let hwnd = unsafe { create_window(caption) };
                let (_device, _queue, swap_chain) = unsafe { create_swap_chain(hwnd) };

                while !done.load(Ordering::SeqCst) {
                    if let Some((width, height)) = resize.lock().unwrap().take() {
                        trace!("ResizeBuffers({width}, {height})");
                        let result = unsafe {
                            swap_chain.ResizeBuffers(0, width, height, DXGI_FORMAT_UNKNOWN, 0)
                        };
                        if let Err(e) = result {
                            error!("ResizeBuffers: {e:?}");
                        }
                    }

                    trace!("Present");
                    if let Err(e) = unsafe { swap_chain.Present(1, 0) }.ok() {
                        error!("Present: {e:?}");
                    }
                    presents.fetch_add(1, Ordering::SeqCst);

                    if !pump_messages() {
                        break;
                    }
                }

                let _ = unsafe { DestroyWindow(hwnd) };
            }
        }));

        Self { child, done, presents, resize }
    }

    /// Number of `Present` calls issued so far.
    #[allow(unused)]
    pub fn presents(&self) -> u32 {
        self.presents.load(Ordering::SeqCst)
    }

    /// Asks the render thread to resize its swapchain before the next frame.
    #[allow(unused)]
    pub fn request_resize(&self, width: u32, height: u32) {
        *self.resize.lock().unwrap() = Some((width, height));
    }
}

impl Drop for Dx12Harness {
    fn drop(&mut self) {
        self.done.store(true, Ordering::SeqCst);
        self.child.take().unwrap().join().unwrap();
    }
}

unsafe fn create_window(caption: &'static str) -> HWND {
    let hinstance = GetModuleHandleA(PCSTR(null())).unwrap();
    let wnd_class = WNDCLASSA {
        style: CS_OWNDC | CS_HREDRAW | CS_VREDRAW,
        lpfnWndProc: Some(window_proc),
        hInstance: hinstance.into(),
        lpszClassName: s!("FlashhookHarness"),
        hbrBackground: HBRUSH::default(),
        ..Default::default()
    };
    RegisterClassA(&wnd_class);

    let mut rect = RECT { left: 0, top: 0, right: 800, bottom: 600 };
    let _ = AdjustWindowRect(&mut rect, WS_OVERLAPPEDWINDOW | WS_VISIBLE, false);

    let caption = std::ffi::CString::new(caption).unwrap();
    CreateWindowExA(
        WINDOW_EX_STYLE::default(),
        s!("FlashhookHarness"),
        PCSTR(caption.as_ptr().cast()),
        WS_OVERLAPPEDWINDOW | WS_VISIBLE,
        100,
        100,
        rect.right - rect.left,
        rect.bottom - rect.top,
        HWND::default(),
        HMENU::default(),
        hinstance,
        None,
    )
}

unsafe fn create_swap_chain(hwnd: HWND) -> (ID3D12Device, ID3D12CommandQueue, IDXGISwapChain3) {
    let factory: IDXGIFactory2 = CreateDXGIFactory2(0).unwrap();
    let adapter = factory.EnumAdapters(0).unwrap();

    let mut device: Option<ID3D12Device> = None;
    D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, &mut device).unwrap();
    let device = device.unwrap();

    let queue: ID3D12CommandQueue = device
        .CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
            Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
            Priority: 0,
            Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
            NodeMask: 0,
        })
        .unwrap();

    let desc = DXGI_SWAP_CHAIN_DESC1 {
        Width: 800,
        Height: 600,
        Format: DXGI_FORMAT_R8G8B8A8_UNORM,
        Stereo: false.into(),
        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
        BufferCount: 2,
        Scaling: DXGI_SCALING_STRETCH,
        SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
        AlphaMode: DXGI_ALPHA_MODE_UNSPECIFIED,
        Flags: 0,
    };
    let swap_chain: IDXGISwapChain1 =
        factory.CreateSwapChainForHwnd(&queue, hwnd, &desc, None, None).unwrap();

    (device, queue, swap_chain.cast().unwrap())
}

fn pump_messages() -> bool {
    unsafe {
        let mut msg = MaybeUninit::zeroed();
        while PeekMessageA(msg.as_mut_ptr(), HWND::default(), 0, 0, PM_REMOVE).as_bool() {
            let msg = msg.assume_init_ref();
            if msg.message == WM_QUIT {
                return false;
            }
            TranslateMessage(msg);
            DispatchMessageA(msg);
        }
    }
    true
}

unsafe extern "system" fn window_proc(
    hwnd: HWND,
    msg: u32,
    w_param: WPARAM,
    l_param: LPARAM,
) -> LRESULT {
    match msg {
        WM_DESTROY => {
            PostQuitMessage(0);
            LRESULT(0)
        },
        _ => DefWindowProcA(hwnd, msg, w_param, l_param),
    }
}
