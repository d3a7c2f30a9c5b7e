//! Discovery of the `IDXGISwapChain` entry points.
//!
//! A throwaway device and swapchain are created on a hidden popup window,
//! the `Present` and `ResizeBuffers` slots are read out of the swapchain
//! vtable and the swapchain object is scanned for the command queue it was
//! created with. The offset found there lets the `Present` detour recover
//! the host's queue from any swapchain it is handed later.
use std::ffi::c_void;
use std::{mem, ptr};

/// `IDXGISwapChain::Present` vtable slot.
pub const PRESENT_SLOT: usize = 8;
/// `IDXGISwapChain::ResizeBuffers` vtable slot.
pub const RESIZE_BUFFERS_SLOT: usize = 13;
/// Default number of bytes scanned for the command queue pointer.
pub const DEFAULT_SCAN_BOUND: usize = 0x1000;

const WORD: usize = mem::size_of::<usize>();

/// Addresses extracted from a dummy swapchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookInfo {
    /// Address of `IDXGISwapChain::Present`.
    pub present: usize,
    /// Address of `IDXGISwapChain::ResizeBuffers`.
    pub resize_buffers: usize,
    /// Byte offset of the `ID3D12CommandQueue` pointer inside the swapchain.
    pub command_queue_offset: usize,
}

/// Finds the first pointer-aligned offset in `memory`, strictly below
/// `bound`, holding `needle`.
pub fn find_pointer_offset(memory: &[u8], needle: usize, bound: usize) -> Option<usize> {
    scan_words(bound.min(memory.len()), needle, |offset| {
        let mut word = [0u8; WORD];
        word.copy_from_slice(&memory[offset..offset + WORD]);
        usize::from_ne_bytes(word)
    })
}

/// Like [`find_pointer_offset`], reading the object in place one word at a
/// time. The scan stops at the first match.
///
/// # Safety
///
/// Every word from `object` up to the match, or up to `bound` when there is
/// none, must be readable.
pub unsafe fn scan_object(object: *const c_void, needle: usize, bound: usize) -> Option<usize> {
    scan_words(bound, needle, |offset| {
        ptr::read_unaligned((object as *const u8).add(offset) as *const usize)
    })
}

fn scan_words(bound: usize, needle: usize, mut read: impl FnMut(usize) -> usize) -> Option<usize> {
    (0..bound / WORD).map(|index| index * WORD).find(|&offset| read(offset) == needle)
}

/// Reads the function pointer stored at `slot` of the vtable of `object`.
///
/// # Safety
///
/// `object` must point to a live COM object whose vtable has more than
/// `slot` entries.
pub unsafe fn vtable_slot(object: *const c_void, slot: usize) -> usize {
    let vtable = *(object as *const *const usize);
    *vtable.add(slot)
}

#[cfg(windows)]
pub use self::discovery::discover;
#[cfg(windows)]
pub(crate) use self::discovery::create_device;

#[cfg(windows)]
mod discovery {
    use std::ffi::c_void;

    use tracing::{debug, error, info};
    use windows::core::{s, ComInterface, Interface, PCSTR};
    use windows::Win32::Foundation::{HMODULE, HWND, LPARAM, LRESULT, WPARAM};
    use windows::Win32::Graphics::Direct3D::*;
    use windows::Win32::Graphics::Direct3D12::*;
    use windows::Win32::Graphics::Dxgi::Common::*;
    use windows::Win32::Graphics::Dxgi::*;
    use windows::Win32::UI::WindowsAndMessaging::*;

    use super::*;
    use crate::error::{SetupContext, SetupError};
    use crate::process::{ProcessState, Rect};
    use crate::util::{module_path, try_out_ptr};

    const FEATURE_LEVELS: [D3D_FEATURE_LEVEL; 4] = [
        D3D_FEATURE_LEVEL_12_1,
        D3D_FEATURE_LEVEL_12_0,
        D3D_FEATURE_LEVEL_11_1,
        D3D_FEATURE_LEVEL_11_0,
    ];

    const DUMMY_CLASS: PCSTR = s!("FlashhookDummyWindow");

    /// Builds the throwaway device objects and extracts the hook targets.
    ///
    /// Everything created here is released before returning.
    pub fn discover(process: &ProcessState, scan_bound: usize) -> Result<HookInfo, SetupError> {
        let factory: IDXGIFactory6 =
            unsafe { CreateDXGIFactory2(0) }.context("CreateDXGIFactory2")?;
        let adapter: IDXGIAdapter1 = unsafe {
            factory.EnumAdapterByGpuPreference(0, DXGI_GPU_PREFERENCE_HIGH_PERFORMANCE)
        }
        .context("EnumAdapterByGpuPreference")?;

        let (device, _) = create_device(&adapter)?;
        let command_queue: ID3D12CommandQueue = unsafe {
            device.CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                Priority: 0,
                Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
                NodeMask: 0,
            })
        }
        .context("CreateCommandQueue")?;

        let window = DummyWindow::new(process)?;
        let rect = window.rect;

        let desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: rect.width().max(1) as u32,
            Height: rect.height().max(1) as u32,
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

        let swap_chain: IDXGISwapChain1 = unsafe {
            factory.CreateSwapChainForHwnd(&command_queue, window.hwnd, &desc, None, None)
        }
        .context("CreateSwapChainForHwnd")?;
        let swap_chain: IDXGISwapChain3 =
            swap_chain.cast().context("IDXGISwapChain1::cast<IDXGISwapChain3>")?;

        let object = swap_chain.as_raw() as *const c_void;
        let needle = command_queue.as_raw() as usize;
        // SAFETY: the DXGI runtime allocates the swapchain as one heap block
        // that holds the queue pointer; reads stop at the match, inside that
        // block.
        let command_queue_offset =
            unsafe { scan_object(object, needle, scan_bound) }.ok_or_else(|| {
                error!("Command queue not found in the first {scan_bound:#x} bytes");
                SetupError::OffsetNotFound { bound: scan_bound }
            })?;

        let present = unsafe { vtable_slot(object, PRESENT_SLOT) };
        let resize_buffers = unsafe { vtable_slot(object, RESIZE_BUFFERS_SLOT) };

        validate_slot(present, PRESENT_SLOT)?;
        validate_slot(resize_buffers, RESIZE_BUFFERS_SLOT)?;

        debug!(
            "Present {present:#x}, ResizeBuffers {resize_buffers:#x}, \
             command queue at +{command_queue_offset:#x}"
        );

        Ok(HookInfo { present, resize_buffers, command_queue_offset })
    }

    /// Walks the feature level ladder until a device is created.
    pub(crate) fn create_device(
        adapter: &IDXGIAdapter1,
    ) -> Result<(ID3D12Device, D3D_FEATURE_LEVEL), SetupError> {
        for level in FEATURE_LEVELS {
            match try_out_ptr(|v| unsafe { D3D12CreateDevice(adapter, level, v) }) {
                Ok(device) => {
                    info!("Created device with feature level {:#x}", level.0);
                    return Ok((device, level));
                },
                Err(e) => debug!("D3D12CreateDevice({:#x}) failed: {e:?}", level.0),
            }
        }

        error!("No feature level accepted by the adapter");
        Err(SetupError::NoFeatureLevel)
    }

    fn validate_slot(address: usize, slot: usize) -> Result<(), SetupError> {
        match module_of(address) {
            Some(module) => {
                debug!("Vtable slot {slot} -> {address:#x} in {module}");
                Ok(())
            },
            None => {
                error!("Vtable slot {slot} -> {address:#x} is not inside any loaded module");
                Err(SetupError::VtableMismatch { slot })
            },
        }
    }

    /// Returns the file name of the module containing `address`.
    pub(crate) fn module_of(address: usize) -> Option<String> {
        let path = module_path(address)?;
        Some(path.file_name().map_or_else(
            || path.display().to_string(),
            |name| name.to_string_lossy().into_owned(),
        ))
    }

    unsafe extern "system" fn dummy_wnd_proc(
        hwnd: HWND,
        msg: u32,
        wparam: WPARAM,
        lparam: LPARAM,
    ) -> LRESULT {
        DefWindowProcA(hwnd, msg, wparam, lparam)
    }

    /// Transparent popup covering the target window, alive for the duration
    /// of the discovery.
    struct DummyWindow {
        hwnd: HWND,
        instance: HMODULE,
        rect: Rect,
    }

    impl DummyWindow {
        fn new(process: &ProcessState) -> Result<Self, SetupError> {
            let instance = HMODULE(process.instance());
            let rect = process.window().rect;

            let wnd_class = WNDCLASSEXA {
                cbSize: std::mem::size_of::<WNDCLASSEXA>() as u32,
                style: CS_HREDRAW | CS_VREDRAW,
                lpfnWndProc: Some(dummy_wnd_proc),
                hInstance: instance.into(),
                lpszClassName: DUMMY_CLASS,
                ..Default::default()
            };

            if unsafe { RegisterClassExA(&wnd_class) } == 0 {
                return Err(SetupError::Window("RegisterClassExA failed for dummy window".into()));
            }

            let hwnd = unsafe {
                CreateWindowExA(
                    WS_EX_TOOLWINDOW | WS_EX_LAYERED | WS_EX_TRANSPARENT | WS_EX_TOPMOST,
                    DUMMY_CLASS,
                    s!("flashhook"),
                    WS_POPUP,
                    rect.left,
                    rect.top,
                    rect.width().max(1),
                    rect.height().max(1),
                    HWND::default(),
                    HMENU::default(),
                    instance,
                    None,
                )
            };

            if hwnd.0 == 0 {
                unsafe {
                    let _ = UnregisterClassA(DUMMY_CLASS, instance);
                }
                return Err(SetupError::Window("CreateWindowExA failed for dummy window".into()));
            }

            Ok(Self { hwnd, instance, rect })
        }
    }

    impl Drop for DummyWindow {
        fn drop(&mut self) {
            unsafe {
                let _ = DestroyWindow(self.hwnd);
                let _ = UnregisterClassA(DUMMY_CLASS, self.instance);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object_with(needle: usize, offset: usize, len: usize) -> Vec<u8> {
        let mut memory = vec![0u8; len];
        memory[offset..offset + WORD].copy_from_slice(&needle.to_ne_bytes());
        memory
    }

    #[test]
    fn finds_pointer_inside_bound() {
        let needle = 0x7ff6_1234_5678usize;
        for offset in [0, WORD, 0x120, DEFAULT_SCAN_BOUND - WORD] {
            let memory = object_with(needle, offset, DEFAULT_SCAN_BOUND + 0x100);
            assert_eq!(find_pointer_offset(&memory, needle, DEFAULT_SCAN_BOUND), Some(offset));
        }
    }

    #[test]
    fn misses_pointer_past_bound() {
        let needle = 0xdead_beefusize;
        let memory = object_with(needle, DEFAULT_SCAN_BOUND, DEFAULT_SCAN_BOUND + 0x100);
        assert_eq!(find_pointer_offset(&memory, needle, DEFAULT_SCAN_BOUND), None);
    }

    #[test]
    fn returns_first_match() {
        let needle = 0x1000_0000usize;
        let mut memory = object_with(needle, 0x40, 0x200);
        memory[0x80..0x80 + WORD].copy_from_slice(&needle.to_ne_bytes());
        assert_eq!(find_pointer_offset(&memory, needle, 0x200), Some(0x40));
    }

    #[test]
    fn in_place_scan_stops_at_the_first_match() {
        let needle = 0x7ff6_0000_4242usize;
        let object: Box<[usize]> = (0..8).map(|i| if i >= 5 { needle } else { i }).collect();
        let base = object.as_ptr() as *const c_void;

        assert_eq!(unsafe { scan_object(base, needle, 8 * WORD) }, Some(5 * WORD));
        assert_eq!(unsafe { scan_object(base, needle, 5 * WORD) }, None);
        // Unaligned bounds round down to whole words.
        assert_eq!(unsafe { scan_object(base, needle, 6 * WORD - 1) }, None);
        assert_eq!(unsafe { scan_object(base, 3, 8 * WORD) }, Some(3 * WORD));
    }

    #[test]
    fn short_memory_is_never_read_past_its_end() {
        let needle = 0xabcdusize;
        let memory = object_with(needle, 0x40, 0x48);
        assert_eq!(find_pointer_offset(&memory, needle, DEFAULT_SCAN_BOUND), Some(0x40));
        assert_eq!(find_pointer_offset(&memory[..0x44], needle, DEFAULT_SCAN_BOUND), None);
    }

    #[test]
    fn reads_vtable_slots() {
        let vtable: Vec<usize> = (0..16).map(|i| 0x1000 + i * 0x10).collect();
        let object = [vtable.as_ptr() as usize, 0, 0];
        let present = unsafe { vtable_slot(object.as_ptr() as *const _, PRESENT_SLOT) };
        let resize = unsafe { vtable_slot(object.as_ptr() as *const _, RESIZE_BUFFERS_SLOT) };
        assert_eq!(present, 0x1080);
        assert_eq!(resize, 0x10d0);
    }
}
