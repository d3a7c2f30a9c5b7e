//! Host process and window bookkeeping.
//!
//! [`ProcessState`] is shared between the render thread (inside the `Present`
//! detour) and the menu polling thread. The `needs_resize` flag is raised by
//! the `ResizeBuffers` detour before the swapchain buffers go away and
//! lowered once the overlay has rebuilt its views; draw calls made while it
//! is raised are dropped.
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use crate::math::Vec2i;

/// Window rectangle in screen coordinates.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// Window the overlay draws over.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WindowInfo {
    /// Raw `HWND` value.
    pub handle: isize,
    pub rect: Rect,
}

/// Process-wide state shared by the hook and the GUI.
#[derive(Debug)]
pub struct ProcessState {
    pid: u32,
    instance: isize,
    window: RwLock<WindowInfo>,
    needs_resize: AtomicBool,
}

impl ProcessState {
    pub fn new(pid: u32, instance: isize, window: WindowInfo) -> Self {
        Self { pid, instance, window: RwLock::new(window), needs_resize: AtomicBool::new(false) }
    }

    /// State not tied to any real window.
    pub fn detached(width: i32, height: i32) -> Self {
        let rect = Rect { left: 0, top: 0, right: width, bottom: height };
        Self::new(std::process::id(), 0, WindowInfo { handle: 0, rect })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Raw `HINSTANCE` of the module the overlay runs in.
    pub fn instance(&self) -> isize {
        self.instance
    }

    pub fn window(&self) -> WindowInfo {
        *self.window.read()
    }

    pub fn set_window(&self, window: WindowInfo) {
        *self.window.write() = window;
    }

    pub fn size(&self) -> Vec2i {
        let rect = self.window.read().rect;
        Vec2i::new(rect.width(), rect.height())
    }

    pub fn pos(&self) -> Vec2i {
        let rect = self.window.read().rect;
        Vec2i::new(rect.left, rect.top)
    }

    pub fn needs_resize(&self) -> bool {
        self.needs_resize.load(Ordering::Acquire)
    }

    /// Marks the swapchain buffers as going away.
    pub fn begin_resize(&self) {
        self.needs_resize.store(true, Ordering::Release);
    }

    /// Records the new client size and resumes drawing.
    pub fn resize_complete(&self, width: u32, height: u32) {
        {
            let mut window = self.window.write();
            window.rect.right = window.rect.left + width as i32;
            window.rect.bottom = window.rect.top + height as i32;
        }
        debug!("Resize complete: {width}x{height}");
        self.needs_resize.store(false, Ordering::Release);
    }
}

#[cfg(windows)]
pub use self::win32::pump_messages;

#[cfg(windows)]
mod win32 {
    use std::ffi::c_void;

    use tracing::{debug, error};
    use windows::core::{s, PCSTR};
    use windows::Win32::Foundation::{
        GetLastError, BOOL, COLORREF, ERROR_CLASS_ALREADY_EXISTS, HMODULE, HWND, LPARAM, LRESULT,
        POINT, RECT, WPARAM,
    };
    use windows::Win32::Graphics::Gdi::{ClientToScreen, HBRUSH};
    use windows::Win32::System::LibraryLoader::GetModuleHandleA;
    use windows::Win32::System::Threading::GetCurrentProcessId;
    use windows::Win32::UI::WindowsAndMessaging::*;

    use super::*;
    use crate::config::OverlayConfig;
    use crate::error::{SetupContext, SetupError};

    const STANDALONE_CLASS: PCSTR = s!("FlashhookOverlayWindow");
    const CONSOLE_CLASS: &[u8] = b"ConsoleWindowClass";

    struct WindowSearch {
        pid: u32,
        found: Option<HWND>,
    }

    unsafe extern "system" fn enum_windows_proc(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let search = &mut *(lparam.0 as *mut WindowSearch);

        let mut pid = 0u32;
        GetWindowThreadProcessId(hwnd, Some(&mut pid));
        if pid != search.pid || !IsWindowVisible(hwnd).as_bool() || IsIconic(hwnd).as_bool() {
            return true.into();
        }

        let mut class = [0u8; 64];
        let len = GetClassNameA(hwnd, &mut class) as usize;
        if &class[..len] == CONSOLE_CLASS {
            return true.into();
        }

        search.found = Some(hwnd);
        false.into()
    }

    /// Client rectangle of `hwnd` in screen coordinates.
    pub(crate) fn client_rect(hwnd: HWND) -> Result<Rect, SetupError> {
        let mut rect = RECT::default();
        unsafe { GetClientRect(hwnd, &mut rect) }.context("GetClientRect")?;

        let mut origin = POINT { x: 0, y: 0 };
        unsafe { ClientToScreen(hwnd, &mut origin) };

        Ok(Rect {
            left: origin.x,
            top: origin.y,
            right: origin.x + rect.right - rect.left,
            bottom: origin.y + rect.bottom - rect.top,
        })
    }

    impl ProcessState {
        /// State for the current process, drawing over its main window.
        pub fn current(instance: isize) -> Result<Self, SetupError> {
            Self::for_pid(unsafe { GetCurrentProcessId() }, instance, None, None)
        }

        /// Finds the first visible, non-console top-level window of `pid`
        /// unless `hwnd` is given.
        pub fn for_pid(
            pid: u32,
            instance: isize,
            hwnd: Option<HWND>,
            rect: Option<Rect>,
        ) -> Result<Self, SetupError> {
            let hwnd = match hwnd {
                Some(hwnd) => hwnd,
                None => {
                    let mut search = WindowSearch { pid, found: None };
                    unsafe {
                        let _ = EnumWindows(
                            Some(enum_windows_proc),
                            LPARAM(&mut search as *mut WindowSearch as isize),
                        );
                    }
                    search.found.ok_or_else(|| {
                        error!("No window found for pid {pid}");
                        SetupError::Window(format!("no top-level window for pid {pid}"))
                    })?
                },
            };

            let rect = match rect {
                Some(rect) => rect,
                None => client_rect(hwnd)?,
            };
            debug!("Target window {:#x} at {rect:?}", hwnd.0);

            Ok(Self::new(pid, instance, WindowInfo { handle: hwnd.0, rect }))
        }

        /// Creates a visible window of its own to render into.
        pub fn standalone(config: &OverlayConfig) -> Result<Self, SetupError> {
            let instance: HMODULE =
                unsafe { GetModuleHandleA(PCSTR(std::ptr::null())) }.context("GetModuleHandleA")?;

            let wnd_class = WNDCLASSEXA {
                cbSize: std::mem::size_of::<WNDCLASSEXA>() as u32,
                style: CS_HREDRAW | CS_VREDRAW,
                lpfnWndProc: Some(standalone_wnd_proc),
                hInstance: instance.into(),
                hbrBackground: HBRUSH::default(),
                lpszClassName: STANDALONE_CLASS,
                ..Default::default()
            };
            if unsafe { RegisterClassExA(&wnd_class) } == 0
                && unsafe { GetLastError() } != ERROR_CLASS_ALREADY_EXISTS
            {
                return Err(SetupError::Window("RegisterClassExA failed".into()));
            }

            let (width, height) = config.window_size;
            let mut rect = RECT { left: 0, top: 0, right: width, bottom: height };
            unsafe {
                let _ = AdjustWindowRect(&mut rect, WS_OVERLAPPEDWINDOW, false);
            }

            let hwnd = unsafe {
                CreateWindowExA(
                    WS_EX_LAYERED,
                    STANDALONE_CLASS,
                    s!("flashhook"),
                    WS_OVERLAPPEDWINDOW | WS_VISIBLE,
                    CW_USEDEFAULT,
                    CW_USEDEFAULT,
                    rect.right - rect.left,
                    rect.bottom - rect.top,
                    HWND::default(),
                    HMENU::default(),
                    instance,
                    None::<*const c_void>,
                )
            };
            if hwnd.0 == 0 {
                return Err(SetupError::Window("CreateWindowExA failed".into()));
            }

            unsafe {
                let _ = SetLayeredWindowAttributes(hwnd, COLORREF(0), 255, LWA_ALPHA);
            }

            Self::for_pid(unsafe { GetCurrentProcessId() }, instance.0, Some(hwnd), None)
        }

        pub fn hwnd(&self) -> HWND {
            HWND(self.window().handle)
        }
    }

    unsafe extern "system" fn standalone_wnd_proc(
        hwnd: HWND,
        msg: u32,
        wparam: WPARAM,
        lparam: LPARAM,
    ) -> LRESULT {
        match msg {
            WM_DESTROY => {
                PostQuitMessage(0);
                LRESULT(0)
            },
            _ => DefWindowProcA(hwnd, msg, wparam, lparam),
        }
    }

    /// Drains the thread's message queue. Returns false once `WM_QUIT` was
    /// received.
    pub fn pump_messages() -> bool {
        let mut msg = MSG::default();
        unsafe {
            while PeekMessageA(&mut msg, HWND::default(), 0, 0, PM_REMOVE).as_bool() {
                if msg.message == WM_QUIT {
                    return false;
                }
                let _ = TranslateMessage(&msg);
                DispatchMessageA(&msg);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_flag_round_trip_updates_size() {
        let state = ProcessState::new(42, 0, WindowInfo {
            handle: 1,
            rect: Rect { left: 100, top: 50, right: 900, bottom: 650 },
        });
        assert_eq!(state.size(), Vec2i::new(800, 600));
        assert_eq!(state.pos(), Vec2i::new(100, 50));
        assert!(!state.needs_resize());

        state.begin_resize();
        assert!(state.needs_resize());

        state.resize_complete(1280, 720);
        assert!(!state.needs_resize());
        assert_eq!(state.size(), Vec2i::new(1280, 720));
        assert_eq!(state.pos(), Vec2i::new(100, 50));
    }
}
