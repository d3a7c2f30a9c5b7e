//! # flashhook
//!
//! This library hooks the present loop of DirectX 12 applications and draws
//! an overlay on top of the host's frames: instanced quads, circles, lines
//! and text, plus a small immediate-mode menu.
//!
//! The overlay is made of a few layers that can be used on their own:
//!
//! - [`vtable`] resolves `IDXGISwapChain::Present` and
//!   `IDXGISwapChain::ResizeBuffers` from a throwaway swapchain.
//! - [`hooks`] wraps those two calls with a small state machine that creates
//!   the render context on the first `Present` and rebuilds the swapchain
//!   views around `ResizeBuffers`.
//! - [`renderer`] turns draw calls into one instanced draw per partition.
//! - [`gui`] is a tabbed, grouped widget window driven by polled input.
//!
//! ## Fair warning
//!
//! [`flashhook`](crate) patches live code in the host process and reads an
//! undocumented field of the swapchain object. It should be OK for small
//! projects such as videogame mods, but it may crash your application at this
//! stage.
//!
//! ## Example
//!
//! Implement [`OverlayLoop`] and generate the entry point:
//!
//! ```no_run
//! // lib.rs
//! use flashhook::gui::{BoolCell, Window};
//! use flashhook::*;
//!
//! #[derive(Default)]
//! pub struct MyOverlay {
//!     enabled: BoolCell,
//! }
//!
//! impl OverlayLoop for MyOverlay {
//!     fn setup(&mut self, window: &mut Window) {
//!         let tab = window.start_tab("main");
//!         if let Some(group) = window.start_group(tab, "general") {
//!             window.add_checkbox(group, "enabled", self.enabled.clone());
//!             window.end_group(group);
//!         }
//!         window.end_tab(tab);
//!         window.set_active(tab);
//!     }
//! }
//!
//! flashhook::flashhook!(MyOverlay::default());
//! ```
#![allow(clippy::needless_doctest_main)]

pub mod config;
pub mod error;
pub mod fonts;
pub mod frame;
pub mod gui;
pub mod hooks;
pub mod math;
#[cfg(windows)]
pub mod mh;
pub mod process;
pub mod renderer;
pub mod shapes;
pub mod srv;
#[cfg(windows)]
pub mod util;
pub mod vtable;

pub use tracing;
#[cfg(windows)]
pub use windows;

pub use crate::config::OverlayConfig;
pub use crate::error::{FrameError, SetupError};
#[cfg(windows)]
pub use crate::lifecycle::*;

#[cfg(windows)]
mod lifecycle {
    use std::fs::File;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use parking_lot::{const_mutex, Mutex};
    use tracing::{error, info, trace};
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};
    use windows::core::Error;
    use windows::Win32::Foundation::HINSTANCE;
    use windows::Win32::System::Console::{
        AllocConsole, FreeConsole, GetConsoleMode, GetStdHandle, SetConsoleMode, CONSOLE_MODE,
        ENABLE_VIRTUAL_TERMINAL_PROCESSING, STD_OUTPUT_HANDLE,
    };
    use windows::Win32::System::LibraryLoader::FreeLibraryAndExitThread;
    use windows::Win32::UI::Input::KeyboardAndMouse::VK_END;

    use crate::config::OverlayConfig;
    use crate::error::{self, SetupError};
    use crate::gui::input::{first_pressed_key, key_down, poll_input, poll_key_binds};
    use crate::gui::{KeyBind, Window};
    use crate::hooks::dx12::Dx12Hooks;
    use crate::hooks::PresentInterceptor;
    use crate::mh::{self, MhStatus, MinHook};
    use crate::process::ProcessState;
    use crate::renderer::dx12::DeviceContext;
    use crate::renderer::Renderer;
    use crate::{util, vtable};

    // Global state objects.
    static MODULE: Mutex<Option<HINSTANCE>> = const_mutex(None);
    static FLASHHOOK: Mutex<Option<Flashhook>> = const_mutex(None);
    static CONSOLE_ALLOCATED: AtomicBool = AtomicBool::new(false);
    static EJECTING: AtomicBool = AtomicBool::new(false);
    static POLL_RUNNING: AtomicBool = AtomicBool::new(false);

    const POLL_INTERVAL: Duration = Duration::from_millis(5);

    /// Allocate a Windows console.
    pub fn alloc_console() -> Result<(), Error> {
        if !CONSOLE_ALLOCATED.swap(true, Ordering::SeqCst) {
            unsafe { AllocConsole()? };
        }

        Ok(())
    }

    /// Enable console colors if the console is allocated.
    pub fn enable_console_colors() -> Result<(), Error> {
        if !CONSOLE_ALLOCATED.load(Ordering::SeqCst) {
            return Ok(());
        }

        unsafe {
            let stdout_handle = GetStdHandle(STD_OUTPUT_HANDLE)?;
            let mut mode = CONSOLE_MODE(0);
            GetConsoleMode(stdout_handle, &mut mode)?;
            mode.0 |= ENABLE_VIRTUAL_TERMINAL_PROCESSING.0;
            SetConsoleMode(stdout_handle, mode)?;
        }

        Ok(())
    }

    /// Free the previously allocated Windows console.
    pub fn free_console() -> Result<(), Error> {
        if CONSOLE_ALLOCATED.swap(false, Ordering::SeqCst) {
            unsafe { FreeConsole()? };
        }

        Ok(())
    }

    /// Installs a global subscriber printing to the console and, when the
    /// file can be created, to `<dll>.log` next to the module.
    ///
    /// The filter is read from `RUST_LOG`. Does nothing if a subscriber is
    /// already installed.
    pub fn setup_tracing() {
        let log_file = util::get_dll_path()
            .map(|mut path| {
                path.set_extension("log");
                path
            })
            .and_then(|path| File::create(path).ok());

        let file_layer = log_file.map(|file| {
            fmt::layer()
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
        });

        let _ = tracing_subscriber::registry()
            .with(
                fmt::layer().event_format(
                    fmt::format()
                        .with_level(true)
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true)
                        .with_thread_names(true),
                ),
            )
            .with(file_layer)
            .with(EnvFilter::from_default_env())
            .try_init();
    }

    /// Disable hooks and eject the DLL.
    ///
    /// Safe to call from anywhere, including the overlay's own render loop.
    /// Only the first call has an effect. When the polling loop of
    /// [`run`] is active it performs the unload itself; otherwise a fresh
    /// thread does.
    pub fn eject() {
        if EJECTING.swap(true, Ordering::SeqCst) {
            return;
        }

        if !POLL_RUNNING.load(Ordering::SeqCst) {
            thread::spawn(|| unsafe { unload() });
        }
    }

    /// Frees the console, unapplies the hooks and unloads the module. Does
    /// not return when a module handle was registered.
    unsafe fn unload() {
        if let Err(e) = free_console() {
            error!("{e:?}");
        }

        let flashhook = FLASHHOOK.lock().take();
        if let Some(mut flashhook) = flashhook {
            if let Err(e) = flashhook.unapply() {
                error!("Couldn't unapply hooks: {e:?}");
            }
        }

        let module = MODULE.lock().take();
        if let Some(module) = module {
            FreeLibraryAndExitThread(module, 0);
        }
    }

    /// Implement your overlay via this trait.
    pub trait OverlayLoop: Send + 'static {
        /// The menu window, before [`OverlayLoop::setup`] fills it.
        fn window(&self) -> Window {
            Window::new("flash hook", (100, 100), (450, 450))
        }

        /// Called once, before the hooks go live. Build your tabs and groups
        /// here.
        fn setup(&mut self, window: &mut Window);

        /// Called every frame from inside `Present`, before the menu is
        /// drawn.
        fn render(&mut self, _renderer: &mut Renderer<DeviceContext>) {}

        /// Key bindings polled by the input loop.
        fn key_binds(&mut self) -> &mut [KeyBind] {
            &mut []
        }

        /// Whether the menu is drawn and receives input.
        fn menu_visible(&self) -> bool {
            true
        }
    }

    type SharedLoop = Arc<Mutex<Box<dyn OverlayLoop>>>;

    /// Holds the activated hooks and manages their lifetime.
    pub struct Flashhook {
        hooks: Dx12Hooks<MinHook>,
        process: Arc<ProcessState>,
        window: Arc<Mutex<Window>>,
        overlay: SharedLoop,
    }

    impl Flashhook {
        /// Create a builder object.
        pub fn builder() -> FlashhookBuilder {
            FlashhookBuilder { hmodule: None, config: OverlayConfig::default(), overlay: None }
        }

        pub fn process(&self) -> &Arc<ProcessState> {
            &self.process
        }

        /// The menu window shared with the render thread.
        pub fn window(&self) -> &Arc<Mutex<Window>> {
            &self.window
        }

        /// Apply the hooks.
        pub fn apply(mut self) -> error::Result<()> {
            unsafe { self.hooks.hook()? };
            *FLASHHOOK.lock() = Some(self);
            Ok(())
        }

        /// Disable and cleanup the hooks.
        pub fn unapply(&mut self) -> Result<(), MhStatus> {
            unsafe { self.hooks.unhook()? };
            mh::uninitialize()
        }
    }

    /// Builder object for [`Flashhook`].
    pub struct FlashhookBuilder {
        hmodule: Option<HINSTANCE>,
        config: OverlayConfig,
        overlay: Option<Box<dyn OverlayLoop>>,
    }

    impl FlashhookBuilder {
        /// Save the DLL instance (for the [`eject`] method).
        pub fn with_hmodule(mut self, module: HINSTANCE) -> Self {
            *MODULE.lock() = Some(module);
            self.hmodule = Some(module);
            self
        }

        pub fn with_config(mut self, config: OverlayConfig) -> Self {
            self.config = config;
            self
        }

        pub fn with_overlay(mut self, overlay: impl OverlayLoop) -> Self {
            self.overlay = Some(Box::new(overlay));
            self
        }

        /// Resolves the hook targets and creates the hooks, disabled.
        pub fn build(self) -> error::Result<Flashhook> {
            let Some(mut overlay) = self.overlay else {
                return Err(SetupError::NotInstalled);
            };
            let instance = self.hmodule.map_or(0, |module| module.0);

            let process = Arc::new(ProcessState::current(instance)?);
            info!("Analyzing process {}", process.pid());
            let info = vtable::discover(&process, self.config.scan_bound)?;
            info!(
                "Present {:#x}, ResizeBuffers {:#x}, command queue offset {:#x}",
                info.present, info.resize_buffers, info.command_queue_offset
            );

            let mut window = overlay.window();
            overlay.setup(&mut window);
            let window = Arc::new(Mutex::new(window));
            let overlay: SharedLoop = Arc::new(Mutex::new(overlay));

            let scene = {
                let window = Arc::clone(&window);
                let overlay = Arc::clone(&overlay);
                move |renderer: &mut Renderer<DeviceContext>| {
                    let visible = match overlay.try_lock() {
                        Some(mut overlay) => {
                            overlay.render(renderer);
                            overlay.menu_visible()
                        },
                        None => true,
                    };
                    if visible {
                        window.lock().draw(renderer);
                    }
                }
            };

            let interceptor = PresentInterceptor::new(Arc::clone(&process), scene);
            let minhook = MinHook::new()?;
            let hooks = unsafe { Dx12Hooks::new(minhook, &info, interceptor, self.config) }?;
            hooks.on_init_failure(eject);

            Ok(Flashhook { hooks, process, window, overlay })
        }
    }

    /// Runs an overlay for the lifetime of the DLL: sets up logging,
    /// installs the hooks and polls input until END is pressed or [`eject`]
    /// is called, then unloads the module.
    ///
    /// This is what [`flashhook!`](crate::flashhook) spawns from `DllMain`.
    pub fn run(hmodule: HINSTANCE, overlay: impl OverlayLoop, config: OverlayConfig) {
        if let Err(e) = alloc_console().and_then(|()| enable_console_colors()) {
            eprintln!("Couldn't set up the console: {e:?}");
        }
        setup_tracing();

        POLL_RUNNING.store(true, Ordering::SeqCst);

        let flashhook = match Flashhook::builder()
            .with_hmodule(hmodule)
            .with_config(config)
            .with_overlay(overlay)
            .build()
        {
            Ok(flashhook) => flashhook,
            Err(e) => {
                error!("Couldn't set up the overlay: {e}");
                EJECTING.store(true, Ordering::SeqCst);
                unsafe { unload() };
                return;
            },
        };

        let process = Arc::clone(flashhook.process());
        let window = Arc::clone(flashhook.window());
        let overlay = Arc::clone(&flashhook.overlay);

        if let Err(e) = flashhook.apply() {
            error!("Couldn't apply hooks: {e}");
            EJECTING.store(true, Ordering::SeqCst);
            unsafe { unload() };
            return;
        }

        poll_loop(&process, &window, &overlay);

        EJECTING.store(true, Ordering::SeqCst);
        unsafe { unload() };
    }

    fn poll_loop(process: &ProcessState, window: &Mutex<Window>, overlay: &SharedLoop) {
        let hwnd = process.hwnd();
        let end_key = VK_END.0 as i32;
        let mut end_was_down = key_down(end_key);

        while !EJECTING.load(Ordering::SeqCst) {
            let end_down = key_down(end_key);
            if end_down && !end_was_down {
                info!("END key pressed, exiting...");
                break;
            }
            end_was_down = end_down;

            let visible = {
                let mut overlay = overlay.lock();
                poll_key_binds(overlay.key_binds());
                overlay.menu_visible()
            };

            if visible {
                let input = poll_input(hwnd);
                let mut window = window.lock();
                if window.key_wait() {
                    if let Some(key) = first_pressed_key() {
                        trace!("Captured key {key:#x}");
                        window.capture_key(key);
                    }
                }
                window.update(&input, process.size());
            }

            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Entry point generator for the library.
///
/// Generates a `DllMain` that spawns [`run`] with the given overlay and,
/// optionally, an [`OverlayConfig`].
///
/// Example usage:
/// ```no_run
/// use flashhook::gui::Window;
/// use flashhook::*;
///
/// pub struct MyOverlay;
///
/// impl OverlayLoop for MyOverlay {
///     fn setup(&mut self, _window: &mut Window) {}
/// }
///
/// flashhook::flashhook!(MyOverlay, OverlayConfig::default().with_buffer_count(3));
/// ```
#[macro_export]
macro_rules! flashhook {
    ($overlay:expr) => {
        $crate::flashhook!($overlay, $crate::OverlayConfig::default());
    };
    ($overlay:expr, $config:expr) => {
        /// Entry point created by the `flashhook` library.
        #[no_mangle]
        pub unsafe extern "stdcall" fn DllMain(
            hmodule: $crate::windows::Win32::Foundation::HINSTANCE,
            reason: u32,
            _: *mut ::std::ffi::c_void,
        ) -> $crate::windows::Win32::Foundation::BOOL {
            if reason == $crate::windows::Win32::System::SystemServices::DLL_PROCESS_ATTACH {
                $crate::tracing::trace!("DllMain()");
                ::std::thread::spawn(move || $crate::run(hmodule, { $overlay }, { $config }));
            }
            $crate::windows::Win32::Foundation::BOOL::from(true)
        }
    };
}
