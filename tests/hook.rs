#![cfg(windows)]

mod harness;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use flashhook::gui::{BoolCell, Window};
use flashhook::hooks::dx12::Dx12Hooks;
use flashhook::hooks::PresentInterceptor;
use flashhook::math::{rgba, Vec2, Vec2i};
use flashhook::mh::{self, MinHook};
use flashhook::process::ProcessState;
use flashhook::renderer::dx12::DeviceContext;
use flashhook::renderer::Renderer;
use flashhook::vtable::{self, DEFAULT_SCAN_BOUND};
use flashhook::OverlayConfig;
use harness::dx12::Dx12Harness;

#[test]
fn hooks_draw_over_the_host_and_follow_resizes() {
    flashhook::setup_tracing();

    let harness = Dx12Harness::new("flashhook dx12 hook test");
    thread::sleep(Duration::from_millis(500));

    let process = Arc::new(ProcessState::current(0).unwrap());
    let info = vtable::discover(&process, DEFAULT_SCAN_BOUND).unwrap();

    let mut window = Window::new("flash hook", (100, 100), (450, 450));
    let tab = window.start_tab("main");
    let group = window.start_group(tab, "visuals").unwrap();
    window.add_checkbox(group, "boxes", BoolCell::new(true)).unwrap();
    window.end_group(group);
    window.end_tab(tab);

    let frames = Arc::new(AtomicU32::new(0));
    let scene_frames = Arc::clone(&frames);
    let scene = move |r: &mut Renderer<DeviceContext>| {
        let frame = scene_frames.fetch_add(1, Ordering::SeqCst);
        let x = (frame % 700) as f32;
        r.draw_quad(Vec2::new(x, 20.0), Vec2::new(50.0, 50.0), rgba(0, 200, 0, 255));
        window.draw(r);
    };

    let overlay = PresentInterceptor::new(Arc::clone(&process), scene);
    let mut hooks = unsafe {
        Dx12Hooks::new(MinHook::new().unwrap(), &info, overlay, OverlayConfig::default())
    }
    .unwrap();
    unsafe { hooks.hook() }.unwrap();

    thread::sleep(Duration::from_millis(2000));
    assert!(frames.load(Ordering::SeqCst) > 0);
    assert!(harness.presents() > 0);

    harness.request_resize(1024, 768);
    thread::sleep(Duration::from_millis(1000));
    assert_eq!(process.size(), Vec2i::new(1024, 768));
    let after_resize = frames.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(1000));
    assert!(frames.load(Ordering::SeqCst) > after_resize);

    unsafe { hooks.unhook() }.unwrap();
    mh::uninitialize().unwrap();

    let unhooked = frames.load(Ordering::SeqCst);
    let presents = harness.presents();
    thread::sleep(Duration::from_millis(500));
    assert_eq!(frames.load(Ordering::SeqCst), unhooked);
    assert!(harness.presents() > presents);

    drop(harness);
}
