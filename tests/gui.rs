use flashhook::gui::{BoolCell, Canvas, FloatCell, IntCell, Interaction, InputState, Window};
use flashhook::math::{Color, Vec2i};

const SCREEN: Vec2i = Vec2i::new(1920, 1080);

struct Menu {
    window: Window,
    enabled: BoolCell,
    fov: FloatCell,
    mode: IntCell,
    key: IntCell,
}

// Window at (100, 100); the single group of the first tab starts at
// (210, 115) and its elements at x = 220.
//   checkbox  y = 145
//   slider    y = 165, bar at y = 180
//   combo     y = 200, box at y = 215, options from y = 231
//   keybind   y = 240, box at y = 255
fn menu() -> Menu {
    let enabled = BoolCell::new(false);
    let fov = FloatCell::new(0.0);
    let mode = IntCell::new(0);
    let key = IntCell::new(0x2d);

    let mut window = Window::new("flash hook", (100, 100), (450, 450));
    let main = window.start_tab("main");
    let group = window.start_group(main, "aim").unwrap();
    window.add_checkbox(group, "enabled", enabled.clone()).unwrap();
    window.add_slider(group, "fov", fov.clone(), 1.0, 10.0).unwrap();
    window.add_combo(group, "mode", mode.clone(), &["near", "far", "low hp"]).unwrap();
    window.add_keybind(group, "key", key.clone()).unwrap();
    window.end_group(group);
    window.end_tab(main);

    let misc = window.start_tab("misc");
    window.end_tab(misc);
    window.set_active(main);

    Menu { window, enabled, fov, mode, key }
}

fn click(window: &mut Window, at: (i32, i32)) {
    window.update(&InputState::new(at, false), SCREEN);
    window.update(&InputState::new(at, true), SCREEN);
    window.update(&InputState::new(at, false), SCREEN);
}

#[test]
fn checkbox_toggles_once_per_click() {
    let mut m = menu();

    m.window.update(&InputState::new((230, 147), true), SCREEN);
    assert!(m.enabled.get());
    assert_eq!(m.window.interaction(), Interaction::Check);

    // Holding the button does not toggle again.
    for _ in 0..10 {
        m.window.update(&InputState::new((230, 147), true), SCREEN);
    }
    assert!(m.enabled.get());

    m.window.update(&InputState::new((230, 147), false), SCREEN);
    assert_eq!(m.window.interaction(), Interaction::Null);

    click(&mut m.window, (230, 147));
    assert!(!m.enabled.get());
}

#[test]
fn slider_follows_the_mouse_within_its_range() {
    let mut m = menu();

    m.window.update(&InputState::new((270, 185), true), SCREEN);
    assert_eq!(m.window.interaction(), Interaction::Slider);
    assert!((m.fov.get() - 5.0).abs() < 1e-4);

    let mut last = m.fov.get();
    for x in (270..=400).step_by(10) {
        m.window.update(&InputState::new((x, 300), true), SCREEN);
        assert!(m.fov.get() >= last);
        last = m.fov.get();
    }
    assert_eq!(m.fov.get(), 10.0);

    m.window.update(&InputState::new((0, 300), true), SCREEN);
    assert_eq!(m.fov.get(), 1.0);

    m.window.update(&InputState::new((0, 300), false), SCREEN);
    assert_eq!(m.window.interaction(), Interaction::Null);
    assert_eq!(m.window.active_element(), None);
    assert_eq!(m.window.pos(), Vec2i::new(100, 100));
}

#[test]
fn combo_opens_on_release_and_picks_an_option() {
    let mut m = menu();

    m.window.update(&InputState::new((250, 222), true), SCREEN);
    assert_eq!(m.window.interaction(), Interaction::Combo);
    m.window.update(&InputState::new((250, 222), false), SCREEN);
    assert_eq!(m.window.interaction(), Interaction::Wait);

    click(&mut m.window, (250, 252));
    assert_eq!(m.mode.get(), 1);
    assert_eq!(m.window.interaction(), Interaction::Null);

    // A press outside the options closes the combo without changing it.
    click(&mut m.window, (250, 222));
    click(&mut m.window, (500, 500));
    assert_eq!(m.mode.get(), 1);
    assert_eq!(m.window.interaction(), Interaction::Null);
}

#[test]
fn keybind_captures_the_next_key_after_release() {
    let mut m = menu();

    m.window.update(&InputState::new((250, 262), true), SCREEN);
    assert!(!m.window.key_wait());
    assert!(!m.window.capture_key(0x46));

    m.window.update(&InputState::new((250, 262), false), SCREEN);
    assert!(m.window.key_wait());

    assert!(m.window.capture_key(0x46));
    assert_eq!(m.key.get(), 0x46);
    assert!(!m.window.key_wait());
    assert_eq!(m.window.interaction(), Interaction::Null);
    assert!(!m.window.capture_key(0x47));
}

#[test]
fn tabs_switch_on_click() {
    let mut m = menu();
    assert_eq!(m.window.active_tab(), 0);

    click(&mut m.window, (120, 230));
    assert_eq!(m.window.active_tab(), 1);

    // Elements of the hidden tab do not react.
    click(&mut m.window, (230, 147));
    assert!(!m.enabled.get());

    click(&mut m.window, (120, 200));
    assert_eq!(m.window.active_tab(), 0);
}

#[test]
fn window_drags_and_stays_on_screen() {
    let mut m = menu();

    m.window.update(&InputState::new((300, 110), false), SCREEN);
    m.window.update(&InputState::new((300, 110), true), SCREEN);
    assert!(m.window.is_dragging());
    m.window.update(&InputState::new((310, 120), true), SCREEN);
    assert_eq!(m.window.pos(), Vec2i::new(110, 110));

    m.window.update(&InputState::new((4000, 4000), true), SCREEN);
    assert_eq!(m.window.pos(), Vec2i::new(1920 - 450, 1080 - 450));

    m.window.update(&InputState::new((4000, 4000), false), SCREEN);
    assert!(!m.window.is_dragging());

    // Pressing outside the window does not start a drag.
    m.window.update(&InputState::new((10, 10), true), SCREEN);
    assert!(!m.window.is_dragging());
}

#[derive(Default)]
struct TextCanvas {
    texts: Vec<String>,
    quads: usize,
}

impl Canvas for TextCanvas {
    fn quad(&mut self, _: Vec2i, _: Vec2i, _: Color) {
        self.quads += 1;
    }

    fn quad_outline(&mut self, _: Vec2i, _: Vec2i, _: Color) {}

    fn line(&mut self, _: Vec2i, _: Vec2i, _: Color) {}

    fn text(&mut self, text: &str, _: Vec2i, _: Color) {
        self.texts.push(text.to_string());
    }
}

#[test]
fn draws_the_active_tab_and_widget_state() {
    let mut m = menu();
    m.enabled.set(true);
    m.mode.set(2);

    let mut canvas = TextCanvas::default();
    m.window.draw(&mut canvas);
    let expected =
        ["flash", "hook", "main", "misc", "aim", "enabled", "fov: (0.00)", "low hp", "insert"];
    for text in expected {
        assert!(canvas.texts.iter().any(|t| t == text), "missing {text:?} in {:?}", canvas.texts);
    }

    click(&mut m.window, (250, 222));
    let mut open = TextCanvas::default();
    m.window.draw(&mut open);
    for option in ["near", "far"] {
        assert!(open.texts.iter().any(|t| t == option));
    }
    assert!(open.quads > canvas.quads);
}
