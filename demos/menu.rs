//! Injectable overlay with a small menu.
//!
//! INSERT toggles the menu, END unloads the DLL.
#![cfg(windows)]
use flashhook::gui::{BoolCell, FloatCell, IntCell, KeyBind, KeyMode, Window};
use flashhook::math::{rgba, Vec2};
use flashhook::renderer::dx12::DeviceContext;
use flashhook::renderer::Renderer;
use flashhook::windows::Win32::UI::Input::KeyboardAndMouse::{VK_INSERT, VK_XBUTTON1};
use flashhook::*;

struct MenuDemo {
    binds: [KeyBind; 2],
    boxes: BoolCell,
    circles: BoolCell,
    radius: FloatCell,
    style: IntCell,
}

impl MenuDemo {
    fn new() -> Self {
        Self {
            binds: [
                KeyBind::new(VK_INSERT.0 as i32, KeyMode::Toggle, true),
                KeyBind::new(VK_XBUTTON1.0 as i32, KeyMode::Hold, false),
            ],
            boxes: BoolCell::new(true),
            circles: BoolCell::new(false),
            radius: FloatCell::new(40.0),
            style: IntCell::new(0),
        }
    }
}

impl OverlayLoop for MenuDemo {
    fn window(&self) -> Window {
        Window::new("flash hook", (100, 100), (450, 450))
    }

    fn setup(&mut self, window: &mut Window) {
        let visuals = window.start_tab("visuals");
        if let Some(group) = window.start_group(visuals, "shapes") {
            window.add_checkbox(group, "boxes", self.boxes.clone());
            window.add_checkbox(group, "circles", self.circles.clone());
            window.add_slider(group, "radius", self.radius.clone(), 5.0, 100.0);
            window.add_combo(group, "style", self.style.clone(), &["filled", "outline"]);
            window.end_group(group);
        }
        window.end_tab(visuals);

        let binds = window.start_tab("binds");
        if let Some(group) = window.start_group(binds, "keys") {
            window.add_keybind(group, "menu", self.binds[0].key.clone());
            window.add_keybind(group, "highlight", self.binds[1].key.clone());
            window.end_group(group);
        }
        window.end_tab(binds);

        window.set_active(visuals);
    }

    fn render(&mut self, renderer: &mut Renderer<DeviceContext>) {
        let highlight = self.binds[1].value.get();
        let color = if highlight { rgba(255, 200, 0, 255) } else { rgba(138, 80, 255, 255) };
        let outline = self.style.get() == 1;

        if self.boxes.get() {
            let (pos, size) = (Vec2::new(600.0, 200.0), Vec2::new(80.0, 160.0));
            if outline {
                renderer.draw_quad_outline(pos, size, color);
            } else {
                renderer.draw_quad(pos, size, color);
            }
        }

        if self.circles.get() {
            let center = Vec2::new(800.0, 300.0);
            if outline {
                renderer.draw_circle_outline(center, self.radius.get(), color, 2.0);
            } else {
                renderer.draw_circle(center, self.radius.get(), color);
            }
        }

        renderer.draw_default_text("flashhook", Vec2::new(10.0, 10.0), color);
    }

    fn key_binds(&mut self) -> &mut [KeyBind] {
        &mut self.binds
    }

    fn menu_visible(&self) -> bool {
        self.binds[0].value.get()
    }
}

flashhook::flashhook!(MenuDemo::new());
