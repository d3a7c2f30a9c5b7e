//! Input snapshots, key names and key bindings.
use crate::gui::{BoolCell, IntCell};
use crate::math::Vec2i;

/// First virtual-key code considered when capturing a binding (`VK_LBUTTON`).
pub const CAPTURE_FIRST: i32 = 0x01;
/// End of the capture range, exclusive (`VK_RMENU`).
pub const CAPTURE_END: i32 = 0xa5;

/// Mouse state sampled once per menu update.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InputState {
    /// Cursor position in the host window's client coordinates.
    pub mouse: Vec2i,
    pub l_click: bool,
    pub r_click: bool,
}

impl InputState {
    pub fn new(mouse: impl Into<Vec2i>, l_click: bool) -> Self {
        Self { mouse: mouse.into(), l_click, r_click: false }
    }
}

const DIGITS: [&str; 10] = ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"];
const LETTERS: [&str; 26] = [
    "a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l", "m", "n", "o", "p", "q", "r", "s",
    "t", "u", "v", "w", "x", "y", "z",
];
const NUMPAD: [&str; 10] =
    ["num 0", "num 1", "num 2", "num 3", "num 4", "num 5", "num 6", "num 7", "num 8", "num 9"];
const FUNCTION: [&str; 24] = [
    "f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8", "f9", "f10", "f11", "f12", "f13", "f14", "f15",
    "f16", "f17", "f18", "f19", "f20", "f21", "f22", "f23", "f24",
];

/// Display name of a virtual-key code.
pub fn key_name(vk: i32) -> &'static str {
    match vk {
        0x01 => "mouse1",
        0x02 => "mouse2",
        0x03 => "cancel",
        0x04 => "mouse3",
        0x05 => "mouse4",
        0x06 => "mouse5",
        0x08 => "backspace",
        0x09 => "tab",
        0x0c => "clear",
        0x0d => "enter",
        0x10 => "shift",
        0x11 => "ctrl",
        0x12 => "alt",
        0x13 => "pause",
        0x14 => "caps lock",
        0x1b => "escape",
        0x20 => "space",
        0x21 => "page up",
        0x22 => "page down",
        0x23 => "end",
        0x24 => "home",
        0x25 => "left",
        0x26 => "up",
        0x27 => "right",
        0x28 => "down",
        0x2c => "print screen",
        0x2d => "insert",
        0x2e => "delete",
        0x30..=0x39 => DIGITS[(vk - 0x30) as usize],
        0x41..=0x5a => LETTERS[(vk - 0x41) as usize],
        0x5b => "left win",
        0x5c => "right win",
        0x5d => "apps",
        0x60..=0x69 => NUMPAD[(vk - 0x60) as usize],
        0x6a => "num *",
        0x6b => "num +",
        0x6d => "num -",
        0x6e => "num .",
        0x6f => "num /",
        0x70..=0x87 => FUNCTION[(vk - 0x70) as usize],
        0x90 => "num lock",
        0x91 => "scroll lock",
        0xa0 => "left shift",
        0xa1 => "right shift",
        0xa2 => "left ctrl",
        0xa3 => "right ctrl",
        0xa4 => "left alt",
        0xa5 => "right alt",
        _ => "unknown",
    }
}

/// How a [`KeyBind`] drives its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    /// Flip on every press.
    Toggle,
    /// Follow the key state.
    Hold,
}

/// A key bound to a boolean. The key itself lives in an [`IntCell`] so a
/// keybind widget can rebind it.
#[derive(Debug, Clone)]
pub struct KeyBind {
    pub key: IntCell,
    pub mode: KeyMode,
    pub value: BoolCell,
    was_down: bool,
}

impl KeyBind {
    pub fn new(key: i32, mode: KeyMode, default: bool) -> Self {
        Self { key: IntCell::new(key), mode, value: BoolCell::new(default), was_down: false }
    }

    /// Feeds the current state of the bound key.
    pub fn update(&mut self, down: bool) {
        match self.mode {
            KeyMode::Toggle => {
                if down && !self.was_down {
                    self.value.toggle();
                }
            },
            KeyMode::Hold => self.value.set(down),
        }
        self.was_down = down;
    }
}

#[cfg(windows)]
pub use self::win32::{first_pressed_key, key_down, poll_input, poll_key_binds};

#[cfg(windows)]
mod win32 {
    use windows::Win32::Foundation::{HWND, POINT};
    use windows::Win32::Graphics::Gdi::ScreenToClient;
    use windows::Win32::UI::Input::KeyboardAndMouse::{GetAsyncKeyState, VK_LBUTTON, VK_RBUTTON};
    use windows::Win32::UI::WindowsAndMessaging::GetCursorPos;

    use super::*;

    /// Whether `vk` is held right now.
    pub fn key_down(vk: i32) -> bool {
        (unsafe { GetAsyncKeyState(vk) }) < 0
    }

    /// Samples the cursor, relative to `hwnd`'s client area, and both mouse
    /// buttons.
    pub fn poll_input(hwnd: HWND) -> InputState {
        let mut point = POINT::default();
        unsafe {
            if GetCursorPos(&mut point).is_ok() {
                let _ = ScreenToClient(hwnd, &mut point);
            }
        }

        InputState {
            mouse: Vec2i::new(point.x, point.y),
            l_click: key_down(VK_LBUTTON.0 as i32),
            r_click: key_down(VK_RBUTTON.0 as i32),
        }
    }

    /// Lowest held key in the capture range.
    pub fn first_pressed_key() -> Option<i32> {
        (CAPTURE_FIRST..CAPTURE_END).find(|&vk| key_down(vk))
    }

    pub fn poll_key_binds(binds: &mut [KeyBind]) {
        for bind in binds {
            let down = key_down(bind.key.get());
            bind.update(down);
        }
    }
}
