//! Immediate-mode overlay menu.
//!
//! A [`Window`] is built once through `start_tab`/`start_group`/`add_*`/
//! `end_group`/`end_tab`, which also lays out every widget. After that the
//! polling thread feeds it input through [`Window::update`] and the render
//! thread emits it through [`Window::draw`].
//!
//! Widgets never own the values they edit: each holds a cell sharing an
//! atomic with the caller.
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::math::{rgba, Color, Vec2i, WHITE};

pub mod input;

pub use self::input::{InputState, KeyBind, KeyMode};

/// Shared boolean edited by a checkbox.
#[derive(Debug, Clone, Default)]
pub struct BoolCell(Arc<AtomicBool>);

impl BoolCell {
    pub fn new(value: bool) -> Self {
        Self(Arc::new(AtomicBool::new(value)))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, value: bool) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn toggle(&self) {
        self.0.fetch_xor(true, Ordering::Relaxed);
    }
}

/// Shared float edited by a slider, stored as its bit pattern.
#[derive(Debug, Clone, Default)]
pub struct FloatCell(Arc<AtomicU32>);

impl FloatCell {
    pub fn new(value: f32) -> Self {
        Self(Arc::new(AtomicU32::new(value.to_bits())))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Shared integer edited by a combo box or a keybind.
#[derive(Debug, Clone, Default)]
pub struct IntCell(Arc<AtomicI32>);

impl IntCell {
    pub fn new(value: i32) -> Self {
        Self(Arc::new(AtomicI32::new(value)))
    }

    pub fn get(&self) -> i32 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, value: i32) {
        self.0.store(value, Ordering::Relaxed);
    }
}

/// Drawing surface for the menu.
pub trait Canvas {
    fn quad(&mut self, pos: Vec2i, size: Vec2i, color: Color);
    fn quad_outline(&mut self, pos: Vec2i, size: Vec2i, color: Color);
    fn line(&mut self, from: Vec2i, to: Vec2i, color: Color);
    fn text(&mut self, text: &str, pos: Vec2i, color: Color);
}

#[derive(Debug, Clone)]
pub enum ElementKind {
    Checkbox(BoolCell),
    Slider { value: FloatCell, min: f32, max: f32 },
    Combo { value: IntCell, options: Vec<String> },
    Keybind(IntCell),
}

impl ElementKind {
    /// Vertical space taken in its group.
    fn height(&self) -> i32 {
        match self {
            ElementKind::Checkbox(_) => 20,
            ElementKind::Slider { .. } => 35,
            ElementKind::Combo { .. } | ElementKind::Keybind(_) => 40,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Element {
    pub label: String,
    pub kind: ElementKind,
    /// Offset from the group origin.
    pub pos: Vec2i,
}

#[derive(Debug, Clone)]
pub struct Group {
    pub label: String,
    /// Offset from the window origin.
    pub pos: Vec2i,
    pub size: Vec2i,
    pub elements: Vec<Element>,
}

#[derive(Debug, Clone)]
pub struct Tab {
    pub label: String,
    /// Offset from the window origin.
    pub pos: Vec2i,
    pub groups: Vec<Group>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TabId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId {
    tab: usize,
    index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId {
    tab: usize,
    group: usize,
    index: usize,
}

/// What the left mouse button is currently doing.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    #[default]
    Null,
    Check,
    Slider,
    /// Combo box pressed; opens on release.
    Combo,
    /// Keybind box pressed; starts capturing on release.
    Keybind,
    Tab,
    /// An open combo or a keybind capture is waiting for the next input.
    Wait,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Theme {
    pub accent: Color,
    pub active_accent: Color,
    pub background: Color,
    pub text: Color,
    pub overlay: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            accent: rgba(138, 80, 255, 255),
            active_accent: rgba(186, 150, 255, 255),
            background: rgba(18, 18, 18, 255),
            text: WHITE,
            overlay: [0.04, 0.04, 0.04, 1.0],
        }
    }
}

const TAB_ORIGIN: Vec2i = Vec2i::new(20, 100);
const TAB_SPACING: i32 = 30;
const CONTENT_LEFT: i32 = 110;
const CONTENT_TOP: i32 = 15;
const GROUP_GAP: i32 = 10;
const GROUP_HEADER: i32 = 30;
const ELEMENT_INDENT: i32 = 10;
const OPTION_HEIGHT: i32 = 16;

/// The menu window.
pub struct Window {
    title: [String; 2],
    pos: Vec2i,
    size: Vec2i,
    tabs: Vec<Tab>,
    active_tab: usize,
    theme: Theme,
    interaction: Interaction,
    active_element: Option<ElementId>,
    key_wait: bool,
    mouse: Vec2i,
    old_mouse: Vec2i,
    l_click: bool,
    dragging: bool,
}

fn split_title(title: &str) -> [String; 2] {
    match title.split_once(' ') {
        Some((first, rest)) => [first.to_string(), rest.to_string()],
        None => [title.to_string(), String::new()],
    }
}

impl Window {
    pub fn new(title: &str, pos: impl Into<Vec2i>, size: impl Into<Vec2i>) -> Self {
        Self {
            title: split_title(title),
            pos: pos.into(),
            size: size.into(),
            tabs: Vec::new(),
            active_tab: 0,
            theme: Theme::default(),
            interaction: Interaction::Null,
            active_element: None,
            key_wait: false,
            mouse: Vec2i::default(),
            old_mouse: Vec2i::default(),
            l_click: false,
            dragging: false,
        }
    }

    pub fn with_theme(mut self, theme: Theme) -> Self {
        self.theme = theme;
        self
    }

    pub fn title(&self) -> &[String; 2] {
        &self.title
    }

    pub fn pos(&self) -> Vec2i {
        self.pos
    }

    pub fn size(&self) -> Vec2i {
        self.size
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn active_tab(&self) -> usize {
        self.active_tab
    }

    pub fn interaction(&self) -> Interaction {
        self.interaction
    }

    pub fn active_element(&self) -> Option<ElementId> {
        self.active_element
    }

    /// Whether a keybind widget is waiting for a key.
    pub fn key_wait(&self) -> bool {
        self.key_wait
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    pub fn start_tab(&mut self, label: &str) -> TabId {
        let index = self.tabs.len();
        self.tabs.push(Tab {
            label: label.to_string(),
            pos: TAB_ORIGIN + Vec2i::new(0, TAB_SPACING * index as i32),
            groups: Vec::new(),
        });
        TabId(index)
    }

    pub fn start_group(&mut self, tab: TabId, label: &str) -> Option<GroupId> {
        let Some(t) = self.tabs.get_mut(tab.0) else {
            warn!("start_group: no tab {}", tab.0);
            return None;
        };
        t.groups.push(Group {
            label: label.to_string(),
            pos: Vec2i::default(),
            size: Vec2i::default(),
            elements: Vec::new(),
        });
        Some(GroupId { tab: tab.0, index: t.groups.len() - 1 })
    }

    fn add(&mut self, group: GroupId, label: &str, kind: ElementKind) -> Option<ElementId> {
        let Some(g) = self.group_mut(group) else {
            warn!("add {label:?}: no group {group:?}");
            return None;
        };
        g.elements.push(Element { label: label.to_string(), kind, pos: Vec2i::default() });
        Some(ElementId { tab: group.tab, group: group.index, index: g.elements.len() - 1 })
    }

    pub fn add_checkbox(
        &mut self,
        group: GroupId,
        label: &str,
        value: BoolCell,
    ) -> Option<ElementId> {
        self.add(group, label, ElementKind::Checkbox(value))
    }

    pub fn add_slider(
        &mut self,
        group: GroupId,
        label: &str,
        value: FloatCell,
        min: f32,
        max: f32,
    ) -> Option<ElementId> {
        self.add(group, label, ElementKind::Slider { value, min, max })
    }

    pub fn add_combo(
        &mut self,
        group: GroupId,
        label: &str,
        value: IntCell,
        options: &[&str],
    ) -> Option<ElementId> {
        let options = options.iter().map(|o| o.to_string()).collect();
        self.add(group, label, ElementKind::Combo { value, options })
    }

    pub fn add_keybind(&mut self, group: GroupId, label: &str, key: IntCell) -> Option<ElementId> {
        self.add(group, label, ElementKind::Keybind(key))
    }

    /// Stacks the group's elements below its header.
    pub fn end_group(&mut self, group: GroupId) {
        let column_width = self.column_width();
        let Some(g) = self.group_mut(group) else {
            warn!("end_group: no group {group:?}");
            return;
        };

        let mut y = GROUP_HEADER;
        for element in &mut g.elements {
            element.pos = Vec2i::new(ELEMENT_INDENT, y);
            y += element.kind.height();
        }
        g.size = Vec2i::new(column_width, y + 5);
    }

    /// Places the tab's groups in two alternating columns.
    pub fn end_tab(&mut self, tab: TabId) {
        let column_width = self.column_width();
        let Some(t) = self.tabs.get_mut(tab.0) else {
            warn!("end_tab: no tab {}", tab.0);
            return;
        };

        let mut column_y = [CONTENT_TOP; 2];
        for (i, group) in t.groups.iter_mut().enumerate() {
            let column = i % 2;
            group.size.x = column_width;
            let x = CONTENT_LEFT + column as i32 * (column_width + GROUP_GAP);
            group.pos = Vec2i::new(x, column_y[column]);
            column_y[column] += group.size.y + GROUP_GAP;
        }
        debug!("Laid out tab {:?} with {} groups", t.label, t.groups.len());
    }

    pub fn set_active(&mut self, tab: TabId) {
        if tab.0 < self.tabs.len() {
            self.active_tab = tab.0;
        }
    }

    fn column_width(&self) -> i32 {
        (self.size.x - CONTENT_LEFT - 20) / 2
    }

    fn group_mut(&mut self, id: GroupId) -> Option<&mut Group> {
        self.tabs.get_mut(id.tab)?.groups.get_mut(id.index)
    }

    pub fn element(&self, id: ElementId) -> Option<&Element> {
        self.tabs.get(id.tab)?.groups.get(id.group)?.elements.get(id.index)
    }

    /// Absolute position of an element.
    pub fn element_pos(&self, id: ElementId) -> Option<Vec2i> {
        let group = self.tabs.get(id.tab)?.groups.get(id.group)?;
        let element = group.elements.get(id.index)?;
        Some(self.pos + group.pos + element.pos)
    }

    fn mouse_in_region(&self, pos: Vec2i, size: Vec2i) -> bool {
        self.mouse.in_region(pos, size)
    }

    /// Applies one input sample. `screen` is the host client size the window
    /// is kept inside.
    pub fn update(&mut self, input: &InputState, screen: Vec2i) {
        self.old_mouse = self.mouse;
        self.mouse = input.mouse;
        let pressed = input.l_click && !self.l_click;
        self.l_click = input.l_click;

        let consumed = if self.dragging { false } else { self.update_elements(pressed) };

        if pressed
            && !consumed
            && self.interaction == Interaction::Null
            && self.mouse_in_region(self.pos, self.size)
        {
            self.dragging = true;
        } else if !self.l_click {
            self.dragging = false;
        }

        if self.dragging {
            self.pos += self.mouse - self.old_mouse;
        }
        self.pos = self.pos.clamp_to_screen(self.size, screen);
    }

    /// Returns true when the press was taken by a widget or a tab.
    fn update_elements(&mut self, pressed: bool) -> bool {
        if !self.l_click {
            match self.interaction {
                Interaction::Combo => self.interaction = Interaction::Wait,
                Interaction::Keybind => {
                    self.interaction = Interaction::Wait;
                    self.key_wait = true;
                },
                Interaction::Null | Interaction::Wait => {},
                _ => {
                    self.interaction = Interaction::Null;
                    self.active_element = None;
                },
            }
            return false;
        }

        match self.interaction {
            Interaction::Slider => {
                if let Some(id) = self.active_element {
                    self.drag_slider(id);
                }
                false
            },
            Interaction::Wait if pressed => {
                self.click_while_waiting();
                true
            },
            Interaction::Null if pressed => self.click_element() || self.click_tab(),
            _ => false,
        }
    }

    fn active_elements(&self) -> impl Iterator<Item = (ElementId, Vec2i, &Element)> + '_ {
        let tab = self.active_tab;
        self.tabs.get(tab).into_iter().flat_map(move |t| {
            t.groups.iter().enumerate().flat_map(move |(g, group)| {
                group.elements.iter().enumerate().map(move |(index, element)| {
                    let id = ElementId { tab, group: g, index };
                    (id, self.pos + group.pos + element.pos, element)
                })
            })
        })
    }

    fn click_element(&mut self) -> bool {
        let hit = self.active_elements().find_map(|(id, pos, element)| {
            let hit = match element.kind {
                ElementKind::Checkbox(_) => {
                    self.mouse_in_region(pos - Vec2i::new(0, 5), Vec2i::new(85, 15))
                },
                ElementKind::Slider { .. } => {
                    self.mouse_in_region(pos + Vec2i::new(0, 15), Vec2i::new(100, 10))
                },
                ElementKind::Combo { .. } | ElementKind::Keybind(_) => {
                    self.mouse_in_region(pos + Vec2i::new(0, 15), Vec2i::new(100, 16))
                },
            };
            hit.then(|| (id, element.kind.clone()))
        });

        let Some((id, kind)) = hit else {
            return false;
        };

        match kind {
            ElementKind::Checkbox(value) => {
                value.toggle();
                self.interaction = Interaction::Check;
            },
            ElementKind::Slider { .. } => {
                self.interaction = Interaction::Slider;
                self.active_element = Some(id);
                self.drag_slider(id);
            },
            ElementKind::Combo { .. } => {
                self.interaction = Interaction::Combo;
                self.active_element = Some(id);
            },
            ElementKind::Keybind(_) => {
                self.interaction = Interaction::Keybind;
                self.active_element = Some(id);
            },
        }
        true
    }

    fn click_tab(&mut self) -> bool {
        let hit = self.tabs.iter().position(|tab| {
            self.mouse_in_region(self.pos + Vec2i::new(0, tab.pos.y - 15), Vec2i::new(85, 30))
        });
        match hit {
            Some(i) => {
                self.interaction = Interaction::Tab;
                self.active_tab = i;
                true
            },
            None => false,
        }
    }

    fn drag_slider(&mut self, id: ElementId) {
        let (Some(pos), Some(element)) = (self.element_pos(id), self.element(id)) else {
            return;
        };
        if let ElementKind::Slider { value, min, max } = &element.kind {
            let width = (self.mouse.x - pos.x).clamp(0, 100);
            value.set((width as f32 / 100.0 * max).clamp(*min, *max));
        }
    }

    /// A press while a combo is open picks the option under the mouse, or
    /// closes the combo when outside the options.
    fn click_while_waiting(&mut self) {
        let Some(id) = self.active_element else {
            self.interaction = Interaction::Null;
            return;
        };
        let (Some(pos), Some(element)) = (self.element_pos(id), self.element(id)) else {
            self.interaction = Interaction::Null;
            self.active_element = None;
            return;
        };

        if let ElementKind::Combo { value, options } = &element.kind {
            let top = pos + Vec2i::new(0, 31);
            let height = options.len() as i32 * OPTION_HEIGHT;
            if self.mouse_in_region(top, Vec2i::new(100, height)) {
                let index = (self.mouse.y - top.y) / OPTION_HEIGHT;
                value.set(index.min(options.len() as i32 - 1));
            }
            self.interaction = Interaction::Null;
            self.active_element = None;
        }
    }

    /// Finishes a keybind capture with `key`. Returns false when no keybind
    /// is waiting.
    pub fn capture_key(&mut self, key: i32) -> bool {
        if !self.key_wait {
            return false;
        }
        let Some(ElementKind::Keybind(cell)) =
            self.active_element.and_then(|id| self.element(id)).map(|e| &e.kind)
        else {
            return false;
        };

        cell.set(key);
        debug!("Bound key {} ({key:#x})", input::key_name(key));
        self.interaction = Interaction::Null;
        self.active_element = None;
        self.key_wait = false;
        true
    }

    fn open_combo(&self) -> Option<(Vec2i, &[String])> {
        if !matches!(self.interaction, Interaction::Combo | Interaction::Wait) {
            return None;
        }
        let id = self.active_element?;
        match &self.element(id)?.kind {
            ElementKind::Combo { options, .. } => Some((self.element_pos(id)?, options)),
            _ => None,
        }
    }

    pub fn draw<C: Canvas + ?Sized>(&self, canvas: &mut C) {
        let theme = &self.theme;
        let pos = self.pos;
        let size = self.size;

        canvas.quad_outline(pos, size, theme.accent);
        canvas.quad(pos + Vec2i::new(1, 1), size - Vec2i::new(1, 1), theme.background);
        canvas.quad_outline(pos + Vec2i::new(5, 5), size - Vec2i::new(11, 11), theme.accent);

        canvas.text(&self.title[0], pos + Vec2i::new(50, 28), theme.text);
        canvas.text(&self.title[1], pos + Vec2i::new(50, 48), theme.accent);

        canvas.line(pos + Vec2i::new(100, 8), pos + Vec2i::new(100, size.y - 9), theme.accent);
        canvas.line(pos + Vec2i::new(10, 75), pos + Vec2i::new(95, 75), theme.accent);

        for (i, tab) in self.tabs.iter().enumerate() {
            let color = if i == self.active_tab { theme.accent } else { theme.text };
            canvas.text(&tab.label, pos + tab.pos + Vec2i::new(0, 8), color);
        }

        let Some(tab) = self.tabs.get(self.active_tab) else {
            return;
        };

        for (g, group) in tab.groups.iter().enumerate() {
            let origin = pos + group.pos;
            canvas.quad_outline(origin, group.size, theme.accent);
            canvas.line(
                origin + Vec2i::new(5, 20),
                origin + Vec2i::new(group.size.x - 5, 20),
                theme.accent,
            );
            canvas.text(&group.label, origin + Vec2i::new(group.size.x / 2, 5), theme.text);

            for (index, element) in group.elements.iter().enumerate() {
                let id = ElementId { tab: self.active_tab, group: g, index };
                self.draw_element(canvas, id, element, origin + element.pos);
            }
        }

        if let Some((at, options)) = self.open_combo() {
            let height = options.len() as i32 * OPTION_HEIGHT;
            let accent = theme.active_accent;
            canvas.quad_outline(at + Vec2i::new(0, 31), Vec2i::new(100, height), accent);
            canvas.quad(at + Vec2i::new(1, 32), Vec2i::new(99, height - 1), theme.overlay);
            for (i, option) in options.iter().enumerate() {
                canvas.text(option, at + Vec2i::new(5, 41 + i as i32 * OPTION_HEIGHT), theme.text);
            }
        }
    }

    fn draw_element<C: Canvas + ?Sized>(
        &self,
        canvas: &mut C,
        id: ElementId,
        element: &Element,
        at: Vec2i,
    ) {
        let theme = &self.theme;
        let active = self.active_element == Some(id);
        let color = if active { theme.active_accent } else { theme.accent };

        match &element.kind {
            ElementKind::Checkbox(value) => {
                canvas.quad_outline(at, Vec2i::new(10, 10), theme.accent);
                canvas.text(&element.label, at + Vec2i::new(15, 7), theme.text);
                if value.get() {
                    canvas.quad(at + Vec2i::new(2, 2), Vec2i::new(7, 7), theme.accent);
                }
            },
            ElementKind::Slider { value, max, .. } => {
                let value = value.get();
                let width =
                    if *max > 0.0 { ((value / max) * 100.0).clamp(0.0, 100.0) as i32 } else { 0 };
                canvas.quad_outline(at + Vec2i::new(0, 15), Vec2i::new(100, 10), theme.accent);
                canvas.quad(at + Vec2i::new(2, 17), Vec2i::new(width.max(4) - 3, 7), color);
                canvas.text(
                    &format!("{}: ({value:.2})", element.label),
                    at + Vec2i::new(0, 8),
                    theme.text,
                );
            },
            ElementKind::Combo { value, options } => {
                let selected = usize::try_from(value.get())
                    .ok()
                    .and_then(|i| options.get(i))
                    .map(String::as_str)
                    .unwrap_or_default();
                canvas.quad_outline(at + Vec2i::new(0, 15), Vec2i::new(100, 16), color);
                canvas.text(&element.label, at + Vec2i::new(0, 8), theme.text);
                canvas.text(selected, at + Vec2i::new(5, 25), theme.text);
            },
            ElementKind::Keybind(key) => {
                let waiting = active
                    && matches!(self.interaction, Interaction::Keybind | Interaction::Wait);
                let text = if waiting { "..." } else { input::key_name(key.get()) };
                canvas.quad_outline(at + Vec2i::new(0, 15), Vec2i::new(100, 16), color);
                canvas.text(text, at + Vec2i::new(50, 25), theme.text);
                canvas.text(&element.label, at + Vec2i::new(0, 5), theme.text);
            },
        }
    }
}
