//! Small vector and color types used by the renderer and the GUI.
use std::ops::{Add, AddAssign, Mul, Sub};

/// Straight (non-premultiplied) RGBA color in `0.0..=1.0`.
pub type Color = [f32; 4];

/// Opaque white.
pub const WHITE: Color = [1.0, 1.0, 1.0, 1.0];

/// Builds a [`Color`] from 8-bit channels.
pub fn rgba(r: u8, g: u8, b: u8, a: u8) -> Color {
    [r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0, a as f32 / 255.0]
}

/// Integer pixel coordinates, used for window-space layout.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Vec2i {
    /// Horizontal component.
    pub x: i32,
    /// Vertical component.
    pub y: i32,
}

impl Vec2i {
    /// Constructs a new vector.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Returns true when `self` lies strictly inside the rectangle spanned by
    /// `pos` and `size`. Points on an edge are outside.
    pub fn in_region(self, pos: Vec2i, size: Vec2i) -> bool {
        self.x > pos.x && self.y > pos.y && self.x < pos.x + size.x && self.y < pos.y + size.y
    }

    /// Keeps a rectangle of `size` positioned at `self` inside `screen`.
    ///
    /// The left/top edge wins when the rectangle is larger than the screen.
    pub fn clamp_to_screen(self, size: Vec2i, screen: Vec2i) -> Self {
        Self {
            x: self.x.min(screen.x - size.x).max(0),
            y: self.y.min(screen.y - size.y).max(0),
        }
    }
}

impl Add for Vec2i {
    type Output = Vec2i;

    fn add(self, rhs: Vec2i) -> Vec2i {
        Vec2i::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2i {
    fn add_assign(&mut self, rhs: Vec2i) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vec2i {
    type Output = Vec2i;

    fn sub(self, rhs: Vec2i) -> Vec2i {
        Vec2i::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl From<(i32, i32)> for Vec2i {
    fn from((x, y): (i32, i32)) -> Self {
        Vec2i::new(x, y)
    }
}

/// Floating point screen coordinates, used for shape instances.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Vec2 {
    /// Horizontal component.
    pub x: f32,
    /// Vertical component.
    pub y: f32,
}

impl Vec2 {
    /// Constructs a new vector.
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl Add for Vec2 {
    type Output = Vec2;

    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Vec2;

    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Vec2;

    fn mul(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

impl From<Vec2i> for Vec2 {
    fn from(v: Vec2i) -> Self {
        Vec2::new(v.x as f32, v.y as f32)
    }
}

impl From<(f32, f32)> for Vec2 {
    fn from((x, y): (f32, f32)) -> Self {
        Vec2::new(x, y)
    }
}

impl From<[f32; 2]> for Vec2 {
    fn from([x, y]: [f32; 2]) -> Self {
        Vec2::new(x, y)
    }
}

impl From<Vec2> for [f32; 2] {
    fn from(v: Vec2) -> Self {
        [v.x, v.y]
    }
}

/// Row-major 4x4 matrix, laid out as sixteen consecutive floats.
pub type Mat4 = [[f32; 4]; 4];

/// Left-handed off-center orthographic projection.
///
/// Maps `(left, top)` to clip space `(-1, 1)` and `(right, bottom)` to
/// `(1, -1)`. Points are row vectors multiplied on the left; uploaded as-is
/// the matrix reads as its transpose under HLSL's default column-major
/// packing, which is what `mul(matrix, float4(...))` expects.
pub fn ortho_off_center_lh(
    left: f32,
    right: f32,
    bottom: f32,
    top: f32,
    near: f32,
    far: f32,
) -> Mat4 {
    let rw = 1.0 / (right - left);
    let rh = 1.0 / (top - bottom);
    let range = 1.0 / (far - near);

    [
        [rw + rw, 0.0, 0.0, 0.0],
        [0.0, rh + rh, 0.0, 0.0],
        [0.0, 0.0, range, 0.0],
        [-(left + right) * rw, -(top + bottom) * rh, -range * near, 1.0],
    ]
}

/// Pixel-space projection for a viewport of the given size.
pub fn screen_projection(width: u32, height: u32) -> Mat4 {
    ortho_off_center_lh(0.0, width.max(1) as f32, height.max(1) as f32, 0.0, 0.0, 1.0)
}

/// Transforms a 2D point (z = 0, w = 1) by a row-major matrix.
pub fn transform_point(m: &Mat4, p: [f32; 2]) -> [f32; 2] {
    let w = p[0] * m[0][3] + p[1] * m[1][3] + m[3][3];
    let x = p[0] * m[0][0] + p[1] * m[1][0] + m[3][0];
    let y = p[0] * m[0][1] + p[1] * m[1][1] + m[3][1];
    [x / w, y / w]
}
