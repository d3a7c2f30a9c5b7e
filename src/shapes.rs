//! Instanced shape primitives.
//!
//! Every shape is one instance of a shared unit quad. Instances are grouped
//! into partitions, one per `(kind, font)` pair, and each non-empty partition
//! becomes a single instanced draw.
use std::collections::BTreeMap;

use bytemuck::{Pod, Zeroable};

use crate::fonts::FontHandle;
use crate::math::Color;

/// Primitive selector, read by the pixel shader.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShapeKind {
    Quad = 0,
    QuadOutline = 1,
    Circle = 2,
    CircleOutline = 3,
    Line = 4,
    TextQuad = 5,
}

impl ShapeKind {
    pub const ALL: [ShapeKind; 6] = [
        ShapeKind::Quad,
        ShapeKind::QuadOutline,
        ShapeKind::Circle,
        ShapeKind::CircleOutline,
        ShapeKind::Line,
        ShapeKind::TextQuad,
    ];

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }
}

/// Per-instance vertex data. Field order matches the input layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ShapeInstance {
    /// Top-left corner; start point for lines.
    pub pos: [f32; 2],
    /// Extent; end point for lines.
    pub size: [f32; 2],
    /// Rotation in radians about the center. Only honored for circles.
    pub rotation: f32,
    pub stroke_width: f32,
    pub color: Color,
    pub shape_type: u32,
    /// `u0, v0, u1, v1`, only meaningful for text quads.
    pub uv: [f32; 4],
}

impl ShapeInstance {
    fn new(kind: ShapeKind, pos: [f32; 2], size: [f32; 2], color: Color) -> Self {
        Self {
            pos,
            size,
            rotation: 0.0,
            stroke_width: 0.0,
            color,
            shape_type: kind as u32,
            uv: [0.0; 4],
        }
    }

    pub fn quad(pos: [f32; 2], size: [f32; 2], color: Color) -> Self {
        Self::new(ShapeKind::Quad, pos, size, color)
    }

    pub fn quad_outline(pos: [f32; 2], size: [f32; 2], color: Color, stroke_width: f32) -> Self {
        Self { stroke_width, ..Self::new(ShapeKind::QuadOutline, pos, size, color) }
    }

    /// Circle inscribed in the square at `pos` with side `2 * radius`.
    pub fn circle(center: [f32; 2], radius: f32, color: Color) -> Self {
        let pos = [center[0] - radius, center[1] - radius];
        Self::new(ShapeKind::Circle, pos, [radius * 2.0; 2], color)
    }

    pub fn circle_outline(center: [f32; 2], radius: f32, color: Color, stroke_width: f32) -> Self {
        let pos = [center[0] - radius, center[1] - radius];
        Self { stroke_width, ..Self::new(ShapeKind::CircleOutline, pos, [radius * 2.0; 2], color) }
    }

    pub fn line(start: [f32; 2], end: [f32; 2], color: Color, thickness: f32) -> Self {
        Self { stroke_width: thickness, ..Self::new(ShapeKind::Line, start, end, color) }
    }

    pub fn text_quad(pos: [f32; 2], size: [f32; 2], color: Color, uv: [f32; 4]) -> Self {
        Self { uv, ..Self::new(ShapeKind::TextQuad, pos, size, color) }
    }

    pub fn with_rotation(self, rotation: f32) -> Self {
        Self { rotation, ..self }
    }

    pub fn kind(&self) -> Option<ShapeKind> {
        ShapeKind::from_raw(self.shape_type)
    }
}

/// Draw bucket. Orders by kind first, then by font.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionKey {
    pub kind: ShapeKind,
    pub font: FontHandle,
}

impl PartitionKey {
    /// Bucket for an instance. Only text quads carry a font.
    pub fn new(kind: ShapeKind, font: FontHandle) -> Self {
        let font = if kind == ShapeKind::TextQuad { font } else { FontHandle::NONE };
        Self { kind, font }
    }
}

/// Instances of one partition, ready to be uploaded back to back.
#[derive(Debug, Clone, Copy)]
pub struct Partition<'a> {
    pub key: PartitionKey,
    pub persistent: &'a [ShapeInstance],
    pub transient: &'a [ShapeInstance],
}

impl Partition<'_> {
    pub fn instance_count(&self) -> u32 {
        (self.persistent.len() + self.transient.len()) as u32
    }
}

/// Transient and persistent instance lists, partitioned.
#[derive(Debug, Default)]
pub struct ShapeList {
    transient: BTreeMap<PartitionKey, Vec<ShapeInstance>>,
    persistent: BTreeMap<PartitionKey, Vec<ShapeInstance>>,
}

impl ShapeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an instance, to this frame only or until
    /// [`clear_persistent`](ShapeList::clear_persistent).
    pub fn push(&mut self, instance: ShapeInstance, font: FontHandle, persist: bool) {
        let Some(kind) = instance.kind() else { return };
        let key = PartitionKey::new(kind, font);
        let lists = if persist { &mut self.persistent } else { &mut self.transient };
        lists.entry(key).or_default().push(instance);
    }

    /// Empties the per-frame lists, keeping their storage.
    pub fn clear_transient(&mut self) {
        self.transient.values_mut().for_each(Vec::clear);
    }

    pub fn clear_persistent(&mut self) {
        self.persistent.clear();
    }

    pub fn transient_len(&self) -> usize {
        self.transient.values().map(Vec::len).sum()
    }

    pub fn persistent_len(&self) -> usize {
        self.persistent.values().map(Vec::len).sum()
    }

    /// Non-empty partitions in draw order. Persistent instances come before
    /// transient ones within a partition.
    pub fn partitions(&self) -> Vec<Partition<'_>> {
        let mut keys: Vec<PartitionKey> = self
            .transient
            .iter()
            .chain(self.persistent.iter())
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, _)| *k)
            .collect();
        keys.sort();
        keys.dedup();

        keys.into_iter()
            .map(|key| Partition {
                key,
                persistent: self.persistent.get(&key).map(Vec::as_slice).unwrap_or_default(),
                transient: self.transient.get(&key).map(Vec::as_slice).unwrap_or_default(),
            })
            .collect()
    }
}

/// Unit quad, triangle list.
pub const QUAD_VERTICES: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 1, 3];
pub const QUAD_INDEX_COUNT: u32 = QUAD_INDICES.len() as u32;

#[cfg(test)]
mod tests {
    use std::mem;

    use memoffset::offset_of;

    use super::*;
    use crate::math::WHITE;

    #[test]
    fn instance_layout_matches_the_input_layout() {
        assert_eq!(mem::size_of::<ShapeInstance>(), 60);
        assert_eq!(offset_of!(ShapeInstance, pos), 0);
        assert_eq!(offset_of!(ShapeInstance, size), 8);
        assert_eq!(offset_of!(ShapeInstance, rotation), 16);
        assert_eq!(offset_of!(ShapeInstance, stroke_width), 20);
        assert_eq!(offset_of!(ShapeInstance, color), 24);
        assert_eq!(offset_of!(ShapeInstance, shape_type), 40);
        assert_eq!(offset_of!(ShapeInstance, uv), 44);
    }

    #[test]
    fn partitions_follow_kind_then_font_order() {
        let mut list = ShapeList::new();
        let glyph = ShapeInstance::text_quad([0.0; 2], [1.0; 2], WHITE, [0.0; 4]);
        list.push(glyph, FontHandle(2), false);
        list.push(ShapeInstance::line([0.0; 2], [5.0; 2], WHITE, 1.0), FontHandle(7), false);
        list.push(glyph, FontHandle(1), false);
        list.push(ShapeInstance::quad([0.0; 2], [1.0; 2], WHITE), FontHandle::NONE, false);
        list.push(ShapeInstance::quad([1.0; 2], [1.0; 2], WHITE), FontHandle::NONE, false);

        let keys: Vec<_> = list.partitions().iter().map(|p| (p.key.kind, p.key.font)).collect();
        assert_eq!(keys, vec![
            (ShapeKind::Quad, FontHandle::NONE),
            (ShapeKind::Line, FontHandle::NONE),
            (ShapeKind::TextQuad, FontHandle(1)),
            (ShapeKind::TextQuad, FontHandle(2)),
        ]);
        assert_eq!(list.partitions()[0].instance_count(), 2);
    }

    #[test]
    fn transient_clears_and_persistent_stays() {
        let mut list = ShapeList::new();
        let persistent = ShapeInstance::circle([10.0, 10.0], 5.0, WHITE);
        let transient = ShapeInstance::circle([20.0, 20.0], 5.0, WHITE);
        list.push(persistent, FontHandle::NONE, true);
        list.push(transient, FontHandle::NONE, false);

        let parts = list.partitions();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].persistent, &[persistent]);
        assert_eq!(parts[0].transient, &[transient]);

        list.clear_transient();
        assert_eq!(list.transient_len(), 0);
        assert_eq!(list.partitions()[0].instance_count(), 1);

        list.clear_persistent();
        assert!(list.partitions().is_empty());
    }

    #[test]
    fn circle_is_centered() {
        let c = ShapeInstance::circle([50.0, 40.0], 10.0, WHITE);
        assert_eq!(c.pos, [40.0, 30.0]);
        assert_eq!(c.size, [20.0, 20.0]);
        assert_eq!(c.kind(), Some(ShapeKind::Circle));
    }
}
