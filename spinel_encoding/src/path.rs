// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bytemuck::{Pod, Zeroable};

use crate::Tag;

/// Number of dwords reserved at the end of every head and node block for
/// the link to the next node.
pub const NODE_LINK_DWORDS: u32 = 2;

/// Per-type segment counts, indexed by [`Tag::prim_index`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct PrimCounts(pub [u32; Tag::PRIM_COUNT]);

impl PrimCounts {
    pub fn get(&self, tag: Tag) -> u32 {
        tag.prim_index().map_or(0, |i| self.0[i])
    }

    pub fn total(&self) -> u32 {
        self.0.iter().sum()
    }

    pub fn lines(&self) -> u32 {
        self.get(Tag::Line)
    }
}

/// Header at the start of a path's head block.
///
/// Tagged segment group ids follow the header; once the head block is full
/// they continue in node blocks linked through a [`Tag::Next`] id stored at
/// [`PathHeader::next_offset`].
#[derive(Copy, Clone, Debug, PartialEq, Zeroable, Pod)]
#[repr(C)]
pub struct PathHeader {
    pub handle: u32,
    /// Number of blocks owned by the path, including the head.
    pub blocks: u32,
    /// Number of node blocks, excluding the head.
    pub nodes: u32,
    pub prims: PrimCounts,
    /// `x0 y0 x1 y1` of all points, including control points.
    pub bounds: [f32; 4],
    /// Number of tagged segment group ids.
    pub groups: u32,
    pub pad: [u32; 3],
}

static_assertions::const_assert_eq!(size_of::<PathHeader>(), 64);

impl PathHeader {
    pub const DWORDS: u32 = (size_of::<Self>() / 4) as u32;

    /// Number of id slots in the head block.
    pub fn head_slots(block_dwords: u32) -> u32 {
        block_dwords - Self::DWORDS - NODE_LINK_DWORDS
    }

    /// Number of id slots in a node block.
    pub fn node_slots(block_dwords: u32) -> u32 {
        block_dwords - NODE_LINK_DWORDS
    }

    /// Dword offset of the next link inside a head or node block.
    pub fn next_offset(block_dwords: u32) -> u32 {
        block_dwords - NODE_LINK_DWORDS
    }
}

/// What a staged path block holds, uploaded next to each flushed span so
/// the copy kernel knows which blocks carry ring-relative ids.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum PathBlockKind {
    /// Segment coordinates.
    Coords = 0,
    /// A path header followed by segment group ids.
    Head = 1,
    /// Continuation of the segment group ids.
    Node = 2,
}

impl PathBlockKind {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Coords),
            1 => Some(Self::Head),
            2 => Some(Self::Node),
            _ => None,
        }
    }
}

/// Geometry state of a path under construction.
///
/// Each segment method updates the current point, the previous control
/// point and the bounds, and returns the segment's coordinates including
/// its start point, in the order stored in the block pool.
#[derive(Clone, Debug)]
pub struct PathEncoder {
    current: [f32; 2],
    ctrl: [f32; 2],
    bounds: [f32; 4],
    counts: PrimCounts,
}

impl Default for PathEncoder {
    fn default() -> Self {
        Self {
            current: [0.0; 2],
            ctrl: [0.0; 2],
            bounds: [f32::INFINITY, f32::INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY],
            counts: PrimCounts::default(),
        }
    }
}

impl PathEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn current(&self) -> [f32; 2] {
        self.current
    }

    /// The control point reflected by the smooth segment variants.
    pub fn ctrl(&self) -> [f32; 2] {
        self.ctrl
    }

    pub fn counts(&self) -> PrimCounts {
        self.counts
    }

    pub fn is_empty(&self) -> bool {
        self.counts.total() == 0
    }

    /// Bounds of all segment points, or all zeros for an empty path.
    pub fn bounds(&self) -> [f32; 4] {
        if self.is_empty() {
            [0.0; 4]
        } else {
            self.bounds
        }
    }

    fn extend(&mut self, points: &[[f32; 2]]) {
        for &[x, y] in points {
            self.bounds[0] = self.bounds[0].min(x);
            self.bounds[1] = self.bounds[1].min(y);
            self.bounds[2] = self.bounds[2].max(x);
            self.bounds[3] = self.bounds[3].max(y);
        }
    }

    fn segment(&mut self, tag: Tag, points: &[[f32; 2]], ctrl: [f32; 2]) {
        let end = points[points.len() - 1];
        self.extend(&[self.current]);
        self.extend(points);
        if let Some(i) = tag.prim_index() {
            self.counts.0[i] += 1;
        }
        self.current = end;
        self.ctrl = ctrl;
    }

    /// Returns the implicit control point of a smooth segment.
    fn reflected(&self) -> [f32; 2] {
        let [px, py] = self.current;
        let [cx, cy] = self.ctrl;
        [2.0 * px - cx, 2.0 * py - cy]
    }

    pub fn move_to(&mut self, x: f32, y: f32) {
        self.current = [x, y];
        self.ctrl = [x, y];
    }

    pub fn line_to(&mut self, x: f32, y: f32) -> [f32; 4] {
        let [x0, y0] = self.current;
        self.segment(Tag::Line, &[[x, y]], [x, y]);
        [x0, y0, x, y]
    }

    pub fn quad_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32) -> [f32; 6] {
        let [x0, y0] = self.current;
        self.segment(Tag::Quad, &[[x1, y1], [x2, y2]], [x1, y1]);
        [x0, y0, x1, y1, x2, y2]
    }

    pub fn quad_smooth_to(&mut self, x2: f32, y2: f32) -> [f32; 6] {
        let [x1, y1] = self.reflected();
        self.quad_to(x1, y1, x2, y2)
    }

    pub fn cubic_to(
        &mut self,
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        x3: f32,
        y3: f32,
    ) -> [f32; 8] {
        let [x0, y0] = self.current;
        self.segment(Tag::Cubic, &[[x1, y1], [x2, y2], [x3, y3]], [x2, y2]);
        [x0, y0, x1, y1, x2, y2, x3, y3]
    }

    pub fn cubic_smooth_to(&mut self, x2: f32, y2: f32, x3: f32, y3: f32) -> [f32; 8] {
        let [x1, y1] = self.reflected();
        self.cubic_to(x1, y1, x2, y2, x3, y3)
    }

    /// Rational quadratic with weight `w0` on the control point.
    pub fn rat_quad_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, w0: f32) -> [f32; 7] {
        let [x0, y0] = self.current;
        self.segment(Tag::RatQuad, &[[x1, y1], [x2, y2]], [x1, y1]);
        [x0, y0, x1, y1, w0, x2, y2]
    }

    /// Rational cubic with weights `w0` and `w1` on the control points.
    #[allow(clippy::too_many_arguments, reason = "Matches the segment layout")]
    pub fn rat_cubic_to(
        &mut self,
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        x3: f32,
        y3: f32,
        w0: f32,
        w1: f32,
    ) -> [f32; 10] {
        let [x0, y0] = self.current;
        self.segment(Tag::RatCubic, &[[x1, y1], [x2, y2], [x3, y3]], [x2, y2]);
        [x0, y0, x1, y1, w0, x2, y2, w1, x3, y3]
    }
}

#[cfg(test)]
mod tests {
    use super::{PathEncoder, PathHeader};
    use crate::Tag;

    #[test]
    fn counts_lines() {
        let mut enc = PathEncoder::new();
        enc.move_to(0.0, 0.0);
        assert_eq!(enc.line_to(10.0, 0.0), [0.0, 0.0, 10.0, 0.0]);
        enc.line_to(10.0, 10.0);
        let counts = enc.counts();
        assert_eq!(counts.lines(), 2);
        for tag in &Tag::PRIMS[1..] {
            assert_eq!(counts.get(*tag), 0);
        }
        assert_eq!(enc.bounds(), [0.0, 0.0, 10.0, 10.0]);
    }

    #[test]
    fn smooth_quad_reflects_control_point() {
        let mut enc = PathEncoder::new();
        enc.move_to(1.0, 1.0);
        enc.quad_to(3.0, 7.0, 5.0, 2.0);
        let coords = enc.quad_smooth_to(9.0, 9.0);
        // 2 * (5, 2) - (3, 7)
        assert_eq!(coords[2..4], [7.0, -3.0]);
        assert_eq!(coords[..2], [5.0, 2.0]);
    }

    #[test]
    fn smooth_cubic_reflects_second_control_point() {
        let mut enc = PathEncoder::new();
        enc.cubic_to(1.0, 2.0, 3.0, 4.0, 5.0, 5.0);
        let coords = enc.cubic_smooth_to(8.0, 8.0, 9.0, 5.0);
        assert_eq!(coords[2..4], [7.0, 6.0]);
        assert_eq!(enc.ctrl(), [8.0, 8.0]);
    }

    #[test]
    fn smooth_after_line_uses_current_point() {
        let mut enc = PathEncoder::new();
        enc.move_to(2.0, 3.0);
        enc.line_to(4.0, 4.0);
        let coords = enc.quad_smooth_to(6.0, 0.0);
        assert_eq!(coords[2..4], [4.0, 4.0]);
    }

    #[test]
    fn rational_layout() {
        let mut enc = PathEncoder::new();
        enc.move_to(1.0, 0.0);
        let quad = enc.rat_quad_to(1.0, 1.0, 0.0, 1.0, 0.5);
        assert_eq!(quad, [1.0, 0.0, 1.0, 1.0, 0.5, 0.0, 1.0]);
        let cubic = enc.rat_cubic_to(0.0, 2.0, 2.0, 2.0, 2.0, 0.0, 0.25, 0.75);
        assert_eq!(cubic, [0.0, 1.0, 0.0, 2.0, 0.25, 2.0, 2.0, 0.75, 2.0, 0.0]);
        assert_eq!(enc.counts().get(Tag::RatQuad), 1);
        assert_eq!(enc.counts().get(Tag::RatCubic), 1);
    }

    #[test]
    fn header_slots() {
        assert_eq!(PathHeader::DWORDS, 16);
        assert_eq!(PathHeader::head_slots(256), 238);
        assert_eq!(PathHeader::node_slots(256), 254);
        assert_eq!(PathHeader::next_offset(256), 254);
    }
}
