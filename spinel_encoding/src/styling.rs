// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Styling command encoding.
//!
//! A styling extent is a flat dword array. It starts with a table holding
//! two dwords per layer (`cmds`, `parent`) and continues with a bump region
//! holding group nodes, parent lists and command spans.

use peniko::{Color, Fill};
use thiserror::Error;

use crate::math::{pack_f16x2, unpack_f16x2};

/// Dwords per layer table entry.
pub const LAYER_DWORDS: u32 = 2;
/// Dwords per group node.
pub const GROUP_DWORDS: u32 = 6;

/// Offsets inside a group node.
pub mod group {
    pub const PARENTS_DEPTH: usize = 0;
    pub const PARENTS_BASE: usize = 1;
    pub const RANGE_LO: usize = 2;
    pub const RANGE_HI: usize = 3;
    pub const CMDS_ENTER: usize = 4;
    pub const CMDS_LEAVE: usize = 5;
}

/// Parent of a layer that belongs to no group.
pub const PARENT_NONE: u32 = u32::MAX;

const CMDS_BASE_BITS: u32 = 27;
const CMDS_BASE_MASK: u32 = (1 << CMDS_BASE_BITS) - 1;
/// Largest number of commands in one span.
pub const CMDS_COUNT_MAX: u32 = (1 << (32 - CMDS_BASE_BITS)) - 1;

/// Packs a command span: base in the low 27 bits, count in the high 5.
pub fn cmds_pack(base: u32, count: u32) -> u32 {
    debug_assert!(base <= CMDS_BASE_MASK && count <= CMDS_COUNT_MAX);
    base | count << CMDS_BASE_BITS
}

pub fn cmds_get_base(cmds: u32) -> u32 {
    cmds & CMDS_BASE_MASK
}

pub fn cmds_get_count(cmds: u32) -> u32 {
    cmds >> CMDS_BASE_BITS
}

/// Styling opcodes interpreted by the render kernel.
///
/// Coverage is tracked in three per-pixel registers: the work-in-progress
/// cover, the accumulated cover and the mask. Colors are tracked in a
/// work-in-progress and an accumulated premultiplied RGBA register.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    Noop = 0,
    CoverNonzero = 1,
    CoverEvenodd = 2,
    CoverAccumulate = 3,
    CoverMask = 4,
    CoverWipZero = 5,
    CoverAccZero = 6,
    CoverMaskZero = 7,
    CoverMaskOne = 8,
    CoverMaskInvert = 9,
    /// Followed by two dwords of f16 RGBA.
    ColorFillSolid = 10,
    ColorWipZero = 11,
    ColorAccZero = 12,
    BlendOver = 13,
    BlendPlus = 14,
    BlendMultiply = 15,
    BlendKnockout = 16,
    CoverWipMoveToMask = 17,
    CoverAccMoveToMask = 18,
    /// Followed by two dwords of f16 RGBA.
    ColorAccOverBackground = 19,
    ColorAccStoreToSurface = 20,
    ColorAccTestOpacity = 21,
}

impl Opcode {
    pub fn from_u32(value: u32) -> Option<Self> {
        use Opcode::*;
        const ALL: [Opcode; 22] = [
            Noop,
            CoverNonzero,
            CoverEvenodd,
            CoverAccumulate,
            CoverMask,
            CoverWipZero,
            CoverAccZero,
            CoverMaskZero,
            CoverMaskOne,
            CoverMaskInvert,
            ColorFillSolid,
            ColorWipZero,
            ColorAccZero,
            BlendOver,
            BlendPlus,
            BlendMultiply,
            BlendKnockout,
            CoverWipMoveToMask,
            CoverAccMoveToMask,
            ColorAccOverBackground,
            ColorAccStoreToSurface,
            ColorAccTestOpacity,
        ];
        ALL.get(value as usize).copied()
    }

    /// Number of operand dwords following the opcode.
    pub fn operands(self) -> usize {
        match self {
            Opcode::ColorFillSolid | Opcode::ColorAccOverBackground => 2,
            _ => 0,
        }
    }
}

/// Encodes a color as two dwords of f16 RGBA.
pub fn encode_color(color: Color) -> [u32; 2] {
    let [r, g, b, a] = color.components;
    [pack_f16x2(r, g), pack_f16x2(b, a)]
}

pub fn decode_color(dwords: [u32; 2]) -> [f32; 4] {
    let [r, g] = unpack_f16x2(dwords[0]);
    let [b, a] = unpack_f16x2(dwords[1]);
    [r, g, b, a]
}

/// Writes a solid fill into the first three dwords of `cmds`.
pub fn encode_fill_solid(cmds: &mut [u32], color: Color) {
    let [c0, c1] = encode_color(color);
    cmds[..3].copy_from_slice(&[Opcode::ColorFillSolid as u32, c0, c1]);
}

/// Writes a background blend into the first three dwords of `cmds`.
pub fn encode_background_over(cmds: &mut [u32], color: Color) {
    let [c0, c1] = encode_color(color);
    cmds[..3].copy_from_slice(&[Opcode::ColorAccOverBackground as u32, c0, c1]);
}

/// Commands of a layer filled with a solid color and blended under the
/// layers in front of it.
pub fn layer_cmds_fill(fill: Fill, color: Color) -> [u32; 5] {
    let cover = match fill {
        Fill::NonZero => Opcode::CoverNonzero,
        Fill::EvenOdd => Opcode::CoverEvenodd,
    };
    let mut cmds = [cover as u32, 0, 0, 0, Opcode::BlendOver as u32];
    encode_fill_solid(&mut cmds[1..4], color);
    cmds
}

/// Enter commands of a root group: clear the accumulators.
pub fn root_group_enter() -> [u32; 2] {
    [Opcode::CoverAccZero as u32, Opcode::ColorAccZero as u32]
}

/// Leave commands of a root group: blend over `background` and store.
pub fn root_group_leave(background: Color) -> [u32; 4] {
    let mut cmds = [0, 0, 0, Opcode::ColorAccStoreToSurface as u32];
    encode_background_over(&mut cmds[..3], background);
    cmds
}

/// Errors from building a styling extent.
#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
pub enum StylingError {
    #[error("styling command region exhausted")]
    CommandsOverflow,
    #[error("layer id is out of range")]
    LayerIdInvalid,
    #[error("group id does not name a group node")]
    GroupIdInvalid,
    #[error("command span longer than {CMDS_COUNT_MAX} dwords")]
    CountTooLarge,
}

/// Dword offset of a group node in the extent.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupId(pub u32);

/// Host copy of a styling extent.
#[derive(Clone, Debug)]
pub struct StylingExtent {
    dwords: Vec<u32>,
    layer_count: u32,
    next: u32,
    groups: Vec<u32>,
}

impl StylingExtent {
    /// Creates an extent with a table for `layer_count` layers and room for
    /// `cmd_count` dwords of groups and commands.
    pub fn new(layer_count: u32, cmd_count: u32) -> Self {
        let mut extent = Self {
            dwords: vec![0; (layer_count * LAYER_DWORDS + cmd_count) as usize],
            layer_count,
            next: 0,
            groups: Vec::new(),
        };
        extent.reset();
        extent
    }

    /// Empties the extent, keeping its sizes.
    pub fn reset(&mut self) {
        self.dwords.fill(0);
        for layer in 0..self.layer_count as usize {
            self.dwords[layer * 2 + 1] = PARENT_NONE;
        }
        self.next = self.layer_count * LAYER_DWORDS;
        self.groups.clear();
    }

    pub fn layer_count(&self) -> u32 {
        self.layer_count
    }

    pub fn dwords(&self) -> &[u32] {
        &self.dwords
    }

    /// Offset of the bump pointer.
    pub fn next(&self) -> u32 {
        self.next
    }

    fn alloc(&mut self, n: u32) -> Result<u32, StylingError> {
        if self.next as usize + n as usize > self.dwords.len() {
            return Err(StylingError::CommandsOverflow);
        }
        let base = self.next;
        self.next += n;
        Ok(base)
    }

    fn alloc_span(&mut self, n: u32) -> Result<u32, StylingError> {
        if n > CMDS_COUNT_MAX {
            return Err(StylingError::CountTooLarge);
        }
        self.alloc(n)
    }

    fn span_mut(&mut self, base: u32, n: u32) -> &mut [u32] {
        &mut self.dwords[base as usize..(base + n) as usize]
    }

    fn check_group(&self, group: GroupId) -> Result<usize, StylingError> {
        if self.groups.contains(&group.0) {
            Ok(group.0 as usize)
        } else {
            Err(StylingError::GroupIdInvalid)
        }
    }

    fn check_layer(&self, layer: u32) -> Result<usize, StylingError> {
        if layer < self.layer_count {
            Ok(layer as usize)
        } else {
            Err(StylingError::LayerIdInvalid)
        }
    }

    /// Allocates a group node with no parents, no commands and a range
    /// spanning every layer.
    pub fn group_alloc(&mut self) -> Result<GroupId, StylingError> {
        let base = self.alloc(GROUP_DWORDS)?;
        let hi = self.layer_count.saturating_sub(1);
        self.span_mut(base, GROUP_DWORDS)
            .copy_from_slice(&[0, 0, 0, hi, 0, 0]);
        self.groups.push(base);
        Ok(GroupId(base))
    }

    /// Allocates the enter command span of `group`.
    pub fn group_enter(&mut self, group: GroupId, n: u32) -> Result<&mut [u32], StylingError> {
        self.group_cmds(group, group::CMDS_ENTER, n)
    }

    /// Allocates the leave command span of `group`.
    pub fn group_leave(&mut self, group: GroupId, n: u32) -> Result<&mut [u32], StylingError> {
        self.group_cmds(group, group::CMDS_LEAVE, n)
    }

    fn group_cmds(
        &mut self,
        group: GroupId,
        slot: usize,
        n: u32,
    ) -> Result<&mut [u32], StylingError> {
        let node = self.check_group(group)?;
        let base = self.alloc_span(n)?;
        self.dwords[node + slot] = cmds_pack(base, n);
        Ok(self.span_mut(base, n))
    }

    /// Allocates the parent list of `group`, immediate parent first.
    pub fn group_parents(&mut self, group: GroupId, n: u32) -> Result<&mut [u32], StylingError> {
        let node = self.check_group(group)?;
        let base = self.alloc(n)?;
        self.dwords[node + group::PARENTS_DEPTH] = n;
        self.dwords[node + group::PARENTS_BASE] = base;
        Ok(self.span_mut(base, n))
    }

    /// Sets the lowest layer of the inclusive layer range of `group`.
    pub fn group_range_lo(&mut self, group: GroupId, layer: u32) -> Result<(), StylingError> {
        let node = self.check_group(group)?;
        self.check_layer(layer)?;
        self.dwords[node + group::RANGE_LO] = layer;
        Ok(())
    }

    /// Sets the highest layer of the inclusive layer range of `group`.
    pub fn group_range_hi(&mut self, group: GroupId, layer: u32) -> Result<(), StylingError> {
        let node = self.check_group(group)?;
        self.check_layer(layer)?;
        self.dwords[node + group::RANGE_HI] = layer;
        Ok(())
    }

    /// Allocates the command span of `layer` and makes `group` its parent.
    pub fn group_layer(
        &mut self,
        group: GroupId,
        layer: u32,
        n: u32,
    ) -> Result<&mut [u32], StylingError> {
        self.check_group(group)?;
        let entry = self.check_layer(layer)? * LAYER_DWORDS as usize;
        let base = self.alloc_span(n)?;
        self.dwords[entry] = cmds_pack(base, n);
        self.dwords[entry + 1] = group.0;
        Ok(self.span_mut(base, n))
    }

    /// Returns the packed command span of `layer`.
    pub fn layer_cmds(&self, layer: u32) -> Option<u32> {
        (layer < self.layer_count).then(|| self.dwords[(layer * LAYER_DWORDS) as usize])
    }

    pub fn layer_parent(&self, layer: u32) -> Option<u32> {
        (layer < self.layer_count).then(|| self.dwords[(layer * LAYER_DWORDS + 1) as usize])
    }

    /// Returns the six dwords of a group node.
    pub fn group_node(&self, group: GroupId) -> Option<&[u32]> {
        let node = self.check_group(group).ok()?;
        Some(&self.dwords[node..node + GROUP_DWORDS as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::{
        cmds_get_base, cmds_get_count, cmds_pack, decode_color, group, layer_cmds_fill,
        root_group_leave, GroupId, Opcode, StylingError, StylingExtent, PARENT_NONE,
    };
    use peniko::{color::palette, Color, Fill};

    #[test]
    fn cmds_packing() {
        let packed = cmds_pack(0x7ff_ffff, 31);
        assert_eq!(cmds_get_base(packed), 0x7ff_ffff);
        assert_eq!(cmds_get_count(packed), 31);
    }

    #[test]
    fn layer_cmds_decode_to_allocation() {
        let mut extent = StylingExtent::new(4, 64);
        let g = extent.group_alloc().unwrap();
        let base = extent.next();
        let cmds = extent.group_layer(g, 2, 5).unwrap();
        assert_eq!(cmds.len(), 5);
        cmds.copy_from_slice(&layer_cmds_fill(Fill::NonZero, palette::css::RED));
        let packed = extent.layer_cmds(2).unwrap();
        assert_eq!(cmds_get_count(packed), 5);
        assert_eq!(cmds_get_base(packed), base);
        assert_eq!(extent.layer_parent(2), Some(g.0));
        assert_eq!(extent.layer_parent(1), Some(PARENT_NONE));
        assert_eq!(extent.dwords()[base as usize], Opcode::CoverNonzero as u32);
    }

    #[test]
    fn group_node_fields() {
        let mut extent = StylingExtent::new(8, 64);
        let root = extent.group_alloc().unwrap();
        let child = extent.group_alloc().unwrap();
        extent.group_parents(child, 1).unwrap()[0] = root.0;
        extent.group_range_lo(child, 2).unwrap();
        extent.group_range_hi(child, 5).unwrap();
        extent.group_enter(child, 2).unwrap();
        let node = extent.group_node(child).unwrap();
        assert_eq!(node[group::PARENTS_DEPTH], 1);
        assert_eq!(node[group::RANGE_LO], 2);
        assert_eq!(node[group::RANGE_HI], 5);
        assert_eq!(cmds_get_count(node[group::CMDS_ENTER]), 2);
        assert_eq!(node[group::CMDS_LEAVE], 0);
        let root_node = extent.group_node(root).unwrap();
        assert_eq!(root_node[group::RANGE_HI], 7);
    }

    #[test]
    fn errors() {
        let mut extent = StylingExtent::new(2, 8);
        let g = extent.group_alloc().unwrap();
        assert_eq!(extent.group_layer(g, 2, 1).unwrap_err(), StylingError::LayerIdInvalid);
        assert_eq!(extent.group_enter(g, 3).unwrap_err(), StylingError::CommandsOverflow);
        assert_eq!(extent.group_enter(g, 40).unwrap_err(), StylingError::CountTooLarge);
        assert_eq!(
            extent.group_enter(GroupId(1), 1).unwrap_err(),
            StylingError::GroupIdInvalid
        );
        extent.reset();
        assert_eq!(extent.next(), 4);
        assert!(extent.group_node(g).is_none());
    }

    #[test]
    fn color_encoding() {
        let leave = root_group_leave(Color::new([1.0, 0.5, 0.0, 1.0]));
        assert_eq!(leave[0], Opcode::ColorAccOverBackground as u32);
        assert_eq!(decode_color([leave[1], leave[2]]), [1.0, 0.5, 0.0, 1.0]);
        assert_eq!(leave[3], Opcode::ColorAccStoreToSurface as u32);
        assert_eq!(Opcode::from_u32(21), Some(Opcode::ColorAccTestOpacity));
        assert_eq!(Opcode::from_u32(22), None);
    }
}
