// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bytemuck::{Pod, Zeroable};

use crate::path::NODE_LINK_DWORDS;
use crate::IndirectCount;

/// Header at the start of a raster's head block.
///
/// The raster's keys follow the header two dwords at a time: first the
/// TTSK keys in sorted order, then the TTPK keys. Once a block is full the
/// keys continue in a node block linked through a next id stored at
/// [`RasterHeader::next_offset`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct RasterHeader {
    pub handle: u32,
    /// Number of head and node blocks.
    pub blocks: u32,
    /// Number of node blocks, excluding the head.
    pub nodes: u32,
    pub ttsks: u32,
    pub ttpks: u32,
    /// Tile bounds `x0 y0 x1 y1`, exclusive upper bounds. Empty rasters have
    /// `x0 >= x1`.
    pub bounds: [i32; 4],
    /// Number of blocks holding the raster's TTSB and TTPB subblocks.
    pub ttsb_blocks: u32,
    pub pad: [u32; 6],
}

static_assertions::const_assert_eq!(size_of::<RasterHeader>(), 64);

impl RasterHeader {
    pub const DWORDS: u32 = (size_of::<Self>() / 4) as u32;

    /// Number of 64-bit key slots in the head block.
    pub fn head_slots(block_dwords: u32) -> u32 {
        (block_dwords - Self::DWORDS - NODE_LINK_DWORDS) / 2
    }

    /// Number of 64-bit key slots in a node block.
    pub fn node_slots(block_dwords: u32) -> u32 {
        (block_dwords - NODE_LINK_DWORDS) / 2
    }

    pub fn next_offset(block_dwords: u32) -> u32 {
        block_dwords - NODE_LINK_DWORDS
    }

    /// Number of head and node blocks needed to hold `keys` keys.
    pub fn blocks_for_keys(block_dwords: u32, keys: u32) -> u32 {
        let head = Self::head_slots(block_dwords);
        if keys <= head {
            1
        } else {
            1 + (keys - head).div_ceil(Self::node_slots(block_dwords))
        }
    }

    pub fn keys(&self) -> u32 {
        self.ttsks + self.ttpks
    }

    pub fn is_empty(&self) -> bool {
        self.bounds[0] >= self.bounds[2] || self.bounds[1] >= self.bounds[3]
    }
}

/// Per-raster metadata of a cohort.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct RcMeta {
    /// Index of the raster's first key in the sorted TTRK array.
    pub reads: u32,
    /// Number of TTRK keys of the raster.
    pub count: u32,
    /// Number of head and node blocks allocated for the raster.
    pub blocks: u32,
    /// Head block id, or invalid until allocated.
    pub head: u32,
}

/// A path filled into a raster.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct FillCmd {
    pub path: u32,
    /// Index into the cohort's transform table.
    pub transform: u32,
    /// Index into the cohort's clip table.
    pub clip: u32,
    /// Cohort-local raster index.
    pub raster: u32,
}

/// One segment to rasterize: lane `lane` of the segment group `group`
/// belonging to fill `fill`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct RastCmd {
    pub fill: u32,
    /// Tagged block id of the segment group.
    pub group: u32,
    pub lane: u32,
    pub pad: u32,
}

/// Per segment type totals, allocation bases and indirect dispatch
/// arguments, written by the fills kernels.
#[derive(Copy, Clone, Debug, Default, Zeroable, Pod)]
#[repr(C)]
pub struct RasterizeCounts {
    pub counts: [u32; 5],
    pub bases: [u32; 5],
    pub pad: [u32; 2],
    pub dispatch: [IndirectCount; 5],
}

static_assertions::const_assert_eq!(size_of::<RasterizeCounts>(), 128);

impl RasterizeCounts {
    /// Byte offset of the indirect dispatch arguments of prim `index`.
    pub fn dispatch_offset(index: usize) -> u64 {
        (48 + 16 * index) as u64
    }
}

/// A raster placed on a layer of a composition.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct PlaceCmd {
    pub raster: u32,
    pub layer: u32,
    /// Translation in tiles.
    pub tx: i32,
    pub ty: i32,
}

/// Run of sorted composition keys that share a tile.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct TileRange {
    pub x: u32,
    pub y: u32,
    pub offset: u32,
    pub count: u32,
}

/// Axis-aligned clip rectangle in raster space, `x0 y0 x1 y1`.
#[derive(Copy, Clone, Debug, PartialEq, Zeroable, Pod)]
#[repr(C)]
pub struct Clip {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Default for Clip {
    fn default() -> Self {
        Self::UNBOUNDED
    }
}

impl Clip {
    pub const UNBOUNDED: Self = Self {
        x0: f32::NEG_INFINITY,
        y0: f32::NEG_INFINITY,
        x1: f32::INFINITY,
        y1: f32::INFINITY,
    };

    pub const fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn intersect(&self, other: &Self) -> Self {
        Self {
            x0: self.x0.max(other.x0),
            y0: self.y0.max(other.y0),
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.x0 < self.x1 && self.y0 < self.y1)
    }
}

#[cfg(test)]
mod tests {
    use super::{Clip, RasterHeader, RasterizeCounts};
    use std::mem::offset_of;

    #[test]
    fn key_slots() {
        assert_eq!(RasterHeader::head_slots(256), 119);
        assert_eq!(RasterHeader::node_slots(256), 127);
        assert_eq!(RasterHeader::blocks_for_keys(256, 0), 1);
        assert_eq!(RasterHeader::blocks_for_keys(256, 119), 1);
        assert_eq!(RasterHeader::blocks_for_keys(256, 120), 2);
        assert_eq!(RasterHeader::blocks_for_keys(256, 119 + 127 + 1), 3);
    }

    #[test]
    fn dispatch_offsets() {
        assert_eq!(
            RasterizeCounts::dispatch_offset(0),
            offset_of!(RasterizeCounts, dispatch) as u64
        );
        assert_eq!(RasterizeCounts::dispatch_offset(4), 112);
    }

    #[test]
    fn clip_intersect() {
        let clip = Clip::new(0.0, 0.0, 10.0, 10.0).intersect(&Clip::new(5.0, -5.0, 20.0, 8.0));
        assert_eq!(clip, Clip::new(5.0, 0.0, 10.0, 8.0));
        assert!(!clip.is_empty());
        assert!(Clip::new(3.0, 0.0, 3.0, 1.0).is_empty());
        assert!(!Clip::UNBOUNDED.is_empty());
    }
}
