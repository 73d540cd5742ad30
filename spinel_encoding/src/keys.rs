// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! 64-bit sort keys produced and consumed by the raster and composition
//! kernels.

use bytemuck::{Pod, Zeroable};

use crate::BlockId;

const ID_MASK: u64 = (1 << 27) - 1;

const fn field(key: u64, shift: u32, bits: u32) -> u32 {
    ((key >> shift) & ((1 << bits) - 1)) as u32
}

/// Header in front of every key buffer.
///
/// Kernels append keys with an atomic increment of `count` and set `failed`
/// when `capacity` would be exceeded.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct KeysHeader {
    pub count: u32,
    pub capacity: u32,
    pub failed: u32,
    pub pad: u32,
}

impl KeysHeader {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    /// Size in bytes of a key buffer holding `capacity` keys.
    pub fn buffer_size(capacity: u32) -> u64 {
        size_of::<Self>() as u64 + capacity as u64 * 8
    }
}

/// Tile-tracking raster key, emitted by the rasterize kernels.
///
/// ```text
///   bits: | ttsb id | x     | y     | cohort |
///         | 0-26    | 27-38 | 39-50 | 51-61  |
/// ```
///
/// Sorting TTRK keys orders them by raster, then by tile row, then by tile
/// column.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ttrk(pub u64);

impl Ttrk {
    pub const X_BITS: u32 = 12;
    pub const Y_BITS: u32 = 12;
    pub const COHORT_BITS: u32 = 11;
    /// Largest tile coordinate representable in a raster key.
    pub const TILE_MAX: u32 = (1 << Self::X_BITS) - 1;
    /// All-ones cohort index, never assigned to a raster.
    pub const COHORT_INVALID: u32 = (1 << Self::COHORT_BITS) - 1;

    pub fn new(ttsb: BlockId, x: u32, y: u32, cohort: u32) -> Self {
        debug_assert!(x <= Self::TILE_MAX && y <= Self::TILE_MAX);
        debug_assert!(cohort < Self::COHORT_INVALID);
        Self(
            (ttsb.0 as u64 & ID_MASK)
                | (x as u64) << 27
                | (y as u64) << 39
                | (cohort as u64) << 51,
        )
    }

    pub fn ttsb(self) -> BlockId {
        BlockId((self.0 & ID_MASK) as u32)
    }

    pub fn x(self) -> u32 {
        field(self.0, 27, Self::X_BITS)
    }

    pub fn y(self) -> u32 {
        field(self.0, 39, Self::Y_BITS)
    }

    pub fn cohort(self) -> u32 {
        field(self.0, 51, Self::COHORT_BITS)
    }
}

/// Tile key stored in a raster: either a TTSK (segment piece) or a TTPK
/// (backdrop prefix spanning one or more tiles).
///
/// ```text
///   bits: | id   | x     | y     | span  | prefix |
///         | 0-26 | 27-38 | 39-50 | 51-62 | 63     |
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ttxk(pub u64);

impl Ttxk {
    pub const SPAN_BITS: u32 = 12;
    pub const SPAN_MAX: u32 = (1 << Self::SPAN_BITS) - 1;
    const PREFIX_BIT: u64 = 1 << 63;

    /// A segment key referencing a TTSB subblock.
    pub fn ttsk(ttsb: BlockId, x: u32, y: u32) -> Self {
        Self((ttsb.0 as u64 & ID_MASK) | (x as u64) << 27 | (y as u64) << 39)
    }

    /// A prefix key referencing a TTPB subblock and covering `span` tiles
    /// starting at `x`.
    pub fn ttpk(ttpb: BlockId, x: u32, y: u32, span: u32) -> Self {
        debug_assert!(span >= 1 && span <= Self::SPAN_MAX);
        Self(
            (ttpb.0 as u64 & ID_MASK)
                | (x as u64) << 27
                | (y as u64) << 39
                | (span as u64) << 51
                | Self::PREFIX_BIT,
        )
    }

    pub fn id(self) -> BlockId {
        BlockId((self.0 & ID_MASK) as u32)
    }

    pub fn x(self) -> u32 {
        field(self.0, 27, Ttrk::X_BITS)
    }

    pub fn y(self) -> u32 {
        field(self.0, 39, Ttrk::Y_BITS)
    }

    pub fn span(self) -> u32 {
        field(self.0, 51, Self::SPAN_BITS)
    }

    pub fn is_prefix(self) -> bool {
        self.0 & Self::PREFIX_BIT != 0
    }
}

/// Composition key emitted by the place kernel.
///
/// ```text
///   bits: | id   | prefix | layer | x     | y     |
///         | 0-26 | 27     | 28-45 | 46-54 | 55-63 |
/// ```
///
/// Ascending order visits tiles row by row and, within a tile, layers from
/// front to back.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ttck(pub u64);

impl Ttck {
    pub const LAYER_BITS: u32 = 18;
    pub const X_BITS: u32 = 9;
    pub const Y_BITS: u32 = 9;
    pub const LAYER_MAX: u32 = (1 << Self::LAYER_BITS) - 1;
    pub const TILE_X_MAX: u32 = (1 << Self::X_BITS) - 1;
    pub const TILE_Y_MAX: u32 = (1 << Self::Y_BITS) - 1;

    pub fn new(id: BlockId, prefix: bool, layer: u32, x: u32, y: u32) -> Self {
        debug_assert!(layer <= Self::LAYER_MAX);
        debug_assert!(x <= Self::TILE_X_MAX && y <= Self::TILE_Y_MAX);
        Self(
            (id.0 as u64 & ID_MASK)
                | (prefix as u64) << 27
                | (layer as u64) << 28
                | (x as u64) << 46
                | (y as u64) << 55,
        )
    }

    pub fn id(self) -> BlockId {
        BlockId((self.0 & ID_MASK) as u32)
    }

    pub fn is_prefix(self) -> bool {
        self.0 >> 27 & 1 != 0
    }

    pub fn layer(self) -> u32 {
        field(self.0, 28, Self::LAYER_BITS)
    }

    pub fn x(self) -> u32 {
        field(self.0, 46, Self::X_BITS)
    }

    pub fn y(self) -> u32 {
        field(self.0, 55, Self::Y_BITS)
    }

    /// Key bits identifying the tile, used to segment sorted keys.
    pub fn tile(self) -> u64 {
        self.0 >> 46
    }
}

#[cfg(test)]
mod tests {
    use super::{Ttck, Ttrk, Ttxk};
    use crate::BlockId;

    #[test]
    fn ttrk_fields() {
        let key = Ttrk::new(BlockId(0x7ff_ffff), 4095, 17, 2046);
        assert_eq!(key.ttsb(), BlockId(0x7ff_ffff));
        assert_eq!(key.x(), 4095);
        assert_eq!(key.y(), 17);
        assert_eq!(key.cohort(), 2046);
    }

    #[test]
    fn ttrk_order() {
        let a = Ttrk::new(BlockId(900), 5, 1, 0);
        let b = Ttrk::new(BlockId(1), 0, 2, 0);
        let c = Ttrk::new(BlockId(0), 0, 0, 1);
        let mut keys = [c, b, a];
        keys.sort();
        assert_eq!(keys, [a, b, c]);
    }

    #[test]
    fn ttxk_fields() {
        let sk = Ttxk::ttsk(BlockId(33), 7, 9);
        assert!(!sk.is_prefix());
        assert_eq!((sk.id(), sk.x(), sk.y(), sk.span()), (BlockId(33), 7, 9, 0));
        let pk = Ttxk::ttpk(BlockId(48), 8, 9, 12);
        assert!(pk.is_prefix());
        assert_eq!((pk.id(), pk.x(), pk.y(), pk.span()), (BlockId(48), 8, 9, 12));
    }

    #[test]
    fn ttck_fields_and_order() {
        let key = Ttck::new(BlockId(12), true, Ttck::LAYER_MAX, 511, 3);
        assert_eq!(key.id(), BlockId(12));
        assert!(key.is_prefix());
        assert_eq!(key.layer(), Ttck::LAYER_MAX);
        assert_eq!((key.x(), key.y()), (511, 3));

        let front = Ttck::new(BlockId(99), false, 0, 1, 1);
        let back = Ttck::new(BlockId(1), false, 1, 1, 1);
        let next_tile = Ttck::new(BlockId(0), false, 0, 2, 1);
        let next_row = Ttck::new(BlockId(0), false, 0, 0, 2);
        assert!(front < back);
        assert!(back < next_tile);
        assert!(next_tile < next_row);
        assert_eq!(front.tile(), back.tile());
    }
}
