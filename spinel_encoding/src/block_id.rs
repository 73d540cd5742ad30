// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

/// Number of bits used by the tag of a [`TaggedBlockId`].
pub const TAG_BITS: u32 = 5;

/// Number of bits used by a block pool subblock index.
pub const ID_BITS: u32 = 32 - TAG_BITS;

const TAG_MASK: u32 = (1 << TAG_BITS) - 1;

/// Segment type or marker carried in the low bits of a [`TaggedBlockId`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Tag {
    Line = 0,
    Quad = 1,
    Cubic = 2,
    RatQuad = 3,
    RatCubic = 4,
    /// Link to the next node block of a path or raster.
    Next = 30,
    Invalid = 31,
}

impl Tag {
    /// Number of primitive segment types.
    pub const PRIM_COUNT: usize = 5;

    /// The primitive segment tags in storage order.
    pub const PRIMS: [Tag; Self::PRIM_COUNT] = [
        Tag::Line,
        Tag::Quad,
        Tag::Cubic,
        Tag::RatQuad,
        Tag::RatCubic,
    ];

    pub fn from_bits(bits: u32) -> Option<Self> {
        Some(match bits & TAG_MASK {
            0 => Tag::Line,
            1 => Tag::Quad,
            2 => Tag::Cubic,
            3 => Tag::RatQuad,
            4 => Tag::RatCubic,
            30 => Tag::Next,
            31 => Tag::Invalid,
            _ => return None,
        })
    }

    /// Returns true for the five path segment types.
    pub fn is_prim(self) -> bool {
        (self as u32) < Self::PRIM_COUNT as u32
    }

    /// Index of a segment tag in [`Tag::PRIMS`].
    pub fn prim_index(self) -> Option<usize> {
        self.is_prim().then_some(self as usize)
    }

    /// Number of f32 coordinates stored for one segment of this type.
    ///
    /// Each segment starts at the current point, so the coordinates include
    /// the start point. Rational segments carry their control point weights
    /// inline.
    pub fn coords(self) -> usize {
        match self {
            Tag::Line => 4,
            Tag::Quad => 6,
            Tag::Cubic => 8,
            Tag::RatQuad => 7,
            Tag::RatCubic => 10,
            Tag::Next | Tag::Invalid => 0,
        }
    }
}

/// Untagged subblock index into the block pool.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct BlockId(pub u32);

impl BlockId {
    pub const MAX: u32 = (1 << ID_BITS) - 1;
    pub const INVALID: Self = Self(u32::MAX);

    /// Returns the subblock index of this id within its block.
    pub fn subblock(self, subblocks_log2: u32) -> u32 {
        self.0 & ((1 << subblocks_log2) - 1)
    }

    /// Returns the id of the first subblock of the containing block.
    pub fn block(self, subblocks_log2: u32) -> Self {
        Self(self.0 & !((1 << subblocks_log2) - 1))
    }

    pub fn is_block_aligned(self, subblocks_log2: u32) -> bool {
        self.subblock(subblocks_log2) == 0
    }

    pub fn is_valid(self) -> bool {
        self.0 <= Self::MAX
    }
}

/// A 27-bit block pool index packed with a 5-bit [`Tag`].
///
/// ```text
///   bits: | tag | id    |
///         | 0-4 | 5-31  |
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct TaggedBlockId(pub u32);

impl TaggedBlockId {
    /// All-ones value which never names a real allocation.
    pub const INVALID: Self = Self(u32::MAX);

    pub fn new(tag: Tag, id: BlockId) -> Self {
        debug_assert!(id.is_valid(), "block id out of range");
        Self((id.0 << TAG_BITS) | tag as u32)
    }

    pub fn tag(self) -> Tag {
        // Unknown tags decode as invalid.
        Tag::from_bits(self.0).unwrap_or(Tag::Invalid)
    }

    pub fn id(self) -> BlockId {
        BlockId(self.0 >> TAG_BITS)
    }

    pub fn is_invalid(self) -> bool {
        self == Self::INVALID || self.tag() == Tag::Invalid
    }

    /// Returns the same tagged id offset by `delta` subblocks.
    pub fn offset(self, delta: u32) -> Self {
        Self::new(self.tag(), BlockId(self.id().0 + delta))
    }
}

#[cfg(test)]
mod tests {
    use super::{BlockId, Tag, TaggedBlockId};

    #[test]
    fn pack_unpack() {
        for tag in Tag::PRIMS.into_iter().chain([Tag::Next]) {
            let id = BlockId(0x123_4567);
            let tagged = TaggedBlockId::new(tag, id);
            assert_eq!(tagged.tag(), tag);
            assert_eq!(tagged.id(), id);
        }
    }

    #[test]
    fn invalid_is_all_ones() {
        assert_eq!(TaggedBlockId::INVALID.0, u32::MAX);
        assert!(TaggedBlockId::INVALID.is_invalid());
        assert_eq!(TaggedBlockId::INVALID.tag(), Tag::Invalid);
        // The largest real id with a real tag is never invalid.
        let max = TaggedBlockId::new(Tag::Next, BlockId(BlockId::MAX));
        assert!(!max.is_invalid());
    }

    #[test]
    fn block_alignment() {
        let id = BlockId(0x45);
        assert_eq!(id.subblock(4), 5);
        assert_eq!(id.block(4), BlockId(0x40));
        assert!(BlockId(0x40).is_block_aligned(4));
        assert!(!id.is_block_aligned(4));
    }

    #[test]
    fn unknown_tag_decodes_invalid() {
        assert_eq!(Tag::from_bits(17), None);
        assert_eq!(TaggedBlockId(17).tag(), Tag::Invalid);
    }
}
