// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bytemuck::{Pod, Zeroable};

use crate::Ttrk;

/// Numeric tuning parameters of a target.
///
/// The values are baked into the kernels of a target and persisted in the
/// target blob. This must be kept in sync with the kernel configuration.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct TargetConfig {
    pub subgroup_size_log2: u32,
    pub workgroup_size_log2: u32,
    pub tile_width_log2: u32,
    pub tile_height_log2: u32,
    /// A subblock holds `1 << subblock_dwords_log2` dwords.
    pub subblock_dwords_log2: u32,
    /// A block holds `1 << block_dwords_log2` dwords.
    pub block_dwords_log2: u32,
    /// Number of blocks in the path builder staging ring.
    pub path_ring_size: u32,
    /// Number of path flushes that may be in flight at once.
    pub path_dispatch_count: u32,
    /// Maximum number of fill commands in a raster cohort.
    pub raster_fill_capacity: u32,
    pub raster_transform_capacity: u32,
    pub raster_clip_capacity: u32,
    /// Maximum number of rasters in a cohort.
    pub raster_cohort_size: u32,
    pub ttrk_capacity: u32,
    pub ttck_capacity: u32,
    /// Maximum number of placements in a composition.
    pub place_capacity: u32,
    /// Number of released handles batched into one reclaim dispatch.
    pub reclaim_size: u32,
}

static_assertions::const_assert_eq!(size_of::<TargetConfig>(), 64);

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            subgroup_size_log2: 5,
            workgroup_size_log2: 7,
            tile_width_log2: 4,
            tile_height_log2: 4,
            subblock_dwords_log2: 4,
            block_dwords_log2: 8,
            path_ring_size: 256,
            path_dispatch_count: 8,
            raster_fill_capacity: 8192,
            raster_transform_capacity: 1024,
            raster_clip_capacity: 1024,
            raster_cohort_size: 1023,
            ttrk_capacity: 1 << 20,
            ttck_capacity: 1 << 20,
            place_capacity: 8192,
            reclaim_size: 64,
        }
    }
}

impl TargetConfig {
    pub fn subblock_dwords(&self) -> u32 {
        1 << self.subblock_dwords_log2
    }

    pub fn block_dwords(&self) -> u32 {
        1 << self.block_dwords_log2
    }

    /// Log2 of the number of subblocks in a block.
    pub fn subblocks_log2(&self) -> u32 {
        self.block_dwords_log2 - self.subblock_dwords_log2
    }

    pub fn subblocks_per_block(&self) -> u32 {
        1 << self.subblocks_log2()
    }

    pub fn tile_width(&self) -> u32 {
        1 << self.tile_width_log2
    }

    pub fn tile_height(&self) -> u32 {
        1 << self.tile_height_log2
    }

    /// Checks the internal consistency of the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.subblock_dwords_log2 < 4 {
            return Err("subblocks must hold at least 16 dwords");
        }
        if self.block_dwords_log2 < self.subblock_dwords_log2 + 4 {
            return Err("blocks must hold at least 16 subblocks");
        }
        if self.block_dwords_log2 > 16 {
            return Err("blocks are too large");
        }
        if self.tile_height_log2 > self.subblock_dwords_log2 || self.tile_width_log2 == 0 {
            return Err("tile size does not fit a subblock");
        }
        if self.path_ring_size < 2 || self.path_dispatch_count == 0 {
            return Err("path builder ring too small");
        }
        if self.raster_cohort_size == 0 || self.raster_cohort_size >= Ttrk::COHORT_INVALID {
            return Err("raster cohort size out of range");
        }
        let weakref_max = 1 << crate::weakref::INDEX_BITS;
        if self.raster_transform_capacity == 0
            || self.raster_transform_capacity > weakref_max
            || self.raster_clip_capacity == 0
            || self.raster_clip_capacity > weakref_max
        {
            return Err("raster transform or clip capacity out of range");
        }
        if self.raster_fill_capacity == 0 || self.place_capacity == 0 || self.reclaim_size == 0 {
            return Err("zero capacity");
        }
        if self.ttrk_capacity == 0 || self.ttck_capacity == 0 {
            return Err("zero key capacity");
        }
        Ok(())
    }
}

/// Block pool geometry shared by every kernel that touches the pool.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct BlockPoolConfig {
    pub target: TargetConfig,
    /// Number of blocks, a power of two.
    pub block_count: u32,
    pub handle_count: u32,
    pub pad: [u32; 2],
}

static_assertions::const_assert_eq!(size_of::<BlockPoolConfig>() % 16, 0);

impl BlockPoolConfig {
    pub fn new(target: TargetConfig, block_count: u32, handle_count: u32) -> Self {
        debug_assert!(block_count.is_power_of_two());
        Self {
            target,
            block_count,
            handle_count,
            pad: [0; 2],
        }
    }

    pub fn block_mask(&self) -> u32 {
        self.block_count - 1
    }

    /// Total number of dwords in the pool.
    pub fn pool_dwords(&self) -> u64 {
        (self.block_count as u64) << self.target.block_dwords_log2
    }
}

/// Allocation counters of the block pool.
///
/// The ids in `bp_ids[reads & mask .. writes & mask]` are free. Kernels
/// allocate by advancing `reads` and free by advancing `writes`; `failed` is
/// set when an allocation would overtake `writes`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct BlockPoolAtomics {
    pub reads: u32,
    pub writes: u32,
    pub failed: u32,
    pub pad: u32,
}

impl BlockPoolAtomics {
    /// Number of free blocks.
    pub fn available(&self) -> u32 {
        self.writes.wrapping_sub(self.reads)
    }
}

/// Arguments of an indirect dispatch.
#[derive(Copy, Clone, Debug, Default, Zeroable, Pod)]
#[repr(C)]
pub struct IndirectCount {
    pub count_x: u32,
    pub count_y: u32,
    pub count_z: u32,
    pub pad0: u32,
}

impl IndirectCount {
    pub fn new(count_x: u32) -> Self {
        Self {
            count_x,
            count_y: 1,
            count_z: 1,
            pad0: 0,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Zeroable, Pod)]
#[repr(C)]
pub struct PushPathsAlloc {
    /// Slot of the `pc_alloc` table receiving the allocation base.
    pub slot: u32,
    /// Number of ring blocks to allocate.
    pub span: u32,
}

#[derive(Copy, Clone, Debug, Default, Zeroable, Pod)]
#[repr(C)]
pub struct PushPathsCopy {
    pub slot: u32,
    pub span: u32,
    /// First ring block of the span.
    pub head: u32,
    pub ring_size: u32,
}

#[derive(Copy, Clone, Debug, Default, Zeroable, Pod)]
#[repr(C)]
pub struct PushFills {
    pub fill_count: u32,
}

#[derive(Copy, Clone, Debug, Default, Zeroable, Pod)]
#[repr(C)]
pub struct PushRasters {
    pub raster_count: u32,
}

#[derive(Copy, Clone, Debug, Default, Zeroable, Pod)]
#[repr(C)]
pub struct PushPlace {
    pub place_count: u32,
    pub pad: u32,
    /// Clip in tiles: `x0 y0 x1 y1`, exclusive upper bounds.
    pub clip: [i32; 4],
}

#[derive(Copy, Clone, Debug, Default, Zeroable, Pod)]
#[repr(C)]
pub struct PushRender {
    pub surface_width: u32,
    pub surface_height: u32,
    pub layer_count: u32,
    pub pad: u32,
    /// Clip in pixels: `x0 y0 x1 y1`, exclusive upper bounds.
    pub clip: [u32; 4],
}

#[derive(Copy, Clone, Debug, Default, Zeroable, Pod)]
#[repr(C)]
pub struct PushReclaim {
    pub count: u32,
}

#[derive(Copy, Clone, Debug, Default, Zeroable, Pod)]
#[repr(C)]
pub struct PushFillSurface {
    pub surface_width: u32,
    pub surface_height: u32,
    /// Packed RGBA8, red in the low byte.
    pub rgba: u32,
    pub pad: u32,
    /// Rectangle in pixels: `x0 y0 x1 y1`, exclusive upper bounds.
    pub rect: [u32; 4],
}

/// Type safe wrapper for a buffer size that holds `len` elements of `T`.
#[derive(Debug)]
pub struct BufferSize<T: Sized> {
    len: u32,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: Sized> BufferSize<T> {
    /// Creates a new buffer size from number of elements.
    pub const fn new(len: u32) -> Self {
        Self {
            // Each buffer binding must be large enough to hold at least one element to avoid
            // triggering validation errors.
            len: if len > 0 { len } else { 1 },
            _phantom: std::marker::PhantomData,
        }
    }

    /// Creates a new buffer size from size in bytes.
    pub const fn from_size_in_bytes(size: u32) -> Self {
        Self::new(size / size_of::<T>() as u32)
    }

    /// Returns the number of elements.
    #[allow(clippy::len_without_is_empty, reason = "Never empty")]
    pub const fn len(self) -> u32 {
        self.len
    }

    /// Returns the size in bytes.
    pub const fn size_in_bytes(self) -> u32 {
        size_of::<T>() as u32 * self.len
    }
}

impl<T: Sized> Copy for BufferSize<T> {}

impl<T: Sized> Clone for BufferSize<T> {
    fn clone(&self) -> Self {
        *self
    }
}

/// Rounds `len` up to a multiple of `alignment`, a power of two.
pub const fn align_up(len: u32, alignment: u32) -> u32 {
    (len + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::{align_up, BlockPoolAtomics, BufferSize, TargetConfig};

    #[test]
    fn default_config_is_valid() {
        let config = TargetConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.subblocks_per_block(), 16);
        assert_eq!(config.tile_width(), 16);
    }

    #[test]
    fn invalid_configs() {
        let small_block = TargetConfig {
            block_dwords_log2: 6,
            ..Default::default()
        };
        assert!(small_block.validate().is_err());
        let big_cohort = TargetConfig {
            raster_cohort_size: 2047,
            ..Default::default()
        };
        assert!(big_cohort.validate().is_err());
    }

    #[test]
    fn atomics_available_wraps() {
        let atomics = BlockPoolAtomics {
            reads: u32::MAX - 1,
            writes: 2,
            ..Default::default()
        };
        assert_eq!(atomics.available(), 4);
    }

    #[test]
    fn buffer_size() {
        assert_eq!(BufferSize::<u64>::new(0).len(), 1);
        assert_eq!(BufferSize::<u64>::new(3).size_in_bytes(), 24);
        assert_eq!(align_up(17, 16), 32);
    }
}
