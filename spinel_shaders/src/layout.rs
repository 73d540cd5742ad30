// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Declarative interface of every kernel.
//!
//! Each kernel is described once, as a list of descriptor sets and a list of
//! push constant fields. Engines build their pipeline layouts from these
//! tables and [`crate::interface`] emits the matching kernel declarations.

/// How a kernel accesses a bound buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Access {
    /// A small read only buffer bound as uniforms.
    Uniform,
    /// A storage buffer with read only access.
    ReadOnly,
    /// A storage buffer with read/write access.
    ReadWrite,
}

impl Access {
    pub fn is_mutable(self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Binding {
    pub name: &'static str,
    pub access: Access,
    /// Body of the buffer block in the kernel language.
    pub body: &'static str,
}

#[derive(Debug)]
pub struct DescriptorSet {
    pub name: &'static str,
    pub bindings: &'static [Binding],
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Scalar {
    U32,
    I32,
    F32,
}

#[derive(Copy, Clone, Debug)]
pub struct PushField {
    pub name: &'static str,
    pub ty: Scalar,
    /// Array length, 1 for a scalar.
    pub count: u32,
}

#[derive(Debug)]
pub struct KernelLayout {
    pub id: KernelId,
    pub name: &'static str,
    pub sets: &'static [&'static DescriptorSet],
    pub push: &'static [PushField],
}

impl KernelLayout {
    /// Size in bytes of the push constant block.
    pub fn push_size(&self) -> usize {
        self.push.iter().map(|f| 4 * f.count as usize).sum()
    }

    /// Total number of buffers bound by the kernel, in set order.
    pub fn binding_count(&self) -> usize {
        self.sets.iter().map(|s| s.bindings.len()).sum()
    }

    /// Iterates `(set, binding, info)` over every binding.
    pub fn bindings(&self) -> impl Iterator<Item = (u32, u32, &'static Binding)> + '_ {
        self.sets.iter().enumerate().flat_map(|(set, s)| {
            s.bindings
                .iter()
                .enumerate()
                .map(move |(binding, b)| (set as u32, binding as u32, b))
        })
    }
}

const fn rw(name: &'static str, body: &'static str) -> Binding {
    Binding {
        name,
        access: Access::ReadWrite,
        body,
    }
}

const fn ro(name: &'static str, body: &'static str) -> Binding {
    Binding {
        name,
        access: Access::ReadOnly,
        body,
    }
}

const fn uniform(name: &'static str, body: &'static str) -> Binding {
    Binding {
        name,
        access: Access::Uniform,
        body,
    }
}

const fn push_u32(name: &'static str) -> PushField {
    PushField {
        name,
        ty: Scalar::U32,
        count: 1,
    }
}

pub static BLOCK_POOL: DescriptorSet = DescriptorSet {
    name: "block_pool",
    bindings: &[
        uniform("bp_config", "SPN_BLOCK_POOL_CONFIG bp_config;"),
        rw("bp_atomics", "uint bp_atomics[4];"),
        rw("bp_ids", "uint bp_ids[];"),
        rw("bp_blocks", "uint bp_blocks[];"),
        rw("bp_host_map", "uint bp_host_map[];"),
    ],
};

pub static PATHS_COPY: DescriptorSet = DescriptorSet {
    name: "paths_copy",
    bindings: &[
        rw("pc_alloc", "uint pc_alloc[];"),
        ro("pc_ring", "uint pc_ring[];"),
        ro("pc_kinds", "uint pc_kinds[];"),
    ],
};

pub static FILLS: DescriptorSet = DescriptorSet {
    name: "fills",
    bindings: &[
        ro("fill_cmds", "uvec4 fill_cmds[];"),
        rw("fill_scan", "uint fill_scan[];"),
        rw("rast_cmds", "uvec4 rast_cmds[];"),
        rw("rast_counts", "SPN_RASTERIZE_COUNTS rast_counts;"),
    ],
};

pub static RASTERIZE: DescriptorSet = DescriptorSet {
    name: "rasterize",
    bindings: &[
        ro("transforms", "vec4 transforms[];"),
        ro("clips", "vec4 clips[];"),
        rw("rast_cursors", "uint rast_cursors[];"),
    ],
};

pub static KEYS: DescriptorSet = DescriptorSet {
    name: "keys",
    bindings: &[rw("keys", "uint keys_count;\n  uint keys_capacity;\n  uint keys_failed;\n  uint keys_pad;\n  u32vec2 keys[];")],
};

pub static RASTER_COHORT: DescriptorSet = DescriptorSet {
    name: "raster_cohort",
    bindings: &[
        rw("rc_meta", "uvec4 rc_meta[];"),
        ro("rc_handles", "uint rc_handles[];"),
    ],
};

pub static PLACE: DescriptorSet = DescriptorSet {
    name: "place",
    bindings: &[ro("place_cmds", "ivec4 place_cmds[];")],
};

pub static TILE_RANGES: DescriptorSet = DescriptorSet {
    name: "tile_ranges",
    bindings: &[rw("tile_ranges", "uvec4 tile_ranges[];")],
};

pub static STYLING: DescriptorSet = DescriptorSet {
    name: "styling",
    bindings: &[ro("styling", "uint styling[];")],
};

pub static SURFACE: DescriptorSet = DescriptorSet {
    name: "surface",
    bindings: &[rw("surface", "uint surface[];")],
};

pub static RECLAIM: DescriptorSet = DescriptorSet {
    name: "reclaim",
    bindings: &[ro("reclaim", "uint reclaim[];")],
};

const PUSH_FILLS: &[PushField] = &[push_u32("fill_count")];
const PUSH_RASTERS: &[PushField] = &[push_u32("raster_count")];
const PUSH_RECLAIM: &[PushField] = &[push_u32("count")];
const PUSH_CLIP_U32: PushField = PushField {
    name: "clip",
    ty: Scalar::U32,
    count: 4,
};

macro_rules! kernels {
    ($($id:ident => $name:literal, [$($set:ident),*], $push:expr;)*) => {
        /// Identifies a kernel of the pipeline.
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum KernelId {
            $($id,)*
        }

        impl KernelId {
            pub const ALL: &'static [KernelId] = &[$(KernelId::$id,)*];

            pub fn from_u32(value: u32) -> Option<Self> {
                Self::ALL.get(value as usize).copied()
            }

            pub fn layout(self) -> &'static KernelLayout {
                &KERNELS[self as usize]
            }

            pub fn name(self) -> &'static str {
                self.layout().name
            }
        }

        /// Every kernel, indexed by [`KernelId`].
        pub static KERNELS: &[KernelLayout] = &[
            $(KernelLayout {
                id: KernelId::$id,
                name: $name,
                sets: &[$(&$set),*],
                push: $push,
            },)*
        ];
    };
}

kernels! {
    BlockPoolInit => "block_pool_init", [BLOCK_POOL], &[];
    PathsAlloc => "paths_alloc", [BLOCK_POOL, PATHS_COPY], &[push_u32("slot"), push_u32("span")];
    PathsCopy => "paths_copy", [BLOCK_POOL, PATHS_COPY],
        &[push_u32("slot"), push_u32("span"), push_u32("head"), push_u32("ring_size")];
    FillsScan => "fills_scan", [BLOCK_POOL, FILLS], PUSH_FILLS;
    FillsExpand => "fills_expand", [BLOCK_POOL, FILLS], PUSH_FILLS;
    FillsDispatch => "fills_dispatch", [BLOCK_POOL, FILLS], &[];
    RasterizeLine => "rasterize_line", [BLOCK_POOL, FILLS, RASTERIZE, KEYS], &[];
    RasterizeQuad => "rasterize_quad", [BLOCK_POOL, FILLS, RASTERIZE, KEYS], &[];
    RasterizeCubic => "rasterize_cubic", [BLOCK_POOL, FILLS, RASTERIZE, KEYS], &[];
    RasterizeRatQuad => "rasterize_rat_quad", [BLOCK_POOL, FILLS, RASTERIZE, KEYS], &[];
    RasterizeRatCubic => "rasterize_rat_cubic", [BLOCK_POOL, FILLS, RASTERIZE, KEYS], &[];
    SortKeys => "sort_keys", [KEYS], &[];
    SegmentTtrk => "segment_ttrk", [KEYS, RASTER_COHORT], PUSH_RASTERS;
    RastersAlloc => "rasters_alloc", [BLOCK_POOL, RASTER_COHORT], PUSH_RASTERS;
    RastersPrefix => "rasters_prefix", [BLOCK_POOL, KEYS, RASTER_COHORT, RASTERIZE], PUSH_RASTERS;
    Place => "place", [BLOCK_POOL, PLACE, KEYS],
        &[push_u32("place_count"), push_u32("pad"), PushField { name: "clip", ty: Scalar::I32, count: 4 }];
    SegmentTtck => "segment_ttck", [KEYS, TILE_RANGES], &[];
    Render => "render", [BLOCK_POOL, KEYS, TILE_RANGES, STYLING, SURFACE],
        &[push_u32("surface_width"), push_u32("surface_height"), push_u32("layer_count"), push_u32("pad"), PUSH_CLIP_U32];
    PathsReclaim => "paths_reclaim", [BLOCK_POOL, RECLAIM], PUSH_RECLAIM;
    RastersReclaim => "rasters_reclaim", [BLOCK_POOL, RECLAIM], PUSH_RECLAIM;
    FillSurface => "fill_surface", [SURFACE],
        &[push_u32("surface_width"), push_u32("surface_height"), push_u32("rgba"), push_u32("pad"),
          PushField { name: "rect", ty: Scalar::U32, count: 4 }];
}

impl KernelId {
    /// The rasterize kernel for each primitive type, in tag order.
    pub const RASTERIZE: [KernelId; 5] = [
        KernelId::RasterizeLine,
        KernelId::RasterizeQuad,
        KernelId::RasterizeCubic,
        KernelId::RasterizeRatQuad,
        KernelId::RasterizeRatCubic,
    ];
}

#[cfg(test)]
mod tests {
    use super::{Access, KernelId, KERNELS};
    use spinel_encoding::{
        PushFillSurface, PushFills, PushPathsAlloc, PushPathsCopy, PushPlace, PushRasters,
        PushReclaim, PushRender,
    };

    #[test]
    fn table_is_indexed_by_id() {
        for (i, kernel) in KERNELS.iter().enumerate() {
            assert_eq!(kernel.id as usize, i);
            assert_eq!(KernelId::from_u32(i as u32), Some(kernel.id));
        }
        assert_eq!(KernelId::from_u32(KERNELS.len() as u32), None);
    }

    #[test]
    fn push_sizes_match_host_structs() {
        let expected = [
            (KernelId::PathsAlloc, size_of::<PushPathsAlloc>()),
            (KernelId::PathsCopy, size_of::<PushPathsCopy>()),
            (KernelId::FillsScan, size_of::<PushFills>()),
            (KernelId::FillsExpand, size_of::<PushFills>()),
            (KernelId::SegmentTtrk, size_of::<PushRasters>()),
            (KernelId::RastersAlloc, size_of::<PushRasters>()),
            (KernelId::RastersPrefix, size_of::<PushRasters>()),
            (KernelId::Place, size_of::<PushPlace>()),
            (KernelId::Render, size_of::<PushRender>()),
            (KernelId::PathsReclaim, size_of::<PushReclaim>()),
            (KernelId::RastersReclaim, size_of::<PushReclaim>()),
            (KernelId::FillSurface, size_of::<PushFillSurface>()),
            (KernelId::BlockPoolInit, 0),
            (KernelId::SortKeys, 0),
        ];
        for (id, size) in expected {
            assert_eq!(id.layout().push_size(), size, "{}", id.name());
        }
    }

    #[test]
    fn rasterize_kernels_share_bindings() {
        let first = KernelId::RASTERIZE[0].layout();
        for id in KernelId::RASTERIZE {
            let layout = id.layout();
            assert_eq!(layout.binding_count(), first.binding_count());
            assert!(layout
                .bindings()
                .zip(first.bindings())
                .all(|(a, b)| a.0 == b.0 && a.1 == b.1 && a.2.name == b.2.name));
        }
        let (set, binding, bp_config) = first.bindings().next().unwrap();
        assert_eq!((set, binding, bp_config.access), (0, 0, Access::Uniform));
    }
}
