// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Support for CPU implementations of the kernels.
//!
//! Each kernel follows the device contract of its GPU counterpart: it reads
//! and writes the same buffers, with the same layouts, in the order given
//! by [`crate::layout`]. Work is done serially and the workgroup count is
//! only used where a kernel would derive its extent from it.

// Allow un-idiomatic Rust to more closely match shaders
#![allow(
    clippy::needless_range_loop,
    reason = "Keeps code easily comparable to GPU shaders"
)]

mod block_pool;
mod fills;
mod paths;
mod place;
mod rasterize;
mod rasters;
mod render;
mod sort;

pub use block_pool::{block_pool_init, paths_reclaim, rasters_reclaim};
pub use fills::{fills_dispatch, fills_expand, fills_scan};
pub use paths::{paths_alloc, paths_copy};
pub use place::place;
pub use rasterize::{
    rasterize_cubic, rasterize_line, rasterize_quad, rasterize_rat_cubic, rasterize_rat_quad,
};
pub use rasters::{rasters_alloc, rasters_prefix};
pub use render::{fill_surface, render};
pub use sort::{segment_ttck, segment_ttrk, sort_keys};

use std::cell::{Ref, RefCell, RefMut};

use bytemuck::Pod;
use spinel_encoding::{BlockPoolAtomics, BlockPoolConfig, KeysHeader, TaggedBlockId};

use crate::KernelId;

/// Host memory standing in for a device buffer.
///
/// The backing store is 8-byte aligned so every key and header layout can
/// be viewed in place.
#[derive(Clone, Debug, Default)]
pub struct CpuBuffer {
    words: Vec<u64>,
    len: usize,
}

impl CpuBuffer {
    /// Creates a zeroed buffer of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(8)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.words)[..self.len]
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut(&mut self.words)[..self.len]
    }
}

fn prefix<T: Pod>(bytes: &[u8]) -> &[u8] {
    &bytes[..bytes.len() / size_of::<T>() * size_of::<T>()]
}

fn prefix_mut<T: Pod>(bytes: &mut [u8]) -> &mut [u8] {
    let len = bytes.len() / size_of::<T>() * size_of::<T>();
    &mut bytes[..len]
}

/// A buffer bound to a CPU kernel.
#[derive(Clone, Copy)]
pub struct CpuBinding<'a>(pub &'a RefCell<CpuBuffer>);

impl CpuBinding<'_> {
    /// Views the start of the buffer as a `T`.
    pub fn as_typed<T: Pod>(&self) -> Ref<'_, T> {
        Ref::map(self.0.borrow(), |buf| {
            bytemuck::from_bytes(&buf.bytes()[..size_of::<T>()])
        })
    }

    pub fn as_typed_mut<T: Pod>(&self) -> RefMut<'_, T> {
        RefMut::map(self.0.borrow_mut(), |buf| {
            bytemuck::from_bytes_mut(&mut buf.bytes_mut()[..size_of::<T>()])
        })
    }

    pub fn as_slice<T: Pod>(&self) -> Ref<'_, [T]> {
        Ref::map(self.0.borrow(), |buf| bytemuck::cast_slice(prefix::<T>(buf.bytes())))
    }

    pub fn as_slice_mut<T: Pod>(&self) -> RefMut<'_, [T]> {
        RefMut::map(self.0.borrow_mut(), |buf| {
            bytemuck::cast_slice_mut(prefix_mut::<T>(buf.bytes_mut()))
        })
    }

    /// Views the buffer as a header `H` followed by an array of `T`.
    pub fn as_split_mut<H: Pod, T: Pod>(&self) -> (RefMut<'_, H>, RefMut<'_, [T]>) {
        RefMut::map_split(self.0.borrow_mut(), |buf| {
            let (head, tail) = buf.bytes_mut().split_at_mut(size_of::<H>());
            (
                bytemuck::from_bytes_mut(head),
                bytemuck::cast_slice_mut(prefix_mut::<T>(tail)),
            )
        })
    }

    pub fn as_split<H: Pod, T: Pod>(&self) -> (Ref<'_, H>, Ref<'_, [T]>) {
        Ref::map_split(self.0.borrow(), |buf| {
            let (head, tail) = buf.bytes().split_at(size_of::<H>());
            (
                bytemuck::from_bytes(head),
                bytemuck::cast_slice(prefix::<T>(tail)),
            )
        })
    }
}

/// Signature shared by every CPU kernel.
pub type CpuKernel = fn(n_wg: u32, push: &[u8], resources: &[CpuBinding<'_>]);

/// Returns the CPU implementation of `id`.
pub fn kernel(id: KernelId) -> CpuKernel {
    match id {
        KernelId::BlockPoolInit => block_pool_init,
        KernelId::PathsAlloc => paths_alloc,
        KernelId::PathsCopy => paths_copy,
        KernelId::FillsScan => fills_scan,
        KernelId::FillsExpand => fills_expand,
        KernelId::FillsDispatch => fills_dispatch,
        KernelId::RasterizeLine => rasterize_line,
        KernelId::RasterizeQuad => rasterize_quad,
        KernelId::RasterizeCubic => rasterize_cubic,
        KernelId::RasterizeRatQuad => rasterize_rat_quad,
        KernelId::RasterizeRatCubic => rasterize_rat_cubic,
        KernelId::SortKeys => sort_keys,
        KernelId::SegmentTtrk => segment_ttrk,
        KernelId::RastersAlloc => rasters_alloc,
        KernelId::RastersPrefix => rasters_prefix,
        KernelId::Place => place,
        KernelId::SegmentTtck => segment_ttck,
        KernelId::Render => render,
        KernelId::PathsReclaim => paths_reclaim,
        KernelId::RastersReclaim => rasters_reclaim,
        KernelId::FillSurface => fill_surface,
    }
}

// Common internal definitions

const INVALID: u32 = u32::MAX;

/// The block pool descriptor set, bound as the first five resources.
struct BlockPool<'a> {
    config: BlockPoolConfig,
    atomics: RefMut<'a, BlockPoolAtomics>,
    ids: RefMut<'a, [u32]>,
    blocks: RefMut<'a, [u32]>,
    host_map: RefMut<'a, [u32]>,
}

impl<'a> BlockPool<'a> {
    fn bind(resources: &'a [CpuBinding<'_>]) -> Self {
        Self {
            config: *resources[0].as_typed(),
            atomics: resources[1].as_typed_mut(),
            ids: resources[2].as_slice_mut(),
            blocks: resources[3].as_slice_mut(),
            host_map: resources[4].as_slice_mut(),
        }
    }

    fn subblocks_log2(&self) -> u32 {
        self.config.target.subblocks_log2()
    }

    fn subblocks_per_block(&self) -> u32 {
        self.config.target.subblocks_per_block()
    }

    fn block_dwords(&self) -> usize {
        self.config.target.block_dwords() as usize
    }

    /// Dword offset of a subblock id.
    fn offset(&self, id: u32) -> usize {
        (id as usize) << self.config.target.subblock_dwords_log2
    }

    fn is_block_aligned(&self, id: u32) -> bool {
        id & (self.subblocks_per_block() - 1) == 0
    }

    /// Reserves `k` entries of the id ring and returns the first index.
    ///
    /// Sets `failed` and returns `None` when fewer than `k` ids are free.
    fn alloc(&mut self, k: u32) -> Option<u32> {
        let base = self.atomics.reads;
        self.atomics.reads = base.wrapping_add(k);
        if self.atomics.failed != 0 || self.atomics.writes.wrapping_sub(base) < k {
            self.atomics.failed = 1;
            return None;
        }
        Some(base)
    }

    /// The id at `index` of the id ring.
    fn id(&self, index: u32) -> u32 {
        self.ids[(index & self.config.block_mask()) as usize]
    }

    fn alloc_block(&mut self) -> Option<u32> {
        let base = self.alloc(1)?;
        Some(self.id(base))
    }

    /// Carves the next subblock from the block a cursor points into.
    ///
    /// A block-aligned cursor, including a cleared one, has no room left and
    /// moves to a freshly allocated block.
    fn alloc_subblock(&mut self, cursor: &mut u32) -> Option<u32> {
        if self.is_block_aligned(*cursor) {
            *cursor = self.alloc_block()?;
        }
        let id = *cursor;
        *cursor += 1;
        Some(id)
    }

    fn free(&mut self, id: u32) {
        let index = self.atomics.writes & self.config.block_mask();
        self.ids[index as usize] = id;
        self.atomics.writes = self.atomics.writes.wrapping_add(1);
    }

    fn block(&self, id: u32) -> &[u32] {
        let offset = self.offset(id);
        &self.blocks[offset..offset + self.block_dwords()]
    }

    fn block_mut(&mut self, id: u32) -> &mut [u32] {
        let offset = self.offset(id);
        let len = self.block_dwords();
        &mut self.blocks[offset..offset + len]
    }

    fn subblock(&self, id: u32) -> &[u32] {
        let offset = self.offset(id);
        &self.blocks[offset..offset + self.config.target.subblock_dwords() as usize]
    }

    fn subblock_mut(&mut self, id: u32) -> &mut [u32] {
        let offset = self.offset(id);
        let len = self.config.target.subblock_dwords() as usize;
        &mut self.blocks[offset..offset + len]
    }

    /// Follows the chain of a head block and returns every node block id.
    fn nodes(&self, head: u32) -> Vec<u32> {
        let next_offset = self.block_dwords() - spinel_encoding::NODE_LINK_DWORDS as usize;
        let mut nodes = Vec::new();
        let mut link = self.block(head)[next_offset];
        while link != INVALID {
            let node = TaggedBlockId(link).id().0;
            nodes.push(node);
            link = self.block(node)[next_offset];
        }
        nodes
    }
}

/// A key buffer: a [`KeysHeader`] followed by 64-bit keys.
struct Keys<'a> {
    header: RefMut<'a, KeysHeader>,
    keys: RefMut<'a, [u64]>,
}

impl<'a> Keys<'a> {
    fn bind(binding: &'a CpuBinding<'_>) -> Self {
        let (header, keys) = binding.as_split_mut();
        Self { header, keys }
    }

    fn len(&self) -> usize {
        (self.header.count.min(self.header.capacity) as usize).min(self.keys.len())
    }

    fn keys(&self) -> &[u64] {
        &self.keys[..self.len()]
    }

    /// Appends a key, or sets `failed` when the buffer is full.
    fn push(&mut self, key: u64) {
        let index = self.header.count;
        if index >= self.header.capacity || index as usize >= self.keys.len() {
            self.header.failed = 1;
            return;
        }
        self.keys[index as usize] = key;
        self.header.count += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::{CpuBinding, CpuBuffer, Keys};
    use spinel_encoding::KeysHeader;

    #[test]
    fn buffer_views() {
        let buffer = RefCell::new(CpuBuffer::new(13));
        let binding = CpuBinding(&buffer);
        assert_eq!(binding.as_slice::<u32>().len(), 3);
        binding.as_slice_mut::<u32>()[2] = 7;
        assert_eq!(buffer.borrow().bytes()[8], 7);
        assert_eq!(buffer.borrow().len(), 13);
    }

    #[test]
    fn keys_respect_capacity() {
        let buffer = RefCell::new(CpuBuffer::new(KeysHeader::buffer_size(2) as usize));
        let binding = CpuBinding(&buffer);
        *binding.as_typed_mut::<KeysHeader>() = KeysHeader::new(2);
        {
            let mut keys = Keys::bind(&binding);
            keys.push(3);
            keys.push(1);
            keys.push(2);
            assert_eq!(keys.keys(), &[3, 1]);
        }
        let header = *binding.as_typed::<KeysHeader>();
        assert_eq!((header.count, header.failed), (2, 1));
    }
}
