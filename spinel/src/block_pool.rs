// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use spinel_encoding::{BlockPoolAtomics, BlockPoolConfig};
use spinel_shaders::KernelId;

use crate::engine::Kernels;
use crate::recording::{Bindings, BufferProxy, Recording};

/// Host side of the device block pool.
///
/// Owns the proxies of the pool's descriptor set. Every kernel that
/// allocates, reads or frees blocks binds them first, in this order.
#[derive(Debug)]
pub(crate) struct BlockPool {
    pub(crate) config: BlockPoolConfig,
    config_buf: BufferProxy,
    pub(crate) atomics: BufferProxy,
    ids: BufferProxy,
    pub(crate) blocks: BufferProxy,
    pub(crate) host_map: BufferProxy,
}

impl BlockPool {
    pub(crate) fn new(config: BlockPoolConfig) -> Self {
        Self {
            config,
            config_buf: BufferProxy::new(size_of::<BlockPoolConfig>() as u64, "bp_config"),
            atomics: BufferProxy::new(size_of::<BlockPoolAtomics>() as u64, "bp_atomics"),
            ids: BufferProxy::new(config.block_count as u64 * 4, "bp_ids"),
            blocks: BufferProxy::new(config.pool_dwords() * 4, "bp_blocks"),
            host_map: BufferProxy::new(config.handle_count as u64 * 4, "bp_host_map"),
        }
    }

    /// The pool's descriptor set.
    pub(crate) fn bindings(&self) -> Bindings {
        Bindings::from_slice(&[
            self.config_buf,
            self.atomics,
            self.ids,
            self.blocks,
            self.host_map,
        ])
    }

    /// The pool's descriptor set followed by `rest`.
    pub(crate) fn bindings_with(&self, rest: &[BufferProxy]) -> Bindings {
        let mut bindings = self.bindings();
        bindings.extend_from_slice(rest);
        bindings
    }

    /// Records the upload of the pool geometry and the kernel that fills
    /// the id ring with every block.
    pub(crate) fn init(&self, recording: &mut Recording, kernels: &Kernels) {
        recording.write(self.config_buf, 0, bytemuck::bytes_of(&self.config));
        recording.dispatch(
            kernels.get(KernelId::BlockPoolInit),
            self.wg_count(self.config.block_count),
            &(),
            self.bindings(),
        );
    }

    /// Byte offset of the first dword of a subblock id.
    pub(crate) fn offset(&self, id: u32) -> u64 {
        ((id as u64) << self.config.target.subblock_dwords_log2) * 4
    }

    /// Workgroups covering `items` invocations, at least one.
    pub(crate) fn wg_count(&self, items: u32) -> u32 {
        items
            .div_ceil(1 << self.config.target.workgroup_size_log2)
            .max(1)
    }
}
