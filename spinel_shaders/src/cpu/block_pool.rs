// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use spinel_encoding::{PushReclaim, TaggedBlockId, Ttxk};

use super::paths::{path_groups, path_header};
use super::rasters::{raster_header, raster_keys};
use super::{BlockPool, CpuBinding, INVALID};

pub fn block_pool_init(_n_wg: u32, _push: &[u8], resources: &[CpuBinding<'_>]) {
    let mut pool = BlockPool::bind(resources);
    let sb_log2 = pool.subblocks_log2();
    let count = pool.config.block_count;
    for i in 0..count {
        pool.ids[i as usize] = i << sb_log2;
    }
    pool.atomics.reads = 0;
    pool.atomics.writes = count;
    pool.atomics.failed = 0;
    pool.host_map.fill(INVALID);
}

fn reclaim_handles(push: &[u8], resources: &[CpuBinding<'_>]) -> Vec<u32> {
    let push: PushReclaim = bytemuck::pod_read_unaligned(push);
    let reclaim = resources[5].as_slice::<u32>();
    reclaim[..push.count as usize].to_vec()
}

/// Returns the head block of `handle` and unmaps it.
fn take_head(pool: &mut BlockPool<'_>, handle: u32) -> Option<u32> {
    let slot = pool.host_map.get_mut(handle as usize)?;
    let head = std::mem::replace(slot, INVALID);
    (head != INVALID).then_some(head)
}

pub fn paths_reclaim(_n_wg: u32, push: &[u8], resources: &[CpuBinding<'_>]) {
    let handles = reclaim_handles(push, resources);
    let mut pool = BlockPool::bind(resources);
    for handle in handles {
        let Some(head) = take_head(&mut pool, handle) else {
            continue;
        };
        let header = path_header(&pool, head);
        let mut owned: Vec<u32> = path_groups(&pool, head, &header)
            .into_iter()
            .map(|group| TaggedBlockId(group).id().0)
            .filter(|&id| pool.is_block_aligned(id))
            .collect();
        owned.extend(pool.nodes(head));
        owned.push(head);
        for id in owned {
            pool.free(id);
        }
    }
}

pub fn rasters_reclaim(_n_wg: u32, push: &[u8], resources: &[CpuBinding<'_>]) {
    let handles = reclaim_handles(push, resources);
    let mut pool = BlockPool::bind(resources);
    for handle in handles {
        let Some(head) = take_head(&mut pool, handle) else {
            continue;
        };
        let header = raster_header(&pool, head);
        let mut owned: Vec<u32> = raster_keys(&pool, head, &header)
            .into_iter()
            .map(|key| Ttxk(key).id().0)
            .filter(|&id| pool.is_block_aligned(id))
            .collect();
        owned.extend(pool.nodes(head));
        owned.push(head);
        for id in owned {
            pool.free(id);
        }
    }
}
