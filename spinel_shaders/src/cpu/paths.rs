// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use spinel_encoding::{
    BlockId, PathBlockKind, PathHeader, PushPathsAlloc, PushPathsCopy, TaggedBlockId,
    NODE_LINK_DWORDS,
};

use super::{BlockPool, CpuBinding, INVALID};

pub fn paths_alloc(_n_wg: u32, push: &[u8], resources: &[CpuBinding<'_>]) {
    let push: PushPathsAlloc = bytemuck::pod_read_unaligned(push);
    let mut pool = BlockPool::bind(resources);
    let mut pc_alloc = resources[5].as_slice_mut::<u32>();
    pc_alloc[push.slot as usize] = pool.alloc(push.span).unwrap_or(INVALID);
}

pub fn paths_copy(_n_wg: u32, push: &[u8], resources: &[CpuBinding<'_>]) {
    let push: PushPathsCopy = bytemuck::pod_read_unaligned(push);
    let mut pool = BlockPool::bind(resources);
    let base = resources[5].as_slice::<u32>()[push.slot as usize];
    if base == INVALID {
        return;
    }
    let ring = resources[6].as_slice::<u32>();
    let kinds = resources[7].as_slice::<u32>();
    let bd = pool.block_dwords();
    let sb_log2 = pool.subblocks_log2();
    let sb_mask = pool.subblocks_per_block() - 1;
    let ring_size = push.ring_size;

    // Ring-relative ids name a ring block and a subblock within it. The
    // span was allocated in ring order starting at `head`.
    let translate = |pool: &BlockPool<'_>, id: u32| -> u32 {
        if id == INVALID {
            return INVALID;
        }
        let tagged = TaggedBlockId(id);
        let rel = tagged.id().0;
        let index = ((rel >> sb_log2) + ring_size - push.head) % ring_size;
        let block = pool.id(base.wrapping_add(index));
        TaggedBlockId::new(tagged.tag(), BlockId(block + (rel & sb_mask))).0
    };

    for i in 0..push.span {
        let rb = ((push.head + i) % ring_size) as usize;
        let dst = pool.id(base.wrapping_add(i));
        let mut block = ring[rb * bd..(rb + 1) * bd].to_vec();
        match PathBlockKind::from_u32(kinds[rb]) {
            Some(PathBlockKind::Head) => {
                for dword in &mut block[PathHeader::DWORDS as usize..] {
                    *dword = translate(&pool, *dword);
                }
                if let Some(entry) = pool.host_map.get_mut(block[0] as usize) {
                    *entry = dst;
                }
            }
            Some(PathBlockKind::Node) => {
                for dword in &mut block {
                    *dword = translate(&pool, *dword);
                }
            }
            _ => {}
        }
        pool.block_mut(dst).copy_from_slice(&block);
    }
}

/// Returns the tagged segment group ids of a path, in order.
pub(super) fn path_groups(pool: &BlockPool<'_>, head: u32, header: &PathHeader) -> Vec<u32> {
    let next_offset = pool.block_dwords() - NODE_LINK_DWORDS as usize;
    let count = header.groups as usize;
    let mut groups = Vec::with_capacity(count);
    let mut block = head;
    let mut slot = PathHeader::DWORDS as usize;
    while groups.len() < count {
        if slot == next_offset {
            let link = pool.block(block)[next_offset];
            if link == INVALID {
                break;
            }
            block = TaggedBlockId(link).id().0;
            slot = 0;
            continue;
        }
        groups.push(pool.block(block)[slot]);
        slot += 1;
    }
    groups
}

/// Reads the header of the path whose head block is `head`.
pub(super) fn path_header(pool: &BlockPool<'_>, head: u32) -> PathHeader {
    bytemuck::pod_read_unaligned(bytemuck::cast_slice(
        &pool.block(head)[..PathHeader::DWORDS as usize],
    ))
}
