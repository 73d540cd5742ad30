// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use spinel_encoding::{
    BlockPoolConfig, FillCmd, IndirectCount, PathHeader, PushFills, RastCmd, RasterizeCounts,
    Tag, TaggedBlockId,
};

use super::paths::{path_groups, path_header};
use super::{BlockPool, CpuBinding, INVALID};

const PRIMS: usize = Tag::PRIM_COUNT;

fn fill_header(pool: &BlockPool<'_>, fill: &FillCmd) -> Option<(u32, PathHeader)> {
    let head = *pool.host_map.get(fill.path as usize)?;
    (head != INVALID).then(|| (head, path_header(pool, head)))
}

/// Counts the segments of every fill and assigns each fill a range of
/// rasterize commands per segment type.
pub fn fills_scan(_n_wg: u32, push: &[u8], resources: &[CpuBinding<'_>]) {
    let push: PushFills = bytemuck::pod_read_unaligned(push);
    let pool = BlockPool::bind(resources);
    let fills = resources[5].as_slice::<FillCmd>();
    let mut scan = resources[6].as_slice_mut::<u32>();
    let mut counts = resources[8].as_typed_mut::<RasterizeCounts>();
    let mut totals = [0_u32; PRIMS];
    for (f, fill) in fills[..push.fill_count as usize].iter().enumerate() {
        let prims = fill_header(&pool, fill).map(|(_, h)| h.prims.0).unwrap_or_default();
        for t in 0..PRIMS {
            scan[f * PRIMS + t] = totals[t];
            totals[t] += prims[t];
        }
    }
    let mut base = 0;
    for t in 0..PRIMS {
        counts.counts[t] = totals[t];
        counts.bases[t] = base;
        base += totals[t];
    }
}

/// Emits one rasterize command per segment, grouped by segment type.
pub fn fills_expand(_n_wg: u32, push: &[u8], resources: &[CpuBinding<'_>]) {
    let push: PushFills = bytemuck::pod_read_unaligned(push);
    let pool = BlockPool::bind(resources);
    let fills = resources[5].as_slice::<FillCmd>();
    let scan = resources[6].as_slice::<u32>();
    let mut rast_cmds = resources[7].as_slice_mut::<RastCmd>();
    let counts = *resources[8].as_typed::<RasterizeCounts>();
    let lanes = pool.config.target.subblock_dwords();
    for (f, fill) in fills[..push.fill_count as usize].iter().enumerate() {
        let Some((head, header)) = fill_header(&pool, fill) else {
            continue;
        };
        let mut emitted = [0_u32; PRIMS];
        for group in path_groups(&pool, head, &header) {
            let Some(t) = TaggedBlockId(group).tag().prim_index() else {
                continue;
            };
            let remaining = header.prims.0[t].saturating_sub(emitted[t]);
            for lane in 0..remaining.min(lanes) {
                let index = (counts.bases[t] + scan[f * PRIMS + t] + emitted[t]) as usize;
                if let Some(cmd) = rast_cmds.get_mut(index) {
                    *cmd = RastCmd {
                        fill: f as u32,
                        group,
                        lane,
                        pad: 0,
                    };
                }
                emitted[t] += 1;
            }
        }
    }
}

/// Sizes the indirect dispatch of each rasterize kernel.
pub fn fills_dispatch(_n_wg: u32, _push: &[u8], resources: &[CpuBinding<'_>]) {
    let config = *resources[0].as_typed::<BlockPoolConfig>();
    let wg_size = 1 << config.target.workgroup_size_log2;
    let mut counts = resources[8].as_typed_mut::<RasterizeCounts>();
    for t in 0..PRIMS {
        counts.dispatch[t] = IndirectCount::new(counts.counts[t].div_ceil(wg_size));
    }
}
