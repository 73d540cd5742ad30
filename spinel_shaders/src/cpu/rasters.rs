// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use spinel_encoding::{
    BlockId, PushRasters, RasterHeader, RcMeta, Tag, TaggedBlockId, Ttrk, Ttxk,
    NODE_LINK_DWORDS,
};

use super::{BlockPool, CpuBinding, Keys, INVALID};

/// Allocates the head block of every raster in the cohort and maps its
/// handle to it.
pub fn rasters_alloc(_n_wg: u32, push: &[u8], resources: &[CpuBinding<'_>]) {
    let push: PushRasters = bytemuck::pod_read_unaligned(push);
    let mut pool = BlockPool::bind(resources);
    let mut meta = resources[5].as_slice_mut::<RcMeta>();
    let handles = resources[6].as_slice::<u32>();
    for r in 0..push.raster_count as usize {
        let Some(head) = pool.alloc_block() else {
            return;
        };
        meta[r].head = head;
        meta[r].blocks = 1;
        if let Some(entry) = pool.host_map.get_mut(handles[r] as usize) {
            *entry = head;
        }
    }
}

/// Signed crossing of a line with the pixel row centre `yc`: `1` going
/// down, `-1` going up, `0` when `yc` is outside its half-open y span.
pub(super) fn row_crossing(y0: f32, y1: f32, yc: f32) -> i32 {
    if y0 <= yc && yc < y1 {
        1
    } else if y1 <= yc && yc < y0 {
        -1
    } else {
        0
    }
}

/// Builds the TTPK keys of one raster from its sorted TTRK keys.
///
/// Walking each tile row from the left, the backdrop of every pixel row is
/// the sum of the crossings of all pieces in the tiles already passed. A
/// segment tile entered with a nonzero backdrop gets a span-1 key, and a
/// run of empty tiles between two segment tiles gets one key spanning it.
/// Whatever backdrop remains after the last segment tile of a row is
/// dropped.
fn prefix_keys(pool: &mut BlockPool<'_>, cursor: &mut u32, ttrks: &[u64]) -> Vec<u64> {
    let rows = pool.config.target.tile_height() as usize;
    let mut ttpks = Vec::new();
    let mut emit = |pool: &mut BlockPool<'_>, backdrop: &[i32], x: u32, y: u32, span: u32| {
        let Some(id) = pool.alloc_subblock(cursor) else {
            return;
        };
        for (dst, &b) in pool.subblock_mut(id).iter_mut().zip(backdrop) {
            *dst = b as u32;
        }
        ttpks.push(Ttxk::ttpk(BlockId(id), x, y, span).0);
    };
    let mut i = 0;
    while i < ttrks.len() {
        let y = Ttrk(ttrks[i]).y();
        let mut backdrop = vec![0_i32; rows];
        let mut prev_x: Option<u32> = None;
        while i < ttrks.len() && Ttrk(ttrks[i]).y() == y {
            let x = Ttrk(ttrks[i]).x();
            let nonzero = backdrop.iter().any(|&b| b != 0);
            if nonzero {
                if let Some(px) = prev_x {
                    let mut gap = px + 1;
                    while gap < x {
                        let span = (x - gap).min(Ttxk::SPAN_MAX);
                        emit(pool, &backdrop, gap, y, span);
                        gap += span;
                    }
                }
                emit(pool, &backdrop, x, y, 1);
            }
            while i < ttrks.len() && Ttrk(ttrks[i]).y() == y && Ttrk(ttrks[i]).x() == x {
                let piece = pool.subblock(Ttrk(ttrks[i]).ttsb().0);
                let (y0, y1) = (f32::from_bits(piece[1]), f32::from_bits(piece[3]));
                for (row, b) in backdrop.iter_mut().enumerate() {
                    *b += row_crossing(y0, y1, row as f32 + 0.5);
                }
                i += 1;
            }
            prev_x = Some(x);
        }
    }
    ttpks
}

/// Writes the TTSK and TTPK keys of every raster of the cohort into its
/// head and node blocks.
pub fn rasters_prefix(_n_wg: u32, push: &[u8], resources: &[CpuBinding<'_>]) {
    let push: PushRasters = bytemuck::pod_read_unaligned(push);
    let mut pool = BlockPool::bind(resources);
    let keys = Keys::bind(&resources[5]);
    let mut meta = resources[6].as_slice_mut::<RcMeta>();
    let handles = resources[7].as_slice::<u32>();
    let mut cursors = resources[10].as_slice_mut::<u32>();
    let bd = pool.block_dwords();
    let next_offset = bd - NODE_LINK_DWORDS as usize;
    for r in 0..push.raster_count as usize {
        let m = meta[r];
        if m.head == INVALID {
            continue;
        }
        let ttrks = &keys.keys()[m.reads as usize..(m.reads + m.count) as usize];
        let ttsks: Vec<u64> = ttrks
            .iter()
            .map(|&k| {
                let k = Ttrk(k);
                Ttxk::ttsk(k.ttsb(), k.x(), k.y()).0
            })
            .collect();
        let ttpks = prefix_keys(&mut pool, &mut cursors[r], ttrks);

        let mut header = RasterHeader {
            handle: handles[r],
            ttsks: ttsks.len() as u32,
            ttpks: ttpks.len() as u32,
            ..Default::default()
        };
        let all: Vec<u64> = ttsks.into_iter().chain(ttpks).collect();
        if let Some(first) = all.first().map(|&k| Ttxk(k)) {
            let mut bounds = [first.x() as i32, first.y() as i32, 0, 0];
            for key in all.iter().map(|&k| Ttxk(k)) {
                let span = if key.is_prefix() { key.span() } else { 1 };
                bounds[0] = bounds[0].min(key.x() as i32);
                bounds[1] = bounds[1].min(key.y() as i32);
                bounds[2] = bounds[2].max((key.x() + span) as i32);
                bounds[3] = bounds[3].max(key.y() as i32 + 1);
            }
            header.bounds = bounds;
        }
        header.ttsb_blocks = all
            .iter()
            .filter(|&&k| pool.is_block_aligned(Ttxk(k).id().0))
            .count() as u32;

        let mut blocks = vec![m.head];
        for _ in 1..RasterHeader::blocks_for_keys(bd as u32, all.len() as u32) {
            let Some(node) = pool.alloc_block() else {
                return;
            };
            blocks.push(node);
        }
        header.blocks = blocks.len() as u32;
        header.nodes = header.blocks - 1;
        meta[r].blocks = header.blocks;

        let mut keys_left = all.as_slice();
        for (b, &block) in blocks.iter().enumerate() {
            let next = blocks.get(b + 1).map_or(INVALID, |&node| {
                TaggedBlockId::new(Tag::Next, BlockId(node)).0
            });
            let dwords = pool.block_mut(block);
            dwords.fill(INVALID);
            let start = if b == 0 {
                dwords[..RasterHeader::DWORDS as usize]
                    .copy_from_slice(bytemuck::cast_slice(std::slice::from_ref(&header)));
                RasterHeader::DWORDS as usize
            } else {
                0
            };
            let slots = (next_offset - start) / 2;
            let (now, later) = keys_left.split_at(slots.min(keys_left.len()));
            for (k, &key) in now.iter().enumerate() {
                dwords[start + 2 * k] = key as u32;
                dwords[start + 2 * k + 1] = (key >> 32) as u32;
            }
            keys_left = later;
            dwords[next_offset] = next;
        }
    }
}

/// Reads the header of the raster whose head block is `head`.
pub(super) fn raster_header(pool: &BlockPool<'_>, head: u32) -> RasterHeader {
    bytemuck::pod_read_unaligned(bytemuck::cast_slice(
        &pool.block(head)[..RasterHeader::DWORDS as usize],
    ))
}

/// Returns the TTSK then TTPK keys of a raster.
pub(super) fn raster_keys(pool: &BlockPool<'_>, head: u32, header: &RasterHeader) -> Vec<u64> {
    let next_offset = pool.block_dwords() - NODE_LINK_DWORDS as usize;
    let count = header.keys() as usize;
    let mut keys = Vec::with_capacity(count);
    let mut block = head;
    let mut slot = RasterHeader::DWORDS as usize;
    while keys.len() < count {
        if slot + 2 > next_offset {
            let link = pool.block(block)[next_offset];
            if link == INVALID {
                break;
            }
            block = TaggedBlockId(link).id().0;
            slot = 0;
            continue;
        }
        let dwords = pool.block(block);
        keys.push(dwords[slot] as u64 | (dwords[slot + 1] as u64) << 32);
        slot += 2;
    }
    keys
}
