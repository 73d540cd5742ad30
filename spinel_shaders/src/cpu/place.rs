// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use spinel_encoding::{PlaceCmd, PushPlace, Ttck, Ttxk};

use super::rasters::{raster_header, raster_keys};
use super::{BlockPool, CpuBinding, Keys, INVALID};

/// Translates the keys of every placed raster into composition keys.
///
/// Prefix keys expand to one composition key per spanned tile. Keys that
/// land outside the clip, or outside the tile range of a composition key,
/// are dropped.
pub fn place(_n_wg: u32, push: &[u8], resources: &[CpuBinding<'_>]) {
    let push: PushPlace = bytemuck::pod_read_unaligned(push);
    let pool = BlockPool::bind(resources);
    let cmds = resources[5].as_slice::<PlaceCmd>();
    let mut ttcks = Keys::bind(&resources[6]);
    let x0 = push.clip[0].max(0);
    let y0 = push.clip[1].max(0);
    let x1 = push.clip[2].min(Ttck::TILE_X_MAX as i32 + 1);
    let y1 = push.clip[3].min(Ttck::TILE_Y_MAX as i32 + 1);
    for cmd in &cmds[..push.place_count as usize] {
        let head = pool.host_map.get(cmd.raster as usize).copied().unwrap_or(INVALID);
        if head == INVALID || cmd.layer > Ttck::LAYER_MAX {
            continue;
        }
        let header = raster_header(&pool, head);
        for key in raster_keys(&pool, head, &header).into_iter().map(Ttxk) {
            let y = key.y() as i32 + cmd.ty;
            if y < y0 || y >= y1 {
                continue;
            }
            let span = if key.is_prefix() { key.span() } else { 1 };
            for s in 0..span {
                let x = (key.x() + s) as i32 + cmd.tx;
                if x < x0 || x >= x1 {
                    continue;
                }
                let ttck = Ttck::new(key.id(), key.is_prefix(), cmd.layer, x as u32, y as u32);
                ttcks.push(ttck.0);
            }
        }
    }
}
