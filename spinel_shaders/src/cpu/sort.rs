// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use spinel_encoding::{IndirectCount, PushRasters, RcMeta, TileRange, Ttck, Ttrk};

use super::{CpuBinding, Keys, INVALID};

/// Sorts the keys of a key buffer in ascending order.
pub fn sort_keys(_n_wg: u32, _push: &[u8], resources: &[CpuBinding<'_>]) {
    let mut keys = Keys::bind(&resources[0]);
    let len = keys.len();
    keys.keys[..len].sort_unstable();
}

/// Finds the run of sorted TTRK keys belonging to each raster of a cohort.
pub fn segment_ttrk(_n_wg: u32, push: &[u8], resources: &[CpuBinding<'_>]) {
    let push: PushRasters = bytemuck::pod_read_unaligned(push);
    let keys = Keys::bind(&resources[0]);
    let mut meta = resources[1].as_slice_mut::<RcMeta>();
    let count = push.raster_count as usize;
    meta[..count].fill(RcMeta {
        head: INVALID,
        ..Default::default()
    });
    for (i, &key) in keys.keys().iter().enumerate() {
        let raster = Ttrk(key).cohort() as usize;
        if raster >= count {
            continue;
        }
        let entry = &mut meta[raster];
        if entry.count == 0 {
            entry.reads = i as u32;
        }
        entry.count += 1;
    }
}

/// Splits sorted TTCK keys into runs sharing a tile and sizes the render
/// dispatch to one workgroup per run.
pub fn segment_ttck(_n_wg: u32, _push: &[u8], resources: &[CpuBinding<'_>]) {
    let keys = Keys::bind(&resources[0]);
    let (mut header, mut ranges) = resources[1].as_split_mut::<IndirectCount, TileRange>();
    let keys = keys.keys();
    let mut n = 0;
    let mut start = 0;
    while start < keys.len() && n < ranges.len() {
        let first = Ttck(keys[start]);
        let end = start
            + keys[start..]
                .iter()
                .take_while(|&&k| Ttck(k).tile() == first.tile())
                .count();
        ranges[n] = TileRange {
            x: first.x(),
            y: first.y(),
            offset: start as u32,
            count: (end - start) as u32,
        };
        n += 1;
        start = end;
    }
    *header = IndirectCount::new(n as u32);
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::{segment_ttck, sort_keys};
    use crate::cpu::{CpuBinding, CpuBuffer};
    use spinel_encoding::{BlockId, IndirectCount, KeysHeader, TileRange, Ttck};

    fn key_buffer(keys: &[u64]) -> RefCell<CpuBuffer> {
        let buffer = RefCell::new(CpuBuffer::new(KeysHeader::buffer_size(8) as usize));
        {
            let binding = CpuBinding(&buffer);
            let (mut header, mut slots) = binding.as_split_mut::<KeysHeader, u64>();
            *header = KeysHeader {
                count: keys.len() as u32,
                ..KeysHeader::new(8)
            };
            slots[..keys.len()].copy_from_slice(keys);
        }
        buffer
    }

    #[test]
    fn ranges_follow_tiles() {
        let keys = [
            Ttck::new(BlockId(16), false, 3, 2, 1).0,
            Ttck::new(BlockId(32), true, 1, 2, 1).0,
            Ttck::new(BlockId(48), false, 0, 5, 0).0,
        ];
        let keys = key_buffer(&keys);
        let ranges = RefCell::new(CpuBuffer::new(16 * 4));
        let bindings = [CpuBinding(&keys), CpuBinding(&ranges)];
        sort_keys(1, &[], &bindings[..1]);
        segment_ttck(1, &[], &bindings);
        let binding = CpuBinding(&ranges);
        let (header, ranges) = binding.as_split::<IndirectCount, TileRange>();
        assert_eq!(header.count_x, 2);
        assert_eq!(
            ranges[0],
            TileRange {
                x: 5,
                y: 0,
                offset: 0,
                count: 1
            }
        );
        assert_eq!((ranges[1].x, ranges[1].y, ranges[1].count), (2, 1, 2));
        let sorted = CpuBinding(&keys);
        let (_, sorted) = sorted.as_split::<KeysHeader, u64>();
        assert_eq!(Ttck(sorted[1]).layer(), 1);
    }
}
