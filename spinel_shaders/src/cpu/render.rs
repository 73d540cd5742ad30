// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tile rendering.
//!
//! Each tile range is rendered independently. Layers are visited front to
//! back; before the commands of a layer run, the group stack is brought in
//! line with the layer's group chain by running the leave commands of the
//! groups that no longer apply and the enter commands of the new ones.

use spinel_encoding::styling::{
    cmds_get_base, cmds_get_count, decode_color, group, Opcode, LAYER_DWORDS, PARENT_NONE,
};
use spinel_encoding::{IndirectCount, PushFillSurface, PushRender, TileRange, Ttck};

use super::rasters::row_crossing;
use super::{BlockPool, CpuBinding, Keys};

type Rgba = [f32; 4];

fn premultiply([r, g, b, a]: Rgba) -> Rgba {
    [r * a, g * a, b * a, a]
}

/// Packs a color as RGBA8 with red in the low byte.
pub fn pack_rgba8(color: Rgba) -> u32 {
    color
        .iter()
        .enumerate()
        .map(|(i, &c)| ((c.clamp(0.0, 1.0) * 255.0 + 0.5) as u32) << (8 * i))
        .sum()
}

/// Per-pixel registers of one tile.
struct Tile {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    winding: Vec<i32>,
    cover_wip: Vec<f32>,
    cover_acc: Vec<f32>,
    cover_mask: Vec<f32>,
    color_wip: Vec<Rgba>,
    color_acc: Vec<Rgba>,
}

/// Destination of `ColorAccStoreToSurface`.
struct Surface<'a> {
    pixels: &'a mut [u32],
    width: u32,
    height: u32,
    clip: [u32; 4],
}

impl Tile {
    fn new(range: &TileRange, width: u32, height: u32) -> Self {
        let n = (width * height) as usize;
        Self {
            x: range.x,
            y: range.y,
            width,
            height,
            winding: vec![0; n],
            cover_wip: vec![0.0; n],
            cover_acc: vec![0.0; n],
            cover_mask: vec![1.0; n],
            color_wip: vec![[0.0; 4]; n],
            color_acc: vec![[0.0; 4]; n],
        }
    }

    /// Adds the backdrop of a TTPB subblock to every pixel row.
    fn add_prefix(&mut self, rows: &[u32]) {
        for (i, w) in self.winding.iter_mut().enumerate() {
            *w += rows[i / self.width as usize] as i32;
        }
    }

    /// Adds the crossings of a TTSB piece lying left of each pixel centre.
    fn add_piece(&mut self, piece: &[u32]) {
        let [x0, y0, x1, y1] = [0, 1, 2, 3].map(|i| f32::from_bits(piece[i]));
        for py in 0..self.height {
            let yc = py as f32 + 0.5;
            let dir = row_crossing(y0, y1, yc);
            if dir == 0 {
                continue;
            }
            let xi = x0 + (yc - y0) * (x1 - x0) / (y1 - y0);
            for px in 0..self.width {
                if xi < px as f32 + 0.5 {
                    self.winding[(py * self.width + px) as usize] += dir;
                }
            }
        }
    }

    /// Runs a command span. Returns true when an opacity test found every
    /// pixel opaque.
    fn execute(&mut self, styling: &[u32], cmds: u32, surface: &mut Surface<'_>) -> bool {
        let base = cmds_get_base(cmds) as usize;
        let end = (base + cmds_get_count(cmds) as usize).min(styling.len());
        let mut pc = base;
        while pc < end {
            let Some(op) = Opcode::from_u32(styling[pc]) else {
                return false;
            };
            pc += 1;
            let operand = |pc: usize| -> Rgba {
                let dwords = [0, 1].map(|i| styling.get(pc + i).copied().unwrap_or(0));
                premultiply(decode_color(dwords))
            };
            match op {
                Opcode::Noop => {}
                Opcode::CoverNonzero => {
                    for (c, w) in self.cover_wip.iter_mut().zip(&self.winding) {
                        *c = w.unsigned_abs().min(1) as f32;
                    }
                }
                Opcode::CoverEvenodd => {
                    for (c, w) in self.cover_wip.iter_mut().zip(&self.winding) {
                        *c = (w.unsigned_abs() % 2) as f32;
                    }
                }
                Opcode::CoverAccumulate => {
                    for (acc, wip) in self.cover_acc.iter_mut().zip(&self.cover_wip) {
                        *acc += wip * (1.0 - *acc);
                    }
                }
                Opcode::CoverMask => {
                    for (wip, mask) in self.cover_wip.iter_mut().zip(&self.cover_mask) {
                        *wip *= mask;
                    }
                }
                Opcode::CoverWipZero => self.cover_wip.fill(0.0),
                Opcode::CoverAccZero => self.cover_acc.fill(0.0),
                Opcode::CoverMaskZero => self.cover_mask.fill(0.0),
                Opcode::CoverMaskOne => self.cover_mask.fill(1.0),
                Opcode::CoverMaskInvert => {
                    for mask in &mut self.cover_mask {
                        *mask = 1.0 - *mask;
                    }
                }
                Opcode::ColorFillSolid => self.color_wip.fill(operand(pc)),
                Opcode::ColorWipZero => self.color_wip.fill([0.0; 4]),
                Opcode::ColorAccZero => self.color_acc.fill([0.0; 4]),
                Opcode::BlendOver => {
                    for i in 0..self.color_acc.len() {
                        let s = self.cover_wip[i] * (1.0 - self.color_acc[i][3]);
                        for c in 0..4 {
                            self.color_acc[i][c] += self.color_wip[i][c] * s;
                        }
                    }
                }
                Opcode::BlendPlus => {
                    for i in 0..self.color_acc.len() {
                        for c in 0..4 {
                            let s = self.color_wip[i][c] * self.cover_wip[i];
                            self.color_acc[i][c] = (self.color_acc[i][c] + s).min(1.0);
                        }
                    }
                }
                Opcode::BlendMultiply => {
                    for i in 0..self.color_acc.len() {
                        let s = self.color_wip[i].map(|c| c * self.cover_wip[i]);
                        for c in 0..4 {
                            self.color_acc[i][c] *= s[c] + (1.0 - s[3]);
                        }
                    }
                }
                Opcode::BlendKnockout => {
                    for i in 0..self.color_acc.len() {
                        let s = self.cover_wip[i] * (1.0 - self.cover_acc[i]);
                        for c in 0..4 {
                            self.color_acc[i][c] += self.color_wip[i][c] * s;
                        }
                        self.cover_acc[i] += s;
                    }
                }
                Opcode::CoverWipMoveToMask => {
                    self.cover_mask.copy_from_slice(&self.cover_wip);
                    self.cover_wip.fill(0.0);
                }
                Opcode::CoverAccMoveToMask => {
                    self.cover_mask.copy_from_slice(&self.cover_acc);
                    self.cover_acc.fill(0.0);
                }
                Opcode::ColorAccOverBackground => {
                    let bg = operand(pc);
                    for acc in &mut self.color_acc {
                        let s = 1.0 - acc[3];
                        for c in 0..4 {
                            acc[c] += bg[c] * s;
                        }
                    }
                }
                Opcode::ColorAccStoreToSurface => self.store(surface),
                Opcode::ColorAccTestOpacity => {
                    if self.color_acc.iter().all(|acc| acc[3] >= 1.0) {
                        return true;
                    }
                }
            }
            pc += op.operands();
        }
        false
    }

    fn store(&self, surface: &mut Surface<'_>) {
        let x1 = surface.width.min(surface.clip[2]);
        let y1 = surface.height.min(surface.clip[3]);
        for py in 0..self.height {
            let y = self.y * self.height + py;
            if y < surface.clip[1] || y >= y1 {
                continue;
            }
            for px in 0..self.width {
                let x = self.x * self.width + px;
                if x < surface.clip[0] || x >= x1 {
                    continue;
                }
                let index = (y * surface.width + x) as usize;
                if let Some(pixel) = surface.pixels.get_mut(index) {
                    *pixel = pack_rgba8(self.color_acc[(py * self.width + px) as usize]);
                }
            }
        }
    }
}

/// Returns the group chain of a layer, outermost group first.
fn group_chain(styling: &[u32], layer: u32) -> Vec<u32> {
    let parent = styling[(layer * LAYER_DWORDS + 1) as usize];
    if parent == PARENT_NONE {
        return Vec::new();
    }
    let node = parent as usize;
    let depth = styling[node + group::PARENTS_DEPTH] as usize;
    let base = styling[node + group::PARENTS_BASE] as usize;
    let mut chain: Vec<u32> = styling[base..base + depth].iter().rev().copied().collect();
    chain.push(parent);
    chain
}

fn in_range(styling: &[u32], node: u32, layer: u32) -> bool {
    let node = node as usize;
    styling[node + group::RANGE_LO] <= layer && layer <= styling[node + group::RANGE_HI]
}

pub fn render(_n_wg: u32, push: &[u8], resources: &[CpuBinding<'_>]) {
    let push: PushRender = bytemuck::pod_read_unaligned(push);
    let pool = BlockPool::bind(resources);
    let ttcks = Keys::bind(&resources[5]);
    let (header, ranges) = resources[6].as_split::<IndirectCount, TileRange>();
    let styling = resources[7].as_slice::<u32>();
    let mut pixels = resources[8].as_slice_mut::<u32>();
    let mut surface = Surface {
        pixels: &mut *pixels,
        width: push.surface_width,
        height: push.surface_height,
        clip: push.clip,
    };
    let tw = pool.config.target.tile_width();
    let th = pool.config.target.tile_height();
    let keys = ttcks.keys();
    for range in &ranges[..(header.count_x as usize).min(ranges.len())] {
        let mut tile = Tile::new(range, tw, th);
        let mut stack: Vec<u32> = Vec::new();
        let start = range.offset as usize;
        let end = (start + range.count as usize).min(keys.len());
        let mut i = start;
        while i < end {
            let layer = Ttck(keys[i]).layer();
            tile.winding.fill(0);
            while i < end && Ttck(keys[i]).layer() == layer {
                let key = Ttck(keys[i]);
                let subblock = pool.subblock(key.id().0);
                if key.is_prefix() {
                    tile.add_prefix(subblock);
                } else {
                    tile.add_piece(subblock);
                }
                i += 1;
            }
            if layer >= push.layer_count {
                continue;
            }

            let chain = group_chain(&styling, layer);
            let common = stack
                .iter()
                .zip(&chain)
                .take_while(|&(&a, &b)| a == b && in_range(&styling, a, layer))
                .count();
            while stack.len() > common {
                if let Some(node) = stack.pop() {
                    let leave = styling[node as usize + group::CMDS_LEAVE];
                    tile.execute(&styling, leave, &mut surface);
                }
            }
            for &node in &chain[common..] {
                let enter = styling[node as usize + group::CMDS_ENTER];
                tile.execute(&styling, enter, &mut surface);
                stack.push(node);
            }

            let cmds = styling[(layer * LAYER_DWORDS) as usize];
            if tile.execute(&styling, cmds, &mut surface) {
                break;
            }
        }
        while let Some(node) = stack.pop() {
            let leave = styling[node as usize + group::CMDS_LEAVE];
            tile.execute(&styling, leave, &mut surface);
        }
    }
}

/// Fills a rectangle of the surface with a packed RGBA8 value.
pub fn fill_surface(_n_wg: u32, push: &[u8], resources: &[CpuBinding<'_>]) {
    let push: PushFillSurface = bytemuck::pod_read_unaligned(push);
    let mut pixels = resources[0].as_slice_mut::<u32>();
    let x1 = push.rect[2].min(push.surface_width);
    let y1 = push.rect[3].min(push.surface_height);
    for y in push.rect[1]..y1 {
        for x in push.rect[0]..x1 {
            if let Some(pixel) = pixels.get_mut((y * push.surface_width + x) as usize) {
                *pixel = push.rgba;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{pack_rgba8, Surface, Tile};
    use peniko::{color::palette, Fill};
    use spinel_encoding::styling::{cmds_pack, encode_background_over, layer_cmds_fill, Opcode};
    use spinel_encoding::TileRange;

    fn tile() -> Tile {
        let range = TileRange::default();
        Tile::new(&range, 4, 4)
    }

    fn surface(pixels: &mut [u32]) -> Surface<'_> {
        Surface {
            pixels,
            width: 4,
            height: 4,
            clip: [0, 0, 4, 4],
        }
    }

    #[test]
    fn rgba8_packing() {
        assert_eq!(pack_rgba8([1.0, 0.0, 0.0, 1.0]), 0xff00_00ff);
        assert_eq!(pack_rgba8([0.0, 0.0, 1.0, 0.5]), 0x80ff_0000);
    }

    #[test]
    fn vertical_piece_covers_right_half() {
        let mut tile = tile();
        let piece = [2.0_f32, 0.0, 2.0, 4.0].map(f32::to_bits);
        tile.add_piece(&piece);
        assert_eq!(&tile.winding[..4], &[0, 0, 1, 1]);
        assert_eq!(&tile.winding[12..], &[0, 0, 1, 1]);
    }

    #[test]
    fn fill_then_store() {
        let mut styling = vec![0_u32; 16];
        styling[..5].copy_from_slice(&layer_cmds_fill(Fill::NonZero, palette::css::RED));
        encode_background_over(&mut styling[5..8], palette::css::BLUE);
        styling[8] = Opcode::ColorAccStoreToSurface as u32;

        let mut tile = tile();
        tile.winding[..8].fill(-1);
        let mut pixels = [0_u32; 16];
        let mut surface = surface(&mut pixels);
        assert!(!tile.execute(&styling, cmds_pack(0, 5), &mut surface));
        tile.execute(&styling, cmds_pack(5, 4), &mut surface);
        assert_eq!(pixels[0], 0xff00_00ff);
        assert_eq!(pixels[15], 0xffff_0000);
    }

    #[test]
    fn opacity_test() {
        let mut styling = layer_cmds_fill(Fill::EvenOdd, palette::css::RED).to_vec();
        styling.push(Opcode::ColorAccTestOpacity as u32);
        let mut tile = tile();
        tile.winding.fill(3);
        let mut pixels = [0_u32; 16];
        assert!(tile.execute(&styling, cmds_pack(0, 6), &mut surface(&mut pixels)));
        tile.winding.fill(2);
        tile.color_acc.fill([0.0; 4]);
        assert!(!tile.execute(&styling, cmds_pack(0, 6), &mut surface(&mut pixels)));
    }
}
