// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Segment rasterization.
//!
//! Each segment is flattened to lines in raster space, clipped in y and
//! clamped in x to its clip, then walked across the tile grid. Every piece
//! that crosses at least one pixel row lands in its own TTSB subblock and
//! is keyed by a TTRK.

use spinel_encoding::{
    BlockId, Clip, FillCmd, RastCmd, RasterizeCounts, Tag, TaggedBlockId, Transform, Ttrk,
};

use super::{BlockPool, CpuBinding, Keys};

/// Flattening tolerance in pixels.
const TOLERANCE: f32 = 0.25;
const MAX_SUBDIVISIONS: u32 = 256;

type Point = [f32; 2];

/// Control points and weights of a segment.
struct Segment {
    points: [Point; 4],
    weights: [f32; 4],
    degree: usize,
}

impl Segment {
    fn new(tag: Tag, c: &[f32; 10]) -> Self {
        let p = |i: usize| [c[i], c[i + 1]];
        let (points, weights, degree) = match tag {
            Tag::Line => ([p(0), p(2), p(2), p(2)], [1.0; 4], 1),
            Tag::Quad => ([p(0), p(2), p(4), p(4)], [1.0; 4], 2),
            Tag::Cubic => ([p(0), p(2), p(4), p(6)], [1.0; 4], 3),
            Tag::RatQuad => ([p(0), p(2), p(5), p(5)], [1.0, c[4], 1.0, 1.0], 2),
            _ => ([p(0), p(2), p(5), p(8)], [1.0, c[4], c[7], 1.0], 3),
        };
        Self {
            points,
            weights,
            degree,
        }
    }

    fn eval(&self, t: f32) -> Point {
        let s = 1.0 - t;
        let basis = match self.degree {
            1 => [s, t, 0.0, 0.0],
            2 => [s * s, 2.0 * s * t, t * t, 0.0],
            _ => [s * s * s, 3.0 * s * s * t, 3.0 * s * t * t, t * t * t],
        };
        let mut x = 0.0;
        let mut y = 0.0;
        let mut w = 0.0;
        for i in 0..=self.degree {
            let b = basis[i] * self.weights[i];
            x += b * self.points[i][0];
            y += b * self.points[i][1];
            w += b;
        }
        [x / w, y / w]
    }

    /// Number of lines needed to stay within tolerance after `transform`.
    fn subdivisions(&self, transform: &Transform) -> u32 {
        if self.degree == 1 {
            return 1;
        }
        let q: Vec<Point> = self.points[..=self.degree]
            .iter()
            .map(|&p| transform.apply(p).unwrap_or(p))
            .collect();
        let mut dd: f32 = 0.0;
        for i in 0..self.degree - 1 {
            let x = q[i][0] - 2.0 * q[i + 1][0] + q[i + 2][0];
            let y = q[i][1] - 2.0 * q[i + 1][1] + q[i + 2][1];
            dd = dd.max(x.hypot(y));
        }
        let (w_min, w_max) = self.weights[..=self.degree]
            .iter()
            .fold((f32::INFINITY, 0.0_f32), |(lo, hi), &w| (lo.min(w), hi.max(w)));
        let skew = if w_min > 0.0 { w_max / w_min } else { 1.0 };
        let degree = self.degree as f32;
        let n = (degree * (degree - 1.0) * dd * skew / (8.0 * TOLERANCE)).sqrt();
        if n.is_finite() {
            (n.ceil() as u32).clamp(1, MAX_SUBDIVISIONS)
        } else {
            MAX_SUBDIVISIONS
        }
    }
}

/// Raster space bounds of the lines emitted for one fill.
struct Bounds {
    x0: f32,
    y0: f32,
    x1: f32,
    y1: f32,
}

impl Bounds {
    fn new(clip: &Clip, tile: Point) -> Option<Self> {
        let bounds = Self {
            x0: clip.x0.max(0.0),
            y0: clip.y0.max(0.0),
            x1: clip.x1.min((Ttrk::TILE_MAX + 1) as f32 * tile[0]),
            y1: clip.y1.min((Ttrk::TILE_MAX + 1) as f32 * tile[1]),
        };
        (bounds.x0 < bounds.x1 && bounds.y0 < bounds.y1).then_some(bounds)
    }
}

fn lerp(p0: Point, p1: Point, t: f32) -> Point {
    [p0[0] + (p1[0] - p0[0]) * t, p0[1] + (p1[1] - p0[1]) * t]
}

/// Parameters in `(0, 1)` where the line crosses `x = k * step` or
/// `y = k * step` along `axis`.
fn crossings(p0: Point, p1: Point, axis: usize, step: f32, out: &mut Vec<f32>) {
    let (a, b) = (p0[axis], p1[axis]);
    if a == b {
        return;
    }
    let (lo, hi) = (a.min(b), a.max(b));
    let mut k = (lo / step).floor() + 1.0;
    while k * step < hi {
        out.push((k * step - a) / (b - a));
        k += 1.0;
    }
}

/// Splits a line at `x = x0` and `x = x1` and clamps the outside parts onto
/// those lines.
fn clamp_x(p0: Point, p1: Point, x0: f32, x1: f32) -> Vec<(Point, Point)> {
    let mut ts = vec![0.0, 1.0];
    for edge in [x0, x1] {
        let (a, b) = (p0[0], p1[0]);
        if (a < edge && edge < b) || (b < edge && edge < a) {
            ts.push((edge - a) / (b - a));
        }
    }
    ts.sort_by(f32::total_cmp);
    ts.windows(2)
        .map(|w| {
            let mut a = lerp(p0, p1, w[0]);
            let mut b = lerp(p0, p1, w[1]);
            a[0] = a[0].clamp(x0, x1);
            b[0] = b[0].clamp(x0, x1);
            (a, b)
        })
        .collect()
}

struct Emitter<'a, 'p, 'k> {
    pool: &'a mut BlockPool<'p>,
    keys: &'a mut Keys<'k>,
    cursor: &'a mut u32,
    raster: u32,
    tile: Point,
}

impl Emitter<'_, '_, '_> {
    fn line(&mut self, p0: Point, p1: Point, bounds: &Bounds) {
        if p0[1] == p1[1] {
            return;
        }
        // Clip in y.
        let dy = p1[1] - p0[1];
        let ta = ((bounds.y0 - p0[1]) / dy).clamp(0.0, 1.0);
        let tb = ((bounds.y1 - p0[1]) / dy).clamp(0.0, 1.0);
        let (t0, t1) = (ta.min(tb), ta.max(tb));
        if t0 >= t1 {
            return;
        }
        let q0 = lerp(p0, p1, t0);
        let q1 = lerp(p0, p1, t1);
        for (a, b) in clamp_x(q0, q1, bounds.x0, bounds.x1) {
            self.walk(a, b);
        }
    }

    fn walk(&mut self, p0: Point, p1: Point) {
        let mut ts = vec![0.0, 1.0];
        crossings(p0, p1, 0, self.tile[0], &mut ts);
        crossings(p0, p1, 1, self.tile[1], &mut ts);
        ts.sort_by(f32::total_cmp);
        ts.dedup();
        for w in ts.windows(2) {
            let a = lerp(p0, p1, w[0]);
            let b = lerp(p0, p1, w[1]);
            if a[1] != b[1] {
                self.piece(a, b);
            }
        }
    }

    fn piece(&mut self, a: Point, b: Point) {
        let tile_of = |v: f32, size: f32| ((v / size).floor().max(0.0) as u32).min(Ttrk::TILE_MAX);
        let tx = tile_of(0.5 * (a[0] + b[0]), self.tile[0]);
        let ty = tile_of(0.5 * (a[1] + b[1]), self.tile[1]);
        let Some(id) = self.pool.alloc_subblock(self.cursor) else {
            return;
        };
        let ox = tx as f32 * self.tile[0];
        let oy = ty as f32 * self.tile[1];
        let local = [a[0] - ox, a[1] - oy, b[0] - ox, b[1] - oy];
        let subblock = self.pool.subblock_mut(id);
        for (dst, v) in subblock.iter_mut().zip(local) {
            *dst = v.to_bits();
        }
        self.keys.push(Ttrk::new(BlockId(id), tx, ty, self.raster).0);
    }
}

fn rasterize(tag: Tag, resources: &[CpuBinding<'_>]) {
    let Some(t) = tag.prim_index() else {
        return;
    };
    let mut pool = BlockPool::bind(resources);
    let fills = resources[5].as_slice::<FillCmd>();
    let rast_cmds = resources[7].as_slice::<RastCmd>();
    let counts = *resources[8].as_typed::<RasterizeCounts>();
    let transforms = resources[9].as_slice::<Transform>();
    let clips = resources[10].as_slice::<Clip>();
    let mut cursors = resources[11].as_slice_mut::<u32>();
    let mut keys = Keys::bind(&resources[12]);
    let tile = [
        pool.config.target.tile_width() as f32,
        pool.config.target.tile_height() as f32,
    ];
    let coords = tag.coords();
    let end = (counts.bases[t] + counts.counts[t]) as usize;
    let end = end.min(rast_cmds.len());
    let base = (counts.bases[t] as usize).min(end);
    for cmd in &rast_cmds[base..end] {
        let fill = fills[cmd.fill as usize];
        let transform = transforms[fill.transform as usize];
        let Some(bounds) = Bounds::new(&clips[fill.clip as usize], tile) else {
            continue;
        };
        let group = TaggedBlockId(cmd.group).id().0;
        let mut c = [0.0_f32; 10];
        for j in 0..coords {
            let offset = pool.offset(group + j as u32) + cmd.lane as usize;
            c[j] = f32::from_bits(pool.blocks[offset]);
        }
        let segment = Segment::new(tag, &c);
        let n = segment.subdivisions(&transform);
        let mut emitter = Emitter {
            pool: &mut pool,
            keys: &mut keys,
            cursor: &mut cursors[fill.raster as usize],
            raster: fill.raster,
            tile,
        };
        let mut prev = transform.apply(segment.eval(0.0));
        for k in 1..=n {
            let next = transform.apply(segment.eval(k as f32 / n as f32));
            if let (Some(p0), Some(p1)) = (prev, next) {
                emitter.line(p0, p1, &bounds);
            }
            prev = next;
        }
    }
}

pub fn rasterize_line(_n_wg: u32, _push: &[u8], resources: &[CpuBinding<'_>]) {
    rasterize(Tag::Line, resources);
}

pub fn rasterize_quad(_n_wg: u32, _push: &[u8], resources: &[CpuBinding<'_>]) {
    rasterize(Tag::Quad, resources);
}

pub fn rasterize_cubic(_n_wg: u32, _push: &[u8], resources: &[CpuBinding<'_>]) {
    rasterize(Tag::Cubic, resources);
}

pub fn rasterize_rat_quad(_n_wg: u32, _push: &[u8], resources: &[CpuBinding<'_>]) {
    rasterize(Tag::RatQuad, resources);
}

pub fn rasterize_rat_cubic(_n_wg: u32, _push: &[u8], resources: &[CpuBinding<'_>]) {
    rasterize(Tag::RatCubic, resources);
}

#[cfg(test)]
mod tests {
    use super::{clamp_x, crossings, Segment};
    use spinel_encoding::{Tag, Transform};

    #[test]
    fn rational_quad_with_unit_weight_matches_quad() {
        let c = [0.0, 0.0, 10.0, 20.0, 1.0, 20.0, 0.0, 0.0, 0.0, 0.0];
        let rational = Segment::new(Tag::RatQuad, &c);
        let plain = Segment::new(
            Tag::Quad,
            &[0.0, 0.0, 10.0, 20.0, 20.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        );
        for t in [0.0, 0.25, 0.5, 1.0] {
            assert_eq!(rational.eval(t), plain.eval(t));
        }
        assert_eq!(plain.eval(0.5), [10.0, 10.0]);
        assert!(plain.subdivisions(&Transform::IDENTITY) > 1);
        let line = Segment::new(Tag::Line, &c);
        assert_eq!(line.subdivisions(&Transform::scale(100.0, 100.0)), 1);
    }

    #[test]
    fn tile_crossings() {
        let mut ts = Vec::new();
        crossings([1.0, 0.0], [33.0, 0.0], 0, 16.0, &mut ts);
        assert_eq!(ts, [15.0 / 32.0, 31.0 / 32.0]);
        ts.clear();
        crossings([0.0, 16.0], [0.0, 32.0], 1, 16.0, &mut ts);
        assert!(ts.is_empty());
    }

    #[test]
    fn clamp_outside_parts() {
        let parts = clamp_x([-10.0, 0.0], [10.0, 20.0], 0.0, 100.0);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], ([0.0, 0.0], [0.0, 10.0]));
        assert_eq!(parts[1], ([0.0, 10.0], [10.0, 20.0]));
    }
}
