// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Building paths into the staging ring.
//!
//! A path is staged as whole blocks of the ring: a head block holding the
//! [`PathHeader`] and the path's segment group ids, node blocks continuing
//! the id list, and coordinate blocks holding the segment groups. Ids in
//! the ring are ring-relative, `(ring block << subblocks_log2) + subblock`,
//! and are translated to block pool ids by `paths_copy`.
//!
//! A segment group of type `t` spans `t.coords()` consecutive subblocks:
//! coordinate `j` of the segment in lane `l` is dword `l` of subblock
//! `group + j`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use spinel_encoding::{
    BlockId, PathBlockKind, PathEncoder, PathHeader, PrimCounts, PushPathsAlloc, PushPathsCopy,
    Ring, Tag, TaggedBlockId, TargetConfig,
};
use spinel_shaders::KernelId;

use crate::context::{Action, Context};
use crate::handles::{HandleKind, Path};
use crate::recording::{BufferProxy, Recording, SubmissionIndex};
use crate::{Error, Result};

const INVALID: u32 = u32::MAX;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Ready,
    Building,
    Lost,
}

/// An open segment group of one primitive type.
#[derive(Copy, Clone, Debug, Default)]
struct Lanes {
    /// Ring-relative id of the group's first subblock.
    group: u32,
    /// Number of free lanes left in the group.
    rem: u32,
}

/// Staging state of the path being built.
#[derive(Clone, Debug, Default)]
struct PathState {
    encoder: PathEncoder,
    /// Ring blocks acquired by the path so far.
    blocks: u32,
    nodes: u32,
    groups: u32,
    head: u32,
    /// Ring block receiving the next group id, and the slot within it.
    ids_block: u32,
    ids_slot: u32,
    /// Ring block being carved into segment groups, and its next free
    /// subblock.
    coords: Option<u32>,
    coords_next: u32,
    lanes: [Lanes; Tag::PRIM_COUNT],
}

/// A flushed span of the ring, released once its copy completes.
#[derive(Copy, Clone, Debug)]
struct Flight {
    index: SubmissionIndex,
    span: u32,
}

pub(crate) struct PathBuilderImpl {
    ctx: Context,
    state: State,
    config: TargetConfig,
    ring: Ring,
    /// `ring_size` blocks of staged dwords.
    staging: Vec<u32>,
    kinds: Vec<u32>,
    /// Slots of the `pc_alloc` table, one per in-flight flush.
    slots: Ring,
    pc_alloc: BufferProxy,
    pc_ring: BufferProxy,
    pc_kinds: BufferProxy,
    /// First ring block of the completed, unflushed paths.
    span_head: u32,
    span_len: u32,
    completed: Vec<u32>,
    flights: VecDeque<Flight>,
    path: PathState,
}

impl PathBuilderImpl {
    fn new(ctx: &Context) -> Result<Self> {
        let config = {
            let ctx = ctx.inner.borrow();
            ctx.check_lost()?;
            *ctx.config()
        };
        let ring_size = config.path_ring_size;
        let bd = config.block_dwords();
        Ok(Self {
            ctx: ctx.clone(),
            state: State::Ready,
            config,
            ring: Ring::new(ring_size),
            staging: vec![0; (ring_size * bd) as usize],
            kinds: vec![PathBlockKind::Coords as u32; ring_size as usize],
            slots: Ring::new(config.path_dispatch_count),
            pc_alloc: BufferProxy::new(config.path_dispatch_count as u64 * 4, "pc_alloc"),
            pc_ring: BufferProxy::new(ring_size as u64 * bd as u64 * 4, "pc_ring"),
            pc_kinds: BufferProxy::new(ring_size as u64 * 4, "pc_kinds"),
            span_head: 0,
            span_len: 0,
            completed: Vec::new(),
            flights: VecDeque::new(),
            path: PathState::default(),
        })
    }

    fn check_building(&self) -> Result<()> {
        self.ctx.inner.borrow().check_lost()?;
        match self.state {
            State::Building => Ok(()),
            State::Ready => Err(Error::PathBuilderPathNotBegun),
            State::Lost => Err(Error::PathBuilderLost),
        }
    }

    fn lose(&mut self) -> Error {
        log::warn!(
            "path builder lost: a path does not fit in {} ring blocks",
            self.ring.size()
        );
        self.state = State::Lost;
        Error::PathBuilderLost
    }

    fn block_mut(&mut self, rb: u32) -> &mut [u32] {
        let bd = self.config.block_dwords() as usize;
        let start = rb as usize * bd;
        &mut self.staging[start..start + bd]
    }

    /// Releases the ring blocks of the oldest flush once its copy completed.
    fn retire_oldest(&mut self) -> Result<()> {
        let Some(flight) = self.flights.pop_front() else {
            return Ok(());
        };
        self.ctx.borrow_mut().wait(flight.index)?;
        self.ring.release_n(flight.span);
        self.slots.release_n(1);
        Ok(())
    }

    fn retire_completed(&mut self) {
        while let Some(flight) = self.flights.front().copied() {
            if !self.ctx.borrow_mut().is_complete(flight.index) {
                break;
            }
            self.flights.pop_front();
            self.ring.release_n(flight.span);
            self.slots.release_n(1);
        }
    }

    /// Acquires a ring block for the current path.
    ///
    /// When the ring is exhausted the completed paths are flushed and the
    /// oldest flush is waited for. A path that fills the whole ring on its
    /// own loses the builder.
    fn acquire_block(&mut self, kind: PathBlockKind) -> Result<u32> {
        let rb = loop {
            if let Some(rb) = self.ring.checked_acquire_1() {
                break rb;
            }
            if self.span_len > 0 {
                self.flush()?;
            } else if !self.flights.is_empty() {
                self.retire_oldest()?;
            } else {
                return Err(self.lose());
            }
        };
        let fill = match kind {
            PathBlockKind::Coords => 0,
            PathBlockKind::Head | PathBlockKind::Node => INVALID,
        };
        self.block_mut(rb).fill(fill);
        self.kinds[rb as usize] = kind as u32;
        self.path.blocks += 1;
        Ok(rb)
    }

    /// Appends a tagged group id to the head block, spilling into a new
    /// node block when the current one is full.
    fn push_group(&mut self, id: u32) -> Result<()> {
        let bd = self.config.block_dwords();
        let sb_log2 = self.config.subblocks_log2();
        let next = PathHeader::next_offset(bd);
        if self.path.ids_slot == next {
            let node = self.acquire_block(PathBlockKind::Node)?;
            let link = TaggedBlockId::new(Tag::Next, BlockId(node << sb_log2)).0;
            let ids_block = self.path.ids_block;
            self.block_mut(ids_block)[next as usize] = link;
            self.path.ids_block = node;
            self.path.ids_slot = 0;
            self.path.nodes += 1;
        }
        let (ids_block, slot) = (self.path.ids_block, self.path.ids_slot);
        self.block_mut(ids_block)[slot as usize] = id;
        self.path.ids_slot += 1;
        self.path.groups += 1;
        Ok(())
    }

    /// Returns the group and lane receiving the next segment of `tag`.
    fn acquire_lane(&mut self, tag: Tag) -> Result<(u32, u32)> {
        let t = tag as usize;
        let sd = self.config.subblock_dwords();
        if self.path.lanes[t].rem == 0 {
            let n = tag.coords() as u32;
            let rb = match self.path.coords {
                Some(rb) if self.path.coords_next + n <= self.config.subblocks_per_block() => rb,
                _ => {
                    let rb = self.acquire_block(PathBlockKind::Coords)?;
                    self.path.coords = Some(rb);
                    self.path.coords_next = 0;
                    rb
                }
            };
            let group = (rb << self.config.subblocks_log2()) + self.path.coords_next;
            self.path.coords_next += n;
            self.push_group(TaggedBlockId::new(tag, BlockId(group)).0)?;
            self.path.lanes[t] = Lanes { group, rem: sd };
        }
        let lanes = &mut self.path.lanes[t];
        let lane = sd - lanes.rem;
        lanes.rem -= 1;
        Ok((lanes.group, lane))
    }

    fn segment<const N: usize>(
        &mut self,
        tag: Tag,
        encode: impl FnOnce(&mut PathEncoder) -> [f32; N],
    ) -> Result<()> {
        self.check_building()?;
        let mut encoder = self.path.encoder.clone();
        let coords = encode(&mut encoder);
        let (group, lane) = self.acquire_lane(tag)?;
        let sd_log2 = self.config.subblock_dwords_log2;
        for (j, c) in coords.iter().enumerate() {
            let dword = (((group + j as u32) << sd_log2) + lane) as usize;
            self.staging[dword] = c.to_bits();
        }
        self.path.encoder = encoder;
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        self.ctx.inner.borrow().check_lost()?;
        match self.state {
            State::Ready => {}
            State::Building => return Err(Error::PathBuilderBuilding),
            State::Lost => return Err(Error::PathBuilderLost),
        }
        self.path = PathState::default();
        let head = self.acquire_block(PathBlockKind::Head)?;
        self.path.head = head;
        self.path.ids_block = head;
        self.path.ids_slot = PathHeader::DWORDS;
        self.state = State::Building;
        Ok(())
    }

    fn end(&mut self) -> Result<Path> {
        self.check_building()?;
        let handle = self.ctx.borrow_mut().acquire_handle(HandleKind::Path)?;
        let prims = self.path.encoder.counts();
        let header = PathHeader {
            handle,
            blocks: self.path.blocks,
            nodes: self.path.nodes,
            prims,
            bounds: self.path.encoder.bounds(),
            groups: self.path.groups,
            pad: [0; 3],
        };
        let head = self.path.head;
        self.block_mut(head)[..PathHeader::DWORDS as usize]
            .copy_from_slice(bytemuck::cast_slice(std::slice::from_ref(&header)));
        {
            let mut ctx = self.ctx.borrow_mut();
            ctx.handles.set_prims(handle, prims);
            ctx.handles.device_retain(handle);
        }
        self.completed.push(handle);
        self.span_len += self.path.blocks;
        self.path = PathState::default();
        self.state = State::Ready;
        Ok(Path(handle))
    }

    /// Copies the completed paths into the block pool.
    pub(crate) fn flush(&mut self) -> Result<()> {
        if self.span_len == 0 {
            return Ok(());
        }
        self.retire_completed();
        if self.slots.is_full() {
            self.retire_oldest()?;
        }
        let slot = self.slots.acquire_1();
        let (head, span) = (self.span_head, self.span_len);
        let ring_size = self.ring.size();
        let bd = self.config.block_dwords();

        let mut recording = Recording::default();
        let first = span.min(ring_size - head);
        for (start, len) in [(head, first), (0, span - first)] {
            if len == 0 {
                continue;
            }
            let blocks = &self.staging[(start * bd) as usize..((start + len) * bd) as usize];
            let kinds = &self.kinds[start as usize..(start + len) as usize];
            recording.write(
                self.pc_ring,
                (start * bd) as u64 * 4,
                bytemuck::cast_slice::<u32, u8>(blocks),
            );
            recording.write(
                self.pc_kinds,
                start as u64 * 4,
                bytemuck::cast_slice::<u32, u8>(kinds),
            );
        }

        let handles = std::mem::take(&mut self.completed);
        let mut ctx = self.ctx.borrow_mut();
        let bindings = ctx
            .block_pool
            .bindings_with(&[self.pc_alloc, self.pc_ring, self.pc_kinds]);
        recording.dispatch(
            ctx.kernels.get(KernelId::PathsAlloc),
            1,
            &PushPathsAlloc { slot, span },
            bindings.clone(),
        );
        recording.dispatch(
            ctx.kernels.get(KernelId::PathsCopy),
            span,
            &PushPathsCopy {
                slot,
                span,
                head,
                ring_size,
            },
            bindings,
        );
        log::debug!(
            "path flush: {} paths in {span} blocks from ring block {head}",
            handles.len()
        );
        let index = ctx.submit_raw(
            recording,
            vec![Action::ReleasePaths(handles.clone()), Action::CheckPool],
        )?;
        for &handle in &handles {
            ctx.handles.set_ready(handle);
        }
        self.flights.push_back(Flight { index, span });
        self.span_head = (head + span) % ring_size;
        self.span_len = 0;
        ctx.poll()
    }
}

impl Drop for PathBuilderImpl {
    fn drop(&mut self) {
        if self.state == State::Building {
            log::warn!("path builder dropped while building, discarding the current path");
        }
        if let Err(err) = self.flush() {
            log::warn!("flushing dropped path builder: {err}");
        }
        let mut recording = Recording::default();
        for proxy in [self.pc_alloc, self.pc_ring, self.pc_kinds] {
            recording.free_buffer(proxy);
        }
        let mut ctx = self.ctx.borrow_mut();
        if ctx.check_lost().is_ok() {
            if let Err(err) = ctx.submit_raw(recording, Vec::new()) {
                log::warn!("freeing path builder buffers: {err}");
            }
        }
    }
}

/// Builds paths from segments.
///
/// Cloning a path builder retains it. Paths become usable by raster
/// builders once flushed, which happens on demand.
#[derive(Clone)]
pub struct PathBuilder {
    pub(crate) inner: Rc<RefCell<PathBuilderImpl>>,
}

impl PathBuilder {
    pub(crate) fn new(ctx: &Context) -> Result<Self> {
        Ok(Self {
            inner: Rc::new(RefCell::new(PathBuilderImpl::new(ctx)?)),
        })
    }

    pub fn begin(&self) -> Result<()> {
        self.inner.borrow_mut().begin()
    }

    /// Finishes the current path and returns its handle, holding one
    /// reference.
    pub fn end(&self) -> Result<Path> {
        self.inner.borrow_mut().end()
    }

    /// Copies every completed path into the block pool.
    pub fn flush(&self) -> Result<()> {
        self.inner.borrow_mut().flush()
    }

    /// Segment counts of the path being built.
    pub fn prim_counts(&self) -> PrimCounts {
        self.inner.borrow().path.encoder.counts()
    }

    pub fn move_to(&self, x: f32, y: f32) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.check_building()?;
        inner.path.encoder.move_to(x, y);
        Ok(())
    }

    pub fn line_to(&self, x: f32, y: f32) -> Result<()> {
        self.inner
            .borrow_mut()
            .segment(Tag::Line, |e| e.line_to(x, y))
    }

    pub fn quad_to(&self, x1: f32, y1: f32, x2: f32, y2: f32) -> Result<()> {
        self.inner
            .borrow_mut()
            .segment(Tag::Quad, |e| e.quad_to(x1, y1, x2, y2))
    }

    /// Quadratic whose control point reflects the previous one through the
    /// current point.
    pub fn quad_smooth_to(&self, x2: f32, y2: f32) -> Result<()> {
        self.inner
            .borrow_mut()
            .segment(Tag::Quad, |e| e.quad_smooth_to(x2, y2))
    }

    pub fn cubic_to(&self, x1: f32, y1: f32, x2: f32, y2: f32, x3: f32, y3: f32) -> Result<()> {
        self.inner
            .borrow_mut()
            .segment(Tag::Cubic, |e| e.cubic_to(x1, y1, x2, y2, x3, y3))
    }

    pub fn cubic_smooth_to(&self, x2: f32, y2: f32, x3: f32, y3: f32) -> Result<()> {
        self.inner
            .borrow_mut()
            .segment(Tag::Cubic, |e| e.cubic_smooth_to(x2, y2, x3, y3))
    }

    pub fn rat_quad_to(&self, x1: f32, y1: f32, x2: f32, y2: f32, w0: f32) -> Result<()> {
        self.inner
            .borrow_mut()
            .segment(Tag::RatQuad, |e| e.rat_quad_to(x1, y1, x2, y2, w0))
    }

    #[allow(clippy::too_many_arguments, reason = "Matches the segment layout")]
    pub fn rat_cubic_to(
        &self,
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        x3: f32,
        y3: f32,
        w0: f32,
        w1: f32,
    ) -> Result<()> {
        self.inner
            .borrow_mut()
            .segment(Tag::RatCubic, |e| e.rat_cubic_to(x1, y1, x2, y2, x3, y3, w0, w1))
    }

    /// Adds a closed ellipse of four rational quadratics, starting at its
    /// rightmost point.
    pub fn ellipse(&self, cx: f32, cy: f32, rx: f32, ry: f32) -> Result<()> {
        let w = std::f32::consts::FRAC_1_SQRT_2;
        self.move_to(cx + rx, cy)?;
        self.rat_quad_to(cx + rx, cy + ry, cx, cy + ry, w)?;
        self.rat_quad_to(cx - rx, cy + ry, cx - rx, cy, w)?;
        self.rat_quad_to(cx - rx, cy - ry, cx, cy - ry, w)?;
        self.rat_quad_to(cx + rx, cy - ry, cx + rx, cy, w)
    }
}
