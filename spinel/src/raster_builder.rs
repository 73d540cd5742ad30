// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Building rasters from transformed and clipped paths.
//!
//! A raster builder stages fills, transforms and clips for a cohort of
//! rasters. Flushing a cohort records the whole rasterization pipeline in
//! one submission and takes a new epoch, which invalidates every weakref
//! handed out for the previous cohort.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use spinel_encoding::{
    Clip, ClipWeakref, Epoch, FillCmd, KeysHeader, PushFills, PushRasters, RastCmd,
    RasterizeCounts, RcMeta, Transform, TransformWeakref, TypedWeakref,
};
use spinel_shaders::KernelId;

use crate::context::{Action, Context};
use crate::handles::{HandleKind, Path, Raster};
use crate::recording::{Bindings, BufferProxy, Recording};
use crate::{Error, Result};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Ready,
    Building,
    Lost,
}

/// A transform or clip requested by `add`, resolved against the epoch it
/// was looked up in.
#[derive(Copy, Clone, Debug)]
struct Source<T> {
    value: T,
    /// Index already staged in the epoch.
    cached: Option<(Epoch, u32)>,
    /// Whether `value` is the identity transform or the unbounded clip.
    default: bool,
}

/// Staged transforms or clips of a cohort.
#[derive(Debug)]
struct Table<T> {
    values: Vec<T>,
    capacity: u32,
    /// Index of the staged default value.
    default: Option<u32>,
}

impl<T: Copy> Table<T> {
    fn new(capacity: u32) -> Self {
        Self {
            values: Vec::with_capacity(capacity as usize),
            capacity,
            default: None,
        }
    }

    fn is_full(&self) -> bool {
        self.values.len() as u32 >= self.capacity
    }

    fn lookup(&self, source: &Source<T>, epoch: Epoch) -> Option<u32> {
        if source.default {
            return self.default;
        }
        source
            .cached
            .and_then(|(e, index)| (e == epoch).then_some(index))
    }

    fn stage(&mut self, source: &Source<T>) -> u32 {
        let index = self.values.len() as u32;
        self.values.push(source.value);
        if source.default {
            self.default = Some(index);
        }
        index
    }

    /// Resolves the `i`th entry of an `add` call.
    fn resolve<K>(
        &self,
        epoch: Epoch,
        weakrefs: Option<&[TypedWeakref<K>]>,
        values: Option<&[T]>,
        i: usize,
        default: T,
        stale: Error,
    ) -> Result<Source<T>> {
        let cached = weakrefs
            .and_then(|w| w[i].get_index(&epoch))
            .filter(|&index| (index as usize) < self.values.len());
        match (cached, values) {
            (Some(index), _) => Ok(Source {
                value: self.values[index as usize],
                cached: Some((epoch, index)),
                default: false,
            }),
            (None, Some(values)) => Ok(Source {
                value: values[i],
                cached: None,
                default: false,
            }),
            (None, None) if weakrefs.is_some() => Err(stale),
            (None, None) => Ok(Source {
                value: default,
                cached: None,
                default: true,
            }),
        }
    }

    fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
        if self.default.is_some_and(|index| index as usize >= len) {
            self.default = None;
        }
    }

    /// Empties the table and returns the old values.
    fn take(&mut self) -> (Vec<T>, Option<u32>) {
        let fresh = Vec::with_capacity(self.capacity as usize);
        let values = std::mem::replace(&mut self.values, fresh);
        (values, self.default.take())
    }

    /// Re-stages an entry of a previous cohort, once.
    fn restage(
        &mut self,
        old: &[T],
        old_default: Option<u32>,
        remap: &mut HashMap<u32, u32>,
        index: u32,
    ) -> u32 {
        *remap.entry(index).or_insert_with(|| {
            let source = Source {
                value: old[index as usize],
                cached: None,
                default: old_default == Some(index),
            };
            self.stage(&source)
        })
    }
}

/// Device buffers of a cohort. They are reused by every flush.
struct Buffers {
    fill_cmds: BufferProxy,
    fill_scan: BufferProxy,
    rast_cmds: BufferProxy,
    rast_counts: BufferProxy,
    transforms: BufferProxy,
    clips: BufferProxy,
    rast_cursors: BufferProxy,
    ttrk: BufferProxy,
    rc_meta: BufferProxy,
    rc_handles: BufferProxy,
}

impl Buffers {
    fn all(&self) -> [BufferProxy; 10] {
        [
            self.fill_cmds,
            self.fill_scan,
            self.rast_cmds,
            self.rast_counts,
            self.transforms,
            self.clips,
            self.rast_cursors,
            self.ttrk,
            self.rc_meta,
            self.rc_handles,
        ]
    }
}

pub(crate) struct RasterBuilderImpl {
    ctx: Context,
    state: State,
    epoch: Epoch,
    fill_capacity: u32,
    cohort_size: u32,
    ttrk_capacity: u32,
    fills: Vec<FillCmd>,
    transforms: Table<Transform>,
    clips: Table<Clip>,
    /// Completed rasters of the cohort.
    rasters: Vec<u32>,
    /// First fill of the raster being built.
    current: usize,
    buffers: Buffers,
    /// Capacity of `rast_cmds`, in segments.
    rast_capacity: u32,
}

impl RasterBuilderImpl {
    fn new(ctx: &Context) -> Result<Self> {
        let config = {
            let ctx = ctx.inner.borrow();
            ctx.check_lost()?;
            *ctx.config()
        };
        let fills = config.raster_fill_capacity;
        let cohort = config.raster_cohort_size;
        let rast_capacity = fills.max(1024);
        let buffers = Buffers {
            fill_cmds: BufferProxy::new(fills as u64 * size_of::<FillCmd>() as u64, "fill_cmds"),
            fill_scan: BufferProxy::new(fills as u64 * 4 * 5, "fill_scan"),
            rast_cmds: BufferProxy::new(
                rast_capacity as u64 * size_of::<RastCmd>() as u64,
                "rast_cmds",
            ),
            rast_counts: BufferProxy::new(size_of::<RasterizeCounts>() as u64, "rast_counts"),
            transforms: BufferProxy::new(
                config.raster_transform_capacity as u64 * size_of::<Transform>() as u64,
                "transforms",
            ),
            clips: BufferProxy::new(
                config.raster_clip_capacity as u64 * size_of::<Clip>() as u64,
                "clips",
            ),
            rast_cursors: BufferProxy::new(cohort as u64 * 4, "rast_cursors"),
            ttrk: BufferProxy::new(KeysHeader::buffer_size(config.ttrk_capacity), "ttrk"),
            rc_meta: BufferProxy::new(cohort as u64 * size_of::<RcMeta>() as u64, "rc_meta"),
            rc_handles: BufferProxy::new(cohort as u64 * 4, "rc_handles"),
        };
        Ok(Self {
            epoch: ctx.next_epoch(),
            ctx: ctx.clone(),
            state: State::Ready,
            fill_capacity: fills,
            cohort_size: cohort,
            ttrk_capacity: config.ttrk_capacity,
            fills: Vec::with_capacity(fills as usize),
            transforms: Table::new(config.raster_transform_capacity),
            clips: Table::new(config.raster_clip_capacity),
            rasters: Vec::new(),
            current: 0,
            buffers,
            rast_capacity,
        })
    }

    fn check_state(&self, expected: State) -> Result<()> {
        self.ctx.inner.borrow().check_lost()?;
        match (self.state, expected) {
            (State::Lost, _) => Err(Error::RasterBuilderLost),
            (a, b) if a == b => Ok(()),
            (State::Building, _) => Err(Error::RasterBuilderBuilding),
            _ => Err(Error::RasterBuilderNotBuilding),
        }
    }

    fn begin(&mut self) -> Result<()> {
        self.check_state(State::Ready)?;
        self.current = self.fills.len();
        self.state = State::Building;
        Ok(())
    }

    fn end(&mut self) -> Result<Raster> {
        self.check_state(State::Building)?;
        let handle = self.ctx.borrow_mut().acquire_handle(HandleKind::Raster)?;
        self.ctx.borrow_mut().handles.device_retain(handle);
        self.rasters.push(handle);
        self.current = self.fills.len();
        self.state = State::Ready;
        if self.rasters.len() as u32 >= self.cohort_size {
            self.flush()?;
        }
        Ok(Raster(handle))
    }

    fn add(
        &mut self,
        paths: &[Path],
        mut transform_weakrefs: Option<&mut [TransformWeakref]>,
        transforms: Option<&[Transform]>,
        mut clip_weakrefs: Option<&mut [ClipWeakref]>,
        clips: Option<&[Clip]>,
    ) -> Result<()> {
        self.check_state(State::Building)?;
        let n = paths.len();
        let lengths = [
            transform_weakrefs.as_ref().map(|w| w.len()),
            transforms.map(<[_]>::len),
            clip_weakrefs.as_ref().map(|w| w.len()),
            clips.map(<[_]>::len),
        ];
        if lengths.iter().flatten().any(|&len| len != n) {
            return Err(Error::InvalidArgument("add slices differ in length"));
        }
        let mut not_ready = false;
        {
            let ctx = self.ctx.inner.borrow();
            for path in paths {
                ctx.handles.check(path.0, HandleKind::Path)?;
                not_ready |= !ctx.handles.is_ready(path.0);
            }
        }

        let mut sources = Vec::with_capacity(n);
        for i in 0..n {
            let transform = self.transforms.resolve(
                self.epoch,
                transform_weakrefs.as_deref(),
                transforms,
                i,
                Transform::IDENTITY,
                Error::TransformWeakrefInvalid,
            )?;
            let clip = self.clips.resolve(
                self.epoch,
                clip_weakrefs.as_deref(),
                clips,
                i,
                Clip::UNBOUNDED,
                Error::ClipWeakrefInvalid,
            )?;
            sources.push((transform, clip));
        }
        if not_ready {
            self.ctx.flush_path_builders()?;
        }

        // A failed call leaves the builder as it found it, apart from
        // cohorts it flushed on the way.
        let saved_transforms = transform_weakrefs.as_deref().map(<[_]>::to_vec);
        let saved_clips = clip_weakrefs.as_deref().map(<[_]>::to_vec);
        let mut added = 0;
        let result = self.stage_fills(
            paths,
            &sources,
            transform_weakrefs.as_deref_mut(),
            clip_weakrefs.as_deref_mut(),
            &mut added,
        );
        if result.is_err() {
            if let (Some(w), Some(saved)) = (transform_weakrefs, saved_transforms) {
                w.copy_from_slice(&saved);
            }
            if let (Some(w), Some(saved)) = (clip_weakrefs, saved_clips) {
                w.copy_from_slice(&saved);
            }
            if self.state != State::Lost {
                self.unstage(added);
            }
        }
        result
    }

    fn stage_fills(
        &mut self,
        paths: &[Path],
        sources: &[(Source<Transform>, Source<Clip>)],
        mut transform_weakrefs: Option<&mut [TransformWeakref]>,
        mut clip_weakrefs: Option<&mut [ClipWeakref]>,
        added: &mut usize,
    ) -> Result<()> {
        for (i, (path, (transform, clip))) in paths.iter().zip(sources).enumerate() {
            let (t, c) = loop {
                let t = self.transforms.lookup(transform, self.epoch);
                let c = self.clips.lookup(clip, self.epoch);
                let room = (self.fills.len() as u32) < self.fill_capacity
                    && (t.is_some() || !self.transforms.is_full())
                    && (c.is_some() || !self.clips.is_full());
                if room {
                    break (t, c);
                }
                if self.rasters.is_empty() {
                    return Err(Error::RasterBuilderTooManyRasters);
                }
                self.flush()?;
            };
            let t = match t {
                Some(t) => t,
                None => self.transforms.stage(transform),
            };
            let c = match c {
                Some(c) => c,
                None => self.clips.stage(clip),
            };
            if let Some(w) = transform_weakrefs.as_deref_mut() {
                w[i] = TransformWeakref::new(&self.epoch, t);
            }
            if let Some(w) = clip_weakrefs.as_deref_mut() {
                w[i] = ClipWeakref::new(&self.epoch, c);
            }
            self.ctx.borrow_mut().handles.device_retain(path.0);
            self.fills.push(FillCmd {
                path: path.0,
                transform: t,
                clip: c,
                raster: self.rasters.len() as u32,
            });
            *added += 1;
        }
        Ok(())
    }

    /// Drops the last `count` fills and the staged entries only they use.
    fn unstage(&mut self, count: usize) {
        let kept = self.fills.len().saturating_sub(count);
        {
            let mut ctx = self.ctx.borrow_mut();
            for fill in self.fills.drain(kept..) {
                ctx.handles.device_release(fill.path);
            }
        }
        // Entries are staged in fill order, so the ones still in use form
        // a prefix of each table.
        let transforms = self.fills.iter().map(|f| f.transform as usize + 1).max();
        let clips = self.fills.iter().map(|f| f.clip as usize + 1).max();
        self.transforms.truncate(transforms.unwrap_or(0));
        self.clips.truncate(clips.unwrap_or(0));
    }

    /// Rasterizes the completed rasters and carries the fills of the raster
    /// being built into the next cohort.
    pub(crate) fn flush(&mut self) -> Result<()> {
        if self.rasters.is_empty() {
            return Ok(());
        }
        self.ctx.inner.borrow().check_lost()?;
        let result = self.submit_cohort();
        if result.is_err() {
            self.state = State::Lost;
        }
        result
    }

    fn submit_cohort(&mut self) -> Result<()> {
        let carried = self.fills.split_off(self.current);
        let fills = std::mem::take(&mut self.fills);
        let rasters = std::mem::take(&mut self.rasters);
        let (old_transforms, old_identity) = self.transforms.take();
        let (old_clips, old_unbounded) = self.clips.take();

        let mut ctx = self.ctx.borrow_mut();
        let segments: u32 = fills
            .iter()
            .map(|f| ctx.handles.prims(f.path).total())
            .sum();
        let mut recording = Recording::default();
        if segments > self.rast_capacity {
            recording.free_buffer(self.buffers.rast_cmds);
            self.rast_capacity = segments.next_power_of_two();
            self.buffers.rast_cmds = BufferProxy::new(
                self.rast_capacity as u64 * size_of::<RastCmd>() as u64,
                "rast_cmds",
            );
        }

        let b = &self.buffers;
        let fill_count = fills.len() as u32;
        let raster_count = rasters.len() as u32;
        if !fills.is_empty() {
            recording.write(b.fill_cmds, 0, bytemuck::cast_slice::<FillCmd, u8>(&fills));
        }
        if !old_transforms.is_empty() {
            recording.write(
                b.transforms,
                0,
                bytemuck::cast_slice::<Transform, u8>(&old_transforms),
            );
        }
        if !old_clips.is_empty() {
            recording.write(b.clips, 0, bytemuck::cast_slice::<Clip, u8>(&old_clips));
        }
        recording.write(b.rc_handles, 0, bytemuck::cast_slice::<u32, u8>(&rasters));
        recording.write(
            b.ttrk,
            0,
            bytemuck::bytes_of(&KeysHeader::new(self.ttrk_capacity)),
        );
        recording.clear(b.rast_cursors, 0, raster_count as u64 * 4);

        let fill_bindings = ctx.block_pool.bindings_with(&[
            b.fill_cmds,
            b.fill_scan,
            b.rast_cmds,
            b.rast_counts,
        ]);
        let fill_wgs = ctx.block_pool.wg_count(fill_count);
        let push_fills = PushFills { fill_count };
        recording.dispatch(
            ctx.kernels.get(KernelId::FillsScan),
            fill_wgs,
            &push_fills,
            fill_bindings.clone(),
        );
        recording.dispatch(
            ctx.kernels.get(KernelId::FillsExpand),
            fill_wgs,
            &push_fills,
            fill_bindings.clone(),
        );
        recording.dispatch(
            ctx.kernels.get(KernelId::FillsDispatch),
            1,
            &(),
            fill_bindings.clone(),
        );

        let mut rasterize_bindings = fill_bindings;
        rasterize_bindings.extend_from_slice(&[b.transforms, b.clips, b.rast_cursors, b.ttrk]);
        for (t, id) in KernelId::RASTERIZE.into_iter().enumerate() {
            recording.dispatch_indirect(
                ctx.kernels.get(id),
                b.rast_counts,
                RasterizeCounts::dispatch_offset(t),
                &(),
                rasterize_bindings.clone(),
            );
        }

        let push_rasters = PushRasters { raster_count };
        recording.dispatch(
            ctx.kernels.get(KernelId::SortKeys),
            1,
            &(),
            Bindings::from_slice(&[b.ttrk]),
        );
        recording.dispatch(
            ctx.kernels.get(KernelId::SegmentTtrk),
            1,
            &push_rasters,
            Bindings::from_slice(&[b.ttrk, b.rc_meta, b.rc_handles]),
        );
        let raster_wgs = ctx.block_pool.wg_count(raster_count);
        recording.dispatch(
            ctx.kernels.get(KernelId::RastersAlloc),
            raster_wgs,
            &push_rasters,
            ctx.block_pool.bindings_with(&[b.rc_meta, b.rc_handles]),
        );
        recording.dispatch(
            ctx.kernels.get(KernelId::RastersPrefix),
            raster_wgs,
            &push_rasters,
            ctx.block_pool.bindings_with(&[
                b.ttrk,
                b.rc_meta,
                b.rc_handles,
                b.transforms,
                b.clips,
                b.rast_cursors,
            ]),
        );

        log::debug!(
            "raster cohort: {raster_count} rasters, {fill_count} fills, {segments} segments"
        );
        let paths = fills.iter().map(|f| f.path).collect();
        ctx.submit_raw(
            recording,
            vec![
                Action::ReleasePaths(paths),
                Action::ReleaseRasters(rasters.clone()),
                Action::CheckPool,
                Action::CheckKeys(b.ttrk),
            ],
        )?;
        for &raster in &rasters {
            ctx.handles.set_ready(raster);
        }
        self.epoch = ctx.next_epoch();
        drop(ctx);

        let mut transform_map = HashMap::new();
        let mut clip_map = HashMap::new();
        self.current = 0;
        for fill in carried {
            let transform = self.transforms.restage(
                &old_transforms,
                old_identity,
                &mut transform_map,
                fill.transform,
            );
            let clip = self
                .clips
                .restage(&old_clips, old_unbounded, &mut clip_map, fill.clip);
            self.fills.push(FillCmd {
                transform,
                clip,
                raster: 0,
                ..fill
            });
        }
        self.ctx.borrow_mut().poll()
    }
}

impl Drop for RasterBuilderImpl {
    fn drop(&mut self) {
        if self.state == State::Building {
            log::warn!("raster builder dropped while building, discarding the current raster");
        }
        if let Err(err) = self.flush() {
            log::warn!("flushing dropped raster builder: {err}");
        }
        let mut ctx = self.ctx.borrow_mut();
        for fill in self.fills.drain(..) {
            ctx.handles.device_release(fill.path);
        }
        if ctx.check_lost().is_ok() {
            let mut recording = Recording::default();
            for proxy in self.buffers.all() {
                recording.free_buffer(proxy);
            }
            if let Err(err) = ctx.submit_raw(recording, Vec::new()) {
                log::warn!("freeing raster builder buffers: {err}");
            }
        }
    }
}

/// Builds rasters from paths.
///
/// Cloning a raster builder retains it. Rasters are rasterized in cohorts;
/// a cohort is flushed when it is full, when a composition needs one of
/// its rasters, or on [`RasterBuilder::flush`].
#[derive(Clone)]
pub struct RasterBuilder {
    pub(crate) inner: Rc<RefCell<RasterBuilderImpl>>,
}

impl RasterBuilder {
    pub(crate) fn new(ctx: &Context) -> Result<Self> {
        Ok(Self {
            inner: Rc::new(RefCell::new(RasterBuilderImpl::new(ctx)?)),
        })
    }

    pub fn begin(&self) -> Result<()> {
        self.inner.borrow_mut().begin()
    }

    pub fn end(&self) -> Result<Raster> {
        self.inner.borrow_mut().end()
    }

    /// Adds a fill of each path to the raster being built.
    ///
    /// Each path is transformed and clipped by the matching entry of the
    /// optional slices. A weakref that is still valid reuses the staged
    /// value; otherwise the value is staged and the weakref rewritten.
    /// Without a weakref or a value, the identity transform and the
    /// unbounded clip apply.
    pub fn add(
        &self,
        paths: &[Path],
        transform_weakrefs: Option<&mut [TransformWeakref]>,
        transforms: Option<&[Transform]>,
        clip_weakrefs: Option<&mut [ClipWeakref]>,
        clips: Option<&[Clip]>,
    ) -> Result<()> {
        self.inner
            .borrow_mut()
            .add(paths, transform_weakrefs, transforms, clip_weakrefs, clips)
    }

    /// Rasterizes every completed raster.
    pub fn flush(&self) -> Result<()> {
        self.inner.borrow_mut().flush()
    }
}

#[cfg(test)]
mod tests {
    use spinel_encoding::{Clip, TargetConfig, Transform, TransformWeakref};

    use crate::{Context, ContextCreateInfo, CpuEngine, Error, Path};

    fn context(target: TargetConfig) -> Context {
        let info = ContextCreateInfo {
            target,
            block_pool_size: 1 << 20,
            handle_count: 256,
        };
        Context::new(Box::new(CpuEngine::new()), info).unwrap()
    }

    fn rect(ctx: &Context, x0: f32, y0: f32, x1: f32, y1: f32) -> Path {
        let pb = ctx.path_builder().unwrap();
        pb.begin().unwrap();
        pb.move_to(x0, y0).unwrap();
        pb.line_to(x1, y0).unwrap();
        pb.line_to(x1, y1).unwrap();
        pb.line_to(x0, y1).unwrap();
        pb.line_to(x0, y0).unwrap();
        pb.end().unwrap()
    }

    #[test]
    fn states() {
        let ctx = context(TargetConfig::default());
        let rb = ctx.raster_builder().unwrap();
        let path = rect(&ctx, 0.0, 0.0, 8.0, 8.0);
        assert_eq!(
            rb.add(&[path], None, None, None, None),
            Err(Error::RasterBuilderNotBuilding)
        );
        assert_eq!(rb.end(), Err(Error::RasterBuilderNotBuilding));
        rb.begin().unwrap();
        assert_eq!(rb.begin(), Err(Error::RasterBuilderBuilding));
        assert_eq!(
            rb.add(&[path], None, Some(&[] as &[Transform]), None, None),
            Err(Error::InvalidArgument("add slices differ in length"))
        );
        assert_eq!(
            rb.add(&[Path(77)], None, None, None, None),
            Err(Error::HandleInvalid)
        );
        rb.end().unwrap();
    }

    #[test]
    fn bounds_cover_the_path() {
        let ctx = context(TargetConfig::default());
        let path = rect(&ctx, 8.0, 8.0, 56.0, 56.0);
        let rb = ctx.raster_builder().unwrap();
        rb.begin().unwrap();
        rb.add(&[path], None, None, None, None).unwrap();
        let raster = rb.end().unwrap();
        let header = ctx.read_raster_header(raster).unwrap();
        assert_eq!(header.handle, raster.0);
        assert_eq!(header.bounds, [0, 0, 4, 4]);
        assert!(header.ttsks > 0);
        assert!(header.ttpks > 0);
    }

    #[test]
    fn transform_and_clip_apply() {
        let ctx = context(TargetConfig::default());
        let path = rect(&ctx, 1.0, 1.0, 15.0, 15.0);
        let rb = ctx.raster_builder().unwrap();
        rb.begin().unwrap();
        // Scaled to 4..60, clipped to y < 32.
        let clip = Clip::new(0.0, 0.0, 64.0, 32.0);
        rb.add(
            &[path],
            None,
            Some(&[Transform::scale(4.0, 4.0)]),
            None,
            Some(&[clip]),
        )
        .unwrap();
        let raster = rb.end().unwrap();
        let header = ctx.read_raster_header(raster).unwrap();
        assert_eq!(header.bounds, [0, 0, 4, 2]);
    }

    #[test]
    fn weakrefs_are_reused_within_an_epoch() {
        let ctx = context(TargetConfig::default());
        let path = rect(&ctx, 0.0, 0.0, 16.0, 16.0);
        let rb = ctx.raster_builder().unwrap();
        let mut weakref = [TransformWeakref::INVALID];
        rb.begin().unwrap();
        assert_eq!(
            rb.add(&[path], Some(&mut weakref), None, None, None),
            Err(Error::TransformWeakrefInvalid)
        );
        let transform = [Transform::translate(16.0, 0.0)];
        rb.add(&[path], Some(&mut weakref), Some(&transform), None, None)
            .unwrap();
        assert_ne!(weakref[0], TransformWeakref::INVALID);
        // Cached; no value needed.
        rb.add(&[path], Some(&mut weakref), None, None, None)
            .unwrap();
        rb.end().unwrap();
        rb.flush().unwrap();
        // A flush starts a new epoch.
        rb.begin().unwrap();
        assert_eq!(
            rb.add(&[path], Some(&mut weakref), None, None, None),
            Err(Error::TransformWeakrefInvalid)
        );
    }

    #[test]
    fn cohorts_carry_the_current_raster() {
        let ctx = context(TargetConfig {
            raster_fill_capacity: 2,
            raster_transform_capacity: 2,
            ..Default::default()
        });
        let path = rect(&ctx, 0.0, 0.0, 16.0, 16.0);
        let rb = ctx.raster_builder().unwrap();
        rb.begin().unwrap();
        rb.add(&[path], None, None, None, None).unwrap();
        let first = rb.end().unwrap();
        rb.begin().unwrap();
        let moved = [Transform::translate(32.0, 0.0), Transform::translate(64.0, 0.0)];
        // Flushes the first raster, then stages both fills in a new cohort.
        rb.add(&[path, path], None, Some(&moved), None, None).unwrap();
        let second = rb.end().unwrap();
        // The right edge of each square lies on a tile boundary and lands
        // in the next tile.
        assert_eq!(ctx.read_raster_header(first).unwrap().bounds, [0, 0, 2, 1]);
        assert_eq!(ctx.read_raster_header(second).unwrap().bounds, [2, 0, 6, 1]);

        rb.begin().unwrap();
        // Flushes the second raster before running out of room.
        assert_eq!(
            rb.add(&[path, path, path], None, None, None, None),
            Err(Error::RasterBuilderTooManyRasters)
        );
        let inner = rb.inner.borrow();
        assert!(inner.fills.is_empty());
        assert!(inner.transforms.values.is_empty());
        assert!(inner.clips.values.is_empty());
    }

    #[test]
    fn failed_add_is_undone() {
        let ctx = context(TargetConfig {
            raster_fill_capacity: 2,
            raster_transform_capacity: 2,
            ..Default::default()
        });
        let paths = [
            rect(&ctx, 0.0, 0.0, 16.0, 16.0),
            rect(&ctx, 16.0, 0.0, 32.0, 16.0),
            rect(&ctx, 32.0, 0.0, 48.0, 16.0),
        ];
        let rb = ctx.raster_builder().unwrap();
        rb.begin().unwrap();
        let mut weakrefs = [TransformWeakref::INVALID; 3];
        let moved = [Transform::translate(0.0, 16.0); 3];
        assert_eq!(
            rb.add(&paths, Some(&mut weakrefs), Some(&moved), None, None),
            Err(Error::RasterBuilderTooManyRasters)
        );
        assert_eq!(weakrefs, [TransformWeakref::INVALID; 3]);
        {
            let inner = rb.inner.borrow();
            assert!(inner.fills.is_empty());
            assert!(inner.transforms.values.is_empty());
            assert_eq!(inner.clips.default, None);
            let ctx = ctx.inner.borrow();
            for path in &paths {
                assert_eq!(ctx.handles.device_refs(path.0), 0);
            }
        }

        rb.add(&paths[..2], None, None, None, None).unwrap();
        let raster = rb.end().unwrap();
        rb.flush().unwrap();
        ctx.path_release(&paths).unwrap();
        ctx.raster_release(&[raster]).unwrap();
        ctx.drain().unwrap();
        let status = ctx.status().unwrap();
        assert_eq!(status.handles_in_use, 0);
        assert_eq!(status.blocks_available, status.blocks_total);
    }
}
