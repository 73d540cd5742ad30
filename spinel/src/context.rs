// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::cell::{RefCell, RefMut};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use spinel_encoding::{
    BlockId, BlockPoolAtomics, BlockPoolConfig, Epoch, KeysHeader, PathHeader, PrimCounts,
    PushReclaim, RasterHeader, TargetConfig,
};
use spinel_shaders::KernelId;

use crate::block_pool::BlockPool;
use crate::engine::{Engine, Kernels};
use crate::handles::{HandleKind, HandlePool, Path, Raster};
use crate::path_builder::{PathBuilder, PathBuilderImpl};
use crate::raster_builder::{RasterBuilder, RasterBuilderImpl};
use crate::recording::{BufferProxy, Recording, SubmissionIndex};
use crate::{Composition, Error, Result, Styling, Surface};

/// Runtime configuration of a [`Context`].
#[derive(Clone, Debug)]
pub struct ContextCreateInfo {
    /// Tuning of the kernels the engine runs.
    pub target: TargetConfig,
    /// Size of the block pool in bytes. Rounded down to a power of two
    /// number of blocks.
    pub block_pool_size: u64,
    /// Number of path and raster handles.
    pub handle_count: u32,
}

impl Default for ContextCreateInfo {
    fn default() -> Self {
        Self {
            target: TargetConfig::default(),
            block_pool_size: 32 << 20,
            handle_count: 1 << 14,
        }
    }
}

/// Occupancy of the context's pools, as seen after all submitted work
/// completed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Status {
    pub blocks_total: u32,
    pub blocks_available: u32,
    pub handles_total: u32,
    pub handles_in_use: u32,
}

/// Host work deferred until a submission completes.
#[derive(Debug)]
pub(crate) enum Action {
    /// Drop a device reference of each path.
    ReleasePaths(Vec<u32>),
    /// Drop a device reference of each raster.
    ReleaseRasters(Vec<u32>),
    /// Return reclaimed handles to the pool.
    FreeHandles(Vec<u32>),
    /// Lose the context if a block allocation failed.
    CheckPool,
    /// Lose the context if a key buffer overflowed.
    CheckKeys(BufferProxy),
}

#[derive(Debug)]
struct InFlight {
    index: SubmissionIndex,
    actions: Vec<Action>,
}

pub(crate) struct ContextImpl {
    pub(crate) engine: Box<dyn Engine>,
    pub(crate) kernels: Kernels,
    pub(crate) block_pool: BlockPool,
    pub(crate) handles: HandlePool,
    epoch: Epoch,
    in_flight: VecDeque<InFlight>,
    lost: bool,
    path_builders: Vec<Weak<RefCell<PathBuilderImpl>>>,
    raster_builders: Vec<Weak<RefCell<RasterBuilderImpl>>>,
}

impl ContextImpl {
    fn new(mut engine: Box<dyn Engine>, info: &ContextCreateInfo) -> Result<Self> {
        let target = info.target;
        target.validate().map_err(Error::InvalidArgument)?;
        let block_bytes = target.block_dwords() as u64 * 4;
        let blocks = info.block_pool_size / block_bytes;
        if blocks == 0 {
            return Err(Error::InvalidArgument("block pool smaller than a block"));
        }
        let block_count = 1_u64 << blocks.ilog2();
        if block_count << target.subblocks_log2() > BlockId::MAX as u64 {
            return Err(Error::InvalidArgument("block pool too large"));
        }
        if info.handle_count == 0 || info.handle_count >= 1 << 27 {
            return Err(Error::InvalidArgument("handle count out of range"));
        }

        let kernels = Kernels::new(engine.as_mut())?;
        let block_pool = BlockPool::new(BlockPoolConfig::new(
            target,
            block_count as u32,
            info.handle_count,
        ));
        let mut recording = Recording::default();
        block_pool.init(&mut recording, &kernels);
        let index = engine.submit(recording)?;
        log::info!(
            "spinel context: {block_count} blocks of {block_bytes} bytes, {} handles",
            info.handle_count
        );
        Ok(Self {
            engine,
            kernels,
            block_pool,
            handles: HandlePool::new(info.handle_count),
            epoch: Epoch::new(),
            in_flight: VecDeque::from([InFlight {
                index,
                actions: Vec::new(),
            }]),
            lost: false,
            path_builders: Vec::new(),
            raster_builders: Vec::new(),
        })
    }

    pub(crate) fn config(&self) -> &TargetConfig {
        &self.block_pool.config.target
    }

    pub(crate) fn check_lost(&self) -> Result<()> {
        if self.lost {
            Err(Error::ContextLost)
        } else {
            Ok(())
        }
    }

    fn lose(&mut self, reason: &str) {
        if !self.lost {
            log::info!("spinel context lost: {reason}");
            self.lost = true;
        }
    }

    /// Submits a recording. The actions run once it completes.
    pub(crate) fn submit_raw(
        &mut self,
        recording: Recording,
        actions: Vec<Action>,
    ) -> Result<SubmissionIndex> {
        self.check_lost()?;
        let index = self.engine.submit(recording)?;
        self.in_flight.push_back(InFlight { index, actions });
        Ok(index)
    }

    pub(crate) fn is_complete(&mut self, index: SubmissionIndex) -> bool {
        self.engine.is_complete(index)
    }

    /// Runs the actions of completed submissions, in submission order.
    ///
    /// Returns the first error an action observed; the remaining actions
    /// still run.
    pub(crate) fn poll(&mut self) -> Result<()> {
        let mut result = Ok(());
        while let Some(front) = self.in_flight.front() {
            if !self.engine.is_complete(front.index) {
                break;
            }
            let Some(done) = self.in_flight.pop_front() else {
                break;
            };
            for action in done.actions {
                if let Err(err) = self.run(action) {
                    result = result.and(Err(err));
                }
            }
        }
        if !self.lost {
            let batch = self.config().reclaim_size as usize;
            for kind in [HandleKind::Path, HandleKind::Raster] {
                if self.handles.reclaim_len(kind) >= batch {
                    self.flush_reclaim(kind)?;
                }
            }
        }
        result
    }

    fn run(&mut self, action: Action) -> Result<()> {
        match action {
            Action::ReleasePaths(handles) | Action::ReleaseRasters(handles) => {
                for handle in handles {
                    self.handles.device_release(handle);
                }
            }
            Action::FreeHandles(handles) => {
                for handle in handles {
                    self.handles.free(handle);
                }
            }
            Action::CheckPool => {
                if self.lost {
                    return Ok(());
                }
                let atomics: BlockPoolAtomics = self.read(self.block_pool.atomics, 0)?;
                if atomics.failed != 0 {
                    log::warn!("block pool allocation failed");
                    self.lose("block pool exhausted");
                    return Err(Error::BlockPoolEmpty);
                }
            }
            Action::CheckKeys(proxy) => {
                if self.lost {
                    return Ok(());
                }
                let header: KeysHeader = self.read(proxy, 0)?;
                if header.failed != 0 {
                    log::warn!("key buffer '{}' overflowed", proxy.name);
                    self.lose("key buffer overflow");
                    return Err(Error::BlockPoolEmpty);
                }
            }
        }
        Ok(())
    }

    fn read<T: bytemuck::Pod>(&mut self, proxy: BufferProxy, offset: u64) -> Result<T> {
        let bytes = self
            .engine
            .read_buffer(&proxy, offset, size_of::<T>() as u64)?;
        Ok(bytemuck::pod_read_unaligned(&bytes))
    }

    /// Records a reclaim dispatch for every queued handle of one kind. The
    /// handles return to the pool once it completes.
    pub(crate) fn flush_reclaim(&mut self, kind: HandleKind) -> Result<()> {
        let handles = self.handles.take_reclaim(kind);
        if handles.is_empty() {
            return Ok(());
        }
        let (kernel, name) = match kind {
            HandleKind::Path => (KernelId::PathsReclaim, "paths_reclaim"),
            HandleKind::Raster => (KernelId::RastersReclaim, "rasters_reclaim"),
        };
        log::debug!("reclaiming {} handles with {name}", handles.len());
        let count = handles.len() as u32;
        let mut recording = Recording::default();
        let reclaim = recording.upload("reclaim", bytemuck::cast_slice(&handles));
        recording.dispatch(
            self.kernels.get(kernel),
            self.block_pool.wg_count(count),
            &PushReclaim { count },
            self.block_pool.bindings_with(&[reclaim]),
        );
        recording.free_buffer(reclaim);
        self.submit_raw(recording, vec![Action::FreeHandles(handles)])?;
        Ok(())
    }

    pub(crate) fn wait(&mut self, index: SubmissionIndex) -> Result<()> {
        self.engine.wait(index)?;
        self.poll()
    }

    /// Waits for every submission, including the reclaims it triggers.
    pub(crate) fn wait_all(&mut self) -> Result<()> {
        while let Some(last) = self.in_flight.back() {
            let index = last.index;
            self.wait(index)?;
        }
        Ok(())
    }

    /// Takes a handle, reclaiming released ones when the pool is exhausted.
    pub(crate) fn acquire_handle(&mut self, kind: HandleKind) -> Result<u32> {
        self.check_lost()?;
        if !self.handles.is_exhausted() {
            return self.handles.acquire(kind);
        }
        // Device references drop as work completes, which can queue more
        // handles for reclaim.
        for _ in 0..2 {
            self.flush_reclaim(HandleKind::Path)?;
            self.flush_reclaim(HandleKind::Raster)?;
            self.wait_all()?;
            if !self.handles.is_exhausted() {
                break;
            }
        }
        self.handles.acquire(kind)
    }

    pub(crate) fn next_epoch(&mut self) -> Epoch {
        self.epoch.increment();
        self.epoch
    }

    fn read_head(&mut self, handle: u32) -> Result<u32> {
        self.wait_all()?;
        let head: u32 = self.read(self.block_pool.host_map, handle as u64 * 4)?;
        if head == u32::MAX {
            return Err(Error::HandleInvalid);
        }
        Ok(head)
    }

    fn read_block<T: bytemuck::Pod>(&mut self, id: u32) -> Result<T> {
        let offset = self.block_pool.offset(id);
        self.read(self.block_pool.blocks, offset)
    }
}

impl Drop for ContextImpl {
    fn drop(&mut self) {
        if let Err(err) = self.wait_all() {
            log::warn!("dropping spinel context: {err}");
        }
    }
}

/// The root of all Spinel objects.
///
/// Owns the engine, the block pool and the handle pool. Cloning a context
/// retains it; builders, compositions, stylings and surfaces keep it alive
/// until they are dropped.
#[derive(Clone)]
pub struct Context {
    pub(crate) inner: Rc<RefCell<ContextImpl>>,
}

impl Context {
    /// Creates a context and initializes its block pool.
    pub fn new(engine: Box<dyn Engine>, info: ContextCreateInfo) -> Result<Self> {
        let inner = ContextImpl::new(engine, &info)?;
        Ok(Self {
            inner: Rc::new(RefCell::new(inner)),
        })
    }

    pub(crate) fn borrow_mut(&self) -> RefMut<'_, ContextImpl> {
        self.inner.borrow_mut()
    }

    pub(crate) fn same_as(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn config(&self) -> TargetConfig {
        *self.inner.borrow().config()
    }

    /// Whether a device-side failure was observed.
    pub fn is_lost(&self) -> bool {
        self.inner.borrow().lost
    }

    pub fn path_builder(&self) -> Result<PathBuilder> {
        let builder = PathBuilder::new(self)?;
        let mut ctx = self.borrow_mut();
        ctx.path_builders.retain(|weak| weak.strong_count() > 0);
        ctx.path_builders.push(Rc::downgrade(&builder.inner));
        Ok(builder)
    }

    pub fn raster_builder(&self) -> Result<RasterBuilder> {
        let builder = RasterBuilder::new(self)?;
        let mut ctx = self.borrow_mut();
        ctx.raster_builders.retain(|weak| weak.strong_count() > 0);
        ctx.raster_builders.push(Rc::downgrade(&builder.inner));
        Ok(builder)
    }

    pub fn composition(&self) -> Result<Composition> {
        Composition::new(self)
    }

    /// Creates a styling with a table of `layer_count` layers and room for
    /// `cmd_count` dwords of groups and commands.
    pub fn styling(&self, layer_count: u32, cmd_count: u32) -> Result<Styling> {
        Styling::new(self, layer_count, cmd_count)
    }

    pub fn surface(&self, width: u32, height: u32) -> Result<Surface> {
        Surface::new(self, width, height)
    }

    pub(crate) fn next_epoch(&self) -> Epoch {
        self.borrow_mut().next_epoch()
    }

    /// Flushes the completed paths of every live path builder.
    pub(crate) fn flush_path_builders(&self) -> Result<()> {
        let builders: Vec<_> = self
            .inner
            .borrow()
            .path_builders
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for builder in builders {
            if let Ok(mut builder) = builder.try_borrow_mut() {
                builder.flush()?;
            }
        }
        Ok(())
    }

    /// Flushes the completed rasters of every live raster builder.
    pub(crate) fn flush_raster_builders(&self) -> Result<()> {
        let builders: Vec<_> = self
            .inner
            .borrow()
            .raster_builders
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for builder in builders {
            if let Ok(mut builder) = builder.try_borrow_mut() {
                builder.flush()?;
            }
        }
        Ok(())
    }

    fn retain(&self, handles: &[u32], kind: HandleKind) -> Result<()> {
        let mut ctx = self.borrow_mut();
        ctx.check_lost()?;
        ctx.handles.retain(handles, kind)
    }

    fn release(&self, handles: &[u32], kind: HandleKind) -> Result<()> {
        let mut ctx = self.borrow_mut();
        ctx.check_lost()?;
        ctx.handles.release(handles, kind)?;
        ctx.poll()
    }

    pub fn path_retain(&self, paths: &[Path]) -> Result<()> {
        let handles: Vec<u32> = paths.iter().map(|p| p.0).collect();
        self.retain(&handles, HandleKind::Path)
    }

    /// Drops a reference to each path. A path's blocks are reclaimed once
    /// no raster cohort still reads them.
    pub fn path_release(&self, paths: &[Path]) -> Result<()> {
        let handles: Vec<u32> = paths.iter().map(|p| p.0).collect();
        self.release(&handles, HandleKind::Path)
    }

    pub fn raster_retain(&self, rasters: &[Raster]) -> Result<()> {
        let handles: Vec<u32> = rasters.iter().map(|r| r.0).collect();
        self.retain(&handles, HandleKind::Raster)
    }

    /// Drops a reference to each raster. A raster's blocks are reclaimed
    /// once no composition holds it.
    pub fn raster_release(&self, rasters: &[Raster]) -> Result<()> {
        let handles: Vec<u32> = rasters.iter().map(|r| r.0).collect();
        self.release(&handles, HandleKind::Raster)
    }

    /// Waits for all submitted work and reclaims every released handle.
    pub fn drain(&self) -> Result<()> {
        let mut ctx = self.borrow_mut();
        ctx.check_lost()?;
        ctx.wait_all()?;
        ctx.flush_reclaim(HandleKind::Path)?;
        ctx.flush_reclaim(HandleKind::Raster)?;
        ctx.wait_all()
    }

    pub fn status(&self) -> Result<Status> {
        let mut ctx = self.borrow_mut();
        ctx.wait_all()?;
        let atomics = ctx.block_pool.atomics;
        let atomics: BlockPoolAtomics = ctx.read(atomics, 0)?;
        Ok(Status {
            blocks_total: ctx.block_pool.config.block_count,
            blocks_available: atomics.available(),
            handles_total: ctx.handles.count(),
            handles_in_use: ctx.handles.in_use(),
        })
    }

    /// Reads back the header of a path from the block pool.
    pub fn read_path_header(&self, path: Path) -> Result<PathHeader> {
        self.borrow_mut().handles.check(path.0, HandleKind::Path)?;
        if !self.inner.borrow().handles.is_ready(path.0) {
            self.flush_path_builders()?;
        }
        let mut ctx = self.borrow_mut();
        let head = ctx.read_head(path.0)?;
        ctx.read_block(head)
    }

    /// Reads back the header of a raster from the block pool.
    pub fn read_raster_header(&self, raster: Raster) -> Result<RasterHeader> {
        self.borrow_mut().handles.check(raster.0, HandleKind::Raster)?;
        self.raster_header(raster.0)
    }

    /// Reads back a raster header without checking for a host reference.
    pub(crate) fn raster_header(&self, handle: u32) -> Result<RasterHeader> {
        if !self.inner.borrow().handles.is_ready(handle) {
            self.flush_raster_builders()?;
        }
        let mut ctx = self.borrow_mut();
        let head = ctx.read_head(handle)?;
        ctx.read_block(head)
    }

    /// Segment counts of a path, known on the host as soon as it ends.
    pub fn path_prim_counts(&self, path: Path) -> Result<PrimCounts> {
        let ctx = self.inner.borrow();
        ctx.handles.check(path.0, HandleKind::Path)?;
        Ok(ctx.handles.prims(path.0))
    }
}

#[cfg(test)]
mod tests {
    use super::{Context, ContextCreateInfo};
    use crate::{CpuEngine, Error, Path};
    use spinel_encoding::TargetConfig;

    fn info(block_pool_size: u64) -> ContextCreateInfo {
        ContextCreateInfo {
            target: TargetConfig::default(),
            block_pool_size,
            handle_count: 16,
        }
    }

    #[test]
    fn pool_rounds_down_to_power_of_two() {
        let ctx = Context::new(Box::new(CpuEngine::new()), info(5 * 1024 + 12)).unwrap();
        let status = ctx.status().unwrap();
        assert_eq!(status.blocks_total, 4);
        assert_eq!(status.blocks_available, 4);
        assert_eq!(status.handles_in_use, 0);
    }

    #[test]
    fn rejects_bad_info() {
        let engine = || Box::new(CpuEngine::new());
        assert!(matches!(
            Context::new(engine(), info(100)),
            Err(Error::InvalidArgument(_))
        ));
        let no_handles = ContextCreateInfo {
            handle_count: 0,
            ..info(1 << 16)
        };
        assert!(Context::new(engine(), no_handles).is_err());
        let bad_target = ContextCreateInfo {
            target: TargetConfig {
                raster_cohort_size: 0,
                ..Default::default()
            },
            ..info(1 << 16)
        };
        assert!(Context::new(engine(), bad_target).is_err());
    }

    #[test]
    fn unknown_handles_are_invalid() {
        let ctx = Context::new(Box::new(CpuEngine::new()), info(1 << 16)).unwrap();
        assert_eq!(ctx.path_release(&[Path(3)]), Err(Error::HandleInvalid));
        assert_eq!(ctx.path_retain(&[Path::INVALID]), Err(Error::HandleInvalid));
        assert_eq!(ctx.path_prim_counts(Path(0)), Err(Error::HandleInvalid));
    }
}
