// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Path and raster handles, and the pool they are allocated from.

use spinel_encoding::{PrimCounts, Ring};

use crate::{Error, Result};

/// A path built by a [`PathBuilder`](crate::PathBuilder).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Path(pub u32);

impl Path {
    pub const INVALID: Self = Self(u32::MAX);
}

/// A raster built by a [`RasterBuilder`](crate::RasterBuilder).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Raster(pub u32);

impl Raster {
    pub const INVALID: Self = Self(u32::MAX);
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum HandleKind {
    Path,
    Raster,
}

#[derive(Copy, Clone, Debug, Default)]
struct HandleState {
    kind: Option<HandleKind>,
    /// References held by the user.
    host: u32,
    /// References held by in-flight cohorts, builders and compositions.
    device: u32,
    /// Set once the work producing the handle's device data is submitted.
    ready: bool,
    prims: PrimCounts,
}

/// One pool of handles shared by paths and rasters.
///
/// Free handles sit in a ring: acquiring takes the handle at the head and
/// a reclaimed handle is written back at the tail. A handle whose host and
/// device reference counts both drop to zero is queued for reclaim; its
/// blocks are freed by a reclaim dispatch, after which it returns to the
/// ring.
#[derive(Debug)]
pub(crate) struct HandlePool {
    free: Ring,
    ids: Vec<u32>,
    states: Vec<HandleState>,
    paths_reclaim: Vec<u32>,
    rasters_reclaim: Vec<u32>,
}

impl HandlePool {
    pub(crate) fn new(count: u32) -> Self {
        Self {
            free: Ring::new(count),
            ids: (0..count).collect(),
            states: vec![HandleState::default(); count as usize],
            paths_reclaim: Vec::new(),
            rasters_reclaim: Vec::new(),
        }
    }

    pub(crate) fn count(&self) -> u32 {
        self.free.size()
    }

    pub(crate) fn in_use(&self) -> u32 {
        self.free.in_use()
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.free.is_full()
    }

    /// Takes a free handle with one host reference.
    pub(crate) fn acquire(&mut self, kind: HandleKind) -> Result<u32> {
        let index = self.free.checked_acquire_1().ok_or(Error::HandleOverflow)?;
        let handle = self.ids[index as usize];
        self.states[handle as usize] = HandleState {
            kind: Some(kind),
            host: 1,
            ..Default::default()
        };
        Ok(handle)
    }

    /// Returns a reclaimed handle to the free ring.
    pub(crate) fn free(&mut self, handle: u32) {
        self.states[handle as usize] = HandleState::default();
        self.ids[self.free.tail() as usize] = handle;
        self.free.release_n(1);
    }

    fn state(&self, handle: u32, kind: HandleKind) -> Option<&HandleState> {
        self.states
            .get(handle as usize)
            .filter(|s| s.kind == Some(kind) && s.host > 0)
    }

    /// Checks that the user holds a reference to the handle.
    pub(crate) fn check(&self, handle: u32, kind: HandleKind) -> Result<()> {
        self.state(handle, kind).map(|_| ()).ok_or(Error::HandleInvalid)
    }

    pub(crate) fn is_ready(&self, handle: u32) -> bool {
        self.states.get(handle as usize).is_some_and(|s| s.ready)
    }

    pub(crate) fn set_ready(&mut self, handle: u32) {
        if let Some(state) = self.states.get_mut(handle as usize) {
            state.ready = true;
        }
    }

    pub(crate) fn prims(&self, handle: u32) -> PrimCounts {
        self.states
            .get(handle as usize)
            .map(|s| s.prims)
            .unwrap_or_default()
    }

    pub(crate) fn set_prims(&mut self, handle: u32, prims: PrimCounts) {
        if let Some(state) = self.states.get_mut(handle as usize) {
            state.prims = prims;
        }
    }

    pub(crate) fn retain(&mut self, handles: &[u32], kind: HandleKind) -> Result<()> {
        if handles.iter().any(|&h| self.check(h, kind).is_err()) {
            return Err(Error::HandleInvalid);
        }
        for &h in handles {
            self.states[h as usize].host += 1;
        }
        Ok(())
    }

    /// Drops one host reference of every handle. Fails without releasing
    /// anything if one of the handles holds no host reference.
    pub(crate) fn release(&mut self, handles: &[u32], kind: HandleKind) -> Result<()> {
        for (i, &h) in handles.iter().enumerate() {
            self.check(h, kind)?;
            let repeats = handles[..i].iter().filter(|&&p| p == h).count() as u32;
            if self.states[h as usize].host <= repeats {
                return Err(Error::HandleInvalid);
            }
        }
        for &h in handles {
            self.states[h as usize].host -= 1;
            self.maybe_reclaim(h);
        }
        Ok(())
    }

    pub(crate) fn device_retain(&mut self, handle: u32) {
        if let Some(state) = self.states.get_mut(handle as usize) {
            state.device += 1;
        }
    }

    pub(crate) fn device_release(&mut self, handle: u32) {
        let Some(state) = self.states.get_mut(handle as usize) else {
            return;
        };
        debug_assert!(state.device > 0, "device reference underflow");
        state.device = state.device.saturating_sub(1);
        self.maybe_reclaim(handle);
    }

    #[cfg(test)]
    pub(crate) fn device_refs(&self, handle: u32) -> u32 {
        self.states.get(handle as usize).map_or(0, |s| s.device)
    }

    fn maybe_reclaim(&mut self, handle: u32) {
        let state = &mut self.states[handle as usize];
        if state.host != 0 || state.device != 0 {
            return;
        }
        match state.kind.take() {
            Some(HandleKind::Path) => self.paths_reclaim.push(handle),
            Some(HandleKind::Raster) => self.rasters_reclaim.push(handle),
            None => {}
        }
    }

    pub(crate) fn reclaim_len(&self, kind: HandleKind) -> usize {
        match kind {
            HandleKind::Path => self.paths_reclaim.len(),
            HandleKind::Raster => self.rasters_reclaim.len(),
        }
    }

    /// Takes the queued handles of one kind.
    pub(crate) fn take_reclaim(&mut self, kind: HandleKind) -> Vec<u32> {
        match kind {
            HandleKind::Path => std::mem::take(&mut self.paths_reclaim),
            HandleKind::Raster => std::mem::take(&mut self.rasters_reclaim),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{HandleKind, HandlePool};
    use crate::Error;

    #[test]
    fn release_queues_reclaim() {
        let mut pool = HandlePool::new(4);
        let a = pool.acquire(HandleKind::Path).unwrap();
        let b = pool.acquire(HandleKind::Raster).unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.in_use(), 2);

        pool.device_retain(a);
        pool.release(&[a], HandleKind::Path).unwrap();
        assert_eq!(pool.check(a, HandleKind::Path), Err(Error::HandleInvalid));
        assert_eq!(pool.reclaim_len(HandleKind::Path), 0);
        pool.device_release(a);
        assert_eq!(pool.take_reclaim(HandleKind::Path), [a]);
        assert_eq!(pool.release(&[b], HandleKind::Path), Err(Error::HandleInvalid));
    }

    #[test]
    fn duplicate_release_is_checked_first() {
        let mut pool = HandlePool::new(2);
        let a = pool.acquire(HandleKind::Path).unwrap();
        assert_eq!(pool.release(&[a, a], HandleKind::Path), Err(Error::HandleInvalid));
        pool.retain(&[a], HandleKind::Path).unwrap();
        pool.release(&[a, a], HandleKind::Path).unwrap();
        assert_eq!(pool.reclaim_len(HandleKind::Path), 1);
    }

    #[test]
    fn freed_handles_are_reused() {
        let mut pool = HandlePool::new(2);
        let a = pool.acquire(HandleKind::Path).unwrap();
        let b = pool.acquire(HandleKind::Path).unwrap();
        assert!(pool.is_exhausted());
        assert_eq!(pool.acquire(HandleKind::Path), Err(Error::HandleOverflow));
        pool.release(&[b], HandleKind::Path).unwrap();
        for h in pool.take_reclaim(HandleKind::Path) {
            pool.free(h);
        }
        assert_eq!(pool.acquire(HandleKind::Raster), Ok(b));
        pool.check(a, HandleKind::Path).unwrap();
    }
}
