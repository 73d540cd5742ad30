// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Styling extents and the encoders of their commands.

use std::cell::RefCell;
use std::rc::Rc;

use peniko::{Color, Fill};
use spinel_encoding::Ttck;

use crate::context::Context;
use crate::recording::{BufferProxy, Recording, SubmissionIndex};
use crate::{Error, Result};

pub use spinel_encoding::styling::*;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Unsealed,
    /// The upload was submitted.
    Sealing(SubmissionIndex),
    Sealed,
}

pub(crate) struct StylingImpl {
    ctx: Context,
    extent: StylingExtent,
    state: State,
    /// Last render reading the styling.
    lock: Option<SubmissionIndex>,
    pub(crate) buffer: BufferProxy,
}

impl StylingImpl {
    fn new(ctx: &Context, layer_count: u32, cmd_count: u32) -> Result<Self> {
        ctx.inner.borrow().check_lost()?;
        if layer_count == 0 || layer_count > Ttck::LAYER_MAX + 1 {
            return Err(Error::LayerIdInvalid);
        }
        let dwords = layer_count as u64 * LAYER_DWORDS as u64 + cmd_count as u64;
        if dwords > u32::MAX as u64 / 4 {
            return Err(Error::InvalidArgument("styling too large"));
        }
        Ok(Self {
            ctx: ctx.clone(),
            extent: StylingExtent::new(layer_count, cmd_count),
            state: State::Unsealed,
            lock: None,
            buffer: BufferProxy::new(dwords * 4, "styling"),
        })
    }

    pub(crate) fn layer_count(&self) -> u32 {
        self.extent.layer_count()
    }

    /// Makes the extent visible to the device.
    pub(crate) fn seal(&mut self) -> Result<()> {
        if self.state != State::Unsealed {
            return Ok(());
        }
        let mut ctx = self.ctx.borrow_mut();
        ctx.check_lost()?;
        let bytes = bytemuck::cast_slice::<u32, u8>(self.extent.dwords());
        if ctx.engine.is_unified_memory() {
            ctx.engine.write_buffer(&self.buffer, 0, bytes)?;
            self.state = State::Sealed;
        } else {
            let mut recording = Recording::default();
            recording.write(self.buffer, 0, bytes);
            let index = ctx.submit_raw(recording, Vec::new())?;
            self.state = State::Sealing(index);
        }
        log::debug!("styling seal: {} dwords", self.extent.next());
        Ok(())
    }

    fn unseal(&mut self) -> Result<()> {
        let index = match self.state {
            State::Unsealed => return Ok(()),
            State::Sealing(index) => Some(index),
            State::Sealed => None,
        };
        let index = match (index, self.lock.take()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        if let Some(index) = index {
            self.ctx.borrow_mut().wait(index)?;
        }
        self.state = State::Unsealed;
        Ok(())
    }

    pub(crate) fn lock(&mut self, index: SubmissionIndex) {
        self.lock = Some(index);
    }
}

impl Drop for StylingImpl {
    fn drop(&mut self) {
        let mut recording = Recording::default();
        recording.free_buffer(self.buffer);
        let mut ctx = self.ctx.borrow_mut();
        if ctx.check_lost().is_ok() {
            if let Err(err) = ctx.submit_raw(recording, Vec::new()) {
                log::warn!("dropping styling: {err}");
            }
        }
    }
}

/// A styling extent: a layer table and a region of group nodes and
/// command spans interpreted by the render kernel.
///
/// Every mutator unseals the styling first, waiting for the renders that
/// read it.
#[derive(Clone)]
pub struct Styling {
    pub(crate) inner: Rc<RefCell<StylingImpl>>,
}

impl Styling {
    pub(crate) fn new(ctx: &Context, layer_count: u32, cmd_count: u32) -> Result<Self> {
        Ok(Self {
            inner: Rc::new(RefCell::new(StylingImpl::new(ctx, layer_count, cmd_count)?)),
        })
    }

    fn with_extent<T>(&self, f: impl FnOnce(&mut StylingExtent) -> Result<T>) -> Result<T> {
        let mut inner = self.inner.borrow_mut();
        inner.unseal()?;
        f(&mut inner.extent)
    }

    pub fn group_alloc(&self) -> Result<GroupId> {
        self.with_extent(|extent| Ok(extent.group_alloc()?))
    }

    /// Sets the commands run when the render enters `group`.
    pub fn group_enter(&self, group: GroupId, cmds: &[u32]) -> Result<()> {
        self.with_extent(|extent| {
            extent
                .group_enter(group, cmds.len() as u32)?
                .copy_from_slice(cmds);
            Ok(())
        })
    }

    /// Sets the commands run when the render leaves `group`.
    pub fn group_leave(&self, group: GroupId, cmds: &[u32]) -> Result<()> {
        self.with_extent(|extent| {
            extent
                .group_leave(group, cmds.len() as u32)?
                .copy_from_slice(cmds);
            Ok(())
        })
    }

    /// Sets the ancestors of `group`, immediate parent first.
    pub fn group_parents(&self, group: GroupId, parents: &[GroupId]) -> Result<()> {
        self.with_extent(|extent| {
            let span = extent.group_parents(group, parents.len() as u32)?;
            for (dst, parent) in span.iter_mut().zip(parents) {
                *dst = parent.0;
            }
            Ok(())
        })
    }

    pub fn group_range_lo(&self, group: GroupId, layer: u32) -> Result<()> {
        self.with_extent(|extent| Ok(extent.group_range_lo(group, layer)?))
    }

    pub fn group_range_hi(&self, group: GroupId, layer: u32) -> Result<()> {
        self.with_extent(|extent| Ok(extent.group_range_hi(group, layer)?))
    }

    /// Sets the commands of `layer` and makes it a member of `group`.
    pub fn group_layer(&self, group: GroupId, layer: u32, cmds: &[u32]) -> Result<()> {
        self.with_extent(|extent| {
            extent
                .group_layer(group, layer, cmds.len() as u32)?
                .copy_from_slice(cmds);
            Ok(())
        })
    }

    /// Fills `layer` with a solid color.
    pub fn group_layer_fill(
        &self,
        group: GroupId,
        layer: u32,
        fill: Fill,
        color: Color,
    ) -> Result<()> {
        self.group_layer(group, layer, &layer_cmds_fill(fill, color))
    }

    pub fn layer_count(&self) -> u32 {
        self.inner.borrow().layer_count()
    }

    /// Dwords allocated so far, layer table included.
    pub fn dwords_used(&self) -> u32 {
        self.inner.borrow().extent.next()
    }

    pub fn seal(&self) -> Result<()> {
        self.inner.borrow_mut().seal()
    }

    /// Makes the styling mutable again once the work reading it is
    /// complete. Unsealing an unsealed styling does nothing.
    pub fn unseal(&self) -> Result<()> {
        self.inner.borrow_mut().unseal()
    }

    /// Unseals the styling and empties it.
    pub fn reset(&self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.unseal()?;
        inner.extent.reset();
        Ok(())
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.borrow().state != State::Unsealed
    }

    pub(crate) fn same_context(&self, ctx: &Context) -> bool {
        self.inner.borrow().ctx.same_as(ctx)
    }
}

#[cfg(test)]
mod tests {
    use peniko::{color::palette, Fill};
    use spinel_encoding::styling::{cmds_get_count, root_group_enter, GroupId};

    use crate::{Context, ContextCreateInfo, CpuEngine, Error};

    fn context() -> Context {
        let info = ContextCreateInfo {
            block_pool_size: 1 << 16,
            handle_count: 16,
            ..Default::default()
        };
        Context::new(Box::new(CpuEngine::new()), info).unwrap()
    }

    #[test]
    fn rejects_bad_sizes() {
        let ctx = context();
        assert!(matches!(ctx.styling(0, 16), Err(Error::LayerIdInvalid)));
        assert!(matches!(ctx.styling(1 << 19, 16), Err(Error::LayerIdInvalid)));
    }

    #[test]
    fn mutation_unseals() {
        let ctx = context();
        let styling = ctx.styling(2, 32).unwrap();
        let root = styling.group_alloc().unwrap();
        styling.group_enter(root, &root_group_enter()).unwrap();
        styling
            .group_layer_fill(root, 1, Fill::EvenOdd, palette::css::BLUE)
            .unwrap();
        assert_eq!(styling.dwords_used(), 4 + 6 + 2 + 5);

        styling.seal().unwrap();
        assert!(styling.is_sealed());
        styling.seal().unwrap();
        styling
            .group_layer_fill(root, 0, Fill::NonZero, palette::css::RED)
            .unwrap();
        assert!(!styling.is_sealed());
        let cmds = styling.inner.borrow().extent.layer_cmds(0).unwrap();
        assert_eq!(cmds_get_count(cmds), 5);
    }

    #[test]
    fn errors_map_to_context_errors() {
        let ctx = context();
        let styling = ctx.styling(1, 8).unwrap();
        let root = styling.group_alloc().unwrap();
        assert_eq!(
            styling.group_layer(root, 1, &[0]),
            Err(Error::LayerIdInvalid)
        );
        assert_eq!(
            styling.group_layer(root, 0, &[0; 5]),
            Err(Error::StylingCommandsOverflow)
        );
        assert_eq!(
            styling.group_enter(GroupId(1), &[0]),
            Err(Error::InvalidArgument("group id"))
        );
        styling.reset().unwrap();
        assert_eq!(styling.dwords_used(), 2);
    }
}
