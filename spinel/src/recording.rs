// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct ShaderId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceId(pub NonZeroU64);

impl ResourceId {
    pub fn next() -> Self {
        // We initialize with 1 so that the conversion below succeeds
        static ID_COUNTER: AtomicU64 = AtomicU64::new(1);
        let id = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(NonZeroU64::new(id).unwrap_or(NonZeroU64::MIN))
    }
}

/// Identifies a submitted [`Recording`]. Indices increase with submission
/// order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SubmissionIndex(pub u64);

/// Proxy used as a handle to a buffer.
///
/// Buffers are created zeroed the first time a command touches them and
/// live until they are freed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferProxy {
    pub size: u64,
    pub id: ResourceId,
    pub name: &'static str,
}

impl BufferProxy {
    pub fn new(size: u64, name: &'static str) -> Self {
        let id = ResourceId::next();
        debug_assert!(size > 0, "zero-sized buffer '{name}'");
        Self { id, size, name }
    }
}

/// Buffers bound to a dispatch, in the set order of the kernel's layout.
pub type Bindings = SmallVec<[BufferProxy; 16]>;

#[derive(Debug, Default)]
struct SemaphoreState {
    value: AtomicU64,
    pending: AtomicU64,
}

/// A host-visible timeline semaphore.
///
/// Submissions wait for and signal values of the timeline. Values only
/// grow; signalling a smaller value than the current one has no effect.
#[derive(Clone, Debug, Default)]
pub struct TimelineSemaphore(Arc<SemaphoreState>);

impl TimelineSemaphore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last signalled value.
    pub fn value(&self) -> u64 {
        self.0.value.load(Ordering::Acquire)
    }

    pub fn signal(&self, value: u64) {
        self.0.value.fetch_max(value, Ordering::AcqRel);
        self.0.pending.fetch_max(value, Ordering::AcqRel);
    }

    /// Records that a submitted, not yet completed, command will signal
    /// `value`.
    pub(crate) fn enqueue(&self, value: u64) {
        self.0.pending.fetch_max(value, Ordering::AcqRel);
    }

    /// Whether a wait for `value` is satisfied by a signal that has
    /// happened or has been submitted.
    pub(crate) fn is_reachable(&self, value: u64) -> bool {
        self.0.pending.load(Ordering::Acquire) >= value
    }

    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Single command inside a [`Recording`] to get executed by an engine.
#[derive(Debug)]
pub enum Command {
    /// Writes the data into the buffer at a byte offset.
    Write(BufferProxy, u64, Vec<u8>),
    /// Zeroes the buffer from an offset on for the given size. If the size
    /// is [None], it clears until the end.
    Clear(BufferProxy, u64, Option<u64>),
    CopyBuffer {
        src: BufferProxy,
        src_offset: u64,
        dst: BufferProxy,
        dst_offset: u64,
        size: u64,
    },
    /// Dispatches a kernel over a number of workgroups, with push constant
    /// bytes and the bound buffers.
    Dispatch(ShaderId, u32, Vec<u8>, Bindings),
    /// Like `Dispatch`, with the workgroup count read from a buffer at a
    /// byte offset.
    DispatchIndirect(ShaderId, BufferProxy, u64, Vec<u8>, Bindings),
    FreeBuffer(BufferProxy),
    /// Blocks the rest of the recording until the semaphore reaches a value.
    Wait(TimelineSemaphore, u64),
    /// Signals a semaphore value once the preceding commands complete.
    Signal(TimelineSemaphore, u64),
}

/// List of [`Command`]s for an engine to execute in order.
#[derive(Debug, Default)]
pub struct Recording {
    pub commands: Vec<Command>,
}

impl Recording {
    /// Appends a [`Command`] to the back of the [`Recording`].
    pub fn push(&mut self, cmd: Command) {
        self.commands.push(cmd);
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Commands the data to be uploaded to a new buffer with the given name.
    /// Returns a [`BufferProxy`] to the buffer.
    pub fn upload(&mut self, name: &'static str, data: impl Into<Vec<u8>>) -> BufferProxy {
        let data = data.into();
        let proxy = BufferProxy::new((data.len() as u64).max(4), name);
        self.push(Command::Write(proxy, 0, data));
        proxy
    }

    pub fn write(&mut self, proxy: BufferProxy, offset: u64, data: impl Into<Vec<u8>>) {
        self.push(Command::Write(proxy, offset, data.into()));
    }

    pub fn clear(&mut self, proxy: BufferProxy, offset: u64, size: u64) {
        self.push(Command::Clear(proxy, offset, Some(size)));
    }

    pub fn clear_all(&mut self, proxy: BufferProxy) {
        self.push(Command::Clear(proxy, 0, None));
    }

    pub fn copy_buffer(&mut self, src: BufferProxy, dst: BufferProxy) {
        self.push(Command::CopyBuffer {
            src,
            src_offset: 0,
            dst,
            dst_offset: 0,
            size: src.size.min(dst.size),
        });
    }

    /// Dispatches a kernel with push constants taken from a plain data
    /// struct.
    pub fn dispatch<P: bytemuck::NoUninit>(
        &mut self,
        shader: ShaderId,
        wg_size: u32,
        push: &P,
        bindings: Bindings,
    ) {
        let push = bytemuck::bytes_of(push).to_vec();
        self.push(Command::Dispatch(shader, wg_size, push, bindings));
    }

    /// Dispatches a kernel with an indirect workgroup count.
    ///
    /// The first `u32` at `offset` in `buf` is the number of workgroups.
    pub fn dispatch_indirect<P: bytemuck::NoUninit>(
        &mut self,
        shader: ShaderId,
        buf: BufferProxy,
        offset: u64,
        push: &P,
        bindings: Bindings,
    ) {
        let push = bytemuck::bytes_of(push).to_vec();
        self.push(Command::DispatchIndirect(shader, buf, offset, push, bindings));
    }

    /// Prevents the buffer from being used in later commands.
    pub fn free_buffer(&mut self, proxy: BufferProxy) {
        self.push(Command::FreeBuffer(proxy));
    }

    pub fn wait(&mut self, semaphore: TimelineSemaphore, value: u64) {
        self.push(Command::Wait(semaphore, value));
    }

    pub fn signal(&mut self, semaphore: TimelineSemaphore, value: u64) {
        self.push(Command::Signal(semaphore, value));
    }
}
