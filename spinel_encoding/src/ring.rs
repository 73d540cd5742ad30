// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

/// Fixed-capacity circular index allocator.
///
/// Indices are acquired at `head` and released, in the same order, at
/// `tail`. `rem` counts the indices that are still available.
///
/// The `acquire_1`, `drop_1` and `drop_n` fast paths do not check `rem`:
/// callers test [`Ring::is_full`] or [`Ring::rem`] first. Debug builds
/// assert the precondition. The `checked_*` variants return `None` instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ring {
    size: u32,
    head: u32,
    tail: u32,
    rem: u32,
}

impl Ring {
    pub fn new(size: u32) -> Self {
        debug_assert!(size > 0, "ring must not be empty");
        Self {
            size,
            head: 0,
            tail: 0,
            rem: size,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn head(&self) -> u32 {
        self.head
    }

    pub fn tail(&self) -> u32 {
        self.tail
    }

    pub fn rem(&self) -> u32 {
        self.rem
    }

    /// Number of acquired, not yet released, indices.
    pub fn in_use(&self) -> u32 {
        self.size - self.rem
    }

    /// Returns true when no index is acquired.
    pub fn is_empty(&self) -> bool {
        self.rem == self.size
    }

    /// Returns true when every index is acquired.
    pub fn is_full(&self) -> bool {
        self.rem == 0
    }

    /// Number of indices from `head` to the physical end of the ring.
    pub fn head_nowrap(&self) -> u32 {
        self.size - self.head
    }

    /// Number of indices from `tail` to the physical end of the ring.
    pub fn tail_nowrap(&self) -> u32 {
        self.size - self.tail
    }

    /// Acquires the index at `head`.
    pub fn acquire_1(&mut self) -> u32 {
        debug_assert!(self.rem > 0, "ring exhausted");
        let idx = self.head;
        self.rem -= 1;
        self.head = if idx + 1 == self.size { 0 } else { idx + 1 };
        idx
    }

    pub fn checked_acquire_1(&mut self) -> Option<u32> {
        (!self.is_full()).then(|| self.acquire_1())
    }

    /// Acquires the index at `head` without returning it.
    pub fn drop_1(&mut self) {
        self.acquire_1();
    }

    /// Acquires `n` indices at once.
    pub fn drop_n(&mut self, n: u32) {
        debug_assert!(self.rem >= n, "ring exhausted");
        self.rem -= n;
        self.head = (self.head + n) % self.size;
    }

    pub fn checked_drop_n(&mut self, n: u32) -> Option<()> {
        (self.rem >= n).then(|| self.drop_n(n))
    }

    /// Returns `n` indices starting at `tail`.
    ///
    /// This assumes they were acquired earlier.
    pub fn release_n(&mut self, n: u32) {
        debug_assert!(self.rem + n <= self.size, "released more than acquired");
        self.rem += n;
        self.tail = (self.tail + n) % self.size;
    }
}

/// Wrap-only cursor over a fixed-size staging area.
///
/// There is no backpressure: the caller bounds occupancy by flushing before
/// the logical size is reached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Next {
    size: u32,
    head: u32,
}

impl Next {
    pub fn new(size: u32) -> Self {
        debug_assert!(size > 0, "next must not be empty");
        Self { size, head: 0 }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn head(&self) -> u32 {
        self.head
    }

    pub fn acquire_1(&mut self) -> u32 {
        let idx = self.head;
        self.head = if idx + 1 == self.size { 0 } else { idx + 1 };
        idx
    }

    /// Acquires `n` contiguous indices, returning the first.
    pub fn acquire_n(&mut self, n: u32) -> u32 {
        let idx = self.head;
        self.head = (idx + n) % self.size;
        idx
    }

    pub fn reset(&mut self) {
        self.head = 0;
    }
}
