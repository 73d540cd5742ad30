// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Generation counters used to cache staged transforms and clips.

use std::marker::PhantomData;

/// Number of low bits of a weakref reserved for the cached index.
pub const INDEX_BITS: u32 = 13;

const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;
const EPOCH_UNIT: u32 = 1 << INDEX_BITS;

/// Monotonic 64-bit epoch split across two 32-bit words.
///
/// The low word advances in units of `1 << INDEX_BITS`, leaving room for a
/// weakref index, and carries into the high word on overflow. At 60
/// increments per second the counter lasts far longer than any context.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Epoch {
    lo: u32,
    hi: u32,
}

impl Epoch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self) {
        let (lo, carry) = self.lo.overflowing_add(EPOCH_UNIT);
        self.lo = lo;
        self.hi += carry as u32;
    }

    /// Returns the epoch as a single 64-bit value.
    pub fn to_bits(self) -> u64 {
        (self.hi as u64) << 32 | self.lo as u64
    }
}

/// An `{epoch, index}` pair whose index may be reused only while the epoch
/// it was created in is still current.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Weakref {
    lo: u32,
    hi: u32,
}

impl Default for Weakref {
    fn default() -> Self {
        Self::INVALID
    }
}

impl Weakref {
    /// A weakref that never matches an epoch.
    ///
    /// Matching it would take an epoch with every bit set.
    pub const INVALID: Self = Self {
        lo: u32::MAX,
        hi: u32::MAX,
    };

    pub fn new(epoch: &Epoch, index: u32) -> Self {
        debug_assert!(index <= INDEX_MASK, "weakref index out of range");
        Self {
            lo: epoch.lo | (index & INDEX_MASK),
            hi: epoch.hi,
        }
    }

    /// Returns the cached index if this weakref was created in `epoch`.
    pub fn get_index(&self, epoch: &Epoch) -> Option<u32> {
        let valid = (self.lo & !INDEX_MASK) == epoch.lo && self.hi == epoch.hi;
        valid.then_some(self.lo & INDEX_MASK)
    }
}

/// Marker for transform weakrefs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TransformKind {}

/// Marker for clip weakrefs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ClipKind {}

/// A [`Weakref`] typed by the kind of value it caches.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct TypedWeakref<K> {
    pub weakref: Weakref,
    kind: PhantomData<K>,
}

impl<K> Clone for TypedWeakref<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for TypedWeakref<K> {}

impl<K> Default for TypedWeakref<K> {
    fn default() -> Self {
        Self::INVALID
    }
}

impl<K> TypedWeakref<K> {
    pub const INVALID: Self = Self {
        weakref: Weakref::INVALID,
        kind: PhantomData,
    };

    pub fn new(epoch: &Epoch, index: u32) -> Self {
        Self {
            weakref: Weakref::new(epoch, index),
            kind: PhantomData,
        }
    }

    pub fn get_index(&self, epoch: &Epoch) -> Option<u32> {
        self.weakref.get_index(epoch)
    }
}

pub type TransformWeakref = TypedWeakref<TransformKind>;
pub type ClipWeakref = TypedWeakref<ClipKind>;

#[cfg(test)]
mod tests {
    use super::{Epoch, TransformWeakref, Weakref, INDEX_BITS};

    #[test]
    fn valid_in_same_epoch() {
        let epoch = Epoch::new();
        for index in [0, 1, 77, (1 << INDEX_BITS) - 1] {
            assert_eq!(Weakref::new(&epoch, index).get_index(&epoch), Some(index));
        }
    }

    #[test]
    fn invalid_after_increment() {
        let mut epoch = Epoch::new();
        let weakref = Weakref::new(&epoch, 5);
        epoch.increment();
        assert_eq!(weakref.get_index(&epoch), None);
        assert_eq!(Weakref::new(&epoch, 5).get_index(&epoch), Some(5));
    }

    #[test]
    fn carry_into_high_word() {
        let mut epoch = Epoch::new();
        // One full low word of increments.
        for _ in 0..(1_u64 << (32 - INDEX_BITS)) {
            epoch.increment();
        }
        assert_eq!(epoch.to_bits(), 1 << 32);
        let weakref = Weakref::new(&epoch, 3);
        assert_eq!(weakref.get_index(&Epoch::new()), None);
        assert_eq!(weakref.get_index(&epoch), Some(3));
    }

    #[test]
    fn invalid_never_matches() {
        let mut epoch = Epoch::new();
        for _ in 0..4 {
            assert_eq!(Weakref::INVALID.get_index(&epoch), None);
            assert_eq!(TransformWeakref::default().get_index(&epoch), None);
            epoch.increment();
        }
    }
}
