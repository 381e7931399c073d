//! Grow-only buffers with an explicit growth policy.
//!
//! Two buffers in this crate grow differently, and the difference is deliberate:
//!
//! - A strip controller's pixel buffer uses [`GrowthPolicy::Headroom`]. Pixel counts can
//!   creep up, and headroom keeps the number of reallocations logarithmic.
//! - A one-shot worker's symbol buffer uses [`GrowthPolicy::Exact`]. Strip length is fixed
//!   after the first frame, and symbols are 32 times larger than the bytes they encode.
//!
//! Capacity never shrinks. A buffer built [`with_limit`](GrowableBuffer::with_limit) never
//! grows past its limit, and requests beyond it fail like an exhausted allocator.

use alloc::vec::Vec;

use crate::{Error, Result};

/// How a [`GrowableBuffer`] picks its new capacity.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GrowthPolicy {
    /// Grow to exactly the requested length.
    Exact,
    /// Grow to the requested length plus 25%.
    Headroom,
}

impl GrowthPolicy {
    /// Capacity to allocate for `required` elements.
    #[must_use]
    pub const fn capacity_for(self, required: usize) -> usize {
        match self {
            Self::Exact => required,
            Self::Headroom => required.saturating_add(required / 4),
        }
    }
}

/// A grow-only buffer whose logical length can be set anywhere up to its capacity.
#[derive(Debug)]
pub struct GrowableBuffer<T> {
    storage: Vec<T>,
    len: usize,
    policy: GrowthPolicy,
    limit: usize,
    reallocations: usize,
}

impl<T: Copy + Default> GrowableBuffer<T> {
    /// An empty buffer. Nothing is allocated until the first [`resize`](Self::resize).
    #[must_use]
    pub const fn new(policy: GrowthPolicy) -> Self {
        Self::with_limit(policy, usize::MAX)
    }

    /// An empty buffer that never holds more than `limit` elements.
    #[must_use]
    pub const fn with_limit(policy: GrowthPolicy, limit: usize) -> Self {
        Self {
            storage: Vec::new(),
            len: 0,
            policy,
            limit,
            reallocations: 0,
        }
    }

    /// Set the logical length to `len`, growing the capacity if needed.
    ///
    /// On failure the buffer keeps its previous capacity and its length is set to 0.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Allocation`] if `len` is above the limit or the allocator cannot
    /// provide the new capacity.
    pub fn resize(&mut self, len: usize) -> Result<()> {
        if len > self.storage.len() {
            if let Err(error) = self.grow(len) {
                self.len = 0;
                return Err(error);
            }
        }
        self.len = len;
        Ok(())
    }

    /// Shorten the logical length to at most `len`. Never allocates.
    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    fn grow(&mut self, required: usize) -> Result<()> {
        if required > self.limit {
            return Err(Error::Allocation {
                requested: required,
            });
        }
        let capacity = self.policy.capacity_for(required).min(self.limit);
        let additional = capacity.saturating_sub(self.storage.len());
        self.storage
            .try_reserve_exact(additional)
            .map_err(|_| Error::Allocation {
                requested: capacity,
            })?;
        self.storage.resize(capacity, T::default());
        self.reallocations = self.reallocations.saturating_add(1);
        Ok(())
    }

    /// Logical length.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the logical length is zero.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Elements available without reallocating.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// How many times the buffer has grown.
    #[must_use]
    pub const fn reallocations(&self) -> usize {
        self.reallocations
    }

    /// Most elements the buffer will ever hold.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Growth policy chosen at construction.
    #[must_use]
    pub const fn policy(&self) -> GrowthPolicy {
        self.policy
    }

    /// The first [`len`](Self::len) elements.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        self.storage.get(..self.len).unwrap_or_default()
    }

    /// The first [`len`](Self::len) elements, mutably.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        self.storage.get_mut(..self.len).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_policy_grows_to_the_request() {
        let mut buffer = GrowableBuffer::<u32>::new(GrowthPolicy::Exact);
        buffer.resize(193).expect("small allocation");
        assert_eq!(buffer.capacity(), 193);
        assert_eq!(buffer.len(), 193);
        buffer.resize(10).expect("shrinking the length never allocates");
        assert_eq!(buffer.capacity(), 193);
        assert_eq!(buffer.reallocations(), 1);
    }

    #[test]
    fn headroom_policy_adds_a_quarter() {
        let mut buffer = GrowableBuffer::<u8>::new(GrowthPolicy::Headroom);
        buffer.resize(24).expect("small allocation");
        assert_eq!(buffer.capacity(), 30);
        buffer.resize(30).expect("fits in headroom");
        assert_eq!(buffer.reallocations(), 1);
    }

    #[test]
    fn headroom_reallocates_logarithmically() {
        let mut buffer = GrowableBuffer::<u8>::new(GrowthPolicy::Headroom);
        let mut capacity = 0;
        for len in 1..=10_000 {
            buffer.resize(len).expect("small allocation");
            assert!(buffer.capacity() >= capacity, "capacity must never shrink");
            capacity = buffer.capacity();
        }
        // log base 1.25 of 10_000 is ~41.3; small lengths add a few extra steps.
        assert!(
            buffer.reallocations() <= 48,
            "{} reallocations",
            buffer.reallocations()
        );
    }

    #[test]
    fn failed_growth_keeps_capacity_and_drops_length() {
        let mut buffer = GrowableBuffer::<u8>::new(GrowthPolicy::Exact);
        buffer.resize(8).expect("small allocation");
        let error = buffer.resize(usize::MAX).expect_err("cannot allocate usize::MAX bytes");
        assert!(matches!(error, Error::Allocation { .. }));
        assert_eq!(buffer.capacity(), 8);
        assert!(buffer.is_empty());
    }

    #[test]
    fn limit_caps_growth_and_headroom() {
        let mut buffer = GrowableBuffer::<u8>::with_limit(GrowthPolicy::Headroom, 100);
        buffer.resize(90).expect("under the limit");
        assert_eq!(buffer.capacity(), 100);
        let error = buffer.resize(101).expect_err("over the limit");
        assert_eq!(error, Error::Allocation { requested: 101 });
        assert_eq!(buffer.capacity(), 100);
        assert!(buffer.is_empty());
        buffer.resize(100).expect("at the limit");
    }

    #[test]
    fn slices_track_the_logical_length() {
        let mut buffer = GrowableBuffer::<u8>::new(GrowthPolicy::Headroom);
        buffer.resize(4).expect("small allocation");
        buffer.as_mut_slice().copy_from_slice(&[1, 2, 3, 4]);
        buffer.resize(2).expect("shrinking the length never allocates");
        assert_eq!(buffer.as_slice(), &[1, 2]);
    }
}
