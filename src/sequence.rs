//! Sequence ids and cache-line padded atomic cursors.
//!
//! Sequence ids are signed 32-bit integers that wrap modulo 2^32. Ordering
//! between two ids is never done with plain `<`; it goes through
//! [`seq_lt`]/[`seq_le`] so that wraparound is handled the same way
//! everywhere a cursor is compared.

use std::sync::atomic::{AtomicI32, Ordering};

/// A position in the (conceptually unbounded) stream of values that have
/// passed through a queue. Physical slot index is `id & value_mask`.
pub type SequenceId = i32;

/// `true` if `a` precedes `b` in sequence order, accounting for wraparound.
///
/// Two ids are compared by the sign of their difference rather than by
/// magnitude, so this stays correct once ids wrap past `i32::MAX`.
#[inline]
pub fn seq_lt(a: SequenceId, b: SequenceId) -> bool {
    a.wrapping_sub(b) < 0
}

/// `true` if `a` precedes or equals `b` in sequence order.
#[inline]
pub fn seq_le(a: SequenceId, b: SequenceId) -> bool {
    a.wrapping_sub(b) <= 0
}

/// The minimum of two sequence ids under wraparound-aware ordering.
#[inline]
pub fn seq_min(a: SequenceId, b: SequenceId) -> SequenceId {
    if seq_lt(a, b) { a } else { b }
}

const PADDING_BYTES: usize = 124; // 128 - size_of::<AtomicI32>()

/// A cache-line padded atomic sequence cursor.
///
/// Producer and consumer cursors are read by every thread touching the
/// queue; without padding, two cursors sharing a cache line would bounce
/// that line between cores on every update (false sharing).
#[repr(align(128))]
pub struct PaddedSequence {
    value: AtomicI32,
    _padding: [u8; PADDING_BYTES],
}

impl PaddedSequence {
    /// Create a new padded cursor initialized to `initial`.
    pub fn new(initial: SequenceId) -> Self {
        Self {
            value: AtomicI32::new(initial),
            _padding: [0; PADDING_BYTES],
        }
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> SequenceId {
        self.value.load(order)
    }

    #[inline]
    pub fn store(&self, val: SequenceId, order: Ordering) {
        self.value.store(val, order)
    }

    #[inline]
    pub fn compare_exchange(
        &self,
        current: SequenceId,
        new: SequenceId,
        success: Ordering,
        failure: Ordering,
    ) -> Result<SequenceId, SequenceId> {
        self.value.compare_exchange(current, new, success, failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_lt_basic() {
        assert!(seq_lt(1, 2));
        assert!(!seq_lt(2, 1));
        assert!(!seq_lt(1, 1));
    }

    #[test]
    fn test_seq_lt_wraps_around_i32_max() {
        let near_max = i32::MAX;
        let wrapped = near_max.wrapping_add(5);
        assert!(seq_lt(near_max, wrapped));
        assert!(!seq_lt(wrapped, near_max));
    }

    #[test]
    fn test_seq_le_equal() {
        assert!(seq_le(5, 5));
        assert!(seq_le(4, 5));
        assert!(!seq_le(5, 4));
    }

    #[test]
    fn test_seq_min() {
        assert_eq!(seq_min(3, 7), 3);
        assert_eq!(seq_min(7, 3), 3);
    }

    #[test]
    fn test_padded_sequence_roundtrip() {
        let seq = PaddedSequence::new(41);
        assert_eq!(seq.load(Ordering::Acquire), 41);
        seq.store(42, Ordering::Release);
        assert_eq!(seq.load(Ordering::Acquire), 42);
    }

    #[test]
    fn test_padded_sequence_cas() {
        let seq = PaddedSequence::new(0);
        assert_eq!(seq.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire), Ok(0));
        assert_eq!(seq.compare_exchange(0, 2, Ordering::AcqRel, Ordering::Acquire), Err(1));
    }

    #[test]
    fn test_padded_sequence_size_is_cache_line_multiple() {
        assert_eq!(std::mem::size_of::<PaddedSequence>(), 128);
    }
}
