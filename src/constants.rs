//! Varon-T Queue Constants
//!
//! Core tunables used by the ring buffer, producers, and consumers.

/// Default queue size when none is specified (must be power of 2).
pub const DEFAULT_QUEUE_SIZE: usize = 1024;

/// Maximum queue size the implementation accepts. Bounds the `i32` sequence
/// space so wraparound comparisons stay well clear of overflow.
pub const MAX_QUEUE_SIZE: usize = 1 << 28;

/// Cache line size for alignment (64 bytes on most CPUs); padded sequence
/// cells use a multiple of this to avoid false sharing between producer and
/// consumer cursors.
pub const CACHE_LINE_SIZE: usize = 64;

/// Maximum batch size a single claim may request; bounded well below any
/// reasonable queue size so a batch can never wrap past its own tail.
pub const MAX_BATCH_SIZE: usize = 4096;

/// Ceiling applied to the auto-computed default batch size
/// (see [`crate::producer::default_batch_size`]).
pub const DEFAULT_BATCH_SIZE_CLAMP: usize = 64;

/// Default number of consumed values between a consumer releasing its
/// cursor back to producers, when batched release is requested.
pub const DEFAULT_RELEASE_BATCH_SIZE: usize = 1;

/// Number of spin iterations a [`crate::yield_strategy::ThreadedYield`] or
/// [`crate::yield_strategy::HybridYield`] performs before escalating.
pub const SPIN_TRIES_BEFORE_YIELD: u32 = 100;

/// Number of `thread::yield_now` escalations a
/// [`crate::yield_strategy::HybridYield`] performs before parking on a condvar.
pub const YIELD_TRIES_BEFORE_PARK: u32 = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_sizes_are_powers_of_two() {
        assert!(DEFAULT_QUEUE_SIZE.is_power_of_two());
        assert!(MAX_QUEUE_SIZE.is_power_of_two());
    }

    #[test]
    fn test_cache_line_size_is_power_of_two() {
        assert!(CACHE_LINE_SIZE.is_power_of_two());
    }

    #[test]
    fn test_batch_sizes_are_reasonable() {
        assert!(DEFAULT_BATCH_SIZE_CLAMP > 0);
        assert!(MAX_BATCH_SIZE >= DEFAULT_BATCH_SIZE_CLAMP);
        assert!(MAX_BATCH_SIZE < MAX_QUEUE_SIZE);
    }
}
