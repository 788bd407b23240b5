//! varon-t: a bounded, lock-free disruptor-style ring buffer queue.
//!
//! Producers claim slots, write values into them, and publish; consumers
//! read published values in order, optionally gated on the progress of
//! other consumers via a dependency graph. The design follows the LMAX
//! Disruptor: a single shared ring buffer, padded atomic sequence cursors
//! to avoid false sharing, and pluggable yield strategies controlling how
//! aggressively producers/consumers spin while waiting.
//!
//! ```
//! use std::sync::Arc;
//! use varon_t::{Consumer, ConsumerEvent, Producer, Queue, DefaultFactory, SpinYield};
//!
//! let queue = Arc::new(Queue::new("demo", 16, DefaultFactory::<u64>::new()).unwrap());
//! let mut producer = Producer::new(
//!     Arc::clone(&queue),
//!     Box::new(SpinYield::new()),
//!     "producer-0",
//! ).unwrap();
//! let mut consumer = Consumer::new(queue, Box::new(SpinYield::new()), "consumer-0").unwrap();
//!
//! let mut claim = producer.claim().unwrap();
//! *claim.payload_mut() = 7;
//! claim.publish();
//!
//! match consumer.next().unwrap() {
//!     ConsumerEvent::Value(v) => assert_eq!(*v, 7),
//!     _ => unreachable!(),
//! }
//! ```

pub mod constants;
pub mod consumer;
pub mod error;
pub mod producer;
pub mod queue;
pub mod sequence;
pub mod value;
pub mod yield_strategy;

pub use consumer::{Consumer, ConsumerEvent, ConsumerState};
pub use error::{QueueError, Result};
pub use producer::{default_batch_size, Claim, Producer, ProducerMode};
pub use queue::Queue;
pub use sequence::{seq_le, seq_lt, SequenceId};
pub use value::{DefaultFactory, Header, Special, Value, ValueFactory};
pub use yield_strategy::{HybridYield, SpinYield, ThreadedYield, YieldStrategy};

/// Crate version, exposed for diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_queue_creation() {
        let queue = Queue::new("test", 1024, DefaultFactory::<u64>::new());
        assert!(queue.is_ok());
    }

    #[test]
    fn test_single_producer_single_consumer_roundtrip() {
        let queue = Arc::new(Queue::new("test", 32, DefaultFactory::<u64>::new()).unwrap());
        let mut producer =
            Producer::new(Arc::clone(&queue), Box::new(SpinYield::new()), "p0").unwrap();
        let mut consumer = Consumer::new(queue, Box::new(SpinYield::new()), "c0").unwrap();

        for i in 0..20u64 {
            let mut claim = producer.claim().unwrap();
            *claim.payload_mut() = i;
            claim.publish();
        }

        for i in 0..20u64 {
            match consumer.next().unwrap() {
                ConsumerEvent::Value(v) => assert_eq!(*v, i),
                _ => panic!("expected a value"),
            }
        }
    }
}
