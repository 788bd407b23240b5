//! Error types for the Varon-T disruptor queue.
//!
//! `QueueEof` and `QueueFlush` are not failures — they are terminal in-band
//! signals a consumer can receive from [`crate::consumer::Consumer::next`].
//! They're included here so the whole protocol surface shares one `Result`
//! type, but callers should treat them as control flow, not errors.

use thiserror::Error;

/// Result type alias for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Main error type for the Varon-T queue.
#[derive(Error, Debug)]
pub enum QueueError {
    /// `size` passed to [`crate::Queue::new`] was zero or exceeded the implementation limit.
    #[error("invalid queue size: {message}")]
    InvalidSize {
        /// Description of why the size was rejected.
        message: String,
    },

    /// The value factory could not produce a payload during construction.
    #[error("value factory allocation failed: {message}")]
    AllocFail {
        /// Description of the allocation failure.
        message: String,
    },

    /// A producer or consumer was registered after the registry was frozen
    /// (i.e. after the first `claim`/`next` call on the queue).
    #[error("cannot register {what} after the queue has started")]
    AlreadyStarted {
        /// What was being registered (`"producer"`, `"consumer"`, `"dependency"`).
        what: &'static str,
    },

    /// Ring is full and a non-blocking claim was requested.
    #[error("ring buffer is full")]
    QueueFull,

    /// `claim`/`skip`/`eof`/`flush` called on a producer that already published `EOF`.
    #[error("producer is closed")]
    ProducerClosed,

    /// `next` called on a consumer that has already reached `eof_count == producer_count`.
    #[error("consumer is closed")]
    ConsumerClosed,

    /// Adding a dependency would create a cycle in the consumer dependency graph.
    #[error("dependency cycle detected: {message}")]
    DependencyCycle {
        /// Description identifying the offending edge.
        message: String,
    },

    /// A caller violated the claim/publish or next/release protocol
    /// (e.g. publishing without a pending claim).
    #[error("protocol violation: {message}")]
    ProtocolViolation {
        /// Description of the violated invariant.
        message: String,
    },
}

impl QueueError {
    /// Create a new invalid-size error.
    pub fn invalid_size(message: impl Into<String>) -> Self {
        Self::InvalidSize { message: message.into() }
    }

    /// Create a new allocation-failure error.
    pub fn alloc_fail(message: impl Into<String>) -> Self {
        Self::AllocFail { message: message.into() }
    }

    /// Create a new dependency-cycle error.
    pub fn dependency_cycle(message: impl Into<String>) -> Self {
        Self::DependencyCycle { message: message.into() }
    }

    /// Create a new protocol-violation error.
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation { message: message.into() }
    }

    /// Whether retrying the same call later has a chance of succeeding.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::QueueFull)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        assert!(matches!(QueueError::invalid_size("size 0"), QueueError::InvalidSize { .. }));
        assert!(matches!(QueueError::alloc_fail("oom"), QueueError::AllocFail { .. }));
    }

    #[test]
    fn test_recoverable() {
        assert!(QueueError::QueueFull.is_recoverable());
        assert!(!QueueError::ProducerClosed.is_recoverable());
    }
}
