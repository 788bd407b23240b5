//! The bounded ring buffer queue shared by producers and consumers.
//!
//! `Queue` owns slot storage and the bookkeeping producers/consumers need to
//! coordinate: the published cursor, the shared claim point for
//! multi-producer mode, and the registry of consumer cursors used to gate
//! how far ahead a producer may claim. Producers and consumers never touch
//! each other directly — they only ever go through the queue they share, so
//! there is no cyclic producer/consumer back-reference to manage. A `Queue`
//! is built once, wrapped in an `Arc`, and cloned into every
//! [`crate::producer::Producer`] and [`crate::consumer::Consumer`] that
//! registers against it.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::constants::MAX_QUEUE_SIZE;
use crate::error::{QueueError, Result};
use crate::sequence::{seq_lt, PaddedSequence, SequenceId};
use crate::value::{Header, Special, Value, ValueFactory};

struct ConsumerDeps {
    /// Indices of consumers this consumer must stay behind.
    depends_on: Vec<usize>,
}

/// A bounded, lock-free ring buffer queue.
///
/// `F` is the [`ValueFactory`] that owns the lifecycle of slot payloads.
pub struct Queue<F: ValueFactory> {
    name: String,
    slots: Box<[UnsafeCell<Value<F::Payload>>]>,
    value_mask: usize,
    factory: F,

    /// Highest id fully published and visible to consumers.
    cursor: PaddedSequence,
    /// Highest id reserved by any producer (multi-producer claim point).
    last_claimed_id: PaddedSequence,

    producer_count: AtomicUsize,
    consumer_cursors: RwLock<Vec<Arc<PaddedSequence>>>,
    consumer_deps: RwLock<Vec<ConsumerDeps>>,
    started: AtomicBool,
}

// SAFETY: every slot is accessed only through the claim/publish and
// next/release protocols, which guarantee at most one writer and a set of
// readers that never overlaps a writer for a given sequence id. The factory
// itself is already `Send + Sync` (required by `ValueFactory`); the payload
// it produces must carry the same guarantees before a `Queue<F>` can cross
// threads, since slots holding non-thread-safe payloads (e.g. `Rc<Cell<_>>`)
// would otherwise be handed between threads through the ring buffer.
unsafe impl<F: ValueFactory> Send for Queue<F> where F::Payload: Send {}
unsafe impl<F: ValueFactory> Sync for Queue<F> where F::Payload: Send + Sync {}

impl<F: ValueFactory> Queue<F> {
    /// Create a new queue with room for `size` values, backed by `factory`.
    ///
    /// `size` must be nonzero; it is rounded up to the next power of two
    /// (capped at [`MAX_QUEUE_SIZE`]) so slot indexing can use a mask
    /// instead of a modulo.
    pub fn new(name: impl Into<String>, size: usize, factory: F) -> Result<Self> {
        if size == 0 {
            return Err(QueueError::invalid_size("queue size must be nonzero"));
        }
        let rounded = size.next_power_of_two();
        if rounded > MAX_QUEUE_SIZE {
            return Err(QueueError::invalid_size(format!(
                "queue size {rounded} exceeds maximum of {MAX_QUEUE_SIZE}"
            )));
        }

        let mut slots = Vec::with_capacity(rounded);
        for _ in 0..rounded {
            let payload = factory
                .new_value()
                .map_err(|_| QueueError::alloc_fail("value factory failed to produce a slot"))?;
            let index = slots.len();
            slots.push(UnsafeCell::new(Value {
                header: Header { id: index as SequenceId, special: Special::None },
                payload,
            }));
        }

        let initial = (rounded - 1) as SequenceId;
        let name = name.into();
        debug!(queue = %name, size = rounded, "queue created");

        Ok(Self {
            name,
            slots: slots.into_boxed_slice(),
            value_mask: rounded - 1,
            factory,
            cursor: PaddedSequence::new(initial),
            last_claimed_id: PaddedSequence::new(initial),
            producer_count: AtomicUsize::new(0),
            consumer_cursors: RwLock::new(Vec::new()),
            consumer_deps: RwLock::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Name used in logging and diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of slots in the ring buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.value_mask + 1
    }

    #[inline]
    pub(crate) fn mask(&self) -> usize {
        self.value_mask
    }

    #[inline]
    pub(crate) fn cursor(&self) -> &PaddedSequence {
        &self.cursor
    }

    #[inline]
    pub(crate) fn last_claimed_id(&self) -> &PaddedSequence {
        &self.last_claimed_id
    }

    pub(crate) fn mark_started(&self) {
        self.started.store(true, Ordering::Relaxed);
    }

    fn check_not_started(&self, what: &'static str) -> Result<()> {
        if self.started.load(Ordering::Relaxed) {
            return Err(QueueError::AlreadyStarted { what });
        }
        Ok(())
    }

    /// Register a new producer. Returns the producer's index.
    pub(crate) fn register_producer(&self) -> Result<usize> {
        self.check_not_started("producer")?;
        Ok(self.producer_count.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn producer_count(&self) -> usize {
        self.producer_count.load(Ordering::SeqCst)
    }

    /// Register a new consumer, returning its index and its cursor handle.
    /// The cursor starts at the same position as the queue's own cursor.
    pub(crate) fn register_consumer(&self) -> Result<(usize, Arc<PaddedSequence>)> {
        self.check_not_started("consumer")?;
        let start = self.cursor.load(Ordering::Acquire);
        let handle = Arc::new(PaddedSequence::new(start));

        let mut cursors = self.consumer_cursors.write();
        let mut deps = self.consumer_deps.write();
        let index = cursors.len();
        cursors.push(Arc::clone(&handle));
        deps.push(ConsumerDeps { depends_on: Vec::new() });
        Ok((index, handle))
    }

    /// Register that consumer `dependent` must not read past consumer
    /// `dependency`. Rejects edges that would create a cycle.
    pub(crate) fn add_dependency(&self, dependent: usize, dependency: usize) -> Result<()> {
        self.check_not_started("dependency")?;
        let mut deps = self.consumer_deps.write();
        if dependent >= deps.len() || dependency >= deps.len() {
            return Err(QueueError::protocol_violation("unknown consumer index"));
        }
        if dependent == dependency {
            return Err(QueueError::dependency_cycle(format!(
                "consumer {dependent} cannot depend on itself"
            )));
        }
        if Self::reaches(&deps, dependency, dependent) {
            return Err(QueueError::dependency_cycle(format!(
                "consumer {dependency} already (transitively) depends on consumer {dependent}"
            )));
        }
        deps[dependent].depends_on.push(dependency);
        Ok(())
    }

    /// DFS reachability: can `from` reach `to` by following `depends_on` edges?
    fn reaches(deps: &[ConsumerDeps], from: usize, to: usize) -> bool {
        let mut stack = vec![from];
        let mut visited = vec![false; deps.len()];
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if visited[node] {
                continue;
            }
            visited[node] = true;
            stack.extend(deps[node].depends_on.iter().copied());
        }
        false
    }

    pub(crate) fn dependencies_of(&self, consumer: usize) -> Vec<Arc<PaddedSequence>> {
        let deps = self.consumer_deps.read();
        let cursors = self.consumer_cursors.read();
        deps[consumer]
            .depends_on
            .iter()
            .map(|&i| Arc::clone(&cursors[i]))
            .collect()
    }

    /// The slowest registered consumer cursor, or the queue's own cursor if
    /// there are no consumers (meaning nothing gates producer space).
    pub(crate) fn min_consumer_cursor(&self) -> SequenceId {
        let cursors = self.consumer_cursors.read();
        if cursors.is_empty() {
            return self.cursor.load(Ordering::Acquire);
        }
        let mut min = SequenceId::MAX;
        let mut first = true;
        for c in cursors.iter() {
            let v = c.load(Ordering::Acquire);
            if first || seq_lt(v, min) {
                min = v;
                first = false;
            }
        }
        min
    }

    /// `true` if claiming up through `next_id` would not overrun the
    /// slowest consumer.
    pub(crate) fn has_space_for(&self, next_id: SequenceId) -> bool {
        let gate = self.min_consumer_cursor();
        // Interpret the wrapping difference as an unsigned modular distance;
        // a negative raw difference would mean the gate is somehow ahead of
        // `next_id`, which never happens under the claim/publish protocol.
        let occupied = next_id.wrapping_sub(gate) as u32 as u64;
        occupied <= self.capacity() as u64
    }

    /// Raw pointer to the slot for `id`. Caller must uphold the
    /// claim/publish or next/release protocol to ensure exclusivity.
    #[inline]
    pub(crate) fn slot_ptr(&self, id: SequenceId) -> *mut Value<F::Payload> {
        let idx = (id as usize) & self.value_mask;
        self.slots[idx].get()
    }
}

impl<F: ValueFactory> Drop for Queue<F> {
    fn drop(&mut self) {
        for slot in self.slots.iter() {
            let value = unsafe { &mut *slot.get() };
            self.factory.free_value(&mut value.payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::DefaultFactory;

    fn make_queue(size: usize) -> Queue<DefaultFactory<u64>> {
        Queue::new("test", size, DefaultFactory::new()).unwrap()
    }

    #[test]
    fn test_zero_size_is_rejected() {
        let err = Queue::new("q", 0, DefaultFactory::<u64>::new()).unwrap_err();
        assert!(matches!(err, QueueError::InvalidSize { .. }));
    }

    #[test]
    fn test_size_rounds_up_to_power_of_two() {
        let q = make_queue(5);
        assert_eq!(q.capacity(), 8);
    }

    #[test]
    fn test_oversized_queue_is_rejected() {
        let err = Queue::new("q", MAX_QUEUE_SIZE * 4, DefaultFactory::<u64>::new()).unwrap_err();
        assert!(matches!(err, QueueError::InvalidSize { .. }));
    }

    #[test]
    fn test_register_producer_rejected_after_start() {
        let q = make_queue(4);
        q.mark_started();
        assert!(matches!(
            q.register_producer().unwrap_err(),
            QueueError::AlreadyStarted { what: "producer" }
        ));
    }

    #[test]
    fn test_dependency_cycle_rejected() {
        let q = make_queue(4);
        let (a, _) = q.register_consumer().unwrap();
        let (b, _) = q.register_consumer().unwrap();
        q.add_dependency(b, a).unwrap();
        let err = q.add_dependency(a, b).unwrap_err();
        assert!(matches!(err, QueueError::DependencyCycle { .. }));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let q = make_queue(4);
        let (a, _) = q.register_consumer().unwrap();
        assert!(q.add_dependency(a, a).is_err());
    }

    #[test]
    fn test_min_consumer_cursor_with_no_consumers_equals_queue_cursor() {
        let q = make_queue(4);
        assert_eq!(q.min_consumer_cursor(), q.cursor().load(Ordering::Acquire));
    }
}
