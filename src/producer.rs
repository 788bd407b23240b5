//! Producers: claim slots, write payloads, and publish them to consumers.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::trace;

use crate::constants::{DEFAULT_BATCH_SIZE_CLAMP, MAX_BATCH_SIZE};
use crate::error::{QueueError, Result};
use crate::queue::Queue;
use crate::sequence::SequenceId;
use crate::value::{Header, Special, Value, ValueFactory};
use crate::yield_strategy::YieldStrategy;

/// The batch size a producer gets when it doesn't request one explicitly:
/// `max(1, queue_size / (2 * producer_count))`, clamped to
/// [`DEFAULT_BATCH_SIZE_CLAMP`].
pub fn default_batch_size(queue_size: usize, producer_count: usize) -> usize {
    let n = (queue_size / (2 * producer_count.max(1))).max(1);
    n.min(DEFAULT_BATCH_SIZE_CLAMP)
}

/// Whether a producer is the sole writer to its queue or shares it with
/// other producers.
///
/// Single-producer mode advances the local claim point without a CAS.
/// Multi-producer mode reserves batches via a CAS against the queue's
/// shared claim point, then serializes publication so the queue cursor
/// still advances contiguously.
///
/// Callers never choose this: a [`Producer`] resolves it itself, from the
/// queue's registered producer count, the first time it claims (see
/// [`Producer::mode`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerMode {
    Single,
    Multi,
}

/// A handle that can claim and publish values into a [`Queue`].
pub struct Producer<F: ValueFactory> {
    queue: Arc<Queue<F>>,
    index: usize,
    /// Resolved lazily on first claim, once the producer registry is
    /// guaranteed frozen (see [`Producer::mode`]).
    mode: Option<ProducerMode>,
    batch_size: usize,
    yield_strategy: Box<dyn YieldStrategy>,
    /// Highest id reserved for this producer's current local batch.
    last_claimed_id: SequenceId,
    /// Highest id this producer has actually published.
    last_produced_id: SequenceId,
    closed: bool,
    name: String,
}

impl<F: ValueFactory> Producer<F> {
    /// Register a new producer against `queue`. The queue determines
    /// whether this producer runs single- or multi-producer protocol once
    /// registration is frozen; see [`Producer::mode`].
    pub fn new(
        queue: Arc<Queue<F>>,
        yield_strategy: Box<dyn YieldStrategy>,
        name: impl Into<String>,
    ) -> Result<Self> {
        let index = queue.register_producer()?;
        let start = queue.cursor().load(Ordering::Acquire);
        let batch_size = default_batch_size(queue.capacity(), queue.producer_count());
        Ok(Self {
            queue,
            index,
            mode: None,
            batch_size,
            yield_strategy,
            last_claimed_id: start,
            last_produced_id: start,
            closed: false,
            name: name.into(),
        })
    }

    /// The claim/publish protocol variant this producer uses.
    ///
    /// The queue's producer registry is frozen the moment any producer
    /// first claims (`Queue::mark_started`), and no further producers can
    /// register after that point — so `queue.producer_count()` is already
    /// final by the time this is ever called, and every producer on the
    /// same queue resolves to the same variant. Resolved once and cached.
    pub fn mode(&mut self) -> ProducerMode {
        if let Some(mode) = self.mode {
            return mode;
        }
        let mode = if self.queue.producer_count() > 1 {
            ProducerMode::Multi
        } else {
            ProducerMode::Single
        };
        self.mode = Some(mode);
        mode
    }

    /// Set the batch size used when reserving new claim windows. Only
    /// affects multi-producer CAS contention; each claim still yields one id.
    /// Passing `0` restores the computed default (see [`default_batch_size`]).
    /// Clamped to [`MAX_BATCH_SIZE`] so a claim window can never wrap past
    /// its own tail.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = if batch_size == 0 {
            default_batch_size(self.queue.capacity(), self.queue.producer_count())
        } else {
            batch_size.min(MAX_BATCH_SIZE)
        };
        self
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// This producer's last published sequence id, for diagnostics only;
    /// not required by the claim/publish protocol.
    pub fn last_produced_id(&self) -> SequenceId {
        self.last_produced_id
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(QueueError::ProducerClosed);
        }
        Ok(())
    }

    /// Reserve the next local batch window, blocking via the yield
    /// strategy until the queue has room.
    fn reserve_batch(&mut self) -> Result<()> {
        match self.mode() {
            ProducerMode::Single => {
                let next = self.last_claimed_id.wrapping_add(self.batch_size as i32);
                let mut first = true;
                while !self.queue.has_space_for(next) {
                    self.yield_strategy.yield_wait(first);
                    first = false;
                }
                self.last_claimed_id = next;
            }
            ProducerMode::Multi => {
                let mut first = true;
                loop {
                    let current = self.queue.last_claimed_id().load(Ordering::Acquire);
                    let next = current.wrapping_add(self.batch_size as i32);
                    if !self.queue.has_space_for(next) {
                        self.yield_strategy.yield_wait(first);
                        first = false;
                        continue;
                    }
                    match self.queue.last_claimed_id().compare_exchange(
                        current,
                        next,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(prev) => {
                            self.last_claimed_id = next;
                            // This batch starts right after the previous
                            // global boundary, not after whatever this
                            // producer last produced locally.
                            self.last_produced_id = prev;
                            break;
                        }
                        Err(_) => {
                            self.yield_strategy.yield_wait(false);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Try to reserve the next local batch window without blocking.
    fn try_reserve_batch(&mut self) -> Result<()> {
        match self.mode() {
            ProducerMode::Single => {
                let next = self.last_claimed_id.wrapping_add(self.batch_size as i32);
                if !self.queue.has_space_for(next) {
                    return Err(QueueError::QueueFull);
                }
                self.last_claimed_id = next;
                Ok(())
            }
            ProducerMode::Multi => {
                let current = self.queue.last_claimed_id().load(Ordering::Acquire);
                let next = current.wrapping_add(self.batch_size as i32);
                if !self.queue.has_space_for(next) {
                    return Err(QueueError::QueueFull);
                }
                match self.queue.last_claimed_id().compare_exchange(
                    current,
                    next,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(prev) => {
                        self.last_claimed_id = next;
                        self.last_produced_id = prev;
                        Ok(())
                    }
                    Err(_) => Err(QueueError::QueueFull),
                }
            }
        }
    }

    fn next_id(&mut self, blocking: bool) -> Result<SequenceId> {
        if self.last_produced_id == self.last_claimed_id {
            if blocking {
                self.reserve_batch()?;
            } else {
                self.try_reserve_batch()?;
            }
        }
        Ok(self.last_produced_id.wrapping_add(1))
    }

    /// Claim the next slot, blocking until space is available.
    pub fn claim(&mut self) -> Result<Claim<'_, F>> {
        self.ensure_open()?;
        self.queue.mark_started();
        let id = self.next_id(true)?;
        Ok(Claim {
            slot: self.queue.slot_ptr(id),
            id,
            producer: self,
            marked_special: Special::None,
            done: false,
        })
    }

    /// Claim the next slot without blocking; fails with
    /// [`QueueError::QueueFull`] if the queue has no room.
    pub fn try_claim(&mut self) -> Result<Claim<'_, F>> {
        self.ensure_open()?;
        self.queue.mark_started();
        let id = self.next_id(false)?;
        Ok(Claim {
            slot: self.queue.slot_ptr(id),
            id,
            producer: self,
            marked_special: Special::None,
            done: false,
        })
    }

    /// Claim a slot and publish it as a hole, skipping it entirely; no
    /// value is surfaced to consumers for this id.
    pub fn skip(&mut self) -> Result<()> {
        let mut claim = self.claim()?;
        claim.mark(Special::Hole);
        claim.publish();
        Ok(())
    }

    /// Claim a slot and publish a flush marker. Each call publishes exactly
    /// one flush boundary value; it does not flush a pending batch.
    pub fn flush(&mut self) -> Result<()> {
        let mut claim = self.claim()?;
        claim.mark(Special::Flush);
        claim.publish();
        Ok(())
    }

    /// Publish an end-of-stream marker and close this producer. Any further
    /// `claim`/`skip`/`eof`/`flush` call returns [`QueueError::ProducerClosed`].
    pub fn eof(&mut self) -> Result<()> {
        self.ensure_open()?;
        let mut claim = self.claim()?;
        claim.mark(Special::Eof);
        claim.publish();
        self.closed = true;
        Ok(())
    }

    /// Commit `id` with `special`, serializing with other producers in
    /// multi-producer mode so the queue cursor advances contiguously.
    fn commit(&mut self, id: SequenceId, special: Special) {
        {
            let slot = unsafe { &mut *self.queue.slot_ptr(id) };
            slot.header = Header { id, special };
        }

        if self.mode() == ProducerMode::Multi {
            let mut first = true;
            loop {
                let current = self.queue.cursor().load(Ordering::Acquire);
                if current == id.wrapping_sub(1) {
                    break;
                }
                self.yield_strategy.yield_wait(first);
                first = false;
            }
        }

        self.queue.cursor().store(id, Ordering::Release);
        self.last_produced_id = id;
        self.yield_strategy.signal();
        trace!(producer = %self.name, id, "published");
    }
}

/// A reserved, not-yet-published slot borrowed from a [`Producer`].
///
/// Holding a `&mut Producer` for the duration of the claim means the
/// borrow checker rejects a second `claim()` before this one is published
/// (or dropped, in which case it is published as a hole so the queue never
/// stalls on a forgotten claim).
pub struct Claim<'a, F: ValueFactory> {
    producer: &'a mut Producer<F>,
    id: SequenceId,
    slot: *mut Value<F::Payload>,
    marked_special: Special,
    done: bool,
}

impl<'a, F: ValueFactory> Claim<'a, F> {
    /// The sequence id this claim will publish under.
    pub fn id(&self) -> SequenceId {
        self.id
    }

    /// Mutable access to the claimed slot's payload.
    pub fn payload_mut(&mut self) -> &mut F::Payload {
        unsafe { &mut (*self.slot).payload }
    }

    fn mark(&mut self, special: Special) {
        self.marked_special = special;
    }

    /// Publish this slot as an ordinary value.
    pub fn publish(mut self) {
        let special = self.marked_special;
        self.done = true;
        self.producer.commit(self.id, special);
    }
}

impl<'a, F: ValueFactory> Drop for Claim<'a, F> {
    fn drop(&mut self) {
        if !self.done {
            // An explicitly marked special (skip/flush/eof) is honored as-is;
            // a claim dropped without any mark or publish becomes a hole so a
            // forgotten claim never surfaces a stale payload to consumers.
            let special = match self.marked_special {
                Special::None => Special::Hole,
                other => other,
            };
            self.producer.commit(self.id, special);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::DefaultFactory;

    fn make_producer(size: usize) -> Producer<DefaultFactory<u64>> {
        let queue = Arc::new(Queue::new("q", size, DefaultFactory::new()).unwrap());
        Producer::new(queue, Box::new(crate::yield_strategy::SpinYield::new()), "p0").unwrap()
    }

    #[test]
    fn test_claim_and_publish_advances_cursor() {
        let mut producer = make_producer(4);
        let start = producer.queue.cursor().load(Ordering::Acquire);
        let mut claim = producer.claim().unwrap();
        *claim.payload_mut() = 7;
        claim.publish();
        assert_eq!(
            producer.queue.cursor().load(Ordering::Acquire),
            start.wrapping_add(1)
        );
    }

    #[test]
    fn test_eof_closes_producer() {
        let mut producer = make_producer(4);
        producer.eof().unwrap();
        assert!(matches!(producer.claim().unwrap_err(), QueueError::ProducerClosed));
    }

    #[test]
    fn test_skip_publishes_hole() {
        let mut producer = make_producer(4);
        let id = producer.queue.cursor().load(Ordering::Acquire).wrapping_add(1);
        producer.skip().unwrap();
        let slot = unsafe { &*producer.queue.slot_ptr(id) };
        assert!(matches!(slot.header.special, Special::Hole));
    }

    #[test]
    fn test_default_batch_size_formula() {
        assert_eq!(default_batch_size(1024, 1), 64);
        assert_eq!(default_batch_size(8, 1), 4);
        assert_eq!(default_batch_size(1, 1), 1);
        assert_eq!(default_batch_size(1024, 100), 5);
    }

    #[test]
    fn test_with_batch_size_zero_restores_default() {
        let producer = make_producer(1024).with_batch_size(7);
        assert_eq!(producer.batch_size, 7);
        let producer = producer.with_batch_size(0);
        assert_eq!(producer.batch_size, default_batch_size(1024, 1));
    }

    #[test]
    fn test_with_batch_size_clamps_to_max() {
        let producer = make_producer(1024).with_batch_size(usize::MAX);
        assert_eq!(producer.batch_size, MAX_BATCH_SIZE);
    }

    #[test]
    fn test_mode_resolves_single_for_lone_producer() {
        let mut producer = make_producer(4);
        assert_eq!(producer.mode(), ProducerMode::Single);
    }

    #[test]
    fn test_mode_resolves_multi_when_queue_has_several_producers() {
        let queue = Arc::new(Queue::new("q", 64, DefaultFactory::<u64>::new()).unwrap());
        let mut a = Producer::new(
            Arc::clone(&queue),
            Box::new(crate::yield_strategy::SpinYield::new()),
            "a",
        )
        .unwrap();
        let mut b =
            Producer::new(queue, Box::new(crate::yield_strategy::SpinYield::new()), "b").unwrap();
        assert_eq!(a.mode(), ProducerMode::Multi);
        assert_eq!(b.mode(), ProducerMode::Multi);
    }
}
