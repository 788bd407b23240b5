//! Consumers: read values in order, honoring dependencies on other consumers.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::trace;

use crate::constants::DEFAULT_RELEASE_BATCH_SIZE;
use crate::error::{QueueError, Result};
use crate::queue::Queue;
use crate::sequence::{seq_lt, PaddedSequence, SequenceId};
use crate::value::{Special, ValueFactory};
use crate::yield_strategy::YieldStrategy;

/// What a consumer saw when it called [`Consumer::next`].
pub enum ConsumerEvent<'a, P> {
    /// An ordinary application value.
    Value(&'a P),
    /// A producer-published flush boundary.
    Flush,
    /// One producer has closed. `remaining` is how many producers this
    /// consumer is still waiting on before it is fully drained.
    Eof { remaining: usize },
}

/// Lifecycle state of a [`Consumer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Active,
    /// Every producer has published `EOF`; remaining published values (if
    /// any) are still being drained.
    Draining,
    /// Fully drained; [`Consumer::next`] now returns [`QueueError::ConsumerClosed`].
    Closed,
}

/// A handle that reads values out of a [`Queue`] in sequence order.
pub struct Consumer<F: ValueFactory> {
    queue: Arc<Queue<F>>,
    index: usize,
    cursor: Arc<PaddedSequence>,
    dependencies: Vec<Arc<PaddedSequence>>,
    yield_strategy: Box<dyn YieldStrategy>,
    current_id: SequenceId,
    last_available_id: SequenceId,
    eof_count: usize,
    release_every: usize,
    unreleased: usize,
    state: ConsumerState,
    name: String,
}

impl<F: ValueFactory> Consumer<F> {
    /// Register a new consumer against `queue`.
    pub fn new(
        queue: Arc<Queue<F>>,
        yield_strategy: Box<dyn YieldStrategy>,
        name: impl Into<String>,
    ) -> Result<Self> {
        let (index, cursor) = queue.register_consumer()?;
        let start = cursor.load(Ordering::Acquire);
        Ok(Self {
            queue,
            index,
            cursor,
            dependencies: Vec::new(),
            yield_strategy,
            current_id: start,
            last_available_id: start,
            eof_count: 0,
            release_every: DEFAULT_RELEASE_BATCH_SIZE,
            unreleased: 0,
            state: ConsumerState::Active,
            name: name.into(),
        })
    }

    /// Make this consumer wait behind `other`: it will never read an id
    /// `other` hasn't read yet. Rejected if it would create a cycle.
    pub fn add_dependency(&mut self, other: &Consumer<F>) -> Result<()> {
        self.queue.add_dependency(self.index, other.index)?;
        self.dependencies.push(Arc::clone(&other.cursor));
        Ok(())
    }

    /// Release the consumer's cursor to producers every `n` consumed
    /// values instead of after every single one.
    pub fn with_release_batch_size(mut self, n: usize) -> Self {
        self.release_every = n.max(1);
        self
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// This consumer's last released sequence id, for diagnostics only;
    /// not required by the next/release protocol.
    pub fn cursor(&self) -> SequenceId {
        self.cursor.load(Ordering::Acquire)
    }

    fn release_cursor(&mut self, force: bool) {
        self.unreleased += 1;
        if force || self.unreleased >= self.release_every {
            self.cursor.store(self.current_id, Ordering::Release);
            self.yield_strategy.signal();
            self.unreleased = 0;
        }
    }

    /// Wait until `id` has been published by producers and is not behind
    /// any consumer this one depends on.
    fn wait_for_available(&mut self, id: SequenceId) -> SequenceId {
        let mut first = true;
        loop {
            let producer_bound = self.queue.cursor().load(Ordering::Acquire);
            let mut bound = producer_bound;
            for dep in &self.dependencies {
                let v = dep.load(Ordering::Acquire);
                if seq_lt(v, bound) {
                    bound = v;
                }
            }
            if !seq_lt(bound, id) {
                return bound;
            }
            self.yield_strategy.yield_wait(first);
            first = false;
        }
    }

    /// Read the next value, blocking until it's available. Returns
    /// [`QueueError::ConsumerClosed`] once every producer has closed and
    /// every published value has been drained.
    pub fn next(&mut self) -> Result<ConsumerEvent<'_, F::Payload>> {
        if self.state == ConsumerState::Closed {
            return Err(QueueError::ConsumerClosed);
        }
        self.queue.mark_started();

        let id = self.current_id.wrapping_add(1);

        // Skip over holes without surfacing them.
        let mut target = id;
        loop {
            if seq_lt(self.last_available_id, target) {
                self.last_available_id = self.wait_for_available(target);
            }

            let special = {
                let slot = unsafe { &*self.queue.slot_ptr(target) };
                slot.header.special
            };

            match special {
                Special::Hole => {
                    self.current_id = target;
                    self.release_cursor(false);
                    target = target.wrapping_add(1);
                    continue;
                }
                Special::Eof => {
                    self.current_id = target;
                    self.release_cursor(true);
                    self.eof_count += 1;
                    let remaining = self
                        .queue
                        .producer_count()
                        .saturating_sub(self.eof_count);
                    if remaining == 0 {
                        self.state = ConsumerState::Closed;
                    } else {
                        self.state = ConsumerState::Draining;
                    }
                    trace!(consumer = %self.name, remaining, "eof observed");
                    return Ok(ConsumerEvent::Eof { remaining });
                }
                Special::Flush => {
                    self.current_id = target;
                    self.release_cursor(false);
                    return Ok(ConsumerEvent::Flush);
                }
                Special::None => {
                    self.current_id = target;
                    self.release_cursor(false);
                    let payload = unsafe { &(*self.queue.slot_ptr(target)).payload };
                    return Ok(ConsumerEvent::Value(payload));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::Producer;
    use crate::value::DefaultFactory;
    use crate::yield_strategy::SpinYield;

    fn make_pair(size: usize) -> (Producer<DefaultFactory<u64>>, Consumer<DefaultFactory<u64>>) {
        let queue = Arc::new(Queue::new("q", size, DefaultFactory::new()).unwrap());
        let producer =
            Producer::new(Arc::clone(&queue), Box::new(SpinYield::new()), "p0").unwrap();
        let consumer = Consumer::new(queue, Box::new(SpinYield::new()), "c0").unwrap();
        (producer, consumer)
    }

    #[test]
    fn test_consumer_reads_published_value() {
        let (mut producer, mut consumer) = make_pair(4);
        let mut claim = producer.claim().unwrap();
        *claim.payload_mut() = 42;
        claim.publish();

        match consumer.next().unwrap() {
            ConsumerEvent::Value(v) => assert_eq!(*v, 42),
            _ => panic!("expected a value"),
        }
    }

    #[test]
    fn test_consumer_skips_holes() {
        let (mut producer, mut consumer) = make_pair(4);
        producer.skip().unwrap();
        let mut claim = producer.claim().unwrap();
        *claim.payload_mut() = 99;
        claim.publish();

        match consumer.next().unwrap() {
            ConsumerEvent::Value(v) => assert_eq!(*v, 99),
            _ => panic!("expected a value, hole should have been skipped"),
        }
    }

    #[test]
    fn test_consumer_closes_after_eof() {
        let (mut producer, mut consumer) = make_pair(4);
        producer.eof().unwrap();

        match consumer.next().unwrap() {
            ConsumerEvent::Eof { remaining: 0 } => {}
            _ => panic!("expected eof with 0 remaining"),
        }
        assert_eq!(consumer.state(), ConsumerState::Closed);
        assert!(matches!(consumer.next().unwrap_err(), QueueError::ConsumerClosed));
    }
}
