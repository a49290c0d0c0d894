//! A bounded, lock-free multi-producer multi-consumer queue.
//!
//! Unlike [`crate::Ring`]/[`crate::Channel`] (which achieve multi-producer
//! semantics by giving every producer its own SPSC ring and round-robin
//! draining them from a single consumer), this queue is a genuine MPMC
//! structure: every slot carries its own sequence counter, and producers and
//! consumers both race a compare-exchange on that counter. Any number of
//! threads may push and pop concurrently.
//!
//! Used where independent consumers must drain the same queue, such as
//! fan-out metric ingestion feeding several aggregation rules at once.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// Configuration for a [`Queue`].
#[derive(Debug, Clone, Copy)]
pub struct MpmcConfig {
    /// Capacity of the queue. Must be a non-zero power of two.
    pub capacity: usize,
}

impl Default for MpmcConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// Error constructing or operating on a [`Queue`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// `capacity` was zero.
    #[error("capacity must be non-zero")]
    ZeroCapacity,
    /// `capacity` was not a power of two.
    #[error("capacity {0} is not a power of two")]
    CapacityNotPowerOfTwo(usize),
    /// The queue was full at the time of the push.
    #[error("queue is full")]
    Full,
    /// The queue was empty at the time of the pop.
    #[error("queue is empty")]
    Empty,
}

/// Snapshot of queue operation counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct MpmcStats {
    pub push_attempts: u64,
    pub push_successes: u64,
    pub push_failures: u64,
    pub pop_attempts: u64,
    pub pop_successes: u64,
    pub pop_failures: u64,
}

impl MpmcStats {
    /// Fraction of push attempts that succeeded, in `[0.0, 100.0]`. Returns
    /// `100.0` when no pushes have been attempted yet.
    #[must_use]
    pub fn push_success_rate(&self) -> f64 {
        if self.push_attempts == 0 {
            return 100.0;
        }
        (self.push_successes as f64 / self.push_attempts as f64) * 100.0
    }

    /// Fraction of pop attempts that succeeded, in `[0.0, 100.0]`. Returns
    /// `100.0` when no pops have been attempted yet.
    #[must_use]
    pub fn pop_success_rate(&self) -> f64 {
        if self.pop_attempts == 0 {
            return 100.0;
        }
        (self.pop_successes as f64 / self.pop_attempts as f64) * 100.0
    }
}

#[derive(Default)]
struct Counters {
    push_attempts: AtomicUsize,
    push_successes: AtomicUsize,
    push_failures: AtomicUsize,
    pop_attempts: AtomicUsize,
    pop_successes: AtomicUsize,
    pop_failures: AtomicUsize,
}

struct Slot<T> {
    sequence: AtomicUsize,
    data: UnsafeCell<MaybeUninit<T>>,
}

/// A bounded lock-free MPMC queue, one [`CachePadded`] slot per element.
///
/// Each slot's `sequence` counter encodes whether the slot is ready to be
/// written (sequence == producer's current tail) or ready to be read
/// (sequence == consumer's current head + 1). Producers and consumers race a
/// `compare_exchange_weak` on the shared tail/head counters; the loser simply
/// reloads and retries, so no thread ever blocks another.
pub struct Queue<T> {
    buffer: Box<[CachePadded<Slot<T>>]>,
    mask: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    len: CachePadded<AtomicUsize>,
    counters: Counters,
}

unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Send> Sync for Queue<T> {}

impl<T> Queue<T> {
    /// Creates a new queue with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ZeroCapacity`] or
    /// [`QueueError::CapacityNotPowerOfTwo`] if `config.capacity` is invalid.
    pub fn new(config: MpmcConfig) -> Result<Self, QueueError> {
        let capacity = config.capacity;
        if capacity == 0 {
            return Err(QueueError::ZeroCapacity);
        }
        if !capacity.is_power_of_two() {
            return Err(QueueError::CapacityNotPowerOfTwo(capacity));
        }

        let buffer = (0..capacity)
            .map(|i| {
                CachePadded::new(Slot {
                    sequence: AtomicUsize::new(i),
                    data: UnsafeCell::new(MaybeUninit::uninit()),
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            buffer,
            mask: capacity - 1,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            len: CachePadded::new(AtomicUsize::new(0)),
            counters: Counters::default(),
        })
    }

    /// Queue capacity (always a power of two).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Number of elements currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// True if the queue currently holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attempts to push `value` onto the queue.
    ///
    /// Returns `Ok(())` on success, `Err(QueueError::Full)` if every slot the
    /// producer could claim was already occupied.
    pub fn push(&self, value: T) -> Result<(), QueueError> {
        self.counters.push_attempts.fetch_add(1, Ordering::Relaxed);

        let mut current_tail = self.tail.load(Ordering::Relaxed);
        loop {
            let index = current_tail & self.mask;
            let slot = &self.buffer[index];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq as isize - current_tail as isize;

            if diff == 0 {
                match self.tail.compare_exchange_weak(
                    current_tail,
                    current_tail.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe {
                            (*slot.data.get()).write(value);
                        }
                        slot.sequence
                            .store(current_tail.wrapping_add(1), Ordering::Release);
                        self.len.fetch_add(1, Ordering::Relaxed);
                        self.counters.push_successes.fetch_add(1, Ordering::Relaxed);
                        return Ok(());
                    }
                    Err(observed) => current_tail = observed,
                }
            } else if diff < 0 {
                self.counters.push_failures.fetch_add(1, Ordering::Relaxed);
                return Err(QueueError::Full);
            } else {
                current_tail = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Attempts to pop the oldest element from the queue.
    ///
    /// Returns `Err(QueueError::Empty)` if no element was available.
    pub fn pop(&self) -> Result<T, QueueError> {
        self.counters.pop_attempts.fetch_add(1, Ordering::Relaxed);

        let mut current_head = self.head.load(Ordering::Relaxed);
        loop {
            let index = current_head & self.mask;
            let slot = &self.buffer[index];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq as isize - (current_head.wrapping_add(1)) as isize;

            if diff == 0 {
                match self.head.compare_exchange_weak(
                    current_head,
                    current_head.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = unsafe { (*slot.data.get()).assume_init_read() };
                        slot.sequence
                            .store(current_head.wrapping_add(self.buffer.len()), Ordering::Release);
                        self.len.fetch_sub(1, Ordering::Relaxed);
                        self.counters.pop_successes.fetch_add(1, Ordering::Relaxed);
                        return Ok(value);
                    }
                    Err(observed) => current_head = observed,
                }
            } else if diff < 0 {
                self.counters.pop_failures.fetch_add(1, Ordering::Relaxed);
                return Err(QueueError::Empty);
            } else {
                current_head = self.head.load(Ordering::Relaxed);
            }
        }
    }

    /// Pops up to `max_items` elements, invoking `handler` with each in pop
    /// order. Stops early once the queue goes empty. Returns the number of
    /// elements drained.
    ///
    /// Used by consumers (such as the storage engine's flusher) that want a
    /// bounded-size batch per wakeup rather than draining to empty, so one
    /// slow metric name can't starve the rest of a burst.
    pub fn drain_up_to<F>(&self, max_items: usize, mut handler: F) -> usize
    where
        F: FnMut(T),
    {
        let mut drained = 0;
        while drained < max_items {
            match self.pop() {
                Ok(value) => {
                    handler(value);
                    drained += 1;
                }
                Err(QueueError::Empty) => break,
                Err(_) => break,
            }
        }
        drained
    }

    /// Snapshot of operation counters.
    #[must_use]
    pub fn stats(&self) -> MpmcStats {
        MpmcStats {
            push_attempts: self.counters.push_attempts.load(Ordering::Relaxed) as u64,
            push_successes: self.counters.push_successes.load(Ordering::Relaxed) as u64,
            push_failures: self.counters.push_failures.load(Ordering::Relaxed) as u64,
            pop_attempts: self.counters.pop_attempts.load(Ordering::Relaxed) as u64,
            pop_successes: self.counters.pop_successes.load(Ordering::Relaxed) as u64,
            pop_failures: self.counters.pop_failures.load(Ordering::Relaxed) as u64,
        }
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        // Drain any elements still between head and tail so their
        // destructors run; slots outside that range are uninitialized.
        while self.pop().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn rejects_zero_capacity() {
        assert_eq!(
            Queue::<u64>::new(MpmcConfig { capacity: 0 }).unwrap_err(),
            QueueError::ZeroCapacity
        );
    }

    #[test]
    fn rejects_non_power_of_two() {
        assert_eq!(
            Queue::<u64>::new(MpmcConfig { capacity: 3 }).unwrap_err(),
            QueueError::CapacityNotPowerOfTwo(3)
        );
    }

    #[test]
    fn push_pop_roundtrip() {
        let q = Queue::<u64>::new(MpmcConfig { capacity: 8 }).unwrap();
        for i in 0..8 {
            q.push(i).unwrap();
        }
        assert_eq!(q.len(), 8);
        assert!(matches!(q.push(99), Err(QueueError::Full)));

        for i in 0..8 {
            assert_eq!(q.pop().unwrap(), i);
        }
        assert!(q.is_empty());
        assert!(matches!(q.pop(), Err(QueueError::Empty)));
    }

    #[test]
    fn wraps_around_correctly() {
        let q = Queue::<u64>::new(MpmcConfig { capacity: 4 }).unwrap();
        for round in 0..10u64 {
            q.push(round).unwrap();
            assert_eq!(q.pop().unwrap(), round);
        }
    }

    #[test]
    fn concurrent_producers_and_consumers_preserve_total_count() {
        let q = Arc::new(Queue::<u64>::new(MpmcConfig { capacity: 1024 }).unwrap());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..1000u64 {
                        loop {
                            if q.push(p * 1000 + i).is_ok() {
                                break;
                            }
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        let consumed = Arc::new(AtomicUsize::new(0));
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let q = Arc::clone(&q);
                let consumed = Arc::clone(&consumed);
                thread::spawn(move || loop {
                    if consumed.load(Ordering::Relaxed) >= 4000 {
                        break;
                    }
                    if q.pop().is_ok() {
                        consumed.fetch_add(1, Ordering::Relaxed);
                    } else {
                        thread::yield_now();
                    }
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        for c in consumers {
            c.join().unwrap();
        }

        assert_eq!(consumed.load(Ordering::Relaxed), 4000);
        assert!(q.is_empty());
    }

    #[test]
    fn drain_up_to_stops_at_max_items_or_empty() {
        let q = Queue::<u64>::new(MpmcConfig { capacity: 8 }).unwrap();
        for i in 0..5u64 {
            q.push(i).unwrap();
        }
        let mut drained = Vec::new();
        let n = q.drain_up_to(3, |v| drained.push(v));
        assert_eq!(n, 3);
        assert_eq!(drained, vec![0, 1, 2]);
        assert_eq!(q.len(), 2);

        let mut drained2 = Vec::new();
        let n2 = q.drain_up_to(10, |v| drained2.push(v));
        assert_eq!(n2, 2);
        assert_eq!(drained2, vec![3, 4]);
    }

    #[test]
    fn stats_track_success_and_failure() {
        let q = Queue::<u64>::new(MpmcConfig { capacity: 2 }).unwrap();
        q.push(1).unwrap();
        q.push(2).unwrap();
        assert!(q.push(3).is_err());

        let stats = q.stats();
        assert_eq!(stats.push_successes, 2);
        assert_eq!(stats.push_failures, 1);
        assert!((stats.push_success_rate() - 66.666_666_666_666_66).abs() < 1e-9);
    }
}
