//! Lock-free bounded single-producer/single-consumer queue.
//!
//! This is the building block under every data path in the crate: equipment
//! readers feed the aggregator through one, the aggregator feeds consumers
//! through one, and each page pool keeps its free list in one. The hot path
//! is two atomic loads and one atomic store per operation; there is no mutex
//! and no allocation after construction.
//!
//! # Contract
//!
//! At most one thread may push concurrently with at most one thread popping.
//! Two concurrent pushers (or two concurrent poppers) require external
//! mutual exclusion. Violating this is a data race.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

/// A bounded SPSC queue over a fixed ring of slots.
///
/// `head` and `tail` are monotonic event counters; the slot index is the
/// counter masked by the (power-of-two) physical ring size. The logical
/// capacity requested at construction is enforced separately, so callers
/// observe exactly the capacity they asked for.
pub struct SpscFifo<T> {
    /// Producer cursor: count of elements ever pushed.
    head: CachePadded<AtomicU64>,
    /// Consumer cursor: count of elements ever popped.
    tail: CachePadded<AtomicU64>,
    /// Physical ring size minus one (physical size is a power of two).
    mask: u64,
    /// Logical capacity as requested by the caller.
    capacity: usize,
    /// Slot storage. A slot is initialized iff its counter position lies in
    /// `[tail, head)`.
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// SAFETY: SpscFifo is Send/Sync for Send payloads because each slot is
// accessed by exactly one side at a time: the producer only writes slots in
// `[head, tail + capacity)` before publishing with a Release store, and the
// consumer only reads slots in `[tail, head)` after an Acquire load. The
// counters never allow the two windows to overlap on the same slot.
unsafe impl<T: Send> Send for SpscFifo<T> {}
unsafe impl<T: Send> Sync for SpscFifo<T> {}

impl<T> SpscFifo<T> {
    /// Create a queue with the given logical capacity.
    ///
    /// # Panics
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "fifo capacity must be greater than 0");

        let physical = capacity.next_power_of_two();
        let slots = (0..physical)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
            mask: physical as u64 - 1,
            capacity,
            slots,
        }
    }

    /// Push a value (producer side).
    ///
    /// Returns the value back when the queue is full, so the caller can
    /// retry later without losing it.
    ///
    /// # Errors
    /// `Err(value)` when no free slot is available.
    pub fn push(&self, value: T) -> std::result::Result<(), T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);

        if head.wrapping_sub(tail) >= self.capacity as u64 {
            return Err(value);
        }

        let idx = (head & self.mask) as usize;
        // SAFETY: this slot is outside the consumer's `[tail, head)` window
        // until the Release store below publishes it, and we are the only
        // producer.
        unsafe {
            (*self.slots[idx].get()).write(value);
        }
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Pop the oldest value (consumer side), or `None` when empty.
    pub fn pop(&self) -> Option<T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);

        if tail == head {
            return None;
        }

        let idx = (tail & self.mask) as usize;
        // SAFETY: the Acquire load of `head` proves the producer published
        // this slot, and we are the only consumer; the Release store below
        // hands the slot back to the producer.
        let value = unsafe { (*self.slots[idx].get()).assume_init_read() };
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    /// Number of elements currently queued.
    ///
    /// Exact when called from either endpoint thread; a racing snapshot
    /// otherwise.
    #[must_use]
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail) as usize
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the queue has no free slot.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// The logical capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Drop for SpscFifo<T> {
    fn drop(&mut self) {
        // Drain so queued elements run their destructors.
        while self.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn push_pop_in_order() {
        let fifo = SpscFifo::with_capacity(4);

        fifo.push(1u64).unwrap();
        fifo.push(2).unwrap();
        assert_eq!(fifo.len(), 2);

        assert_eq!(fifo.pop(), Some(1));
        assert_eq!(fifo.pop(), Some(2));
        assert_eq!(fifo.pop(), None);
        assert!(fifo.is_empty());
    }

    #[test]
    fn full_queue_returns_value() {
        let fifo = SpscFifo::with_capacity(2);

        fifo.push(10).unwrap();
        fifo.push(20).unwrap();
        assert!(fifo.is_full());
        assert_eq!(fifo.push(30), Err(30));

        assert_eq!(fifo.pop(), Some(10));
        fifo.push(30).unwrap();
    }

    #[test]
    fn logical_capacity_is_exact_for_non_power_of_two() {
        let fifo = SpscFifo::with_capacity(3);
        for i in 0..3 {
            fifo.push(i).unwrap();
        }
        assert!(fifo.is_full());
        assert_eq!(fifo.push(99), Err(99));
        assert_eq!(fifo.capacity(), 3);
    }

    #[test]
    fn wrap_around_many_rounds() {
        let fifo = SpscFifo::with_capacity(4);

        for round in 0..100u64 {
            for i in 0..4 {
                fifo.push(round * 4 + i).unwrap();
            }
            for i in 0..4 {
                assert_eq!(fifo.pop(), Some(round * 4 + i));
            }
        }
    }

    #[test]
    fn drop_releases_queued_elements() {
        let fifo = SpscFifo::with_capacity(4);
        let marker = Arc::new(());

        fifo.push(Arc::clone(&marker)).unwrap();
        fifo.push(Arc::clone(&marker)).unwrap();
        assert_eq!(Arc::strong_count(&marker), 3);

        drop(fifo);
        assert_eq!(Arc::strong_count(&marker), 1);
    }

    #[test]
    fn cross_thread_order_preserved() {
        const COUNT: u64 = 100_000;
        let fifo = Arc::new(SpscFifo::with_capacity(128));

        let producer = {
            let fifo = Arc::clone(&fifo);
            std::thread::spawn(move || {
                for i in 0..COUNT {
                    let mut value = i;
                    loop {
                        match fifo.push(value) {
                            Ok(()) => break,
                            Err(v) => {
                                value = v;
                                std::thread::yield_now();
                            }
                        }
                    }
                }
            })
        };

        let mut expected = 0;
        while expected < COUNT {
            match fifo.pop() {
                Some(v) => {
                    assert_eq!(v, expected);
                    expected += 1;
                }
                None => std::thread::yield_now(),
            }
        }

        producer.join().unwrap();
        assert!(fifo.is_empty());
    }

    #[test]
    #[should_panic(expected = "capacity must be greater than 0")]
    fn zero_capacity_panics() {
        let _ = SpscFifo::<u8>::with_capacity(0);
    }
}
