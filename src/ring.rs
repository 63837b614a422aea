//! Bounded MPMC ring of pointer-sized slots (Vyukov-style).
//!
//! ## Memory ordering & synchronization strategy
//!
//! Each slot carries a `sequence` stamp alongside its item:
//!
//! - A slot is **producible** when `slot.seq == tail`.
//! - A slot is **consumable** when `slot.seq == head + 1`.
//! - After a successful enqueue, the publishing thread stores
//!   `seq = tail + 1` with `Release` ordering, so the item write is
//!   visible to whichever consumer observes that store with `Acquire`.
//! - After a successful dequeue, the slot is rearmed with
//!   `seq = head + capacity`, making it producible again once `tail`
//!   wraps back around to it.
//!
//! `head`/`tail` cursors themselves are updated with a `compare_exchange_weak`
//! loop; `Relaxed` suffices there because the `sequence` store/load pair
//! is what actually carries item visibility across threads.
//!
//! This is the same protocol as a classic Vyukov bounded MPMC queue;
//! slots hold a generic `T: Copy` (a pointer, an index, a small
//! handle) rather than an embedded variable-length payload, so the
//! same ring serves both as the inter-thread message-pointer queue and
//! as a buffer pool's free list (see [`crate::pool`]).

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::RingError;

struct Slot<T> {
    /// Sequence stamp: producible when `== tail`, consumable when `== head + 1`.
    sequence: AtomicU64,
    item: UnsafeCell<MaybeUninit<T>>,
}

/// A bounded, lock-free, multi-producer multi-consumer queue of `T`.
///
/// `capacity` must be a power of two (checked at construction); this
/// lets index computation use a bitmask instead of a modulo.
pub struct Ring<T> {
    slots: Box<[Slot<T>]>,
    mask: usize,
    tail: CachePadded<AtomicU64>,
    head: CachePadded<AtomicU64>,
}

// SAFETY: access to each slot's `item` is gated by the `sequence`
// handshake, so `T: Send` is the only bound required for the ring to
// be safely shared across threads.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    /// Creates an empty ring of the given capacity.
    ///
    /// `capacity` must be a nonzero power of two; otherwise returns
    /// [`RingError::InvalidCapacity`] — this never panics.
    pub fn new(capacity: usize) -> Result<Self, RingError> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(RingError::InvalidCapacity);
        }

        let mut slots = Vec::with_capacity(capacity);
        for i in 0..capacity {
            slots.push(Slot {
                sequence: AtomicU64::new(i as u64),
                item: UnsafeCell::new(MaybeUninit::uninit()),
            });
        }

        Ok(Self {
            slots: slots.into_boxed_slice(),
            mask: capacity - 1,
            tail: CachePadded::new(AtomicU64::new(0)),
            head: CachePadded::new(AtomicU64::new(0)),
        })
    }

    /// The ring's fixed capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Attempts to publish `item`. Never allocates, never blocks.
    ///
    /// Returns [`RingError::Full`] once `tail` has outrun `head` by a
    /// full revolution; other producers advancing `tail` concurrently
    /// cause a bounded retry, not an error.
    pub fn enqueue(&self, item: T) -> Result<(), RingError> {
        loop {
            let tail = self.tail.load(Ordering::Relaxed);
            let idx = (tail as usize) & self.mask;
            let slot = &self.slots[idx];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq as i64 - tail as i64;

            if diff == 0 {
                if self
                    .tail
                    .compare_exchange_weak(tail, tail + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    unsafe {
                        (*slot.item.get()).write(item);
                    }
                    slot.sequence.store(tail + 1, Ordering::Release);
                    return Ok(());
                }
                // Another producer claimed this tail value first; reload and retry.
                std::hint::spin_loop();
            } else if diff < 0 {
                return Err(RingError::Full);
            } else {
                // Another producer is mid-publish for this slot; wait it out.
                std::hint::spin_loop();
            }
        }
    }

    /// Attempts to take the oldest published item.
    ///
    /// Returns `None` once `head` has caught up to `tail`; no
    /// allocation, no blocking.
    pub fn dequeue(&self) -> Option<T> {
        loop {
            let head = self.head.load(Ordering::Relaxed);
            let idx = (head as usize) & self.mask;
            let slot = &self.slots[idx];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq as i64 - (head as i64 + 1);

            if diff == 0 {
                if self
                    .head
                    .compare_exchange_weak(head, head + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    let item = unsafe { (*slot.item.get()).assume_init_read() };
                    // Rearm: this slot becomes producible again once tail wraps to it.
                    slot.sequence
                        .store(head + self.capacity() as u64, Ordering::Release);
                    return Some(item);
                }
                std::hint::spin_loop();
            } else if diff < 0 {
                return None;
            } else {
                std::hint::spin_loop();
            }
        }
    }

    /// Approximate occupancy. Not linearizable — advisory only.
    pub fn count(&self) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        tail.saturating_sub(head) as usize
    }
}

impl<T: Copy> Ring<T> {
    /// Looks at the next consumable item without removing it.
    ///
    /// Single-consumer helper: well-defined only when no other thread
    /// is concurrently dequeuing.
    pub fn peek(&self) -> Option<T> {
        self.peek_at(0)
    }

    /// Looks at the item `i` slots ahead of the current head, without
    /// removing it. `peek_at(0)` is equivalent to [`Ring::peek`].
    ///
    /// Single-consumer helper, same caveat as [`Ring::peek`].
    pub fn peek_at(&self, i: usize) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let target = head.wrapping_add(i as u64);
        let idx = (target as usize) & self.mask;
        let slot = &self.slots[idx];
        let seq = slot.sequence.load(Ordering::Acquire);
        if seq == target.wrapping_add(1) {
            // SAFETY: seq == target + 1 means this slot holds a
            // published item; T: Copy makes reading it without
            // invalidating the slot sound.
            Some(unsafe { (*slot.item.get()).assume_init_read() })
        } else {
            None
        }
    }

    /// Drops up to `n` consumable items without returning them.
    /// Returns the number actually advanced over (fewer than `n` if
    /// the ring ran empty first).
    ///
    /// Single-consumer helper, same caveat as [`Ring::peek`].
    pub fn advance(&self, n: usize) -> usize {
        let mut advanced = 0;
        while advanced < n && self.dequeue().is_some() {
            advanced += 1;
        }
        advanced
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        // Drain any items still owned by the ring so `T`'s destructor runs.
        while self.dequeue().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn rejects_non_power_of_two_capacity() {
        assert_eq!(Ring::<u64>::new(0).unwrap_err(), RingError::InvalidCapacity);
        assert_eq!(Ring::<u64>::new(3).unwrap_err(), RingError::InvalidCapacity);
        assert!(Ring::<u64>::new(4).is_ok());
    }

    #[test]
    fn single_producer_preserves_order() {
        let ring = Ring::<u64>::new(16).unwrap();
        for i in 0..10 {
            ring.enqueue(i).unwrap();
        }
        for i in 0..10 {
            assert_eq!(ring.dequeue(), Some(i));
        }
        assert_eq!(ring.dequeue(), None);
    }

    #[test]
    fn enqueue_on_full_ring_errors() {
        let ring = Ring::<u64>::new(4).unwrap();
        for i in 0..4 {
            ring.enqueue(i).unwrap();
        }
        assert_eq!(ring.enqueue(4).unwrap_err(), RingError::Full);
    }

    #[test]
    fn dequeue_on_empty_ring_is_none() {
        let ring = Ring::<u64>::new(4).unwrap();
        assert_eq!(ring.dequeue(), None);
    }

    #[test]
    fn peek_does_not_remove_the_item() {
        let ring = Ring::<u64>::new(4).unwrap();
        ring.enqueue(7).unwrap();
        assert_eq!(ring.peek(), Some(7));
        assert_eq!(ring.peek(), Some(7));
        assert_eq!(ring.dequeue(), Some(7));
        assert_eq!(ring.peek(), None);
    }

    #[test]
    fn peek_at_looks_ahead_of_head() {
        let ring = Ring::<u64>::new(8).unwrap();
        for i in 0..4 {
            ring.enqueue(i).unwrap();
        }
        assert_eq!(ring.peek_at(0), Some(0));
        assert_eq!(ring.peek_at(2), Some(2));
        assert_eq!(ring.peek_at(4), None);
    }

    #[test]
    fn advance_skips_without_returning() {
        let ring = Ring::<u64>::new(8).unwrap();
        for i in 0..5 {
            ring.enqueue(i).unwrap();
        }
        assert_eq!(ring.advance(3), 3);
        assert_eq!(ring.dequeue(), Some(3));
        assert_eq!(ring.advance(10), 1);
        assert_eq!(ring.dequeue(), None);
    }

    #[test]
    fn slots_are_reusable_after_wraparound() {
        let ring = Ring::<u64>::new(4).unwrap();
        for round in 0..5 {
            for i in 0..4 {
                ring.enqueue(round * 4 + i).unwrap();
            }
            for i in 0..4 {
                assert_eq!(ring.dequeue(), Some(round * 4 + i));
            }
        }
    }

    #[test]
    fn contention_preserves_total_count_and_per_producer_order() {
        let capacity = 1024;
        let ring = Arc::new(Ring::<(u32, u32)>::new(capacity).unwrap());
        let producers = 2;
        let per_producer = 10_000;

        let mut handles = Vec::new();
        for p in 0..producers {
            let ring = ring.clone();
            handles.push(thread::spawn(move || {
                for i in 0..per_producer {
                    loop {
                        if ring.enqueue((p, i)).is_ok() {
                            break;
                        }
                        thread::yield_now();
                    }
                }
            }));
        }

        let received = Arc::new(AtomicUsize::new(0));
        let total = producers * per_producer;
        let last_seen = Arc::new(std::sync::Mutex::new(vec![None::<u32>; producers as usize]));
        let consumer = {
            let ring = ring.clone();
            let received = received.clone();
            let last_seen = last_seen.clone();
            thread::spawn(move || loop {
                if let Some((p, i)) = ring.dequeue() {
                    let mut guard = last_seen.lock().unwrap();
                    let prev = guard[p as usize].replace(i);
                    assert!(prev.is_none() || prev.unwrap() < i, "per-producer order violated");
                    if received.fetch_add(1, Ordering::SeqCst) + 1 == total as usize {
                        break;
                    }
                } else {
                    thread::yield_now();
                }
            })
        };

        for h in handles {
            h.join().unwrap();
        }
        consumer.join().unwrap();
        assert_eq!(received.load(Ordering::SeqCst), total as usize);
    }
}
