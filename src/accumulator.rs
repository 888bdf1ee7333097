//! Per-worker accumulator slots.
//!
//! A stateful stage is shared by every worker of a run, but each worker only
//! ever touches its own slot. Slots are addressed by the rayon worker index of
//! the calling thread; the thread that drives a sequential run (not a pool
//! worker) uses slot 0. Results are combined once, at finalize, with a reduce
//! function the stage author supplies; it must be commutative and associative
//! because partitions finish in no particular order.
//!
//! Each slot sits behind its own mutex. With one slot per worker the lock is
//! uncontended; when a pool is larger than the slot count, workers wrap around
//! and share a slot, which stays correct but serializes them.

use rayon::current_thread_index;
use std::sync::{Mutex, PoisonError};

/// One accumulator of type `A` per worker thread.
#[derive(Debug)]
pub struct PerWorker<A> {
    slots: Box<[Mutex<A>]>,
}

impl<A: Default> PerWorker<A> {
    /// One slot per logical CPU plus one for a non-pool caller.
    #[must_use]
    pub fn new() -> Self {
        Self::with_slots(num_cpus::get() + 1)
    }

    /// A fixed number of slots (at least one).
    #[must_use]
    pub fn with_slots(count: usize) -> Self {
        Self {
            slots: (0..count.max(1)).map(|_| Mutex::new(A::default())).collect(),
        }
    }

    /// Put every slot back to its default value.
    pub fn reset(&self) {
        for slot in &self.slots {
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = A::default();
        }
    }
}

impl<A: Default> Default for PerWorker<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> PerWorker<A> {
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn local_index(&self) -> usize {
        current_thread_index().map_or(0, |i| i + 1) % self.slots.len()
    }

    /// Run `f` against the calling worker's slot.
    pub fn with_local<R>(&self, f: impl FnOnce(&mut A) -> R) -> R {
        let mut slot = self.slots[self.local_index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut slot)
    }

    /// Fold every slot into one value.
    pub fn reduce<B>(&self, init: B, mut f: impl FnMut(B, &A) -> B) -> B {
        self.slots.iter().fold(init, |acc, slot| {
            let slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
            f(acc, &slot)
        })
    }
}

/// Cloning copies every slot, not only the caller's.
impl<A: Clone> Clone for PerWorker<A> {
    fn clone(&self) -> Self {
        Self {
            slots: self
                .slots
                .iter()
                .map(|slot| Mutex::new(slot.lock().unwrap_or_else(PoisonError::into_inner).clone()))
                .collect(),
        }
    }
}
