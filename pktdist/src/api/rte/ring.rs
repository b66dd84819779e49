// Ring API
// Bounded FIFO after rte_ring created with RING_F_SP_ENQ | RING_F_SC_DEQ.

use std::sync::Arc;

use arrayvec::ArrayVec;
use crossbeam_queue::ArrayQueue;

use crate::api::{Result, check_arg};

/// Ring creation flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingFlags(u32);

impl RingFlags {
    /// Use `count` as the exact usable size instead of a power of two
    /// with one slot reserved.
    pub const EXACT_SZ: Self = Self(0x4);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for RingFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Storage shared by the two ends of a ring.
pub struct Ring<T> {
    name: String,
    queue: ArrayQueue<T>,
}

impl<T> Ring<T> {
    /// Create a ring and return its producer and consumer ends.
    ///
    /// Without [`RingFlags::EXACT_SZ`], `count` must be a power of two and
    /// the ring holds `count - 1` entries. With it, any non-zero `count` is
    /// the capacity. Anything else fails with `EINVAL`.
    ///
    /// Neither end is `Clone`, so each ring has exactly one producer and one
    /// consumer.
    pub fn create(
        name: impl Into<String>,
        count: u32,
        flags: RingFlags,
    ) -> Result<(RingProducer<T>, RingConsumer<T>)> {
        let capacity = if flags.contains(RingFlags::EXACT_SZ) {
            check_arg(count > 0)?;
            count
        } else {
            check_arg(count >= 2 && count.is_power_of_two())?;
            count - 1
        };
        let name = name.into();
        tracing::debug!(ring = %name, capacity, "Creating ring");
        let ring = Arc::new(Ring {
            name,
            queue: ArrayQueue::new(capacity as usize),
        });
        Ok((
            RingProducer { ring: ring.clone() },
            RingConsumer { ring },
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of entries.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Number of entries currently queued.
    #[inline]
    pub fn count(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn free_count(&self) -> usize {
        self.capacity() - self.count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Enqueue end of a [`Ring`].
pub struct RingProducer<T> {
    ring: Arc<Ring<T>>,
}

impl<T> RingProducer<T> {
    #[inline]
    pub fn ring(&self) -> &Ring<T> {
        &self.ring
    }

    /// Enqueue one entry, handing it back if the ring is full.
    #[inline]
    pub fn enqueue(&self, value: T) -> std::result::Result<(), T> {
        self.ring.queue.push(value)
    }

    /// Enqueue as many entries as fit, taken from the front of `bufs`.
    ///
    /// Returns the number moved. Entries that did not fit stay in `bufs`, in
    /// their original order, still owned by the caller.
    pub fn enqueue_burst<const N: usize>(&self, bufs: &mut ArrayVec<T, N>) -> usize {
        let mut moved = 0;
        let mut rest: ArrayVec<T, N> = ArrayVec::new();
        let mut drain = bufs.drain(..);
        for value in drain.by_ref() {
            if let Err(value) = self.ring.queue.push(value) {
                rest.push(value);
                break;
            }
            moved += 1;
        }
        rest.extend(drain);
        *bufs = rest;
        moved
    }
}

/// Dequeue end of a [`Ring`].
pub struct RingConsumer<T> {
    ring: Arc<Ring<T>>,
}

impl<T> RingConsumer<T> {
    #[inline]
    pub fn ring(&self) -> &Ring<T> {
        &self.ring
    }

    #[inline]
    pub fn dequeue(&self) -> Option<T> {
        self.ring.queue.pop()
    }

    /// Dequeue up to `max` entries, appending to `bufs` up to its remaining
    /// capacity.
    ///
    /// Returns the number of entries moved.
    pub fn dequeue_burst<const N: usize>(&self, bufs: &mut ArrayVec<T, N>, max: usize) -> usize {
        let want = max.min(bufs.remaining_capacity());
        let mut moved = 0;
        while moved < want {
            match self.ring.queue.pop() {
                Some(value) => {
                    bufs.push(value);
                    moved += 1;
                }
                None => break,
            }
        }
        moved
    }
}

impl<T> std::fmt::Debug for RingProducer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingProducer")
            .field("name", &self.ring.name)
            .field("count", &self.ring.count())
            .finish()
    }
}

impl<T> std::fmt::Debug for RingConsumer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingConsumer")
            .field("name", &self.ring.name)
            .field("count", &self.ring.count())
            .finish()
    }
}
