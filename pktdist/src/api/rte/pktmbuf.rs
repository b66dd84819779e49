// pktmbuf pool API
// Mirrors rte_pktmbuf_pool_create / rte_mempool_avail_count semantics.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crossbeam_queue::ArrayQueue;

use super::mbuf::{Mbuf, MbufData};
use crate::api::{Result, check_arg};

/// Default data room size of a packet buffer.
pub const DEFAULT_DATA_ROOM_SIZE: u16 = 2048;

/// Shared state behind a [`MemPool`] and every [`Mbuf`] drawn from it.
pub(crate) struct PoolInner {
    name: String,
    /// Buffers that have been created and are currently free.
    free: ArrayQueue<Box<MbufData>>,
    size: u32,
    /// Buffers created so far. Creation is lazy and stops at `size`.
    created: AtomicU32,
    in_use: AtomicU32,
    data_room_size: u16,
}

impl PoolInner {
    fn get(&self) -> Option<Box<MbufData>> {
        let data = match self.free.pop() {
            Some(data) => data,
            None => {
                let mut created = self.created.load(Ordering::Relaxed);
                loop {
                    if created >= self.size {
                        return None;
                    }
                    match self.created.compare_exchange_weak(
                        created,
                        created + 1,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => break Box::new(MbufData::new(self.data_room_size)),
                        Err(actual) => created = actual,
                    }
                }
            }
        };
        self.in_use.fetch_add(1, Ordering::Relaxed);
        Some(data)
    }

    pub(crate) fn put(&self, mut data: Box<MbufData>) {
        data.reset();
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        // The free list holds `size` entries and at most `size` buffers exist,
        // so the push cannot fail.
        let _ = self.free.push(data);
    }
}

/// Configuration for creating a MemPool
#[derive(Debug, Clone)]
pub struct MemPoolConfig {
    /// Number of mbufs in the pool (optimum: 2^q - 1)
    pub num_mbufs: u32,
    /// Size of the data buffer of each mbuf
    pub data_room_size: u16,
}

impl Default for MemPoolConfig {
    fn default() -> Self {
        Self {
            num_mbufs: 8191, // 2^13 - 1
            data_room_size: DEFAULT_DATA_ROOM_SIZE,
        }
    }
}

impl MemPoolConfig {
    /// Create a new MemPoolConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of mbufs in the pool.
    pub fn num_mbufs(mut self, n: u32) -> Self {
        self.num_mbufs = n;
        self
    }

    /// Set the data room size.
    pub fn data_room_size(mut self, size: u16) -> Self {
        self.data_room_size = size;
        self
    }
}

/// Fixed-capacity pool of packet buffers.
///
/// Cloning the handle shares the pool. Buffers are created on first use up
/// to `num_mbufs` and recycled through a lock-free free list; an [`Mbuf`]
/// returns its buffer here when dropped.
#[derive(Clone)]
pub struct MemPool {
    inner: Arc<PoolInner>,
}

impl MemPool {
    /// Create a new pktmbuf mempool
    ///
    /// Fails with `EINVAL` when `num_mbufs` or `data_room_size` is zero.
    pub fn create(name: impl Into<String>, config: &MemPoolConfig) -> Result<Self> {
        check_arg(config.num_mbufs > 0 && config.data_room_size > 0)?;
        let name = name.into();
        tracing::debug!(
            pool = %name,
            num_mbufs = config.num_mbufs,
            data_room_size = config.data_room_size,
            "Creating mempool"
        );
        Ok(Self {
            inner: Arc::new(PoolInner {
                name,
                free: ArrayQueue::new(config.num_mbufs as usize),
                size: config.num_mbufs,
                created: AtomicU32::new(0),
                in_use: AtomicU32::new(0),
                data_room_size: config.data_room_size,
            }),
        })
    }

    /// Create a mempool with default configuration
    pub fn create_default(name: impl Into<String>, num_mbufs: u32) -> Result<Self> {
        let config = MemPoolConfig {
            num_mbufs,
            ..Default::default()
        };
        Self::create(name, &config)
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Total number of mbufs the pool can hand out.
    #[inline]
    pub fn size(&self) -> u32 {
        self.inner.size
    }

    /// Get the number of available (free) objects in the pool
    #[inline]
    pub fn avail_count(&self) -> u32 {
        self.inner.size - self.in_use_count()
    }

    /// Number of mbufs currently owned by someone outside the pool.
    #[inline]
    pub fn in_use_count(&self) -> u32 {
        self.inner.in_use.load(Ordering::Relaxed)
    }

    /// Get the data room size for mbufs in this pool.
    #[inline]
    pub fn data_room_size(&self) -> u16 {
        self.inner.data_room_size
    }

    /// Try to allocate an mbuf from this pool.
    ///
    /// Returns `None` if the pool is exhausted.
    #[inline]
    pub fn try_alloc(&self) -> Option<Mbuf> {
        Mbuf::alloc(self)
    }

    /// Fill a batch of mbufs up to the remaining capacity of the ArrayVec.
    ///
    /// Returns the number of mbufs allocated.
    #[inline]
    pub fn fill_batch<const N: usize>(&self, batch: &mut arrayvec::ArrayVec<Mbuf, N>) -> usize {
        let mut count = 0;
        while !batch.is_full() {
            match self.try_alloc() {
                Some(mbuf) => {
                    batch.push(mbuf);
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    pub(crate) fn take(&self) -> Option<(Box<MbufData>, Arc<PoolInner>)> {
        self.inner.get().map(|data| (data, self.inner.clone()))
    }
}

impl std::fmt::Debug for MemPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemPool")
            .field("name", &self.inner.name)
            .field("size", &self.inner.size)
            .field("in_use", &self.in_use_count())
            .finish()
    }
}
