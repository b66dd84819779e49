// Mbuf API
// A packet buffer drawn from a MemPool, with the metadata the pipeline needs.

use std::mem::ManuallyDrop;
use std::sync::Arc;

use super::pktmbuf::{MemPool, PoolInner};

/// Backing storage of an [`Mbuf`]. Recycled through the pool's free list.
pub(crate) struct MbufData {
    buf: Box<[u8]>,
    data_len: usize,
    port: u16,
    out_port: u16,
    hash: u32,
}

impl MbufData {
    pub(crate) fn new(data_room_size: u16) -> Self {
        Self {
            buf: vec![0u8; data_room_size as usize].into_boxed_slice(),
            data_len: 0,
            port: 0,
            out_port: 0,
            hash: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.data_len = 0;
        self.port = 0;
        self.out_port = 0;
        self.hash = 0;
    }
}

/// A packet buffer.
///
/// This provides a safe, buffer-like interface for packet data.
/// The buffer goes back to its pool when dropped, so every packet has
/// exactly one owner at a time and is released exactly once.
pub struct Mbuf {
    inner: ManuallyDrop<Box<MbufData>>,
    pool: Arc<PoolInner>,
}

impl Mbuf {
    /// Allocate a new mbuf from the given mempool.
    ///
    /// Returns `None` if allocation fails (pool exhausted).
    #[inline]
    pub fn alloc(mempool: &MemPool) -> Option<Self> {
        mempool.take().map(|(data, pool)| Mbuf {
            inner: ManuallyDrop::new(data),
            pool,
        })
    }

    /// Get the current data length (bytes of valid data).
    #[inline]
    pub fn data_len(&self) -> usize {
        self.inner.data_len
    }

    /// Size of the data room.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.buf.len()
    }

    /// Get the tailroom (unused space at the end of the buffer).
    #[inline]
    pub fn tailroom(&self) -> usize {
        self.capacity() - self.data_len()
    }

    /// Check if the mbuf is empty (no data).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data_len() == 0
    }

    /// Get a slice of the packet data.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.inner.buf[..self.inner.data_len]
    }

    /// Get a mutable slice of the packet data.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        let len = self.inner.data_len;
        &mut self.inner.buf[..len]
    }

    /// Append `len` bytes to the end of the packet data.
    ///
    /// Returns a mutable slice to the newly appended region, or `None` if
    /// there is not enough tailroom.
    #[inline]
    pub fn append(&mut self, len: usize) -> Option<&mut [u8]> {
        if len > self.tailroom() {
            return None;
        }
        let start = self.inner.data_len;
        self.inner.data_len += len;
        Some(&mut self.inner.buf[start..start + len])
    }

    /// Remove `len` bytes from the end of the packet data.
    ///
    /// Returns `false` if `len` exceeds the current data length.
    #[inline]
    pub fn trim(&mut self, len: usize) -> bool {
        if len > self.inner.data_len {
            return false;
        }
        self.inner.data_len -= len;
        true
    }

    /// Replace the packet data with `src`.
    ///
    /// Returns `false` if `src` does not fit in the data room.
    pub fn copy_from_slice(&mut self, src: &[u8]) -> bool {
        if src.len() > self.capacity() {
            return false;
        }
        self.inner.buf[..src.len()].copy_from_slice(src);
        self.inner.data_len = src.len();
        true
    }

    /// Clear data and metadata, keeping the buffer.
    #[inline]
    pub fn reset(&mut self) {
        self.inner.reset();
    }

    /// Port the packet was received on.
    #[inline]
    pub fn port(&self) -> u16 {
        self.inner.port
    }

    #[inline]
    pub fn set_port(&mut self, port: u16) {
        self.inner.port = port;
    }

    /// Port the packet should leave on. Workers rewrite it.
    #[inline]
    pub fn out_port(&self) -> u16 {
        self.inner.out_port
    }

    #[inline]
    pub fn set_out_port(&mut self, port: u16) {
        self.inner.out_port = port;
    }

    /// Flow hash, used for flow-affine scheduling.
    #[inline]
    pub fn hash(&self) -> u32 {
        self.inner.hash
    }

    #[inline]
    pub fn set_hash(&mut self, hash: u32) {
        self.inner.hash = hash;
    }
}

impl Drop for Mbuf {
    fn drop(&mut self) {
        // SAFETY: `inner` is taken exactly once, here, and never touched again.
        let data = unsafe { ManuallyDrop::take(&mut self.inner) };
        self.pool.put(data);
    }
}

impl AsRef<[u8]> for Mbuf {
    fn as_ref(&self) -> &[u8] {
        self.data()
    }
}

impl std::fmt::Debug for Mbuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mbuf")
            .field("data_len", &self.data_len())
            .field("port", &self.port())
            .field("out_port", &self.out_port())
            .field("hash", &self.hash())
            .finish()
    }
}
