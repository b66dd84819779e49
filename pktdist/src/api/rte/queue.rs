// RX/TX Queue API
// Per-queue handles bound to a device, used by the stage that owns the queue.

use std::sync::Arc;

use arrayvec::ArrayVec;

use super::eth::{EthDev, PortId, QueueId};
use super::mbuf::Mbuf;

/// RX Queue handle for receiving packets
pub struct RxQueue<D: EthDev> {
    dev: Arc<D>,
    port_id: PortId,
    queue_id: QueueId,
}

impl<D: EthDev> RxQueue<D> {
    /// Create a new RX queue handle.
    ///
    /// Note: The queue must already be set up via `EthDev::rx_queue_setup()`.
    #[inline]
    pub fn new(dev: Arc<D>, port_id: PortId, queue_id: QueueId) -> Self {
        Self {
            dev,
            port_id,
            queue_id,
        }
    }

    /// Get the port ID
    #[inline]
    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    /// Get the queue ID
    #[inline]
    pub fn queue_id(&self) -> QueueId {
        self.queue_id
    }

    /// Receive a burst of packets into the provided buffer.
    ///
    /// Returns the number of packets received.
    #[inline]
    pub fn rx<const N: usize>(&self, mbufs: &mut ArrayVec<Mbuf, N>) -> usize {
        if mbufs.is_full() {
            return 0;
        }
        self.dev.rx_burst(self.port_id, self.queue_id, mbufs)
    }
}

/// TX Queue handle for transmitting packets
pub struct TxQueue<D: EthDev> {
    dev: Arc<D>,
    port_id: PortId,
    queue_id: QueueId,
}

impl<D: EthDev> TxQueue<D> {
    /// Create a new TX queue handle.
    ///
    /// Note: The queue must already be set up via `EthDev::tx_queue_setup()`.
    #[inline]
    pub fn new(dev: Arc<D>, port_id: PortId, queue_id: QueueId) -> Self {
        Self {
            dev,
            port_id,
            queue_id,
        }
    }

    /// Get the port ID
    #[inline]
    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    /// Get the queue ID
    #[inline]
    pub fn queue_id(&self) -> QueueId {
        self.queue_id
    }

    /// Transmit a burst of packets.
    ///
    /// Returns the number of packets transmitted. Successfully transmitted
    /// mbufs are removed from the front of `mbufs`; untransmitted ones remain.
    #[inline]
    pub fn tx<const N: usize>(&self, mbufs: &mut ArrayVec<Mbuf, N>) -> usize {
        if mbufs.is_empty() {
            return 0;
        }
        self.dev.tx_burst(self.port_id, self.queue_id, mbufs)
    }
}
