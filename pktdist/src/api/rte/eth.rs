// Ethernet Device API
// Port-level operations after rte_ethdev.h, expressed as a trait so the
// pipeline runs on any device implementation.

use arrayvec::ArrayVec;

use super::mbuf::Mbuf;
use super::pktmbuf::MemPool;
use crate::api::Result;

/// Ethernet device port ID
pub type PortId = u16;

/// Queue ID for RX/TX queues
pub type QueueId = u16;

/// Ethernet MAC address
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EtherAddr {
    pub addr_bytes: [u8; 6],
}

impl std::fmt::Display for EtherAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let b = &self.addr_bytes;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Ethernet device configuration
#[derive(Debug, Clone, Default)]
pub struct EthConf {
    /// MTU (0 for device default)
    pub mtu: u32,
}

impl EthConf {
    /// Create a simple configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set MTU
    pub fn mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }
}

/// RX queue configuration
#[derive(Debug, Clone)]
pub struct RxQueueConf {
    /// Number of descriptors
    pub nb_desc: u16,
    /// NUMA socket ID (-1 for any)
    pub socket_id: i32,
}

impl Default for RxQueueConf {
    fn default() -> Self {
        Self {
            nb_desc: 1024,
            socket_id: -1,
        }
    }
}

impl RxQueueConf {
    /// Create a new RxQueueConf with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of descriptors for the RX ring.
    pub fn nb_desc(mut self, n: u16) -> Self {
        self.nb_desc = n;
        self
    }

    /// Set the NUMA socket ID for memory allocation.
    pub fn socket_id(mut self, id: i32) -> Self {
        self.socket_id = id;
        self
    }
}

/// TX queue configuration
#[derive(Debug, Clone)]
pub struct TxQueueConf {
    /// Number of descriptors
    pub nb_desc: u16,
    /// NUMA socket ID (-1 for any)
    pub socket_id: i32,
}

impl Default for TxQueueConf {
    fn default() -> Self {
        Self {
            nb_desc: 1024,
            socket_id: -1,
        }
    }
}

impl TxQueueConf {
    /// Create a new TxQueueConf with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of descriptors for the TX ring.
    pub fn nb_desc(mut self, n: u16) -> Self {
        self.nb_desc = n;
        self
    }

    /// Set the NUMA socket ID for memory allocation.
    pub fn socket_id(mut self, id: i32) -> Self {
        self.socket_id = id;
        self
    }
}

/// Link state as reported by `rte_eth_link_get_nowait`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStatus {
    pub link_up: bool,
    /// Speed in Mbps
    pub link_speed: u32,
    pub full_duplex: bool,
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.link_up {
            write!(
                f,
                "up, {} Mbps, {}",
                self.link_speed,
                if self.full_duplex {
                    "full-duplex"
                } else {
                    "half-duplex"
                }
            )
        } else {
            write!(f, "down")
        }
    }
}

/// Basic per-port hardware counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EthStats {
    /// Packets delivered to the application
    pub ipackets: u64,
    /// Packets accepted for transmission
    pub opackets: u64,
    pub ibytes: u64,
    pub obytes: u64,
    /// Packets dropped by the device because the RX ring was full
    pub imissed: u64,
}

/// A set of Ethernet ports.
///
/// All operations are addressed by port ID. Burst operations are
/// non-blocking and may be called from any thread, one thread per queue.
pub trait EthDev: Send + Sync + 'static {
    /// Get the number of available ports. Valid IDs are `0..count_avail()`.
    fn count_avail(&self) -> u16;

    /// Configure the number of RX/TX queues of a stopped port.
    fn configure(
        &self,
        port_id: PortId,
        nb_rx_queues: u16,
        nb_tx_queues: u16,
        conf: &EthConf,
    ) -> Result<()>;

    /// Setup an RX queue. Received mbufs come from `mempool`.
    fn rx_queue_setup(
        &self,
        port_id: PortId,
        queue_id: QueueId,
        conf: &RxQueueConf,
        mempool: &MemPool,
    ) -> Result<()>;

    /// Setup a TX queue.
    fn tx_queue_setup(&self, port_id: PortId, queue_id: QueueId, conf: &TxQueueConf) -> Result<()>;

    fn start(&self, port_id: PortId) -> Result<()>;

    fn stop(&self, port_id: PortId) -> Result<()>;

    /// Current link state, without waiting.
    fn link(&self, port_id: PortId) -> Result<LinkStatus>;

    fn mac_addr(&self, port_id: PortId) -> Result<EtherAddr>;

    fn promiscuous_enable(&self, port_id: PortId) -> Result<()>;

    /// NUMA socket of the port, -1 if unknown.
    fn socket_id(&self, port_id: PortId) -> i32;

    fn stats(&self, port_id: PortId) -> Result<EthStats>;

    /// Receive a burst of packets, appended to `bufs` up to its remaining
    /// capacity.
    ///
    /// Returns the number of packets received.
    fn rx_burst<const N: usize>(
        &self,
        port_id: PortId,
        queue_id: QueueId,
        bufs: &mut ArrayVec<Mbuf, N>,
    ) -> usize;

    /// Transmit packets taken from the front of `bufs`.
    ///
    /// Returns the number sent. The device owns sent packets; unsent ones
    /// remain in `bufs` in order.
    fn tx_burst<const N: usize>(
        &self,
        port_id: PortId,
        queue_id: QueueId,
        bufs: &mut ArrayVec<Mbuf, N>,
    ) -> usize;
}

/// Builder for configuring and starting an Ethernet port
pub struct EthDevBuilder {
    port_id: PortId,
    eth_conf: EthConf,
    nb_rx_queues: u16,
    nb_tx_queues: u16,
    rx_queue_conf: RxQueueConf,
    tx_queue_conf: TxQueueConf,
    promiscuous: bool,
}

impl EthDevBuilder {
    /// Create a new builder for the given port
    pub fn new(port_id: PortId) -> Self {
        Self {
            port_id,
            eth_conf: EthConf::default(),
            nb_rx_queues: 1,
            nb_tx_queues: 1,
            rx_queue_conf: RxQueueConf::default(),
            tx_queue_conf: TxQueueConf::default(),
            promiscuous: false,
        }
    }

    /// Set device configuration
    pub fn eth_conf(mut self, conf: EthConf) -> Self {
        self.eth_conf = conf;
        self
    }

    /// Set number of RX queues
    pub fn nb_rx_queues(mut self, n: u16) -> Self {
        self.nb_rx_queues = n;
        self
    }

    /// Set number of TX queues
    pub fn nb_tx_queues(mut self, n: u16) -> Self {
        self.nb_tx_queues = n;
        self
    }

    /// Set RX queue configuration (applied to all queues)
    pub fn rx_queue_conf(mut self, conf: RxQueueConf) -> Self {
        self.rx_queue_conf = conf;
        self
    }

    /// Set TX queue configuration (applied to all queues)
    pub fn tx_queue_conf(mut self, conf: TxQueueConf) -> Self {
        self.tx_queue_conf = conf;
        self
    }

    /// Enable promiscuous mode
    pub fn promiscuous(mut self) -> Self {
        self.promiscuous = true;
        self
    }

    /// Configure and start the port on `dev`
    ///
    /// This will:
    /// 1. Configure the port
    /// 2. Setup all RX queues
    /// 3. Setup all TX queues
    /// 4. Start the port
    /// 5. Enable promiscuous mode (if set)
    pub fn build<D: EthDev>(self, dev: &D, mempool: &MemPool) -> Result<()> {
        dev.configure(
            self.port_id,
            self.nb_rx_queues,
            self.nb_tx_queues,
            &self.eth_conf,
        )?;

        for q in 0..self.nb_rx_queues {
            dev.rx_queue_setup(self.port_id, q, &self.rx_queue_conf, mempool)?;
        }

        for q in 0..self.nb_tx_queues {
            dev.tx_queue_setup(self.port_id, q, &self.tx_queue_conf)?;
        }

        dev.start(self.port_id)?;

        if self.promiscuous {
            dev.promiscuous_enable(self.port_id)?;
        }

        Ok(())
    }
}

/// Iterate over available port IDs
pub fn iter_ports<D: EthDev>(dev: &D) -> std::ops::Range<PortId> {
    0..dev.count_avail()
}
