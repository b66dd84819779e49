//! Ring-backed virtual Ethernet device.
//!
//! Every port owns two in-memory descriptor rings. The RX ring is filled by a
//! traffic peer through [`NetRing::inject`] and drained by `rx_burst`; the
//! wire ring collects whatever `tx_burst` accepted and is drained by the peer
//! through [`NetRing::take_transmitted`]. A port behaves like hardware: it
//! must be configured, have its queues set up and be started before it moves
//! packets, and a full ring refuses packets instead of blocking.
//!
//! ```
//! use pktdist::api::rte::eth::{EthDev, EthDevBuilder};
//! use pktdist::api::rte::net_ring::NetRing;
//! use pktdist::api::rte::pktmbuf::MemPool;
//!
//! let dev = NetRing::new(1);
//! let pool = MemPool::create_default("doc_pool", 64).unwrap();
//! EthDevBuilder::new(0).build(&dev, &pool).unwrap();
//!
//! let pkt = dev.alloc(0).unwrap();
//! dev.inject(0, pkt).unwrap();
//!
//! let mut bufs = arrayvec::ArrayVec::<_, 8>::new();
//! assert_eq!(dev.rx_burst(0, 0, &mut bufs), 1);
//! ```

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU16, AtomicU32, AtomicU64, Ordering};

use arrayvec::ArrayVec;
use crossbeam_queue::ArrayQueue;
use crossbeam_utils::CachePadded;

use super::eth::{
    EthConf, EthDev, EthStats, EtherAddr, LinkStatus, PortId, QueueId, RxQueueConf, TxQueueConf,
};
use super::mbuf::Mbuf;
use super::pktmbuf::MemPool;
use crate::api::{Errno, Result, check_arg};

/// Largest MTU a port accepts.
pub const MAX_MTU: u32 = 9000;

/// Reported speed of an up link, in Mbps.
pub const LINK_SPEED: u32 = 10_000;

const STATE_UNCONFIGURED: u8 = 0;
const STATE_CONFIGURED: u8 = 1;
const STATE_STARTED: u8 = 2;

#[derive(Default)]
struct RxCounters {
    ipackets: AtomicU64,
    ibytes: AtomicU64,
    imissed: AtomicU64,
}

#[derive(Default)]
struct TxCounters {
    opackets: AtomicU64,
    obytes: AtomicU64,
}

struct NetRingPort {
    mac: EtherAddr,
    state: AtomicU8,
    nb_rx_queues: AtomicU16,
    nb_tx_queues: AtomicU16,
    mtu: AtomicU32,
    link_up: AtomicBool,
    promiscuous: AtomicBool,
    /// RX descriptor ring, created by the first `rx_queue_setup`.
    rx: OnceLock<ArrayQueue<Mbuf>>,
    /// Transmitted packets, shared by all TX queues of the port.
    wire: OnceLock<ArrayQueue<Mbuf>>,
    pool: OnceLock<MemPool>,
    rx_counters: CachePadded<RxCounters>,
    tx_counters: CachePadded<TxCounters>,
}

impl NetRingPort {
    fn new(port_id: PortId) -> Self {
        let [hi, lo] = port_id.to_be_bytes();
        Self {
            mac: EtherAddr {
                addr_bytes: [0x02, 0x70, 0x64, 0x00, hi, lo],
            },
            state: AtomicU8::new(STATE_UNCONFIGURED),
            nb_rx_queues: AtomicU16::new(0),
            nb_tx_queues: AtomicU16::new(0),
            mtu: AtomicU32::new(1500),
            link_up: AtomicBool::new(true),
            promiscuous: AtomicBool::new(false),
            rx: OnceLock::new(),
            wire: OnceLock::new(),
            pool: OnceLock::new(),
            rx_counters: CachePadded::new(RxCounters::default()),
            tx_counters: CachePadded::new(TxCounters::default()),
        }
    }

    #[inline]
    fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    #[inline]
    fn is_started(&self) -> bool {
        self.state() == STATE_STARTED
    }

    fn check_stopped(&self) -> Result<()> {
        if self.is_started() {
            return Err(Errno::EBUSY);
        }
        Ok(())
    }
}

/// Virtual Ethernet device with `nb_ports` ring-backed ports.
pub struct NetRing {
    ports: Box<[NetRingPort]>,
    socket_id: i32,
}

impl NetRing {
    pub fn new(nb_ports: u16) -> Self {
        Self {
            ports: (0..nb_ports).map(NetRingPort::new).collect(),
            socket_id: 0,
        }
    }

    /// Set the NUMA socket every port reports.
    pub fn with_socket_id(mut self, socket_id: i32) -> Self {
        self.socket_id = socket_id;
        self
    }

    fn port(&self, port_id: PortId) -> Result<&NetRingPort> {
        self.ports.get(port_id as usize).ok_or(Errno::ENODEV)
    }

    /// Place a packet on the port's RX ring, as if it arrived on the wire.
    ///
    /// A stopped port, a down link or a full ring refuses the packet: it is
    /// counted in `imissed` and handed back.
    pub fn inject(&self, port_id: PortId, mbuf: Mbuf) -> std::result::Result<(), Mbuf> {
        let Ok(port) = self.port(port_id) else {
            return Err(mbuf);
        };
        let ring = match port.rx.get() {
            Some(ring) if port.is_started() && port.link_up.load(Ordering::Relaxed) => ring,
            _ => {
                port.rx_counters.imissed.fetch_add(1, Ordering::Relaxed);
                return Err(mbuf);
            }
        };
        ring.push(mbuf).inspect_err(|_| {
            port.rx_counters.imissed.fetch_add(1, Ordering::Relaxed);
        })
    }

    /// Allocate a packet from the pool bound to the port's RX queue.
    pub fn alloc(&self, port_id: PortId) -> Option<Mbuf> {
        self.port(port_id).ok()?.pool.get()?.try_alloc()
    }

    /// Drain up to `max` transmitted packets off the port's wire.
    pub fn take_transmitted<const N: usize>(
        &self,
        port_id: PortId,
        bufs: &mut ArrayVec<Mbuf, N>,
        max: usize,
    ) -> usize {
        let Some(wire) = self.port(port_id).ok().and_then(|p| p.wire.get()) else {
            return 0;
        };
        let want = max.min(bufs.remaining_capacity());
        let mut taken = 0;
        while taken < want {
            match wire.pop() {
                Some(mbuf) => {
                    bufs.push(mbuf);
                    taken += 1;
                }
                None => break,
            }
        }
        taken
    }

    /// Number of transmitted packets waiting on the port's wire.
    pub fn transmitted_count(&self, port_id: PortId) -> usize {
        self.port(port_id)
            .ok()
            .and_then(|p| p.wire.get())
            .map_or(0, |wire| wire.len())
    }

    /// Number of packets waiting on the port's RX ring.
    pub fn rx_pending(&self, port_id: PortId) -> usize {
        self.port(port_id)
            .ok()
            .and_then(|p| p.rx.get())
            .map_or(0, |rx| rx.len())
    }

    /// Force the carrier state of a port.
    pub fn set_link(&self, port_id: PortId, up: bool) -> Result<()> {
        self.port(port_id)?.link_up.store(up, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_promiscuous(&self, port_id: PortId) -> bool {
        self.port(port_id).is_ok_and(|p| p.promiscuous.load(Ordering::Relaxed))
    }

    pub fn mtu(&self, port_id: PortId) -> Result<u32> {
        Ok(self.port(port_id)?.mtu.load(Ordering::Relaxed))
    }
}

impl EthDev for NetRing {
    fn count_avail(&self) -> u16 {
        self.ports.len() as u16
    }

    fn configure(
        &self,
        port_id: PortId,
        nb_rx_queues: u16,
        nb_tx_queues: u16,
        conf: &EthConf,
    ) -> Result<()> {
        let port = self.port(port_id)?;
        port.check_stopped()?;
        // A single RX ring per port, no RSS.
        if nb_rx_queues != 1 {
            return Err(Errno::ENOTSUP);
        }
        check_arg(nb_tx_queues >= 1 && conf.mtu <= MAX_MTU)?;
        if conf.mtu != 0 {
            port.mtu.store(conf.mtu, Ordering::Relaxed);
        }
        port.nb_rx_queues.store(nb_rx_queues, Ordering::Relaxed);
        port.nb_tx_queues.store(nb_tx_queues, Ordering::Relaxed);
        port.state.store(STATE_CONFIGURED, Ordering::Release);
        Ok(())
    }

    fn rx_queue_setup(
        &self,
        port_id: PortId,
        queue_id: QueueId,
        conf: &RxQueueConf,
        mempool: &MemPool,
    ) -> Result<()> {
        let port = self.port(port_id)?;
        port.check_stopped()?;
        check_arg(
            port.state() == STATE_CONFIGURED
                && queue_id < port.nb_rx_queues.load(Ordering::Relaxed)
                && conf.nb_desc > 0,
        )?;
        // Rings are allocated once; later setups reuse them.
        port.rx.get_or_init(|| ArrayQueue::new(conf.nb_desc as usize));
        port.pool.get_or_init(|| mempool.clone());
        Ok(())
    }

    fn tx_queue_setup(&self, port_id: PortId, queue_id: QueueId, conf: &TxQueueConf) -> Result<()> {
        let port = self.port(port_id)?;
        port.check_stopped()?;
        check_arg(
            port.state() == STATE_CONFIGURED
                && queue_id < port.nb_tx_queues.load(Ordering::Relaxed)
                && conf.nb_desc > 0,
        )?;
        port.wire.get_or_init(|| ArrayQueue::new(conf.nb_desc as usize));
        Ok(())
    }

    fn start(&self, port_id: PortId) -> Result<()> {
        let port = self.port(port_id)?;
        if port.is_started() {
            return Err(Errno::EALREADY);
        }
        check_arg(
            port.state() == STATE_CONFIGURED
                && port.rx.get().is_some()
                && port.wire.get().is_some(),
        )?;
        port.state.store(STATE_STARTED, Ordering::Release);
        tracing::debug!(port = port_id, "net_ring port started");
        Ok(())
    }

    fn stop(&self, port_id: PortId) -> Result<()> {
        let port = self.port(port_id)?;
        if port.is_started() {
            port.state.store(STATE_CONFIGURED, Ordering::Release);
            tracing::debug!(port = port_id, "net_ring port stopped");
        }
        Ok(())
    }

    fn link(&self, port_id: PortId) -> Result<LinkStatus> {
        let port = self.port(port_id)?;
        let up = port.is_started() && port.link_up.load(Ordering::Relaxed);
        Ok(LinkStatus {
            link_up: up,
            link_speed: if up { LINK_SPEED } else { 0 },
            full_duplex: up,
        })
    }

    fn mac_addr(&self, port_id: PortId) -> Result<EtherAddr> {
        Ok(self.port(port_id)?.mac)
    }

    fn promiscuous_enable(&self, port_id: PortId) -> Result<()> {
        self.port(port_id)?.promiscuous.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn socket_id(&self, port_id: PortId) -> i32 {
        match self.port(port_id) {
            Ok(_) => self.socket_id,
            Err(_) => -1,
        }
    }

    fn stats(&self, port_id: PortId) -> Result<EthStats> {
        let port = self.port(port_id)?;
        Ok(EthStats {
            ipackets: port.rx_counters.ipackets.load(Ordering::Relaxed),
            opackets: port.tx_counters.opackets.load(Ordering::Relaxed),
            ibytes: port.rx_counters.ibytes.load(Ordering::Relaxed),
            obytes: port.tx_counters.obytes.load(Ordering::Relaxed),
            imissed: port.rx_counters.imissed.load(Ordering::Relaxed),
        })
    }

    fn rx_burst<const N: usize>(
        &self,
        port_id: PortId,
        queue_id: QueueId,
        bufs: &mut ArrayVec<Mbuf, N>,
    ) -> usize {
        let Ok(port) = self.port(port_id) else {
            return 0;
        };
        let Some(rx) = port.rx.get() else {
            return 0;
        };
        if queue_id != 0 || !port.is_started() {
            return 0;
        }

        let mut received = 0;
        let mut bytes = 0;
        while !bufs.is_full() {
            let Some(mut mbuf) = rx.pop() else {
                break;
            };
            mbuf.set_port(port_id);
            mbuf.set_out_port(port_id);
            bytes += mbuf.data_len() as u64;
            bufs.push(mbuf);
            received += 1;
        }
        if received > 0 {
            let c = &port.rx_counters;
            c.ipackets.fetch_add(received as u64, Ordering::Relaxed);
            c.ibytes.fetch_add(bytes, Ordering::Relaxed);
        }
        received
    }

    fn tx_burst<const N: usize>(
        &self,
        port_id: PortId,
        queue_id: QueueId,
        bufs: &mut ArrayVec<Mbuf, N>,
    ) -> usize {
        let Ok(port) = self.port(port_id) else {
            return 0;
        };
        let Some(wire) = port.wire.get() else {
            return 0;
        };
        if queue_id >= port.nb_tx_queues.load(Ordering::Relaxed) || !port.is_started() {
            return 0;
        }

        let mut sent = 0;
        let mut bytes = 0;
        let mut rest: ArrayVec<Mbuf, N> = ArrayVec::new();
        let mut drain = bufs.drain(..);
        for mbuf in drain.by_ref() {
            let len = mbuf.data_len() as u64;
            if let Err(mbuf) = wire.push(mbuf) {
                rest.push(mbuf);
                break;
            }
            bytes += len;
            sent += 1;
        }
        rest.extend(drain);
        *bufs = rest;

        if sent > 0 {
            let c = &port.tx_counters;
            c.opackets.fetch_add(sent as u64, Ordering::Relaxed);
            c.obytes.fetch_add(bytes, Ordering::Relaxed);
        }
        sent
    }
}
