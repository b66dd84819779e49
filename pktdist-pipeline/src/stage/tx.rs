//! Transmit stage: outbound ring → per-port output buffers → device.

use std::sync::Arc;

use arrayvec::ArrayVec;
use pktdist::api::rte::eth::{EthDev, PortId};
use pktdist::api::rte::mbuf::Mbuf;
use pktdist::api::rte::queue::TxQueue;
use pktdist::api::rte::ring::RingConsumer;
use tracing::{debug, info};

use super::Idle;
use crate::config::{BURST_SIZE_TX, IdlePolicy};
use crate::shutdown::TxShutdown;
use crate::stats::{AppStats, TxStats};

/// Packets waiting to be transmitted on one port.
///
/// Holds at most [`BURST_SIZE_TX`] packets; the owner flushes it when full
/// or when it sees no new traffic.
pub struct OutputBuffer<D: EthDev> {
    queue: TxQueue<D>,
    mbufs: ArrayVec<Mbuf, BURST_SIZE_TX>,
}

impl<D: EthDev> OutputBuffer<D> {
    pub fn new(queue: TxQueue<D>) -> Self {
        Self {
            queue,
            mbufs: ArrayVec::new(),
        }
    }

    pub fn port_id(&self) -> PortId {
        self.queue.port_id()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mbufs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mbufs.is_empty()
    }

    /// Buffer `pkt`, flushing immediately if that fills the buffer.
    pub fn push(&mut self, pkt: Mbuf, stats: &TxStats) {
        self.mbufs.push(pkt);
        if self.mbufs.is_full() {
            self.flush(stats);
        }
    }

    /// Hand everything to the device. Packets it refuses are released and
    /// counted as dropped.
    ///
    /// Returns the number transmitted.
    pub fn flush(&mut self, stats: &TxStats) -> usize {
        if self.mbufs.is_empty() {
            return 0;
        }
        let sent = self.queue.tx(&mut self.mbufs);
        stats.tx_pkts.add(sent as u64);
        if !self.mbufs.is_empty() {
            let dropped = self.mbufs.len();
            stats.enqdrop.add(dropped as u64);
            debug!(port = self.port_id(), dropped, "Device refused packets");
            self.mbufs.clear();
        }
        sent
    }
}

pub struct TxStage<D: EthDev> {
    input: RingConsumer<Mbuf>,
    /// Indexed by port ID; `None` for disabled ports.
    buffers: Vec<Option<OutputBuffer<D>>>,
    stats: Arc<AppStats>,
    shutdown: TxShutdown,
    idle: Idle,
}

impl<D: EthDev> TxStage<D> {
    /// Transmit on TX queue 0 of each of `ports`. Packets tagged for any
    /// other port are dropped.
    pub fn new(
        dev: Arc<D>,
        ports: &[PortId],
        input: RingConsumer<Mbuf>,
        stats: Arc<AppStats>,
        shutdown: TxShutdown,
        idle: IdlePolicy,
    ) -> Self {
        let max_port = ports.iter().copied().max().map_or(0, |p| p as usize + 1);
        let mut buffers: Vec<Option<OutputBuffer<D>>> = (0..max_port).map(|_| None).collect();
        for &port in ports {
            buffers[port as usize] = Some(OutputBuffer::new(TxQueue::new(dev.clone(), port, 0)));
        }
        Self {
            input,
            buffers,
            stats,
            shutdown,
            idle: Idle::new(idle),
        }
    }

    /// Dequeue one burst and buffer it per egress port. With nothing to
    /// dequeue, flush every non-empty buffer instead.
    ///
    /// Returns the number of packets dequeued.
    pub fn poll_once(&mut self) -> usize {
        let mut bufs: ArrayVec<Mbuf, BURST_SIZE_TX> = ArrayVec::new();
        let nb_rx = self.input.dequeue_burst(&mut bufs, BURST_SIZE_TX);
        let tx = &self.stats.tx;
        tx.dequeued.add(nb_rx as u64);

        if nb_rx == 0 {
            self.flush_all();
            return 0;
        }

        for pkt in bufs.drain(..) {
            let outp = pkt.out_port() as usize;
            match self.buffers.get_mut(outp).and_then(Option::as_mut) {
                Some(buffer) => buffer.push(pkt, tx),
                None => {
                    // Disabled port
                    tx.enqdrop.add(1);
                    drop(pkt);
                }
            }
        }
        nb_rx
    }

    /// Flush every non-empty output buffer.
    pub fn flush_all(&mut self) -> usize {
        let tx = &self.stats.tx;
        self.buffers
            .iter_mut()
            .flatten()
            .map(|buffer| buffer.flush(tx))
            .sum()
    }

    /// Packets currently buffered for `port`.
    pub fn buffered(&self, port: PortId) -> usize {
        self.buffers
            .get(port as usize)
            .and_then(Option::as_ref)
            .map_or(0, OutputBuffer::len)
    }

    /// Lcore entry point.
    pub fn run(mut self) -> i32 {
        let ports: Vec<PortId> = self.buffers.iter().flatten().map(|b| b.port_id()).collect();
        info!(?ports, "Doing packet TX");
        while !self.shutdown.should_stop() {
            let moved = self.poll_once();
            self.idle.after(moved);
        }
        // Upstream has stopped; empty the ring, the last empty poll flushes.
        while self.poll_once() > 0 {}
        info!("Exiting TX task");
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use pktdist::api::rte::eth::EthDevBuilder;
    use pktdist::api::rte::eth::TxQueueConf;
    use pktdist::api::rte::net_ring::NetRing;
    use pktdist::api::rte::pktmbuf::MemPool;
    use pktdist::api::rte::ring::{Ring, RingFlags, RingProducer};

    struct Fixture {
        dev: Arc<NetRing>,
        pool: MemPool,
        ring: RingProducer<Mbuf>,
        stats: Arc<AppStats>,
        stage: TxStage<NetRing>,
    }

    fn fixture(nb_ports: u16, enabled: &[PortId], wire_desc: u16) -> Fixture {
        let dev = Arc::new(NetRing::new(nb_ports));
        let pool = MemPool::create_default("tx_stage", 256).unwrap();
        for port in 0..nb_ports {
            EthDevBuilder::new(port)
                .tx_queue_conf(TxQueueConf::new().nb_desc(wire_desc))
                .build(&*dev, &pool)
                .unwrap();
        }
        let (ring, cons) = Ring::create("tx_in", 256, RingFlags::empty()).unwrap();
        let stats = Arc::new(AppStats::new(1));
        let (_trigger, handles) = shutdown::channel();
        let stage = TxStage::new(
            dev.clone(),
            enabled,
            cons,
            stats.clone(),
            handles.tx,
            IdlePolicy::Spin,
        );
        Fixture {
            dev,
            pool,
            ring,
            stats,
            stage,
        }
    }

    impl Fixture {
        fn send(&self, out_port: PortId, n: usize) {
            for _ in 0..n {
                let mut m = self.pool.try_alloc().unwrap();
                m.set_out_port(out_port);
                self.ring.enqueue(m).unwrap();
            }
        }
    }

    #[test]
    fn test_partial_buffer_flushed_on_idle() {
        let mut f = fixture(2, &[0, 1], 512);
        f.send(1, 5);

        assert_eq!(f.stage.poll_once(), 5);
        assert_eq!(f.stage.buffered(1), 5);
        assert_eq!(f.dev.transmitted_count(1), 0);

        // No new traffic: one idle poll flushes.
        assert_eq!(f.stage.poll_once(), 0);
        assert_eq!(f.stage.buffered(1), 0);
        assert_eq!(f.dev.transmitted_count(1), 5);
        assert_eq!(f.stats.tx.tx_pkts.get(), 5);
    }

    #[test]
    fn test_full_buffer_flushed_immediately() {
        let mut f = fixture(2, &[0, 1], 512);
        f.send(0, BURST_SIZE_TX);

        assert_eq!(f.stage.poll_once(), BURST_SIZE_TX);
        assert_eq!(f.stage.buffered(0), 0);
        assert_eq!(f.dev.transmitted_count(0), BURST_SIZE_TX);
    }

    #[test]
    fn test_disabled_port_dropped() {
        let mut f = fixture(4, &[0, 1], 512);
        f.send(2, 3);
        f.send(9, 1);
        f.stage.poll_once();

        assert_eq!(f.stats.tx.enqdrop.get(), 4);
        assert_eq!(f.stats.tx.dequeued.get(), 4);
        assert_eq!(f.pool.in_use_count(), 0);
    }

    #[test]
    fn test_device_refusal_counted() {
        let mut f = fixture(1, &[0], 8);
        f.send(0, 12);
        f.stage.poll_once();
        f.stage.poll_once();

        assert_eq!(f.stats.tx.tx_pkts.get(), 8);
        assert_eq!(f.stats.tx.enqdrop.get(), 4);
        assert_eq!(f.pool.in_use_count(), 8);
    }

    #[test]
    fn test_run_drains_ring_after_stop() {
        let dev = Arc::new(NetRing::new(1));
        let pool = MemPool::create_default("tx_drain", 64).unwrap();
        EthDevBuilder::new(0).build(&*dev, &pool).unwrap();
        let (prod, cons) = Ring::create("tx_drain", 64, RingFlags::empty()).unwrap();
        let (trigger, handles) = shutdown::channel();
        let stage = TxStage::new(
            dev.clone(),
            &[0],
            cons,
            Arc::new(AppStats::new(1)),
            handles.tx,
            IdlePolicy::Backoff,
        );
        for _ in 0..40 {
            prod.enqueue(pool.try_alloc().unwrap()).unwrap();
        }
        trigger.trigger();
        handles.dist.stop_working();
        handles.dist.stop_receiving();
        handles.rx.stop_transmitting();

        assert_eq!(stage.run(), 0);
        assert_eq!(dev.transmitted_count(0), 40);
    }
}
