//! Packet source: enabled ports → inbound ring.

use std::sync::Arc;

use arrayvec::ArrayVec;
use pktdist::api::rte::eth::{EthDev, PortId};
use pktdist::api::rte::mbuf::Mbuf;
use pktdist::api::rte::queue::RxQueue;
use pktdist::api::rte::ring::RingProducer;
use tracing::{debug, info};

use super::Idle;
use crate::config::{BURST_SIZE, IdlePolicy};
use crate::shutdown::RxShutdown;
use crate::stats::AppStats;

pub struct RxStage<D: EthDev> {
    queues: Vec<RxQueue<D>>,
    out: RingProducer<Mbuf>,
    stats: Arc<AppStats>,
    shutdown: RxShutdown,
    idle: Idle,
    next: usize,
    /// Consecutive empty polls, to idle only after a full empty round.
    empty: usize,
}

impl<D: EthDev> RxStage<D> {
    /// Poll RX queue 0 of each of `ports`, in order.
    pub fn new(
        dev: Arc<D>,
        ports: &[PortId],
        out: RingProducer<Mbuf>,
        stats: Arc<AppStats>,
        shutdown: RxShutdown,
        idle: IdlePolicy,
    ) -> Self {
        Self {
            queues: ports
                .iter()
                .map(|&port| RxQueue::new(dev.clone(), port, 0))
                .collect(),
            out,
            stats,
            shutdown,
            idle: Idle::new(idle),
            next: 0,
            empty: 0,
        }
    }

    /// Receive one burst from the next port and forward it.
    ///
    /// Returns the number of packets received. Packets that do not fit in
    /// the ring are released and counted as dropped.
    pub fn poll_once(&mut self) -> usize {
        if self.queues.is_empty() {
            return 0;
        }
        let queue = &self.queues[self.next];
        self.next = (self.next + 1) % self.queues.len();

        let mut bufs: ArrayVec<Mbuf, BURST_SIZE> = ArrayVec::new();
        let nb_rx = queue.rx(&mut bufs);
        if nb_rx == 0 {
            return 0;
        }
        let rx = &self.stats.rx;
        rx.rx_pkts.add(nb_rx as u64);

        let sent = self.out.enqueue_burst(&mut bufs);
        rx.enqueued.add(sent as u64);
        if !bufs.is_empty() {
            let dropped = bufs.len();
            rx.enqdrop.add(dropped as u64);
            debug!(dropped, "Packet loss due to full ring");
            bufs.clear();
        }
        nb_rx
    }

    /// Lcore entry point.
    pub fn run(mut self) -> i32 {
        let ports: Vec<PortId> = self.queues.iter().map(|q| q.port_id()).collect();
        info!(?ports, "Doing packet RX");
        while !self.shutdown.should_stop() {
            if self.poll_once() == 0 {
                self.empty += 1;
                if self.empty >= self.queues.len() {
                    self.empty = 0;
                    self.idle.idle();
                }
            } else {
                self.empty = 0;
                self.idle.reset();
            }
        }
        info!("Exiting RX task");
        self.shutdown.stop_transmitting();
        0
    }
}
