//! Distribution stage: inbound ring → distributor → outbound ring.

use std::sync::Arc;

use arrayvec::ArrayVec;
use pktdist::api::rte::distributor::Distributor;
use pktdist::api::rte::mbuf::Mbuf;
use pktdist::api::rte::ring::{RingConsumer, RingProducer};
use tracing::{debug, info};

use super::Idle;
use crate::config::{BURST_SIZE, IdlePolicy};
use crate::shutdown::DistShutdown;
use crate::stats::AppStats;

/// Returned packets collected per iteration. Returns can lag submissions,
/// so this is larger than the input burst.
const RETURN_BURST: usize = BURST_SIZE * 2;

pub struct DistStage {
    input: RingConsumer<Mbuf>,
    output: RingProducer<Mbuf>,
    dist: Distributor,
    stats: Arc<AppStats>,
    shutdown: DistShutdown,
    idle: Idle,
}

impl DistStage {
    pub fn new(
        input: RingConsumer<Mbuf>,
        output: RingProducer<Mbuf>,
        dist: Distributor,
        stats: Arc<AppStats>,
        shutdown: DistShutdown,
        idle: IdlePolicy,
    ) -> Self {
        Self {
            input,
            output,
            dist,
            stats,
            shutdown,
            idle: Idle::new(idle),
        }
    }

    /// Submit one burst from the inbound ring (or just poll the distributor
    /// when there is none), then forward whatever workers returned.
    ///
    /// Returns the number of packets moved in either direction.
    pub fn poll_once(&mut self) -> usize {
        let room = self.dist.backlog_room().min(BURST_SIZE);
        let mut bufs: ArrayVec<Mbuf, BURST_SIZE> = ArrayVec::new();
        let nb_rx = self.input.dequeue_burst(&mut bufs, room);
        if nb_rx > 0 {
            self.stats.dist.in_pkts.add(nb_rx as u64);
            self.dist.process(&mut bufs);
            // Dequeue is bounded by the backlog room, so nothing is left over.
            if !bufs.is_empty() {
                self.stats.dist.enqdrop.add(bufs.len() as u64);
                bufs.clear();
            }
        } else {
            self.dist.poll();
        }
        nb_rx + self.forward_returns()
    }

    /// Move returned packets to the outbound ring; those that do not fit are
    /// released and counted as dropped.
    fn forward_returns(&mut self) -> usize {
        let mut bufs: ArrayVec<Mbuf, RETURN_BURST> = ArrayVec::new();
        let nb_ret = self.dist.returned_pkts(&mut bufs, RETURN_BURST);
        if nb_ret == 0 {
            return 0;
        }
        let dist = &self.stats.dist;
        dist.ret_pkts.add(nb_ret as u64);

        let sent = self.output.enqueue_burst(&mut bufs);
        dist.sent_pkts.add(sent as u64);
        if !bufs.is_empty() {
            let dropped = bufs.len();
            dist.enqdrop.add(dropped as u64);
            debug!(dropped, "Packet loss due to full out ring");
            bufs.clear();
        }
        nb_ret
    }

    /// Wind down after *stop distributing*: release the workers, drain the
    /// distributor, then let RX stop.
    fn shutdown_cascade(&mut self) {
        self.shutdown.stop_working();

        let released = self.dist.flush();
        self.stats.dist.enqdrop.add(released as u64);
        while self.forward_returns() > 0 {}

        let cleared = self.dist.clear_returns();
        self.stats.dist.enqdrop.add(cleared as u64);
        if released + cleared > 0 {
            info!(released, cleared, "Released packets left in distributor");
        }

        self.shutdown.stop_receiving();
    }

    /// Lcore entry point.
    pub fn run(mut self) -> i32 {
        info!(
            distributor = self.dist.name(),
            workers = self.dist.num_workers(),
            "Acting as distributor core"
        );
        while !self.shutdown.should_stop() {
            let moved = self.poll_once();
            self.idle.after(moved);
        }
        info!("Exiting distributor task");
        self.shutdown_cascade();
        0
    }
}
