//! Worker stage: simulated per-packet processing and egress re-tag.

use std::sync::Arc;

use arrayvec::ArrayVec;
use pktdist::api::rte::cycles::spin_cycles;
use pktdist::api::rte::distributor::{DIST_BURST, DistWorker};
use pktdist::api::rte::mbuf::Mbuf;
use tracing::info;

use crate::shutdown::WorkerShutdown;
use crate::stats::AppStats;

pub struct WorkerStage {
    worker: DistWorker,
    bufs: ArrayVec<Mbuf, DIST_BURST>,
    stats: Arc<AppStats>,
    shutdown: WorkerShutdown,
    /// 1 pairs ports 0↔1, 2↔3, ...; 0 leaves the tag alone.
    xor_val: u16,
    work_cycles: u64,
}

impl WorkerStage {
    /// `toggle_port` should be set when more than one port is enabled.
    pub fn new(
        worker: DistWorker,
        stats: Arc<AppStats>,
        shutdown: WorkerShutdown,
        toggle_port: bool,
        work_cycles: u64,
    ) -> Self {
        Self {
            worker,
            bufs: ArrayVec::new(),
            stats,
            shutdown,
            xor_val: u16::from(toggle_port),
            work_cycles,
        }
    }

    pub fn id(&self) -> usize {
        self.worker.id()
    }

    /// Hand back the previous batch, wait for the next one and process it.
    ///
    /// Returns the batch size, or 0 once *stop working* is raised and no
    /// work is left.
    pub fn poll_once(&mut self) -> usize {
        let shutdown = &self.shutdown;
        let n = self.worker.get_pkt(&mut self.bufs, || shutdown.should_stop());
        if n == 0 {
            return 0;
        }
        for pkt in self.bufs.iter_mut() {
            spin_cycles(self.work_cycles);
            pkt.set_out_port(pkt.out_port() ^ self.xor_val);
        }
        self.stats.worker(self.worker.id()).record_burst(n);
        n
    }

    /// Lcore entry point.
    pub fn run(mut self) -> i32 {
        let id = self.id();
        info!(worker = id, "Starting worker");
        while self.poll_once() > 0 {}

        let WorkerStage { worker, mut bufs, .. } = self;
        worker.retire(&mut bufs);
        info!(worker = id, "Exiting worker");
        0
    }
}
