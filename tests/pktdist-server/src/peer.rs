//! Synthetic traffic peer for the in-memory ring device.
//!
//! Plays the other end of every enabled port: injects packets spread over a
//! configurable number of flows and drains whatever the pipeline transmits.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use arrayvec::ArrayVec;
use pktdist::api::rte::cycles::{rdtsc, timer_hz};
use pktdist::api::rte::eth::PortId;
use pktdist::api::rte::net_ring::NetRing;
use tracing::info;

/// Packets injected or drained per port per iteration.
const PEER_BURST: usize = 32;

#[derive(Debug, Clone, Copy, Default)]
pub struct PeerStats {
    pub injected: u64,
    /// Not accepted by the port (RX ring full or link down).
    pub refused: u64,
    /// No mbuf available.
    pub alloc_failed: u64,
    pub drained: u64,
}

pub struct Peer {
    dev: Arc<NetRing>,
    ports: Vec<PortId>,
    pkt_size: usize,
    flows: u32,
    /// Packets per second per port, unlimited if `None`.
    rate: Option<u64>,
}

impl Peer {
    pub fn new(dev: Arc<NetRing>, ports: Vec<PortId>) -> Self {
        Self {
            dev,
            ports,
            pkt_size: 64,
            flows: 1024,
            rate: None,
        }
    }

    pub fn pkt_size(mut self, size: usize) -> Self {
        self.pkt_size = size;
        self
    }

    pub fn flows(mut self, flows: u32) -> Self {
        self.flows = flows.max(1);
        self
    }

    pub fn rate(mut self, pps: Option<u64>) -> Self {
        self.rate = pps;
        self
    }

    /// Run on a new thread until `stop` is set.
    pub fn spawn(self, stop: Arc<AtomicBool>) -> std::io::Result<JoinHandle<PeerStats>> {
        thread::Builder::new()
            .name("peer".to_string())
            .spawn(move || self.run(&stop))
    }

    fn run(self, stop: &AtomicBool) -> PeerStats {
        info!(ports = ?self.ports, flows = self.flows, rate = ?self.rate, "Peer started");
        let mut stats = PeerStats::default();
        let mut seq: u32 = 0;
        let start = rdtsc();

        while !stop.load(Ordering::Relaxed) {
            let budget = self.budget(start, stats.injected + stats.refused);
            for &port in &self.ports {
                for _ in 0..budget.min(PEER_BURST as u64) {
                    let Some(mut pkt) = self.dev.alloc(port) else {
                        stats.alloc_failed += 1;
                        break;
                    };
                    if let Some(payload) = pkt.append(self.pkt_size) {
                        payload.fill(0);
                    }
                    pkt.set_hash((seq % self.flows).wrapping_mul(0x9e37_79b9));
                    seq = seq.wrapping_add(1);
                    match self.dev.inject(port, pkt) {
                        Ok(()) => stats.injected += 1,
                        Err(_) => stats.refused += 1,
                    }
                }
                stats.drained += self.drain(port);
            }
            if budget == 0 {
                thread::sleep(Duration::from_micros(100));
            }
        }

        // Pick up whatever the pipeline flushed on its way down.
        for &port in &self.ports {
            stats.drained += self.drain(port);
        }
        info!(?stats, "Peer stopped");
        stats
    }

    /// Packets each port may still send to stay on the configured rate.
    fn budget(&self, start: u64, sent: u64) -> u64 {
        let Some(pps) = self.rate else {
            return PEER_BURST as u64;
        };
        let elapsed = rdtsc().wrapping_sub(start);
        let due = (elapsed as u128 * pps as u128 / timer_hz() as u128) as u64;
        let per_port_sent = sent / self.ports.len().max(1) as u64;
        due.saturating_sub(per_port_sent)
    }

    fn drain(&self, port: PortId) -> u64 {
        let mut bufs: ArrayVec<_, PEER_BURST> = ArrayVec::new();
        let mut total = 0;
        loop {
            let n = self.dev.take_transmitted(port, &mut bufs, PEER_BURST);
            if n == 0 {
                return total;
            }
            total += n as u64;
            bufs.clear();
        }
    }
}
