//! Pipeline statistics.
//!
//! Counters are grouped per stage and per worker, each group on its own
//! cache line. Every counter has exactly one writer thread, so an update is
//! a relaxed load plus store rather than an atomic read-modify-write. The
//! [`StatsCollector`] on the control thread reads them without locking and
//! reports deltas against its previous snapshot.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_utils::CachePadded;
use pktdist::api::rte::cycles::{rdtsc, timer_hz};
use pktdist::api::rte::distributor::DIST_BURST;
use pktdist::api::rte::eth::{EthDev, PortId};

const ANSI_COLOR_RED: &str = "\x1b[31m";
const ANSI_COLOR_RESET: &str = "\x1b[0m";

/// Monotonic counter with a single writer.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Add `n`. Must only be called from the owning thread.
    #[inline]
    pub fn add(&self, n: u64) {
        let v = self.0.load(Ordering::Relaxed);
        self.0.store(v.wrapping_add(n), Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Written by the RX stage.
#[derive(Debug, Default)]
pub struct RxStats {
    pub rx_pkts: Counter,
    pub enqueued: Counter,
    pub enqdrop: Counter,
}

/// Written by the distribution stage.
#[derive(Debug, Default)]
pub struct DistStats {
    pub in_pkts: Counter,
    pub ret_pkts: Counter,
    pub sent_pkts: Counter,
    pub enqdrop: Counter,
}

/// Written by the TX stage.
#[derive(Debug, Default)]
pub struct TxStats {
    pub dequeued: Counter,
    pub tx_pkts: Counter,
    pub enqdrop: Counter,
}

/// Written by one worker.
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub pkts: Counter,
    /// `bursts[n - 1]` counts batches of `n` packets.
    pub bursts: [Counter; DIST_BURST],
}

impl WorkerStats {
    #[inline]
    pub fn record_burst(&self, n: usize) {
        if n == 0 {
            return;
        }
        self.pkts.add(n as u64);
        self.bursts[n.min(DIST_BURST) - 1].add(1);
    }
}

/// All pipeline counters.
#[derive(Debug)]
pub struct AppStats {
    pub rx: CachePadded<RxStats>,
    pub dist: CachePadded<DistStats>,
    pub tx: CachePadded<TxStats>,
    workers: Box<[CachePadded<WorkerStats>]>,
}

impl AppStats {
    pub fn new(num_workers: usize) -> Self {
        Self {
            rx: CachePadded::new(RxStats::default()),
            dist: CachePadded::new(DistStats::default()),
            tx: CachePadded::new(TxStats::default()),
            workers: (0..num_workers)
                .map(|_| CachePadded::new(WorkerStats::default()))
                .collect(),
        }
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    #[inline]
    pub fn worker(&self, id: usize) -> &WorkerStats {
        &self.workers[id]
    }

    /// Current counter values. Ports are left empty.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            rx_pkts: self.rx.rx_pkts.get(),
            rx_enqueued: self.rx.enqueued.get(),
            rx_dropped: self.rx.enqdrop.get(),
            dist_in: self.dist.in_pkts.get(),
            dist_returned: self.dist.ret_pkts.get(),
            dist_sent: self.dist.sent_pkts.get(),
            dist_dropped: self.dist.enqdrop.get(),
            tx_dequeued: self.tx.dequeued.get(),
            tx_pkts: self.tx.tx_pkts.get(),
            tx_dropped: self.tx.enqdrop.get(),
            worker_pkts: self.workers.iter().map(|w| w.pkts.get()).collect(),
            worker_bursts: self
                .workers
                .iter()
                .map(|w| std::array::from_fn(|i| w.bursts[i].get()))
                .collect(),
            ports: Vec::new(),
        }
    }
}

/// Device counters of one port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortSnapshot {
    pub port: PortId,
    pub ipackets: u64,
    pub opackets: u64,
}

/// Plain copy of every counter at one instant, or a difference of two.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub rx_pkts: u64,
    pub rx_enqueued: u64,
    pub rx_dropped: u64,
    pub dist_in: u64,
    pub dist_returned: u64,
    pub dist_sent: u64,
    pub dist_dropped: u64,
    pub tx_dequeued: u64,
    pub tx_pkts: u64,
    pub tx_dropped: u64,
    pub worker_pkts: Vec<u64>,
    pub worker_bursts: Vec<[u64; DIST_BURST]>,
    pub ports: Vec<PortSnapshot>,
}

impl StatsSnapshot {
    /// `self - prev`, field by field. Entries missing from `prev` count as 0.
    pub fn delta(&self, prev: &Self) -> Self {
        let sub = |a: u64, b: u64| a.saturating_sub(b);
        Self {
            rx_pkts: sub(self.rx_pkts, prev.rx_pkts),
            rx_enqueued: sub(self.rx_enqueued, prev.rx_enqueued),
            rx_dropped: sub(self.rx_dropped, prev.rx_dropped),
            dist_in: sub(self.dist_in, prev.dist_in),
            dist_returned: sub(self.dist_returned, prev.dist_returned),
            dist_sent: sub(self.dist_sent, prev.dist_sent),
            dist_dropped: sub(self.dist_dropped, prev.dist_dropped),
            tx_dequeued: sub(self.tx_dequeued, prev.tx_dequeued),
            tx_pkts: sub(self.tx_pkts, prev.tx_pkts),
            tx_dropped: sub(self.tx_dropped, prev.tx_dropped),
            worker_pkts: self
                .worker_pkts
                .iter()
                .enumerate()
                .map(|(i, &v)| sub(v, prev.worker_pkts.get(i).copied().unwrap_or(0)))
                .collect(),
            worker_bursts: self
                .worker_bursts
                .iter()
                .enumerate()
                .map(|(i, cur)| {
                    let base = prev.worker_bursts.get(i).copied().unwrap_or_default();
                    std::array::from_fn(|j| sub(cur[j], base[j]))
                })
                .collect(),
            ports: self
                .ports
                .iter()
                .map(|p| {
                    let base = prev
                        .ports
                        .iter()
                        .find(|b| b.port == p.port)
                        .copied()
                        .unwrap_or_default();
                    PortSnapshot {
                        port: p.port,
                        ipackets: sub(p.ipackets, base.ipackets),
                        opackets: sub(p.opackets, base.opackets),
                    }
                })
                .collect(),
        }
    }
}

/// One rendered statistics interval.
#[derive(Debug, Clone)]
pub struct StatsReport {
    pub delta: StatsSnapshot,
    pub elapsed: Duration,
    pub color: bool,
}

impl StatsReport {
    fn mpkts(v: u64) -> f64 {
        v as f64 / 1_000_000.0
    }
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.delta;
        let m = Self::mpkts;
        let (red, reset) = if self.color {
            (ANSI_COLOR_RED, ANSI_COLOR_RESET)
        } else {
            ("", "")
        };

        writeln!(f, "\n\nInterval: {:.2}s", self.elapsed.as_secs_f64())?;
        writeln!(f, "RX Thread:")?;
        for p in &d.ports {
            writeln!(f, "Port {} Pktsin : {:5.2}", p.port, m(p.ipackets))?;
        }
        writeln!(f, " - Received:    {:5.2}", m(d.rx_pkts))?;
        writeln!(f, " - Enqueued:    {:5.2}", m(d.rx_enqueued))?;
        writeln!(f, " - Dropped:     {red}{:5.2}{reset}", m(d.rx_dropped))?;

        writeln!(f, "Distributor thread:")?;
        writeln!(f, " - In:          {:5.2}", m(d.dist_in))?;
        writeln!(f, " - Returned:    {:5.2}", m(d.dist_returned))?;
        writeln!(f, " - Sent:        {:5.2}", m(d.dist_sent))?;
        writeln!(f, " - Dropped:     {red}{:5.2}{reset}", m(d.dist_dropped))?;

        writeln!(f, "TX thread:")?;
        writeln!(f, " - Dequeued:    {:5.2}", m(d.tx_dequeued))?;
        for p in &d.ports {
            writeln!(f, "Port {} Pktsout: {:5.2}", p.port, m(p.opackets))?;
        }
        writeln!(f, " - Transmitted: {:5.2}", m(d.tx_pkts))?;
        writeln!(f, " - Dropped:     {red}{:5.2}{reset}", m(d.tx_dropped))?;

        for (i, (pkts, bursts)) in d.worker_pkts.iter().zip(&d.worker_bursts).enumerate() {
            write!(f, "Worker {i:02} Pkts: {:5.2}. Bursts(1-8):", m(*pkts))?;
            for b in bursts {
                write!(f, " {b}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Periodic reporter, driven from the control thread.
pub struct StatsCollector<D: EthDev> {
    stats: Arc<AppStats>,
    dev: Arc<D>,
    ports: Vec<PortId>,
    prev: StatsSnapshot,
    start_tsc: u64,
    prev_tsc: u64,
    interval_cycles: u64,
    color: bool,
}

impl<D: EthDev> StatsCollector<D> {
    pub fn new(
        stats: Arc<AppStats>,
        dev: Arc<D>,
        ports: Vec<PortId>,
        interval: Duration,
        color: bool,
    ) -> Self {
        let now = rdtsc();
        Self {
            stats,
            dev,
            ports,
            prev: StatsSnapshot::default(),
            start_tsc: now,
            prev_tsc: now,
            interval_cycles: (interval.as_secs_f64() * timer_hz() as f64) as u64,
            color,
        }
    }

    /// A report if a full interval has passed since the last one.
    pub fn poll(&mut self) -> Option<StatsReport> {
        if rdtsc().wrapping_sub(self.prev_tsc) >= self.interval_cycles {
            Some(self.report())
        } else {
            None
        }
    }

    /// Report the delta since the previous report and make the current
    /// values the new baseline.
    pub fn report(&mut self) -> StatsReport {
        let now = rdtsc();
        let current = self.collect();
        let delta = current.delta(&self.prev);
        let elapsed = cycles_to_duration(now.wrapping_sub(self.prev_tsc));
        self.prev = current;
        self.prev_tsc = now;
        StatsReport {
            delta,
            elapsed,
            color: self.color,
        }
    }

    /// Cumulative values since the collector was created.
    pub fn totals(&self) -> StatsSnapshot {
        self.collect()
    }

    /// Report covering the whole run.
    pub fn summary(&self) -> StatsReport {
        StatsReport {
            delta: self.collect(),
            elapsed: cycles_to_duration(rdtsc().wrapping_sub(self.start_tsc)),
            color: self.color,
        }
    }

    fn collect(&self) -> StatsSnapshot {
        let mut snap = self.stats.snapshot();
        snap.ports = self
            .ports
            .iter()
            .map(|&port| {
                let s = self.dev.stats(port).unwrap_or_default();
                PortSnapshot {
                    port,
                    ipackets: s.ipackets,
                    opackets: s.opackets,
                }
            })
            .collect();
        snap
    }
}

fn cycles_to_duration(cycles: u64) -> Duration {
    Duration::from_secs_f64(cycles as f64 / timer_hz() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pktdist::api::rte::net_ring::NetRing;

    #[test]
    fn test_worker_burst_histogram() {
        let stats = AppStats::new(2);
        stats.worker(1).record_burst(3);
        stats.worker(1).record_burst(8);
        stats.worker(1).record_burst(0);

        let snap = stats.snapshot();
        assert_eq!(snap.worker_pkts, vec![0, 11]);
        assert_eq!(snap.worker_bursts[1], [0, 0, 1, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_collector_reports_deltas() {
        let stats = Arc::new(AppStats::new(1));
        let dev = Arc::new(NetRing::new(2));
        let mut collector =
            StatsCollector::new(stats.clone(), dev, vec![0, 1], Duration::ZERO, false);

        stats.rx.rx_pkts.add(10);
        stats.worker(0).record_burst(2);
        let first = collector.poll().unwrap();
        assert_eq!(first.delta.rx_pkts, 10);
        assert_eq!(first.delta.worker_bursts[0][1], 1);
        assert_eq!(first.delta.ports.len(), 2);

        stats.rx.rx_pkts.add(5);
        let second = collector.report();
        assert_eq!(second.delta.rx_pkts, 5);
        // Burst counts show only what happened since the last report.
        assert_eq!(second.delta.worker_bursts[0], [0; DIST_BURST]);

        assert_eq!(collector.totals().rx_pkts, 15);
        assert_eq!(collector.summary().delta.worker_pkts, vec![2]);
    }

    #[test]
    fn test_poll_waits_for_interval() {
        let stats = Arc::new(AppStats::new(0));
        let dev = Arc::new(NetRing::new(1));
        let mut collector =
            StatsCollector::new(stats, dev, vec![0], Duration::from_secs(3600), true);
        assert!(collector.poll().is_none());
    }

    #[test]
    fn test_report_format() {
        let mut delta = AppStats::new(1).snapshot();
        delta.rx_pkts = 2_500_000;
        delta.tx_dropped = 10_000;
        delta.ports = vec![PortSnapshot {
            port: 0,
            ipackets: 1_000_000,
            opackets: 0,
        }];

        let plain = StatsReport {
            delta: delta.clone(),
            elapsed: Duration::from_millis(1500),
            color: false,
        }
        .to_string();
        assert!(plain.starts_with("\n\nInterval: 1.50s\nRX Thread:\n"));
        assert!(plain.contains("Port 0 Pktsin :  1.00\n"));
        assert!(plain.contains(" - Received:     2.50\n"));
        assert!(plain.contains(" - Dropped:      0.01\n"));
        assert!(plain.contains("Worker 00 Pkts:  0.00. Bursts(1-8): 0 0 0 0 0 0 0 0\n"));
        assert!(!plain.contains(ANSI_COLOR_RED));

        let colored = StatsReport {
            delta,
            elapsed: Duration::from_secs(1),
            color: true,
        }
        .to_string();
        let dropped = format!(" - Dropped:     {ANSI_COLOR_RED} 0.01{ANSI_COLOR_RESET}");
        assert!(colored.contains(&dropped));
    }
}
