//! Pipeline configuration.

use std::str::FromStr;
use std::time::Duration;

use pktdist::api::rte::distributor::{DistAlg, FlowHash, LeastLoaded, RoundRobin, Scheduler};
use pktdist::api::rte::eth::PortId;
use pktdist::api::rte::lcore::LcoreSet;
use pktdist::api::rte::pktmbuf::DEFAULT_DATA_ROOM_SIZE;

use crate::error::Error;

/// Packets moved per RX poll and per distributor submit.
pub const BURST_SIZE: usize = 64;

/// Capacity of a per-port output buffer, and TX dequeue size.
pub const BURST_SIZE_TX: usize = 32;

/// Device RX descriptors per port.
pub const RX_RING_SIZE: u16 = 512;

/// Device TX descriptors per queue.
pub const TX_RING_SIZE: u16 = 512;

/// Mbufs per enabled port.
pub const NUM_MBUFS: u32 = 65535;

/// RX to distributor ring size.
pub const SCHED_RX_RING_SZ: u32 = 8192;

/// Distributor to TX ring size.
pub const SCHED_TX_RING_SZ: u32 = 65536;

/// Main, RX, distributor and TX lcores, plus at least one worker.
pub const MIN_LCORES: usize = 5;

/// Bitmask of participating ports, bit N for port N.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMask(u64);

impl PortMask {
    pub const fn new(mask: u64) -> Self {
        Self(mask)
    }

    /// Parse a hex mask with or without a `0x` prefix. Zero is rejected.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let t = s.trim();
        let digits = t
            .strip_prefix("0x")
            .or_else(|| t.strip_prefix("0X"))
            .unwrap_or(t);
        match u64::from_str_radix(digits, 16) {
            Ok(mask) if mask != 0 => Ok(Self(mask)),
            _ => Err(Error::InvalidPortMask(s.to_string())),
        }
    }

    #[inline]
    pub fn bits(&self) -> u64 {
        self.0
    }

    #[inline]
    pub fn contains(&self, port: PortId) -> bool {
        port < 64 && self.0 & (1 << port) != 0
    }

    /// Enabled ports among `0..nb_ports`, ascending.
    pub fn enabled_ports(&self, nb_ports: u16) -> Vec<PortId> {
        (0..nb_ports).filter(|&p| self.contains(p)).collect()
    }
}

impl FromStr for PortMask {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for PortMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// What a stage does on an iteration that moved no packets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdlePolicy {
    /// Busy poll.
    #[default]
    Spin,
    /// Spin with exponential backoff, then yield. Reset on work.
    Backoff,
}

/// Worker assignment policy of the distributor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SchedulerKind {
    RoundRobin,
    #[default]
    FlowHash,
    LeastLoaded,
}

impl SchedulerKind {
    pub fn build(self) -> Box<dyn Scheduler> {
        match self {
            SchedulerKind::RoundRobin => Box::new(RoundRobin::new()),
            SchedulerKind::FlowHash => Box::new(FlowHash::new()),
            SchedulerKind::LeastLoaded => Box::new(LeastLoaded::new()),
        }
    }
}

impl FromStr for SchedulerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" => Ok(SchedulerKind::RoundRobin),
            "flow-hash" => Ok(SchedulerKind::FlowHash),
            "least-loaded" => Ok(SchedulerKind::LeastLoaded),
            other => Err(format!(
                "unknown scheduler '{other}', expected round-robin, flow-hash or least-loaded"
            )),
        }
    }
}

/// Configuration of a pipeline run.
///
/// Defaults follow the constants above; only the port mask and the lcore set
/// are required.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub port_mask: PortMask,
    pub lcores: LcoreSet,
    pub rx_ring_size: u16,
    pub tx_ring_size: u16,
    /// Mbufs per enabled port.
    pub num_mbufs: u32,
    pub data_room_size: u16,
    pub sched_rx_ring_size: u32,
    pub sched_tx_ring_size: u32,
    pub dist_alg: DistAlg,
    pub scheduler: SchedulerKind,
    /// Assignment queue depth per worker.
    pub worker_queue_size: usize,
    /// Simulated processing cost per packet, in timer cycles.
    pub work_cycles: u64,
    /// `None` disables periodic reports.
    pub stats_interval: Option<Duration>,
    pub idle: IdlePolicy,
    pub pin_threads: bool,
    /// Highlight drop counters with ANSI colour.
    pub color: bool,
    /// How long port init waits for link up.
    pub link_wait: Duration,
}

impl PipelineConfig {
    pub fn new(port_mask: PortMask, lcores: LcoreSet) -> Self {
        Self {
            port_mask,
            lcores,
            rx_ring_size: RX_RING_SIZE,
            tx_ring_size: TX_RING_SIZE,
            num_mbufs: NUM_MBUFS,
            data_room_size: DEFAULT_DATA_ROOM_SIZE,
            sched_rx_ring_size: SCHED_RX_RING_SZ,
            sched_tx_ring_size: SCHED_TX_RING_SZ,
            dist_alg: DistAlg::Burst,
            scheduler: SchedulerKind::default(),
            worker_queue_size: 64,
            work_cycles: 100,
            stats_interval: Some(Duration::from_secs(1)),
            idle: IdlePolicy::default(),
            pin_threads: true,
            color: true,
            link_wait: Duration::from_secs(10),
        }
    }

    /// Set RX/TX descriptors per queue.
    pub fn descriptors(mut self, rx: u16, tx: u16) -> Self {
        self.rx_ring_size = rx;
        self.tx_ring_size = tx;
        self
    }

    /// Set mbufs per enabled port.
    pub fn num_mbufs(mut self, n: u32) -> Self {
        self.num_mbufs = n;
        self
    }

    pub fn data_room_size(mut self, size: u16) -> Self {
        self.data_room_size = size;
        self
    }

    /// Set the sizes of the RX→distributor and distributor→TX rings.
    pub fn sched_ring_sizes(mut self, rx: u32, tx: u32) -> Self {
        self.sched_rx_ring_size = rx;
        self.sched_tx_ring_size = tx;
        self
    }

    pub fn dist_alg(mut self, alg: DistAlg) -> Self {
        self.dist_alg = alg;
        self
    }

    pub fn scheduler(mut self, kind: SchedulerKind) -> Self {
        self.scheduler = kind;
        self
    }

    pub fn worker_queue_size(mut self, n: usize) -> Self {
        self.worker_queue_size = n;
        self
    }

    pub fn work_cycles(mut self, cycles: u64) -> Self {
        self.work_cycles = cycles;
        self
    }

    pub fn stats_interval(mut self, interval: Option<Duration>) -> Self {
        self.stats_interval = interval;
        self
    }

    pub fn idle(mut self, policy: IdlePolicy) -> Self {
        self.idle = policy;
        self
    }

    pub fn pin_threads(mut self, pin: bool) -> Self {
        self.pin_threads = pin;
        self
    }

    pub fn color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn link_wait(mut self, wait: Duration) -> Self {
        self.link_wait = wait;
        self
    }

    /// Workers this lcore set yields.
    pub fn num_workers(&self) -> usize {
        self.lcores.count().saturating_sub(MIN_LCORES - 1)
    }
}
