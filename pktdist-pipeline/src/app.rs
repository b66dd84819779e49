//! DistApp builder and runner.

use std::sync::Arc;
use std::time::Duration;

use pktdist::api::rte::distributor::{DistWorker, Distributor, DistributorConf};
use pktdist::api::rte::eth::{EthDev, PortId};
use pktdist::api::rte::lcore::LcoreHandle;
use pktdist::api::rte::mbuf::Mbuf;
use pktdist::api::rte::pktmbuf::{MemPool, MemPoolConfig};
use pktdist::api::rte::ring::{Ring, RingConsumer, RingFlags, RingProducer};
use tracing::{error, info, warn};

use crate::config::{BURST_SIZE, MIN_LCORES, PipelineConfig};
use crate::error::Error;
use crate::port::init_port;
use crate::shutdown::{self, ShutdownHandles, ShutdownMonitor, ShutdownPhase, Trigger};
use crate::stage::{DistStage, RxStage, TxStage, WorkerStage};
use crate::stats::{AppStats, StatsCollector, StatsSnapshot};

const MBUF_POOL_NAME: &str = "MBUF_POOL";
const DISTRIBUTOR_NAME: &str = "PKT_DIST";
const RX_RING_NAME: &str = "Input_ring";
const TX_RING_NAME: &str = "Output_ring";

/// Main lcore sleep between checks while the pipeline runs.
const MAIN_POLL: Duration = Duration::from_millis(1);

type LcoreTask = Box<dyn FnOnce() -> i32 + Send>;

/// Builder for a distribution pipeline.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use pktdist::api::rte::net_ring::NetRing;
/// use pktdist_pipeline::{DistApp, PipelineConfig, PortMask};
///
/// let config = PipelineConfig::new(PortMask::new(0x3), "0-5".parse().unwrap());
/// let pipeline = DistApp::new(config)
///     .eth_dev(Arc::new(NetRing::new(2)))
///     .build()
///     .unwrap();
/// pipeline.trigger().trigger();
/// pipeline.run().unwrap();
/// ```
pub struct DistApp<D: EthDev> {
    config: PipelineConfig,
    dev: Option<Arc<D>>,
}

impl<D: EthDev> DistApp<D> {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config, dev: None }
    }

    /// Set the Ethernet device whose ports the pipeline drives.
    pub fn eth_dev(mut self, dev: Arc<D>) -> Self {
        self.dev = Some(dev);
        self
    }

    /// Validate the configuration and create every resource the pipeline
    /// needs: the mbuf pool, the enabled ports, the distributor and the two
    /// rings. No lcore is launched yet.
    pub fn build(self) -> Result<Pipeline<D>, Error> {
        let DistApp { config, dev } = self;
        let dev = dev.ok_or(Error::NoDevice)?;

        let nb_lcores = config.lcores.count();
        if nb_lcores < MIN_LCORES {
            return Err(Error::InsufficientLcores {
                have: nb_lcores,
                need: MIN_LCORES,
            });
        }

        let nb_ports = dev.count_avail();
        if nb_ports == 0 {
            return Err(Error::NoPorts);
        }
        if config.port_mask.bits().checked_shr(nb_ports as u32).unwrap_or(0) != 0 {
            warn!(
                port_mask = %config.port_mask,
                nb_ports,
                "Port mask selects ports that do not exist"
            );
        }
        let ports = config.port_mask.enabled_ports(nb_ports);
        if ports.is_empty() {
            return Err(Error::NoEnabledPorts);
        }
        if ports.len() > 1 && ports.len() % 2 != 0 {
            return Err(Error::OddPortCount(ports.len()));
        }
        let num_workers = config.num_workers();

        info!(
            lcores = %config.lcores,
            ?ports,
            num_workers,
            scheduler = ?config.scheduler,
            "Building distributor pipeline"
        );

        let mempool_config = MemPoolConfig::new()
            .num_mbufs(config.num_mbufs.saturating_mul(ports.len() as u32))
            .data_room_size(config.data_room_size);
        let mempool = MemPool::create(MBUF_POOL_NAME, &mempool_config).map_err(Error::MemPool)?;

        // Every non-main lcore may transmit.
        let nb_tx_queues = (nb_lcores - 1) as u16;
        for port in 0..nb_ports {
            if !config.port_mask.contains(port) {
                info!(port, "Skipping disabled port");
                continue;
            }
            init_port(&*dev, port, &mempool, &config, nb_tx_queues)?;
        }

        let socket_id = dev.socket_id(ports[0]);
        let dist_conf = DistributorConf::new()
            .worker_queue_size(config.worker_queue_size)
            .backlog_size(4 * BURST_SIZE);
        let (dist, workers) = Distributor::create_with_conf(
            DISTRIBUTOR_NAME,
            socket_id,
            num_workers,
            config.dist_alg,
            config.scheduler.build(),
            &dist_conf,
        )
        .map_err(Error::Distributor)?;

        let rx_ring = Ring::create(RX_RING_NAME, config.sched_rx_ring_size, RingFlags::empty())
            .map_err(|errno| Error::Ring {
                name: RX_RING_NAME,
                errno,
            })?;
        let tx_ring = Ring::create(TX_RING_NAME, config.sched_tx_ring_size, RingFlags::empty())
            .map_err(|errno| Error::Ring {
                name: TX_RING_NAME,
                errno,
            })?;

        let (trigger, shutdown) = shutdown::channel();
        Ok(Pipeline {
            stats: Arc::new(AppStats::new(num_workers)),
            config,
            dev,
            mempool,
            ports,
            dist,
            workers,
            rx_ring,
            tx_ring,
            trigger,
            shutdown,
        })
    }
}

/// A fully initialised pipeline, ready to [`run`](Pipeline::run).
pub struct Pipeline<D: EthDev> {
    config: PipelineConfig,
    dev: Arc<D>,
    mempool: MemPool,
    ports: Vec<PortId>,
    dist: Distributor,
    workers: Vec<DistWorker>,
    rx_ring: (RingProducer<Mbuf>, RingConsumer<Mbuf>),
    tx_ring: (RingProducer<Mbuf>, RingConsumer<Mbuf>),
    stats: Arc<AppStats>,
    trigger: Trigger,
    shutdown: ShutdownHandles,
}

/// Outcome of [`Pipeline::run`].
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Counters over the whole run.
    pub totals: StatsSnapshot,
    /// Packets left on the RX→distributor ring at exit, released on drop.
    pub residual_rx_ring: u64,
    /// Packets left on the distributor→TX ring at exit, released on drop.
    pub residual_tx_ring: u64,
    pub shutdown_order: Vec<ShutdownPhase>,
    /// Thread name and return value of every launched lcore.
    pub lcore_exit: Vec<(String, i32)>,
}

impl RunSummary {
    /// Whether every lcore returned 0.
    pub fn is_clean(&self) -> bool {
        self.lcore_exit.iter().all(|(_, ret)| *ret == 0)
    }
}

impl<D: EthDev> Pipeline<D> {
    pub fn mempool(&self) -> &MemPool {
        &self.mempool
    }

    /// Handle that starts the shutdown cascade.
    pub fn trigger(&self) -> Trigger {
        self.trigger.clone()
    }

    pub fn monitor(&self) -> ShutdownMonitor {
        self.shutdown.monitor.clone()
    }

    pub fn stats(&self) -> Arc<AppStats> {
        self.stats.clone()
    }

    pub fn enabled_ports(&self) -> &[PortId] {
        &self.ports
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Launch every stage and block until the shutdown cascade completes.
    ///
    /// Non-main lcores are assigned in id order: one per worker, then TX,
    /// distribution and RX. The calling thread acts as the main lcore and
    /// prints statistics until [`Trigger::trigger`] is called.
    pub fn run(self) -> Result<RunSummary, Error> {
        let Pipeline {
            config,
            dev,
            mempool: _mempool,
            ports,
            dist,
            workers,
            rx_ring,
            tx_ring,
            stats,
            trigger: _trigger,
            shutdown,
        } = self;
        let ShutdownHandles {
            dist: dist_shutdown,
            worker: worker_shutdown,
            rx: rx_shutdown,
            tx: tx_shutdown,
            monitor,
        } = shutdown;
        let (rx_prod, rx_cons) = rx_ring;
        let (tx_prod, tx_cons) = tx_ring;

        let toggle_port = ports.len() > 1;
        let mut tasks: Vec<(String, LcoreTask)> = Vec::with_capacity(workers.len() + 3);
        for worker in workers {
            let stage = WorkerStage::new(
                worker,
                stats.clone(),
                worker_shutdown.clone(),
                toggle_port,
                config.work_cycles,
            );
            tasks.push((format!("worker-{}", stage.id()), Box::new(move || stage.run())));
        }
        let tx = TxStage::new(
            dev.clone(),
            &ports,
            tx_cons,
            stats.clone(),
            tx_shutdown,
            config.idle,
        );
        tasks.push(("tx".to_string(), Box::new(move || tx.run())));
        let dist = DistStage::new(
            rx_cons,
            tx_prod,
            dist,
            stats.clone(),
            dist_shutdown,
            config.idle,
        );
        tasks.push(("dist".to_string(), Box::new(move || dist.run())));
        let rx = RxStage::new(
            dev.clone(),
            &ports,
            rx_prod,
            stats.clone(),
            rx_shutdown,
            config.idle,
        );
        tasks.push(("rx".to_string(), Box::new(move || rx.run())));

        let mut launched: Vec<(String, LcoreHandle)> = Vec::with_capacity(tasks.len());
        for (lcore, (name, task)) in config.lcores.workers().zip(tasks) {
            info!(lcore = lcore.id(), role = %name, "Launching lcore");
            match lcore.launch(name.clone(), config.pin_threads, task) {
                Ok(handle) => launched.push((name, handle)),
                Err(e) => {
                    error!(lcore = lcore.id(), role = %name, error = %e, "Launch failed");
                    monitor.force_all();
                    for (_, handle) in launched {
                        handle.wait();
                    }
                    return Err(Error::Launch(e));
                }
            }
        }

        let mut collector = StatsCollector::new(
            stats.clone(),
            dev.clone(),
            ports.clone(),
            config.stats_interval.unwrap_or(Duration::ZERO),
            config.color,
        );
        while !monitor.is_triggered() {
            if let Some((name, handle)) = launched.iter().find(|(_, h)| h.is_finished()) {
                error!(lcore = handle.lcore().id(), role = %name, "lcore exited unexpectedly");
                monitor.force_all();
                break;
            }
            if config.stats_interval.is_some() {
                if let Some(report) = collector.poll() {
                    println!("{report}");
                }
            }
            std::thread::sleep(MAIN_POLL);
        }

        let lcore_exit: Vec<(String, i32)> = launched
            .into_iter()
            .map(|(name, handle)| {
                let lcore = handle.lcore().id();
                let ret = handle.wait();
                if ret != 0 {
                    warn!(lcore, role = %name, ret, "lcore returned non-zero");
                }
                (name, ret)
            })
            .collect();

        let totals = collector.totals();
        if config.stats_interval.is_some() {
            println!("{}", collector.summary());
        }

        for &port in &ports {
            if let Err(e) = dev.stop(port) {
                warn!(port, error = %e, "Failed to stop port");
            }
        }

        let summary = RunSummary {
            residual_rx_ring: totals.rx_enqueued.saturating_sub(totals.dist_in),
            residual_tx_ring: totals.dist_sent.saturating_sub(totals.tx_dequeued),
            totals,
            shutdown_order: monitor.raise_order(),
            lcore_exit,
        };
        info!(
            residual_rx_ring = summary.residual_rx_ring,
            residual_tx_ring = summary.residual_tx_ring,
            "Distributor pipeline stopped"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortMask;
    use pktdist::api::rte::lcore::LcoreSet;
    use pktdist::api::rte::net_ring::NetRing;

    fn app(mask: u64, nb_ports: u16, lcores: u32) -> DistApp<NetRing> {
        let config = PipelineConfig::new(PortMask::new(mask), LcoreSet::first(lcores))
            .num_mbufs(512)
            .link_wait(Duration::from_millis(10));
        DistApp::new(config).eth_dev(Arc::new(NetRing::new(nb_ports)))
    }

    #[test]
    fn test_build_needs_device() {
        let config = PipelineConfig::new(PortMask::new(1), LcoreSet::first(5));
        let res = DistApp::<NetRing>::new(config).build();
        assert!(matches!(res, Err(Error::NoDevice)));
    }

    #[test]
    fn test_build_resources() {
        let pipeline = app(0x3, 2, 8).build().unwrap();
        assert_eq!(pipeline.enabled_ports(), &[0, 1]);
        assert_eq!(pipeline.num_workers(), 4);
        assert_eq!(pipeline.mempool().name(), MBUF_POOL_NAME);
        assert_eq!(pipeline.mempool().size(), 1024);
        assert_eq!(pipeline.stats().num_workers(), 4);
        assert_eq!(pipeline.monitor().phase(), ShutdownPhase::Running);
    }

    #[test]
    fn test_single_port_allowed() {
        let pipeline = app(0x1, 3, 5).build().unwrap();
        assert_eq!(pipeline.enabled_ports(), &[0]);
        assert_eq!(pipeline.num_workers(), 1);
    }
}
