//! Multi-core packet distribution pipeline.
//!
//! Packets flow through four kinds of stages, each on its own lcore:
//!
//! ```text
//! ports ─► RX ─► rx_dist ring ─► Distributor ⇄ Workers ─► dist_tx ring ─► TX ─► ports
//! ```
//!
//! The RX stage polls enabled ports in turn, the distribution stage hands
//! packets to workers through a [`pktdist::api::rte::distributor::Distributor`],
//! workers simulate per-packet work and re-tag the egress port, and the TX
//! stage buffers packets per egress port before transmitting them.
//!
//! Shutdown cascades through [`shutdown`] flags: an external trigger stops
//! distribution, the distribution stage stops workers and then RX, and RX
//! stops TX.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pktdist::api::rte::net_ring::NetRing;
//! use pktdist_pipeline::{DistApp, PipelineConfig, PortMask};
//!
//! let config = PipelineConfig::new(PortMask::new(0x3), "0-4".parse().unwrap());
//! let pipeline = DistApp::new(config)
//!     .eth_dev(Arc::new(NetRing::new(2)))
//!     .build()
//!     .expect("pipeline init failed");
//!
//! let trigger = pipeline.trigger();
//! std::thread::spawn(move || {
//!     std::thread::sleep(std::time::Duration::from_secs(5));
//!     trigger.trigger();
//! });
//!
//! let summary = pipeline.run().unwrap();
//! println!("{summary:?}");
//! ```

pub mod app;
pub mod config;
pub mod error;
pub mod port;
pub mod shutdown;
pub mod stage;
pub mod stats;

pub use app::{DistApp, Pipeline, RunSummary};
pub use config::{IdlePolicy, PipelineConfig, PortMask, SchedulerKind};
pub use error::Error;
pub use shutdown::{ShutdownPhase, Trigger};
pub use stats::{AppStats, StatsCollector, StatsReport, StatsSnapshot};
