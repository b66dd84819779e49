//! Packet distributor server.
//!
//! Runs the RX / distributor / worker / TX pipeline over an in-memory ring
//! device, with a peer thread generating traffic on every enabled port.
//!
//! # Usage
//!
//! ```bash
//! # Two ports, lcores 0-7 (four workers), until Ctrl+C
//! pktdist-server -p 0x3 -l 0-7
//!
//! # Ten seconds of 1 Mpps per port over 16 flows, one packet per hand-off
//! pktdist-server -p 0x3 -l 0-5 --rate 1000000 --flows 16 --single --duration 10
//! ```

mod peer;

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use clap::Parser;
use pktdist::api::rte::distributor::DistAlg;
use pktdist::api::rte::lcore::LcoreSet;
use pktdist::api::rte::net_ring::NetRing;
use pktdist_pipeline::{DistApp, IdlePolicy, PipelineConfig, PortMask, SchedulerKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::peer::Peer;

#[derive(Parser, Debug)]
#[command(name = "pktdist-server")]
#[command(about = "Multi-core packet distributor over an in-memory ring device")]
struct Args {
    /// Hexadecimal bitmask of ports to use
    #[arg(short = 'p', long, default_value = "0x3")]
    portmask: PortMask,

    /// Lcore list; the first is main, then workers, TX, distributor and RX
    #[arg(short = 'l', long, default_value = "0-7")]
    lcores: LcoreSet,

    /// Number of ports the ring device exposes
    #[arg(long, default_value = "2")]
    ports: u16,

    /// Peer packets per second per port (unlimited when absent)
    #[arg(long)]
    rate: Option<u64>,

    /// Peer packet payload size in bytes
    #[arg(long, default_value = "64")]
    pkt_size: usize,

    /// Number of distinct flow hashes the peer generates
    #[arg(long, default_value = "1024")]
    flows: u32,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(long)]
    duration: Option<u64>,

    /// Worker assignment policy: round-robin, flow-hash or least-loaded
    #[arg(long, default_value = "flow-hash")]
    scheduler: SchedulerKind,

    /// Hand workers one packet at a time instead of bursts
    #[arg(long)]
    single: bool,

    /// Simulated work per packet, in timer cycles
    #[arg(long, default_value = "100")]
    work_cycles: u64,

    /// Seconds between statistics reports (0 disables them)
    #[arg(long, default_value = "1")]
    stats_interval: u64,

    /// Do not pin lcore threads to CPUs
    #[arg(long)]
    no_pin: bool,

    /// Back off and yield when idle instead of busy polling
    #[arg(long)]
    backoff: bool,

    /// Do not highlight drop counters
    #[arg(long)]
    no_color: bool,
}

fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let dev = Arc::new(NetRing::new(args.ports));

    let config = PipelineConfig::new(args.portmask, args.lcores)
        .scheduler(args.scheduler)
        .dist_alg(if args.single {
            DistAlg::Single
        } else {
            DistAlg::Burst
        })
        .work_cycles(args.work_cycles)
        .stats_interval((args.stats_interval > 0).then(|| Duration::from_secs(args.stats_interval)))
        .idle(if args.backoff {
            IdlePolicy::Backoff
        } else {
            IdlePolicy::Spin
        })
        .pin_threads(!args.no_pin)
        .color(!args.no_color);

    let pipeline = DistApp::new(config).eth_dev(dev.clone()).build()?;

    let trigger = pipeline.trigger();
    let handler_trigger = trigger.clone();
    ctrlc::set_handler(move || {
        warn!("Received Ctrl+C, shutting down");
        handler_trigger.trigger();
    })?;

    if let Some(secs) = args.duration {
        thread::Builder::new()
            .name("timer".to_string())
            .spawn(move || {
                thread::sleep(Duration::from_secs(secs));
                info!(secs, "Duration elapsed, shutting down");
                trigger.trigger();
            })?;
    }

    let stop = Arc::new(AtomicBool::new(false));
    let peer = Peer::new(dev, pipeline.enabled_ports().to_vec())
        .pkt_size(args.pkt_size)
        .flows(args.flows)
        .rate(args.rate)
        .spawn(stop.clone())?;

    let result = pipeline.run();
    stop.store(true, Ordering::Relaxed);
    let peer_stats = peer.join().map_err(|_| "peer thread panicked")?;
    let summary = result?;

    info!(
        injected = peer_stats.injected,
        drained = peer_stats.drained,
        transmitted = summary.totals.tx_pkts,
        residual_rx_ring = summary.residual_rx_ring,
        residual_tx_ring = summary.residual_tx_ring,
        "Run complete"
    );
    if !summary.is_clean() {
        return Err(format!("lcore failures: {:?}", summary.lcore_exit).into());
    }
    Ok(())
}

fn main() {
    // Initialize tracing - respects RUST_LOG, defaults to info if not set
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .init();

    let args = Args::parse();
    info!(portmask = %args.portmask, lcores = %args.lcores, "Starting packet distributor");

    if let Err(e) = run(args) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
