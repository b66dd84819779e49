//! End-to-end pipeline tests over the in-memory ring device.
//!
//! Each test launches the full set of lcore threads, so they run serially.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use arrayvec::ArrayVec;
use pktdist::api::rte::lcore::LcoreSet;
use pktdist::api::rte::net_ring::NetRing;
use pktdist_pipeline::{
    DistApp, Error, IdlePolicy, PipelineConfig, PortMask, RunSummary, SchedulerKind, ShutdownPhase,
};

const WAIT: Duration = Duration::from_secs(10);

fn config(mask: u64, lcores: &str) -> PipelineConfig {
    PipelineConfig::new(PortMask::new(mask), lcores.parse::<LcoreSet>().unwrap())
        .num_mbufs(1024)
        .pin_threads(false)
        .stats_interval(None)
        .idle(IdlePolicy::Backoff)
        .link_wait(Duration::from_millis(10))
}

/// Inject `n` packets on `port`, each with its own flow hash.
fn inject(dev: &NetRing, port: u16, n: u32) {
    for i in 0..n {
        let mut pkt = dev.alloc(port).expect("pool exhausted");
        pkt.append(64).unwrap().fill(i as u8);
        pkt.set_hash(i.wrapping_mul(0x9e37_79b9));
        dev.inject(port, pkt).expect("rx ring full");
    }
}

fn wait_transmitted(dev: &NetRing, port: u16, n: usize) {
    let start = Instant::now();
    while dev.transmitted_count(port) < n {
        assert!(
            start.elapsed() < WAIT,
            "timed out: {} of {n} packets on port {port}",
            dev.transmitted_count(port)
        );
        thread::sleep(Duration::from_millis(1));
    }
}

fn drain_wire(dev: &NetRing, port: u16) -> Vec<(u16, usize)> {
    let mut out = Vec::new();
    loop {
        let mut bufs: ArrayVec<_, 32> = ArrayVec::new();
        if dev.take_transmitted(port, &mut bufs, 32) == 0 {
            return out;
        }
        out.extend(bufs.iter().map(|m| (m.out_port(), m.data_len())));
    }
}

fn assert_clean_shutdown(summary: &RunSummary) {
    assert!(summary.is_clean(), "{:?}", summary.lcore_exit);
    assert_eq!(
        summary.shutdown_order,
        vec![
            ShutdownPhase::StopDistributing,
            ShutdownPhase::StopWorking,
            ShutdownPhase::StopReceiving,
            ShutdownPhase::Terminated,
        ]
    );
}

#[test]
#[serial_test::serial]
fn test_packets_cross_to_paired_port() {
    let dev = Arc::new(NetRing::new(2));
    let pipeline = DistApp::new(config(0x3, "0-7"))
        .eth_dev(dev.clone())
        .build()
        .unwrap();
    assert_eq!(pipeline.num_workers(), 4);
    let pool = pipeline.mempool().clone();
    let trigger = pipeline.trigger();
    let runner = thread::spawn(move || pipeline.run());

    inject(&dev, 0, 64);
    wait_transmitted(&dev, 1, 64);
    trigger.trigger();
    let summary = runner.join().unwrap().unwrap();

    assert_clean_shutdown(&summary);
    let t = &summary.totals;
    assert_eq!(t.rx_pkts, 64);
    assert_eq!(t.rx_enqueued, 64);
    assert_eq!(t.dist_in, 64);
    assert_eq!(t.dist_returned, 64);
    assert_eq!(t.dist_sent, 64);
    assert_eq!(t.tx_dequeued, 64);
    assert_eq!(t.tx_pkts, 64);
    assert_eq!(t.rx_dropped + t.dist_dropped + t.tx_dropped, 0);
    assert_eq!(t.worker_pkts.iter().sum::<u64>(), 64);
    assert_eq!(summary.residual_rx_ring, 0);
    assert_eq!(summary.residual_tx_ring, 0);

    let wire = drain_wire(&dev, 1);
    assert_eq!(wire.len(), 64);
    assert!(wire.iter().all(|&(out_port, len)| out_port == 1 && len == 64));
    assert_eq!(dev.transmitted_count(0), 0);
    assert_eq!(pool.in_use_count(), 0);
}

#[test]
#[serial_test::serial]
fn test_single_port_echoes_back() {
    let dev = Arc::new(NetRing::new(1));
    let config = config(0x1, "0-4").scheduler(SchedulerKind::RoundRobin);
    let pipeline = DistApp::new(config).eth_dev(dev.clone()).build().unwrap();
    let trigger = pipeline.trigger();
    let runner = thread::spawn(move || pipeline.run());

    inject(&dev, 0, 100);
    wait_transmitted(&dev, 0, 100);
    trigger.trigger();
    let summary = runner.join().unwrap().unwrap();

    assert_clean_shutdown(&summary);
    assert_eq!(summary.totals.tx_pkts, 100);
    assert_eq!(summary.totals.worker_pkts, vec![100]);
    assert!(drain_wire(&dev, 0).iter().all(|&(out_port, _)| out_port == 0));
}

#[test]
#[serial_test::serial]
fn test_both_directions() {
    let dev = Arc::new(NetRing::new(2));
    let config = config(0x3, "0-5").scheduler(SchedulerKind::LeastLoaded);
    let pipeline = DistApp::new(config).eth_dev(dev.clone()).build().unwrap();
    let trigger = pipeline.trigger();
    let runner = thread::spawn(move || pipeline.run());

    inject(&dev, 0, 200);
    inject(&dev, 1, 150);
    wait_transmitted(&dev, 1, 200);
    wait_transmitted(&dev, 0, 150);
    trigger.trigger();
    let summary = runner.join().unwrap().unwrap();

    assert_clean_shutdown(&summary);
    assert_eq!(summary.totals.tx_pkts, 350);
    assert_eq!(summary.totals.ports.len(), 2);
    assert_eq!(summary.totals.ports[0].ipackets, 200);
    assert_eq!(summary.totals.ports[1].opackets, 200);
}

#[test]
#[serial_test::serial]
fn test_idle_shutdown() {
    let dev = Arc::new(NetRing::new(2));
    let pipeline = DistApp::new(config(0x3, "0-4").idle(IdlePolicy::Spin))
        .eth_dev(dev)
        .build()
        .unwrap();
    let monitor = pipeline.monitor();
    let trigger = pipeline.trigger();
    let runner = thread::spawn(move || pipeline.run());

    thread::sleep(Duration::from_millis(50));
    assert_eq!(monitor.phase(), ShutdownPhase::Running);
    trigger.trigger();
    let summary = runner.join().unwrap().unwrap();

    assert_clean_shutdown(&summary);
    assert_eq!(monitor.phase(), ShutdownPhase::Terminated);
    assert_eq!(summary.totals.rx_pkts, 0);
    let names: Vec<&str> = summary.lcore_exit.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, ["worker-0", "tx", "dist", "rx"]);
}

#[test]
#[serial_test::serial]
fn test_trigger_before_run() {
    let dev = Arc::new(NetRing::new(2));
    let pipeline = DistApp::new(config(0x3, "0-5"))
        .eth_dev(dev)
        .build()
        .unwrap();
    pipeline.trigger().trigger();
    let summary = pipeline.run().unwrap();
    assert_clean_shutdown(&summary);
}

#[test]
fn test_build_errors() {
    let build = |mask: u64, nb_ports: u16, lcores: &str| {
        DistApp::new(config(mask, lcores))
            .eth_dev(Arc::new(NetRing::new(nb_ports)))
            .build()
            .err()
    };

    assert!(matches!(
        build(0x3, 2, "0-3"),
        Some(Error::InsufficientLcores { have: 4, need: 5 })
    ));
    assert!(matches!(build(0x3, 0, "0-4"), Some(Error::NoPorts)));
    assert!(matches!(build(0x10, 2, "0-4"), Some(Error::NoEnabledPorts)));
    assert!(matches!(build(0x7, 3, "0-4"), Some(Error::OddPortCount(3))));
    // Bits past the last port are ignored.
    assert!(build(0x1f, 4, "0-4").is_none());
}
