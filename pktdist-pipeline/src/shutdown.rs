//! Cascading shutdown flags.
//!
//! Four monotonic flags, each raised by exactly one party:
//!
//! | flag              | raised by            | observed by  |
//! |-------------------|----------------------|--------------|
//! | stop distributing | [`Trigger`]          | distribution |
//! | stop working      | [`DistShutdown`]     | workers      |
//! | stop receiving    | [`DistShutdown`]     | RX           |
//! | stop transmitting | [`RxShutdown`]       | TX           |
//!
//! Raising is a release store and observing an acquire load, so whatever a
//! stage finished before raising (a distributor flush, for instance) is
//! visible to the stage that sees the flag. Flags are never cleared.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

/// Shutdown progress, in cascade order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownPhase {
    Running,
    StopDistributing,
    StopWorking,
    StopReceiving,
    Terminated,
}

/// A one-way flag.
#[derive(Default)]
struct Signal {
    raised: CachePadded<AtomicBool>,
    /// Order in which the flag was raised, 0 while down.
    seq: AtomicU64,
}

impl Signal {
    #[inline]
    fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    fn raise(&self, next_seq: &AtomicU64) {
        if self.is_raised() {
            return;
        }
        let seq = next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.seq.store(seq, Ordering::Relaxed);
        self.raised.store(true, Ordering::Release);
    }
}

#[derive(Default)]
struct Flags {
    dist: Signal,
    work: Signal,
    rx: Signal,
    tx: Signal,
    next_seq: AtomicU64,
}

impl Flags {
    fn raise(&self, signal: &Signal, phase: ShutdownPhase) {
        if !signal.is_raised() {
            tracing::info!(?phase, "Shutdown phase");
        }
        signal.raise(&self.next_seq);
    }
}

/// Create a fresh set of flags and the role handles that operate on them.
pub fn channel() -> (Trigger, ShutdownHandles) {
    let flags = Arc::new(Flags::default());
    let trigger = Trigger {
        flags: flags.clone(),
    };
    let handles = ShutdownHandles {
        dist: DistShutdown {
            flags: flags.clone(),
        },
        worker: WorkerShutdown {
            flags: flags.clone(),
        },
        rx: RxShutdown {
            flags: flags.clone(),
        },
        tx: TxShutdown {
            flags: flags.clone(),
        },
        monitor: ShutdownMonitor { flags },
    };
    (trigger, handles)
}

/// Role handles, one per stage kind.
pub struct ShutdownHandles {
    pub dist: DistShutdown,
    pub worker: WorkerShutdown,
    pub rx: RxShutdown,
    pub tx: TxShutdown,
    pub monitor: ShutdownMonitor,
}

/// External trigger: raises *stop distributing*. Safe to call repeatedly and
/// from a signal handler thread.
#[derive(Clone)]
pub struct Trigger {
    flags: Arc<Flags>,
}

impl Trigger {
    pub fn trigger(&self) {
        self.flags.raise(&self.flags.dist, ShutdownPhase::StopDistributing);
    }

    pub fn is_triggered(&self) -> bool {
        self.flags.dist.is_raised()
    }
}

/// Distribution stage handle.
pub struct DistShutdown {
    flags: Arc<Flags>,
}

impl DistShutdown {
    #[inline]
    pub fn should_stop(&self) -> bool {
        self.flags.dist.is_raised()
    }

    pub fn stop_working(&self) {
        self.flags.raise(&self.flags.work, ShutdownPhase::StopWorking);
    }

    pub fn stop_receiving(&self) {
        self.flags.raise(&self.flags.rx, ShutdownPhase::StopReceiving);
    }
}

/// Worker handle. Cloned once per worker; workers only observe.
#[derive(Clone)]
pub struct WorkerShutdown {
    flags: Arc<Flags>,
}

impl WorkerShutdown {
    #[inline]
    pub fn should_stop(&self) -> bool {
        self.flags.work.is_raised()
    }
}

/// RX stage handle.
pub struct RxShutdown {
    flags: Arc<Flags>,
}

impl RxShutdown {
    #[inline]
    pub fn should_stop(&self) -> bool {
        self.flags.rx.is_raised()
    }

    pub fn stop_transmitting(&self) {
        self.flags.raise(&self.flags.tx, ShutdownPhase::Terminated);
    }
}

/// TX stage handle.
pub struct TxShutdown {
    flags: Arc<Flags>,
}

impl TxShutdown {
    #[inline]
    pub fn should_stop(&self) -> bool {
        self.flags.tx.is_raised()
    }
}

/// Read-only view for the control thread and tests.
#[derive(Clone)]
pub struct ShutdownMonitor {
    flags: Arc<Flags>,
}

impl ShutdownMonitor {
    /// Furthest phase reached along the cascade.
    pub fn phase(&self) -> ShutdownPhase {
        let f = &self.flags;
        if f.tx.is_raised() {
            ShutdownPhase::Terminated
        } else if f.rx.is_raised() {
            ShutdownPhase::StopReceiving
        } else if f.work.is_raised() {
            ShutdownPhase::StopWorking
        } else if f.dist.is_raised() {
            ShutdownPhase::StopDistributing
        } else {
            ShutdownPhase::Running
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.flags.dist.is_raised()
    }

    /// Raise every flag in cascade order. Used when an lcore is lost and the
    /// cascade can no longer complete on its own.
    pub(crate) fn force_all(&self) {
        let f = &self.flags;
        f.raise(&f.dist, ShutdownPhase::StopDistributing);
        f.raise(&f.work, ShutdownPhase::StopWorking);
        f.raise(&f.rx, ShutdownPhase::StopReceiving);
        f.raise(&f.tx, ShutdownPhase::Terminated);
    }

    /// Raised phases in the order they were raised.
    pub fn raise_order(&self) -> Vec<ShutdownPhase> {
        let f = &self.flags;
        let mut raised: Vec<(u64, ShutdownPhase)> = [
            (&f.dist, ShutdownPhase::StopDistributing),
            (&f.work, ShutdownPhase::StopWorking),
            (&f.rx, ShutdownPhase::StopReceiving),
            (&f.tx, ShutdownPhase::Terminated),
        ]
        .into_iter()
        .filter(|(s, _)| s.is_raised())
        .map(|(s, phase)| (s.seq.load(Ordering::Relaxed), phase))
        .collect();
        raised.sort_unstable_by_key(|(seq, _)| *seq);
        raised.into_iter().map(|(_, phase)| phase).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cascade_order() {
        let (trigger, h) = channel();
        assert_eq!(h.monitor.phase(), ShutdownPhase::Running);
        assert!(!h.dist.should_stop());

        trigger.trigger();
        trigger.trigger();
        assert!(h.dist.should_stop());
        assert_eq!(h.monitor.phase(), ShutdownPhase::StopDistributing);

        h.dist.stop_working();
        assert!(h.worker.should_stop());
        assert!(!h.rx.should_stop());

        h.dist.stop_receiving();
        assert!(h.rx.should_stop());
        assert!(!h.tx.should_stop());

        h.rx.stop_transmitting();
        assert!(h.tx.should_stop());
        assert_eq!(h.monitor.phase(), ShutdownPhase::Terminated);
        assert_eq!(
            h.monitor.raise_order(),
            vec![
                ShutdownPhase::StopDistributing,
                ShutdownPhase::StopWorking,
                ShutdownPhase::StopReceiving,
                ShutdownPhase::Terminated,
            ]
        );
    }

    #[test]
    fn test_raise_visible_across_threads() {
        let (trigger, h) = channel();
        let worker = h.worker.clone();
        let t = std::thread::spawn(move || {
            while !worker.should_stop() {
                std::hint::spin_loop();
            }
        });
        trigger.trigger();
        h.dist.stop_working();
        t.join().unwrap();
    }

    #[test]
    fn test_force_all() {
        let (_trigger, h) = channel();
        h.dist.stop_working();
        h.monitor.force_all();
        assert!(h.tx.should_stop());
        assert_eq!(
            h.monitor.raise_order(),
            vec![
                ShutdownPhase::StopWorking,
                ShutdownPhase::StopDistributing,
                ShutdownPhase::StopReceiving,
                ShutdownPhase::Terminated,
            ]
        );
    }
}
