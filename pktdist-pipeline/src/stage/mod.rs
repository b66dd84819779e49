//! Pipeline stages, one per lcore.
//!
//! Every stage exposes `poll_once`, a single non-blocking iteration used by
//! the run loop and by tests, and `run`, the lcore entry point that loops
//! until the stage's shutdown flag is raised and returns the lcore exit code.

pub mod dist;
pub mod rx;
pub mod tx;
pub mod worker;

pub use dist::DistStage;
pub use rx::RxStage;
pub use tx::{OutputBuffer, TxStage};
pub use worker::WorkerStage;

use crossbeam_utils::Backoff;

use crate::config::IdlePolicy;

/// Applies an [`IdlePolicy`] to iterations that moved nothing.
pub(crate) struct Idle {
    policy: IdlePolicy,
    backoff: Backoff,
}

impl Idle {
    pub(crate) fn new(policy: IdlePolicy) -> Self {
        Self {
            policy,
            backoff: Backoff::new(),
        }
    }

    #[inline]
    pub(crate) fn idle(&self) {
        match self.policy {
            IdlePolicy::Spin => std::hint::spin_loop(),
            IdlePolicy::Backoff => self.backoff.snooze(),
        }
    }

    #[inline]
    pub(crate) fn reset(&self) {
        self.backoff.reset();
    }

    /// `idle()` when `moved` is zero, `reset()` otherwise.
    #[inline]
    pub(crate) fn after(&self, moved: usize) {
        if moved == 0 {
            self.idle();
        } else {
            self.reset();
        }
    }
}
