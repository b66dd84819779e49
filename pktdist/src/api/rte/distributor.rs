//! Software packet distributor.
//!
//! Modelled on `rte_distributor`: one distributor thread hands packets to a
//! fixed set of worker threads and collects them back once processed.
//!
//! ```text
//!              process()            get_pkt()
//!  backlog ──► to_worker[i] ──► DistWorker i ──► from_worker[i] ──► returns
//!             (Scheduler)                                  (harvest)
//! ```
//!
//! Each worker has a pair of bounded lock-free queues, cache-line padded so
//! workers do not false-share. The distributor side (`Distributor`) is
//! single-threaded and owns the backlog, the returns list and the
//! [`Scheduler`] that picks a worker for every packet. Packets are assigned
//! strictly in backlog order: when the scheduler cannot place the packet at
//! the head, assignment stops until a later call.
//!
//! Workers never block on a kernel primitive. [`DistWorker::get_pkt`] busy
//! polls its queue until work arrives or the caller's stop predicate holds.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arrayvec::ArrayVec;
use crossbeam_queue::ArrayQueue;
use crossbeam_utils::{Backoff, CachePadded};

use super::mbuf::Mbuf;
use crate::api::{Result, check_arg};

/// Largest batch a worker receives per request.
pub const DIST_BURST: usize = 8;

/// Upper bound on workers per distributor.
pub const MAX_WORKERS: usize = 1024;

/// Hand-off mode between distributor and workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DistAlg {
    /// Workers receive up to [`DIST_BURST`] packets per request.
    #[default]
    Burst,
    /// Workers receive one packet per request.
    Single,
}

/// Scheduler's view of one worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerLoad {
    /// Cleared once the worker retires.
    pub active: bool,
    /// Packets assigned but not yet picked up.
    pub queued: usize,
    pub capacity: usize,
}

impl WorkerLoad {
    #[inline]
    pub fn has_room(&self) -> bool {
        self.active && self.queued < self.capacity
    }
}

/// Assignment policy of a [`Distributor`].
pub trait Scheduler: Send {
    /// Pick a worker for `pkt`, or `None` to stop assigning for now.
    ///
    /// The distributor only assigns to a worker whose load `has_room()`;
    /// any other choice also stops assignment for this round.
    fn select(&mut self, pkt: &Mbuf, loads: &[WorkerLoad]) -> Option<usize>;
}

/// Cycle through workers, skipping full or retired ones.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: usize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for RoundRobin {
    fn select(&mut self, _pkt: &Mbuf, loads: &[WorkerLoad]) -> Option<usize> {
        let n = loads.len();
        let pick = (0..n)
            .map(|i| (self.next + i) % n)
            .find(|&w| loads[w].has_room())?;
        self.next = pick + 1;
        Some(pick)
    }
}

/// Flow affinity: packets with equal `hash` go to the same worker while the
/// set of active workers is unchanged.
///
/// A flow whose worker is full waits at the head of the backlog rather than
/// spilling to another worker, so per-flow order is kept.
#[derive(Debug, Default)]
pub struct FlowHash;

impl FlowHash {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for FlowHash {
    fn select(&mut self, pkt: &Mbuf, loads: &[WorkerLoad]) -> Option<usize> {
        if loads.is_empty() {
            return None;
        }
        let hash = pkt.hash() as usize;
        let target = hash % loads.len();
        if loads[target].active {
            return Some(target);
        }
        // Remap flows of retired workers over the remaining ones.
        let active = loads.iter().filter(|l| l.active).count();
        if active == 0 {
            return None;
        }
        loads
            .iter()
            .enumerate()
            .filter(|(_, l)| l.active)
            .nth(hash % active)
            .map(|(i, _)| i)
    }
}

/// Assign to the worker with the fewest queued packets.
#[derive(Debug, Default)]
pub struct LeastLoaded;

impl LeastLoaded {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for LeastLoaded {
    fn select(&mut self, _pkt: &Mbuf, loads: &[WorkerLoad]) -> Option<usize> {
        loads
            .iter()
            .enumerate()
            .filter(|(_, l)| l.has_room())
            .min_by_key(|(_, l)| l.queued)
            .map(|(i, _)| i)
    }
}

/// Sizing of a [`Distributor`].
#[derive(Debug, Clone)]
pub struct DistributorConf {
    /// Capacity of each worker's assignment queue.
    pub worker_queue_size: usize,
    /// Packets the distributor holds before they are assigned.
    pub backlog_size: usize,
}

impl Default for DistributorConf {
    fn default() -> Self {
        Self {
            worker_queue_size: 64,
            backlog_size: 256,
        }
    }
}

impl DistributorConf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn worker_queue_size(mut self, n: usize) -> Self {
        self.worker_queue_size = n;
        self
    }

    pub fn backlog_size(mut self, n: usize) -> Self {
        self.backlog_size = n;
        self
    }
}

struct WorkerSlot {
    to_worker: ArrayQueue<Mbuf>,
    from_worker: ArrayQueue<Mbuf>,
    active: AtomicBool,
}

struct Shared {
    name: String,
    alg: DistAlg,
    slots: Box<[CachePadded<WorkerSlot>]>,
    /// Cleared when the `Distributor` is dropped, so a worker stuck on a
    /// full return queue releases packets instead of spinning forever.
    dist_alive: AtomicBool,
}

/// Distributor side. Not `Clone`; owned by one thread.
pub struct Distributor {
    shared: Arc<Shared>,
    scheduler: Box<dyn Scheduler>,
    backlog: VecDeque<Mbuf>,
    backlog_size: usize,
    returns: VecDeque<Mbuf>,
    loads: Vec<WorkerLoad>,
    socket_id: i32,
}

impl Distributor {
    /// Create a distributor with default sizing and one [`DistWorker`] per
    /// worker id, in id order.
    pub fn create(
        name: impl Into<String>,
        socket_id: i32,
        num_workers: usize,
        alg: DistAlg,
        scheduler: Box<dyn Scheduler>,
    ) -> Result<(Distributor, Vec<DistWorker>)> {
        Self::create_with_conf(
            name,
            socket_id,
            num_workers,
            alg,
            scheduler,
            &DistributorConf::default(),
        )
    }

    /// Create a distributor with explicit sizing.
    ///
    /// Fails with `EINVAL` for zero or more than [`MAX_WORKERS`] workers, or
    /// zero-sized queues.
    pub fn create_with_conf(
        name: impl Into<String>,
        socket_id: i32,
        num_workers: usize,
        alg: DistAlg,
        scheduler: Box<dyn Scheduler>,
        conf: &DistributorConf,
    ) -> Result<(Distributor, Vec<DistWorker>)> {
        check_arg(
            (1..=MAX_WORKERS).contains(&num_workers)
                && conf.worker_queue_size > 0
                && conf.backlog_size > 0,
        )?;
        let name = name.into();
        tracing::debug!(
            distributor = %name,
            num_workers,
            ?alg,
            worker_queue_size = conf.worker_queue_size,
            "Creating distributor"
        );

        // A worker holds at most one batch beyond what is queued to it, so
        // its return queue never needs more room than this.
        let return_size = conf.worker_queue_size + DIST_BURST;
        let slots = (0..num_workers)
            .map(|_| {
                CachePadded::new(WorkerSlot {
                    to_worker: ArrayQueue::new(conf.worker_queue_size),
                    from_worker: ArrayQueue::new(return_size),
                    active: AtomicBool::new(true),
                })
            })
            .collect();
        let shared = Arc::new(Shared {
            name,
            alg,
            slots,
            dist_alive: AtomicBool::new(true),
        });

        let workers = (0..num_workers)
            .map(|id| DistWorker {
                id,
                shared: shared.clone(),
                retired: false,
            })
            .collect();

        let max_in_flight =
            conf.backlog_size + num_workers * (conf.worker_queue_size + return_size);
        let dist = Distributor {
            shared,
            scheduler,
            backlog: VecDeque::with_capacity(conf.backlog_size),
            backlog_size: conf.backlog_size,
            returns: VecDeque::with_capacity(max_in_flight),
            loads: vec![WorkerLoad::default(); num_workers],
            socket_id,
        };
        Ok((dist, workers))
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn socket_id(&self) -> i32 {
        self.socket_id
    }

    pub fn num_workers(&self) -> usize {
        self.shared.slots.len()
    }

    /// Free space in the backlog. [`process`](Self::process) accepts at most
    /// this many packets.
    #[inline]
    pub fn backlog_room(&self) -> usize {
        self.backlog_size.saturating_sub(self.backlog.len())
    }

    /// Packets waiting to be assigned.
    #[inline]
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Returned packets not yet collected with
    /// [`returned_pkts`](Self::returned_pkts).
    #[inline]
    pub fn returns_len(&self) -> usize {
        self.returns.len()
    }

    /// Submit packets from the front of `bufs`, then assign work and collect
    /// returns.
    ///
    /// Returns the number accepted; packets beyond the backlog room stay in
    /// `bufs`.
    pub fn process<const N: usize>(&mut self, bufs: &mut ArrayVec<Mbuf, N>) -> usize {
        let accepted = bufs.len().min(self.backlog_room());
        self.backlog.extend(bufs.drain(..accepted));
        self.poll();
        accepted
    }

    /// Assign backlog to workers and collect returns, without new input.
    pub fn poll(&mut self) {
        self.reclaim_retired();
        self.schedule();
        self.harvest();
    }

    /// Move up to `max` returned packets into `out`, oldest first.
    pub fn returned_pkts<const N: usize>(
        &mut self,
        out: &mut ArrayVec<Mbuf, N>,
        max: usize,
    ) -> usize {
        let n = max.min(out.remaining_capacity()).min(self.returns.len());
        out.extend(self.returns.drain(..n));
        n
    }

    /// Drive all in-flight work to completion.
    ///
    /// Keeps assigning backlog and collecting returns until every worker has
    /// retired. Packets that were never processed because no live worker
    /// remained are released; the count of those is returned. Returns stay
    /// available to [`returned_pkts`](Self::returned_pkts).
    ///
    /// Workers must be told to stop before calling this, or it does not
    /// return.
    pub fn flush(&mut self) -> usize {
        let backoff = Backoff::new();
        loop {
            let all_retired = self.reclaim_retired();
            self.harvest();
            if all_retired {
                break;
            }
            self.schedule();
            backoff.snooze();
        }
        let released = self.backlog.len();
        self.backlog.clear();
        if released > 0 {
            tracing::debug!(
                distributor = %self.shared.name,
                released,
                "Released unassigned packets on flush"
            );
        }
        released
    }

    /// Release every returned packet not yet collected.
    pub fn clear_returns(&mut self) -> usize {
        self.harvest();
        let released = self.returns.len();
        self.returns.clear();
        released
    }

    /// Refresh loads and move work queued to retired workers back to the
    /// head of the backlog. Returns true when every worker has retired.
    fn reclaim_retired(&mut self) -> bool {
        let mut all_retired = true;
        let mut reclaimed: Vec<Mbuf> = Vec::new();
        for (slot, load) in self.shared.slots.iter().zip(self.loads.iter_mut()) {
            load.active = slot.active.load(Ordering::Acquire);
            if load.active {
                all_retired = false;
            } else {
                while let Some(pkt) = slot.to_worker.pop() {
                    reclaimed.push(pkt);
                }
            }
            load.queued = slot.to_worker.len();
            load.capacity = slot.to_worker.capacity();
        }
        // Assigned packets are older than anything still in the backlog.
        for pkt in reclaimed.into_iter().rev() {
            self.backlog.push_front(pkt);
        }
        all_retired
    }

    fn schedule(&mut self) {
        while let Some(pkt) = self.backlog.front() {
            let Some(w) = self.scheduler.select(pkt, &self.loads) else {
                break;
            };
            if !self.loads.get(w).is_some_and(WorkerLoad::has_room) {
                break;
            }
            let Some(pkt) = self.backlog.pop_front() else {
                break;
            };
            if let Err(pkt) = self.shared.slots[w].to_worker.push(pkt) {
                self.backlog.push_front(pkt);
                break;
            }
            self.loads[w].queued += 1;
        }
    }

    fn harvest(&mut self) {
        for slot in self.shared.slots.iter() {
            while let Some(pkt) = slot.from_worker.pop() {
                self.returns.push_back(pkt);
            }
        }
    }
}

impl Drop for Distributor {
    fn drop(&mut self) {
        self.shared.dist_alive.store(false, Ordering::Release);
    }
}

/// Worker side of a [`Distributor`]. One per worker thread.
pub struct DistWorker {
    id: usize,
    shared: Arc<Shared>,
    retired: bool,
}

impl DistWorker {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Hand back the processed packets in `bufs` and wait for new work.
    ///
    /// Busy polls until at least one packet is assigned, returning how many
    /// were placed in `bufs`, or until `should_stop` returns true with no work
    /// pending, returning 0. Assigned work is always drained before the stop
    /// predicate is consulted.
    pub fn get_pkt<F>(
        &mut self,
        bufs: &mut ArrayVec<Mbuf, DIST_BURST>,
        mut should_stop: F,
    ) -> usize
    where
        F: FnMut() -> bool,
    {
        self.return_pkts(bufs);
        let max = match self.shared.alg {
            DistAlg::Burst => DIST_BURST,
            DistAlg::Single => 1,
        };
        let slot = &self.shared.slots[self.id];
        let backoff = Backoff::new();
        loop {
            while bufs.len() < max {
                match slot.to_worker.pop() {
                    Some(pkt) => bufs.push(pkt),
                    None => break,
                }
            }
            if !bufs.is_empty() {
                return bufs.len();
            }
            if should_stop() {
                return 0;
            }
            backoff.snooze();
        }
    }

    /// Hand back a final batch and leave the distributor. Work still queued
    /// to this worker is reassigned by the distributor.
    pub fn retire(mut self, bufs: &mut ArrayVec<Mbuf, DIST_BURST>) {
        self.return_pkts(bufs);
        self.mark_retired();
    }

    fn return_pkts(&self, bufs: &mut ArrayVec<Mbuf, DIST_BURST>) {
        let slot = &self.shared.slots[self.id];
        for mut pkt in bufs.drain(..) {
            let backoff = Backoff::new();
            loop {
                match slot.from_worker.push(pkt) {
                    Ok(()) => break,
                    Err(back) => {
                        if !self.shared.dist_alive.load(Ordering::Acquire) {
                            // Nobody will harvest; `back` is released here.
                            break;
                        }
                        pkt = back;
                        backoff.snooze();
                    }
                }
            }
        }
    }

    fn mark_retired(&mut self) {
        if !self.retired {
            self.retired = true;
            // Release: returns pushed above are visible once inactive is seen.
            self.shared.slots[self.id]
                .active
                .store(false, Ordering::Release);
        }
    }
}

impl Drop for DistWorker {
    fn drop(&mut self) {
        self.mark_retired();
    }
}
