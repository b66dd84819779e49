//! Lcore (logical core) APIs.
//!
//! An lcore is an OS thread dedicated to one task and, optionally, pinned to
//! the CPU with the same id. The set of lcores an application may use is
//! given as an EAL-style core list such as `"0-3,6"`; the first lcore in the
//! set is the main lcore (the calling thread) and the rest are launched.
//!
//! # Example
//!
//! ```
//! use pktdist::api::rte::lcore::LcoreSet;
//!
//! let set: LcoreSet = "0-2".parse().unwrap();
//! let main = set.main().unwrap();
//! assert_eq!(main.id(), 0);
//!
//! let handles: Vec<_> = set
//!     .workers()
//!     .map(|lcore| {
//!         let id = lcore.id();
//!         lcore.launch(format!("lcore-{id}"), false, move || id as i32).unwrap()
//!     })
//!     .collect();
//!
//! let results: Vec<i32> = handles.into_iter().map(|h| h.wait()).collect();
//! assert_eq!(results, vec![1, 2]);
//! ```

use std::str::FromStr;
use std::thread::JoinHandle;

use crate::Result;
use crate::api::Errno;

/// Highest lcore id accepted in a core list, exclusive.
pub const MAX_LCORE: u32 = 128;

/// A handle to a logical core.
///
/// This type is `Copy`; it names an lcore, it is not the thread itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Lcore {
    id: u32,
}

impl Lcore {
    pub fn new(id: u32) -> Self {
        Self { id }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Launch `f` on a new thread named `name` for this lcore.
    ///
    /// With `pin`, the thread first pins itself to the CPU matching the lcore
    /// id. A failed pin is logged and the thread runs unpinned.
    pub fn launch<F>(self, name: impl Into<String>, pin: bool, f: F) -> Result<LcoreHandle>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        let name = name.into();
        let id = self.id;
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                if pin {
                    if let Err(e) = set_cpu_affinity(id as usize) {
                        tracing::warn!(
                            lcore = id,
                            error = %e,
                            "Failed to set CPU affinity, performance may be degraded"
                        );
                    } else {
                        tracing::debug!(lcore = id, cpu = id, "Thread pinned to CPU");
                    }
                }
                f()
            })
            .map_err(|e| format!("Failed to launch {name} on lcore {id}: {e}"))?;
        Ok(LcoreHandle {
            lcore: self,
            handle,
        })
    }
}

/// A launched lcore.
pub struct LcoreHandle {
    lcore: Lcore,
    handle: JoinHandle<i32>,
}

impl LcoreHandle {
    pub fn lcore(&self) -> Lcore {
        self.lcore
    }

    /// Whether the launched function has returned.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the launched function and return its return value.
    ///
    /// A function that panicked reports -1.
    pub fn wait(self) -> i32 {
        match self.handle.join() {
            Ok(ret) => ret,
            Err(_) => {
                tracing::error!(lcore = self.lcore.id, "lcore function panicked");
                -1
            }
        }
    }
}

/// Pin the calling thread to `cpu`.
#[cfg(target_os = "linux")]
pub fn set_cpu_affinity(cpu: usize) -> crate::api::Result<()> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut set = CpuSet::new();
    set.set(cpu)?;
    sched_setaffinity(Pid::from_raw(0), &set)
}

/// Pin the calling thread to `cpu`.
#[cfg(not(target_os = "linux"))]
pub fn set_cpu_affinity(_cpu: usize) -> crate::api::Result<()> {
    Err(Errno::ENOTSUP)
}

/// An ordered set of lcores parsed from a core list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LcoreSet {
    lcores: Vec<Lcore>,
}

impl LcoreSet {
    /// Parse a core list: comma separated ids or inclusive `a-b` ranges.
    ///
    /// Fails with `EINVAL` on an empty list, a malformed entry, a reversed
    /// range or an id of [`MAX_LCORE`] or more. Duplicates are merged.
    pub fn parse(list: &str) -> crate::api::Result<Self> {
        let mut ids = Vec::new();
        for part in list.split(',').map(str::trim) {
            let (lo, hi) = match part.split_once('-') {
                Some((lo, hi)) => (parse_id(lo)?, parse_id(hi)?),
                None => {
                    let id = parse_id(part)?;
                    (id, id)
                }
            };
            if lo > hi {
                return Err(Errno::EINVAL);
            }
            ids.extend(lo..=hi);
        }
        ids.sort_unstable();
        ids.dedup();
        Ok(Self {
            lcores: ids.into_iter().map(Lcore::new).collect(),
        })
    }

    /// Lcores `0..n`.
    pub fn first(n: u32) -> Self {
        Self {
            lcores: (0..n).map(Lcore::new).collect(),
        }
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.lcores.len()
    }

    /// The main lcore: the lowest id in the set.
    pub fn main(&self) -> Option<Lcore> {
        self.lcores.first().copied()
    }

    /// All lcores except the main one, in id order.
    pub fn workers(&self) -> impl Iterator<Item = Lcore> + '_ {
        self.lcores.iter().skip(1).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = Lcore> + '_ {
        self.lcores.iter().copied()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.lcores.binary_search(&Lcore::new(id)).is_ok()
    }
}

fn parse_id(s: &str) -> crate::api::Result<u32> {
    let id: u32 = s.trim().parse().map_err(|_| Errno::EINVAL)?;
    if id >= MAX_LCORE {
        return Err(Errno::EINVAL);
    }
    Ok(id)
}

impl FromStr for LcoreSet {
    type Err = Errno;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for LcoreSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<String> = self.lcores.iter().map(|l| l.id.to_string()).collect();
        write!(f, "{}", ids.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_core_list() {
        let set = LcoreSet::parse("0-3,5,2").unwrap();
        assert_eq!(set.count(), 5);
        assert_eq!(set.main(), Some(Lcore::new(0)));
        let ids: Vec<u32> = set.workers().map(|l| l.id()).collect();
        assert_eq!(ids, vec![1, 2, 3, 5]);
        assert!(set.contains(5));
        assert!(!set.contains(4));
        assert_eq!(set.to_string(), "0,1,2,3,5");
    }

    #[test]
    fn test_parse_rejects_bad_lists() {
        for bad in ["", "a", "3-1", "0-", "1,,2", "200"] {
            assert_eq!(LcoreSet::parse(bad), Err(Errno::EINVAL), "{bad:?}");
        }
    }

    #[test]
    fn test_launch_and_wait() {
        let handle = Lcore::new(1).launch("lcore-test", false, || 7).unwrap();
        assert_eq!(handle.lcore().id(), 1);
        assert_eq!(handle.wait(), 7);
    }

    #[test]
    fn test_panicking_lcore_reports_error() {
        let handle = Lcore::new(2)
            .launch("lcore-panic", false, || panic!("boom"))
            .unwrap();
        assert_eq!(handle.wait(), -1);
    }
}
