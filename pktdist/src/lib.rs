//! rte-style packet primitives for the distribution pipeline.
//!
//! The [`api::rte`] modules mirror the DPDK building blocks the pipeline is
//! written against (mbufs and their pools, rings, ethernet devices, the
//! packet distributor and lcores) as software implementations, so the
//! pipeline runs unchanged on a plain Linux host.

pub mod api;

/// A boxed error type for pktdist operations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A Result type using BoxError.
pub type Result<T> = std::result::Result<T, BoxError>;
