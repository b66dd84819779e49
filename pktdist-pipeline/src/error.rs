use std::fmt;

use pktdist::BoxError;
use pktdist::api::Errno;
use pktdist::api::rte::eth::PortId;

/// Fatal pipeline initialisation errors.
#[derive(Debug)]
pub enum Error {
    /// Fewer lcores than the pipeline needs.
    InsufficientLcores { have: usize, need: usize },
    /// The device has no ports.
    NoPorts,
    /// The port mask selects none of the device's ports.
    NoEnabledPorts,
    /// More than one port enabled, but not an even number of them.
    OddPortCount(usize),
    /// The port mask is not a non-zero hex number.
    InvalidPortMask(String),
    /// Creating the packet pool failed.
    MemPool(Errno),
    /// Creating a ring failed.
    Ring { name: &'static str, errno: Errno },
    /// Creating the distributor failed.
    Distributor(Errno),
    /// Bringing up a port failed.
    PortInit { port: PortId, errno: Errno },
    /// Spawning an lcore thread failed.
    Launch(BoxError),
    /// `DistApp::build` was called without a device.
    NoDevice,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InsufficientLcores { have, need } => {
                write!(f, "need at least {need} lcores, have {have}")
            }
            Error::NoPorts => write!(f, "no Ethernet ports available"),
            Error::NoEnabledPorts => write!(f, "all available ports are disabled, check portmask"),
            Error::OddPortCount(n) => {
                write!(f, "odd number of enabled ports ({n}), ports must be used in pairs")
            }
            Error::InvalidPortMask(s) => write!(f, "invalid portmask '{s}'"),
            Error::MemPool(e) => write!(f, "cannot create mbuf pool: {e}"),
            Error::Ring { name, errno } => write!(f, "cannot create ring {name}: {errno}"),
            Error::Distributor(e) => write!(f, "cannot create distributor: {e}"),
            Error::PortInit { port, errno } => write!(f, "cannot initialize port {port}: {errno}"),
            Error::Launch(e) => write!(f, "cannot launch lcore: {e}"),
            Error::NoDevice => write!(f, "no Ethernet device set, call eth_dev() before build()"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::MemPool(e) | Error::Distributor(e) => Some(e),
            Error::Ring { errno, .. } | Error::PortInit { errno, .. } => Some(errno),
            Error::Launch(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}
