pub mod cycles;
pub mod distributor;
pub mod eth;
pub mod lcore;
pub mod mbuf;
pub mod net_ring;
pub mod pktmbuf;
pub mod queue;
pub mod ring;
