//! Port bring-up.

use std::time::{Duration, Instant};

use pktdist::api::rte::eth::{EthDev, EthDevBuilder, PortId, RxQueueConf, TxQueueConf};
use pktdist::api::rte::pktmbuf::MemPool;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::Error;

/// Interval between link state checks.
const LINK_POLL: Duration = Duration::from_millis(100);

/// Configure and start `port` with one RX queue and `nb_tx_queues` TX queues,
/// wait up to `config.link_wait` for link up, then enable promiscuous mode.
///
/// A link still down after the wait is logged, not treated as an error.
pub fn init_port<D: EthDev>(
    dev: &D,
    port: PortId,
    mempool: &MemPool,
    config: &PipelineConfig,
    nb_tx_queues: u16,
) -> Result<(), Error> {
    let socket_id = dev.socket_id(port);
    let port_err = |errno| Error::PortInit { port, errno };

    EthDevBuilder::new(port)
        .nb_rx_queues(1)
        .nb_tx_queues(nb_tx_queues)
        .rx_queue_conf(
            RxQueueConf::new()
                .nb_desc(config.rx_ring_size)
                .socket_id(socket_id),
        )
        .tx_queue_conf(
            TxQueueConf::new()
                .nb_desc(config.tx_ring_size)
                .socket_id(socket_id),
        )
        .promiscuous()
        .build(dev, mempool)
        .map_err(port_err)?;

    let deadline = Instant::now() + config.link_wait;
    loop {
        let link = dev.link(port).map_err(port_err)?;
        if link.link_up {
            info!(port, %link, "Link up");
            break;
        }
        let now = Instant::now();
        if now >= deadline {
            warn!(port, "Link down");
            break;
        }
        info!(port, "Waiting for link up");
        std::thread::sleep(LINK_POLL.min(deadline - now));
    }

    let mac = dev.mac_addr(port).map_err(port_err)?;
    info!(port, %mac, socket_id, "Port initialized");
    Ok(())
}
