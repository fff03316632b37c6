use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, timeout, Instant};

use super::core::{AppEvent, Effects, NodeCore};
use crate::config::NodeConfig;
use crate::net::broadcast::send_addr;
use crate::net::types::NetMessage;
use crate::net::udp::UdpTransport;
use crate::overlay::types::OverlayMessage;
use crate::overlay::LookupTable;

/// How a node enters the cluster.
#[derive(Debug, Clone)]
pub enum NodeMode {
    /// Found the cluster: all genesis nodes are started with the same peer
    /// list and derive the same initial lookup table from it.
    Genesis { peers: Vec<SocketAddr> },
    /// Join a running cluster by checking in at any established node.
    Join { seed: SocketAddr },
}

/// Run one node until it terminates.
///
/// The loop is strictly one event at a time: a datagram or an expired timer
/// is handled by the core, then the produced effects are flushed. Detector
/// timers are rescheduled from the detector's own adaptive delay; all other
/// timers are fixed periods from the configuration.
pub async fn run_node(config: NodeConfig, bind: SocketAddr, mode: NodeMode) -> Result<()> {
    let transport = UdpTransport::bind(bind).await?;
    let local = transport.local_addr()?;
    let (table, store) = match mode {
        NodeMode::Genesis { peers } => {
            let table =
                LookupTable::generate(&peers, config.replication_degree, config.key_space)?;
            (table, BTreeMap::new())
        }
        NodeMode::Join { seed } => join_cluster(&transport, local, seed).await?,
    };
    let self_pid = table
        .find_by_addr(local)
        .context("local bind address is not part of the lookup table")?;
    tracing::info!("Node {} starting over a {}-partition ring", self_pid, table.len());

    let (mut core, fx) = NodeCore::new(&config, self_pid, table, store)?;
    if apply(&mut core, &transport, fx).await {
        return Ok(());
    }

    let mut buf = vec![0u8; 64 * 1024];
    let now = Instant::now();
    let mut group_at = now + core.group_delay();
    let mut successor_at = now + core.successor_delay();
    let mut elector_at = now + config.elector_tick;
    let mut membership_at = now + config.membership_tick;
    let mut vsync_at = now + config.vsync_tick;
    let mut overlay_at = now + config.overlay_tick;

    loop {
        let fx = tokio::select! {
            received = transport.recv(&mut buf) => {
                let (_src, msg) = received?;
                core.handle_message(msg)
            }
            _ = sleep_until(group_at) => {
                let fx = core.tick_group_detector();
                group_at = Instant::now() + core.group_delay();
                fx
            }
            _ = sleep_until(successor_at) => {
                let fx = core.tick_successor_detector();
                successor_at = Instant::now() + core.successor_delay();
                fx
            }
            _ = sleep_until(elector_at) => {
                elector_at = Instant::now() + config.elector_tick;
                core.tick_elector()
            }
            _ = sleep_until(membership_at) => {
                membership_at = Instant::now() + config.membership_tick;
                core.tick_membership()
            }
            _ = sleep_until(vsync_at) => {
                vsync_at = Instant::now() + config.vsync_tick;
                core.tick_vsync()
            }
            _ = sleep_until(overlay_at) => {
                overlay_at = Instant::now() + config.overlay_tick;
                core.tick_overlay()
            }
        };
        if apply(&mut core, &transport, fx).await {
            return Ok(());
        }
    }
}

/// Check in at the seed until booted into a partition. A queued joiner keeps
/// retrying: the edge partition admits it once enough joiners accumulated.
async fn join_cluster(
    transport: &UdpTransport,
    local: SocketAddr,
    seed: SocketAddr,
) -> Result<(LookupTable, BTreeMap<u64, String>)> {
    let mut buf = vec![0u8; 64 * 1024];
    tracing::info!("Checking in at {}", seed);
    loop {
        transport
            .send(&send_addr(
                seed,
                NetMessage::Overlay(OverlayMessage::CheckIn { addr: local }),
            ))
            .await;
        match timeout(Duration::from_secs(1), transport.recv(&mut buf)).await {
            Ok(Ok((_, NetMessage::Overlay(OverlayMessage::Boot { table, store })))) => {
                tracing::info!("Booted into a {}-partition ring", table.len());
                return Ok((table, store));
            }
            Ok(Ok((_, NetMessage::Overlay(OverlayMessage::JoinPending)))) => {
                tracing::info!("Queued at the edge partition, waiting");
                sleep(Duration::from_secs(1)).await;
            }
            // Anything else is cluster traffic we cannot use yet.
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => tracing::debug!("Check-in timed out, retrying"),
        }
    }
}

/// Flush one batch of effects; returns true when the node must terminate.
///
/// No application is embedded here, so a block request is confirmed
/// immediately and the remaining events are logged.
async fn apply(core: &mut NodeCore, transport: &UdpTransport, fx: Effects) -> bool {
    transport.send_all(&fx.sends).await;
    for event in fx.app {
        match event {
            AppEvent::Block => core.block_ok(),
            AppEvent::View(view) => {
                tracing::info!("Serving view {} with {} members", view.id, view.members.len());
            }
            AppEvent::GlobalView(table) => {
                tracing::debug!("Ring now spans {} partitions", table.len());
            }
            AppEvent::UpdateDelivered(snapshot) => {
                tracing::debug!(
                    "State advanced to ts {} ({} keys)",
                    snapshot.ts,
                    snapshot.data.len()
                );
            }
            AppEvent::OperationComplete { ts } => {
                tracing::info!("Update {} replicated across the whole view", ts);
            }
            AppEvent::Handover(kept) => {
                tracing::info!("Key range handed over, {} entries retained", kept.len());
            }
        }
    }
    if let Some(reason) = fx.shutdown {
        tracing::error!("Node terminating: {}", reason);
        return true;
    }
    false
}
