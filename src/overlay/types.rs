use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;

use super::lookup::LookupTable;
use crate::membership::View;
use crate::net::types::ProcessId;

/// Overlay wire protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OverlayMessage {
    /// Epidemic announcement about one partition. `view` carries the
    /// partition's committed view, or `None` with `crashed` set when the
    /// partition fell below quorum and was removed from the ring. `origin`
    /// pins the announcement to the leader that first emitted it, so relays
    /// do not launder stale views under their own identity.
    Gossip {
        partition: u64,
        view: Option<View>,
        crashed: bool,
        origin: ProcessId,
    },
    /// A new node announces itself; forwarded until it reaches the leader of
    /// a partition with room, or the edge partition's queue.
    CheckIn { addr: SocketAddr },
    /// Told to a joiner queued at the edge: keep waiting, retry later.
    JoinPending,
    /// Everything a joiner needs to come up: the current ring and the key
    /// range it will serve.
    Boot {
        table: LookupTable,
        store: BTreeMap<u64, String>,
    },
}

/// This node's standing within its partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayRole {
    /// Booted into a partition but no view has been installed yet.
    Booted,
    Leader,
    Backup,
}

/// Effects of one overlay step, routed by the node.
#[derive(Debug, Clone)]
pub enum OverlayOutput {
    Send {
        to: SocketAddr,
        msg: OverlayMessage,
    },
    Broadcast {
        dests: BTreeSet<ProcessId>,
        msg: OverlayMessage,
    },
    /// The ring changed; surfaced to the application for request routing.
    GlobalView(LookupTable),
    /// This node's served key set shrank to the given entries after a split
    /// or a ring change.
    Handover(BTreeMap<u64, String>),
    /// Restart the successor failure detector over this member set.
    MonitorSuccessor(BTreeSet<ProcessId>),
    /// An admitted joiner, handed to virtual synchrony for membership.
    Join(ProcessId),
    /// Fatal: a healed partition observed a newer view of itself that
    /// excludes this node.
    Shutdown(String),
}
