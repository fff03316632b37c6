use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

use crate::detector::types::DetectorMessage;
use crate::membership::types::MembershipMessage;
use crate::overlay::types::OverlayMessage;
use crate::vsync::types::VsyncMessage;

/// Process identifier: a network address plus a numeric id.
///
/// The numeric id is the primary sort key and defines the total order used
/// for leader ranking. Ids are assigned once, when a process is admitted to a
/// partition, and never reused for a different address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcessId {
    pub id: u64,
    pub addr: SocketAddr,
}

impl ProcessId {
    pub fn new(id: u64, addr: SocketAddr) -> Self {
        Self { id, addr }
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}

/// Which failure-detector instance a heartbeat belongs to.
///
/// Every node runs two detectors: one over its own replication group and one
/// over the successor partition in the ring. Heartbeats are tagged so replies
/// reach the instance that asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectorId {
    Group,
    Successor,
}

/// The wire protocol for inter-node communication.
///
/// One top-level enum per node; each protocol module contributes its own
/// message set. Receivers match exhaustively and silently drop anything that
/// is stale for the current protocol state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NetMessage {
    Detector { instance: DetectorId, msg: DetectorMessage },
    Membership(MembershipMessage),
    Vsync(VsyncMessage),
    Overlay(OverlayMessage),
}
