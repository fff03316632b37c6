use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::net::types::ProcessId;

/// An agreed-upon view of one replication group.
///
/// `leader` is `None` only for the synthetic view 0 installed at
/// initialization, before any election has completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    pub members: BTreeSet<ProcessId>,
    pub id: u64,
    pub leader: Option<ProcessId>,
}

impl View {
    pub fn initial(members: BTreeSet<ProcessId>) -> Self {
        Self {
            members,
            id: 0,
            leader: None,
        }
    }

    /// Two views are "the same" iff both have a leader, the leaders are equal
    /// and the member sets are identical. A leaderless view never equals
    /// anything, which is what forces the very first proposal.
    pub fn same_as(&self, members: &BTreeSet<ProcessId>, leader: Option<ProcessId>) -> bool {
        match (self.leader, leader) {
            (Some(a), Some(b)) => a == b && &self.members == members,
            _ => false,
        }
    }
}

/// Membership wire protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MembershipMessage {
    /// Leader proposes a view; retried to non-ackers every tick.
    ViewProposal(View),
    /// Member acknowledges a proposal back to its proposer.
    ViewAccept { view_id: u64, from: ProcessId },
    /// Leader commits a view once a quorum of its members acked.
    ViewCommit(View),
}

/// Role of this process within its replication group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Worker,
}

/// Effects of one membership step, routed by the node.
#[derive(Debug, Clone)]
pub enum MembershipOutput {
    Send { to: ProcessId, msg: MembershipMessage },
    Broadcast { dests: BTreeSet<ProcessId>, msg: MembershipMessage },
    /// A committed view, delivered upward to the virtual-synchrony layer.
    ViewDelivered(View),
    /// Restart the elector (and its detector) over this node set.
    ElectorInit(BTreeSet<ProcessId>),
    /// Add these nodes to the running failure detector.
    Reconfigure(BTreeSet<ProcessId>),
    /// Fatal: the group fell below quorum; the process must terminate.
    Shutdown(String),
}
