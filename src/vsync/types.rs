use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::membership::View;
use crate::net::types::ProcessId;

/// The full replicated state of one partition at a logical instant.
///
/// Updates replace the whole snapshot; two snapshots are ordered by `ts`
/// alone, so reconciliation after a view change never needs to merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub ts: u64,
    pub data: BTreeMap<u64, String>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            ts: 0,
            data: BTreeMap::new(),
        }
    }
}

/// Virtual-synchrony wire protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VsyncMessage {
    /// A member asks the view leader to order an update.
    UpdateRequest { update: Snapshot, view_id: u64 },
    /// The leader delivers the active update; retried until every member of
    /// the view acked.
    UpdateDeliver {
        update: Snapshot,
        view_id: u64,
        source: ProcessId,
    },
    /// A member acknowledges delivery of the update stamped `ts`.
    UpdateAck { ts: u64, from: ProcessId },
    /// The incoming leader asks a member to flush its state for the view
    /// change from `old_view_id` to `new_view_id`.
    FlushRequest { new_view_id: u64, old_view_id: u64 },
    /// A member's flushed state. `old_view_id` is the sender's installed
    /// view, zero for a joiner that never installed one.
    Flush {
        snapshot: Option<Snapshot>,
        new_view_id: u64,
        old_view_id: u64,
        from: ProcessId,
    },
    /// The leader installs the new view together with the reconciled state.
    ViewInstall {
        view: View,
        snapshot: Option<Snapshot>,
    },
}

/// Effects of one virtual-synchrony step, routed by the node.
#[derive(Debug, Clone)]
pub enum VsyncOutput {
    Send {
        to: ProcessId,
        msg: VsyncMessage,
    },
    Broadcast {
        dests: BTreeSet<ProcessId>,
        msg: VsyncMessage,
    },
    /// Restart the membership service over this node set.
    MembershipInit(BTreeSet<ProcessId>),
    /// Hand a joiner down to the membership service.
    JoinForward(ProcessId),
    /// Ask the application to stop submitting updates until the next view.
    Block,
    /// A view was installed; delivered upward to the overlay and application.
    ViewDelivered(View),
    /// The replicated state advanced; delivered upward.
    UpdateDelivered(Snapshot),
    /// The update stamped `ts` was acked by the whole view.
    OperationComplete { ts: u64 },
}
