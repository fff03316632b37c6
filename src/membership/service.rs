use std::collections::BTreeSet;

use super::types::{MembershipMessage, MembershipOutput, Role, View};
use crate::net::types::ProcessId;

/// Group membership service for one replication group.
///
/// Provides monotonicity, agreement and completeness but not accuracy; it
/// tolerates a minority of the target group size failing. A committed view
/// always contains at least a quorum of processes.
#[derive(Debug)]
pub struct MembershipService {
    self_pid: ProcessId,
    quorum: usize,
    group_capacity: usize,
    /// Working membership set: the committed members minus suspects plus
    /// admitted joiners. Kept strictly separate from `current_view.members`.
    members: BTreeSet<ProcessId>,
    /// Joiners admitted to the working set but not yet part of a committed
    /// view. Tracked explicitly so a commit racing a join cannot drop the
    /// joiner from the working set.
    joiners: BTreeSet<ProcessId>,
    current_view: View,
    pending_view: Option<View>,
    /// Committed view whose install is not yet confirmed. The commit is
    /// re-broadcast every tick until then: over a fair-loss link a member
    /// that misses the commit can never answer the flush round.
    committed_view: Option<View>,
    /// Highest view id delivered upward; duplicated commit datagrams are
    /// dropped against it instead of re-entering the install pipeline.
    delivered_view_id: u64,
    acks: BTreeSet<ProcessId>,
    leader: Option<ProcessId>,
    role: Role,
    /// Ever-increasing proposal counter; never reused across proposals, so
    /// two different proposals can never share a view id.
    view_seq: u64,
}

impl MembershipService {
    pub fn new(self_pid: ProcessId, replication_degree: usize) -> Self {
        Self {
            self_pid,
            quorum: replication_degree,
            group_capacity: replication_degree * 2 - 1,
            members: BTreeSet::new(),
            joiners: BTreeSet::new(),
            current_view: View::initial(BTreeSet::new()),
            pending_view: None,
            committed_view: None,
            delivered_view_id: 0,
            acks: BTreeSet::new(),
            leader: None,
            role: Role::Worker,
            view_seq: 0,
        }
    }

    /// Initialize the service over a member set: installs the synthetic
    /// view 0 and asks the node to restart the elector over the same set.
    pub fn init(&mut self, nodes: BTreeSet<ProcessId>) -> Vec<MembershipOutput> {
        tracing::debug!("Membership initialized with {} members", nodes.len());
        self.members = nodes.clone();
        self.joiners.clear();
        self.current_view = View::initial(nodes.clone());
        self.pending_view = None;
        self.committed_view = None;
        self.delivered_view_id = 0;
        self.acks.clear();
        self.leader = None;
        self.role = Role::Worker;
        self.view_seq = 0;
        vec![MembershipOutput::ElectorInit(nodes)]
    }

    /// The elector trusts a new leader.
    pub fn on_trust(&mut self, trusted: ProcessId) {
        tracing::info!("Membership: new leader trusted: {}", trusted);
        self.leader = Some(trusted);
        self.role = if trusted == self.self_pid {
            Role::Leader
        } else {
            Role::Worker
        };
        self.maybe_propose();
    }

    /// The group detector suspects a member: drop it from the working set.
    pub fn on_suspect(&mut self, suspected: ProcessId) {
        if self.role == Role::Leader {
            tracing::info!("Membership: leader observed crash of {}", suspected);
        }
        self.members.remove(&suspected);
        self.joiners.remove(&suspected);
        self.maybe_propose();
    }

    /// Admit a joiner if the group has room below its capacity. The detector
    /// starts monitoring it immediately; the next proposal includes it.
    pub fn on_join(&mut self, node: ProcessId) -> Vec<MembershipOutput> {
        if self.members.len() < self.group_capacity && !self.members.contains(&node) {
            tracing::info!("Membership: admitting joiner {}", node);
            self.members.insert(node);
            self.joiners.insert(node);
            let mut add = BTreeSet::new();
            add.insert(node);
            self.maybe_propose();
            return vec![MembershipOutput::Reconfigure(add)];
        }
        Vec::new()
    }

    /// Periodic step: self-evict when under-quorate, otherwise drive the
    /// pending proposal to commit by re-broadcasting to non-ackers.
    pub fn tick(&mut self) -> Vec<MembershipOutput> {
        let mut out = Vec::new();
        if self.role == Role::Leader && self.members.len() < self.quorum {
            tracing::warn!(
                "Under-quorum group ({} < {}), terminating to yield to a surviving quorum",
                self.members.len(),
                self.quorum
            );
            out.push(MembershipOutput::Shutdown(format!(
                "membership below quorum: {} < {}",
                self.members.len(),
                self.quorum
            )));
            return out;
        }
        self.maybe_propose();
        if self.role != Role::Leader {
            return out;
        }
        if let Some(pending) = self.pending_view.clone() {
            if pending.id > self.current_view.id {
                let not_acked: BTreeSet<ProcessId> =
                    pending.members.difference(&self.acks).copied().collect();
                if pending.members.len() - not_acked.len() < self.quorum {
                    tracing::debug!(
                        "Proposing view {} to {} non-acked members",
                        pending.id,
                        not_acked.len()
                    );
                    out.push(MembershipOutput::Broadcast {
                        dests: not_acked,
                        msg: MembershipMessage::ViewProposal(pending),
                    });
                } else {
                    tracing::info!(
                        "Quorum acked view {}, committing to {} members",
                        pending.id,
                        pending.members.len()
                    );
                    // Adopt locally; the View indication goes up when our own
                    // commit is delivered, same as for every other member.
                    self.current_view = pending.clone();
                    self.committed_view = Some(pending);
                    self.pending_view = None;
                    self.acks.clear();
                }
            }
        }
        // Re-broadcast the commit until the install is confirmed; members
        // adopt it idempotently, so duplicates are harmless and a lost
        // datagram is recovered on the next tick.
        if let Some(committed) = self.committed_view.clone() {
            out.push(MembershipOutput::Broadcast {
                dests: committed.members.clone(),
                msg: MembershipMessage::ViewCommit(committed),
            });
        }
        out
    }

    /// A proposal was delivered. Ack it only if its leader is the leader we
    /// currently trust; anything else is a stale or partitioned proposer.
    pub fn on_proposal(&mut self, view: View) -> Vec<MembershipOutput> {
        match (self.leader, view.leader) {
            (Some(trusted), Some(proposer)) if trusted == proposer => {
                tracing::debug!("Acking view proposal {}", view.id);
                vec![MembershipOutput::Send {
                    to: proposer,
                    msg: MembershipMessage::ViewAccept {
                        view_id: view.id,
                        from: self.self_pid,
                    },
                }]
            }
            _ => Vec::new(),
        }
    }

    /// An ack for the pending proposal; stale acks are dropped.
    pub fn on_accept(&mut self, view_id: u64, from: ProcessId) {
        if let Some(pending) = &self.pending_view {
            if pending.id == view_id {
                self.acks.insert(from);
            }
        }
    }

    /// A commit was delivered: adopt the view wholesale, restart the elector
    /// over its members and deliver the view upward.
    pub fn on_commit(&mut self, view: View) -> Vec<MembershipOutput> {
        if view.id < self.current_view.id || view.id <= self.delivered_view_id {
            // stale or already-delivered commit, the group has moved on
            return Vec::new();
        }
        if self.committed_view.as_ref().map_or(false, |c| view.id > c.id) {
            // a newer leader committed past our in-flight view
            self.committed_view = None;
        }
        tracing::debug!("Adopting committed view {}", view.id);
        self.delivered_view_id = view.id;
        self.current_view = view.clone();
        self.view_seq = self.view_seq.max(view.id);
        self.joiners.retain(|j| !view.members.contains(j));
        self.members = view.members.clone();
        self.members.extend(self.joiners.iter().copied());
        self.pending_view = None;
        self.acks.clear();
        vec![
            MembershipOutput::ElectorInit(view.members.clone()),
            MembershipOutput::ViewDelivered(view),
        ]
    }

    /// Virtual synchrony installed a view: every member flushed, so everyone
    /// holds the commit and the re-broadcast can stop.
    pub fn on_view_installed(&mut self, view_id: u64) {
        if self.committed_view.as_ref().map_or(false, |c| c.id <= view_id) {
            self.committed_view = None;
        }
    }

    pub fn on_message(&mut self, msg: MembershipMessage) -> Vec<MembershipOutput> {
        match msg {
            MembershipMessage::ViewProposal(view) => self.on_proposal(view),
            MembershipMessage::ViewAccept { view_id, from } => {
                self.on_accept(view_id, from);
                Vec::new()
            }
            MembershipMessage::ViewCommit(view) => self.on_commit(view),
        }
    }

    /// Allocate a pending view when leading and the working set no longer
    /// matches the committed view.
    fn maybe_propose(&mut self) {
        if self.role == Role::Leader
            && !self.current_view.same_as(&self.members, self.leader)
            && self.pending_needs_refresh()
        {
            self.view_seq += 1;
            tracing::info!(
                "Proposing view {} with {} members",
                self.view_seq,
                self.members.len()
            );
            self.pending_view = Some(View {
                members: self.members.clone(),
                id: self.view_seq,
                leader: Some(self.self_pid),
            });
            self.acks.clear();
        }
    }

    /// A fresh proposal is needed when none is pending, or the pending one no
    /// longer reflects the working set.
    fn pending_needs_refresh(&self) -> bool {
        match &self.pending_view {
            None => true,
            Some(p) => p.members != self.members,
        }
    }

    pub fn current_view(&self) -> &View {
        &self.current_view
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn members(&self) -> &BTreeSet<ProcessId> {
        &self.members
    }
}
