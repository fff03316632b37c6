use std::collections::{BTreeSet, VecDeque};

use super::types::{Snapshot, VsyncMessage, VsyncOutput};
use crate::membership::View;
use crate::net::types::ProcessId;

/// View-synchronous replication service for one partition.
///
/// Sits between group membership (below) and the overlay/application (above).
/// Committed views from membership are not acted on directly: they queue as
/// pending views and take effect only after a block/flush/install round, so
/// every surviving member agrees on the state carried into the new view.
#[derive(Debug)]
pub struct VsyncService {
    self_pid: ProcessId,
    current_view: Option<View>,
    /// Id of the installed view; zero until the first install, which lets the
    /// incoming leader recognize flushes from fresh joiners.
    view_id: u64,
    /// Application confirmed it stopped submitting. Starts true: nothing may
    /// be submitted before the first view is installed.
    blocked: bool,
    flushing: bool,
    /// Latest replicated state this member has seen.
    latest: Option<Snapshot>,
    /// Committed views waiting for their flush round, in commit order.
    pending_views: VecDeque<View>,
    flushed_by: BTreeSet<ProcessId>,
    acked_by: BTreeSet<ProcessId>,
    /// Leader-side queue of updates not yet delivered.
    pending_updates: VecDeque<Snapshot>,
    active_update: Option<Snapshot>,
    /// Joiners that arrived mid-flush, held until the view is installed.
    queued_joins: Vec<ProcessId>,
}

impl VsyncService {
    pub fn new(self_pid: ProcessId) -> Self {
        Self {
            self_pid,
            current_view: None,
            view_id: 0,
            blocked: true,
            flushing: false,
            latest: None,
            pending_views: VecDeque::new(),
            flushed_by: BTreeSet::new(),
            acked_by: BTreeSet::new(),
            pending_updates: VecDeque::new(),
            active_update: None,
            queued_joins: Vec::new(),
        }
    }

    /// Bootstrap over a member set, optionally seeded with state handed over
    /// by the partition that split us off.
    pub fn init(
        &mut self,
        members: BTreeSet<ProcessId>,
        snapshot: Option<Snapshot>,
    ) -> Vec<VsyncOutput> {
        tracing::debug!(
            "Virtual synchrony initialized over {} members (seed ts {:?})",
            members.len(),
            snapshot.as_ref().map(|s| s.ts)
        );
        self.current_view = None;
        self.view_id = 0;
        self.blocked = true;
        self.flushing = false;
        self.latest = snapshot;
        self.pending_views.clear();
        self.flushed_by.clear();
        self.acked_by.clear();
        self.pending_updates.clear();
        self.active_update = None;
        self.queued_joins.clear();
        // Writes stay blocked until the first view is installed.
        vec![VsyncOutput::MembershipInit(members), VsyncOutput::Block]
    }

    /// Membership committed a view: queue it for the flush round.
    ///
    /// Fair-loss links may duplicate a commit; a re-delivered view must not
    /// restart the flush round for a view already queued or installed, or the
    /// stale install would be rejected by everyone and the flush never end.
    pub fn on_view(&mut self, view: View) -> Vec<VsyncOutput> {
        let newest = self.pending_views.back().map_or(self.view_id, |v| v.id);
        if view.id <= newest {
            tracing::debug!("Ignoring re-delivered view {}", view.id);
            return Vec::new();
        }
        tracing::debug!("View {} queued for install", view.id);
        if view.leader == Some(self.self_pid) {
            self.flushed_by.clear();
        }
        self.pending_views.push_back(view);
        self.begin_flush()
    }

    /// The application confirmed it is blocked.
    pub fn on_block_ok(&mut self) {
        self.blocked = true;
    }

    /// A joiner reached this node. Held back during a flush so the member set
    /// under agreement stays frozen until the install completes.
    pub fn on_join(&mut self, node: ProcessId) -> Vec<VsyncOutput> {
        if self.flushing {
            self.queued_joins.push(node);
            return Vec::new();
        }
        vec![VsyncOutput::JoinForward(node)]
    }

    /// Application-level update submission.
    ///
    /// Leaders queue locally; everyone else forwards the request to the view
    /// leader. With no installed view yet the update is dropped.
    pub fn submit(&mut self, update: Snapshot) -> Vec<VsyncOutput> {
        let Some(view) = self.current_view.clone() else {
            tracing::warn!("Dropping update submitted before the first view install");
            return Vec::new();
        };
        match view.leader {
            Some(leader) if leader == self.self_pid => {
                self.pending_updates.push_back(update);
                if self.flushing {
                    Vec::new()
                } else {
                    self.drive_updates()
                }
            }
            Some(leader) => vec![VsyncOutput::Send {
                to: leader,
                msg: VsyncMessage::UpdateRequest {
                    update,
                    view_id: self.view_id,
                },
            }],
            None => Vec::new(),
        }
    }

    /// Periodic step: drive the flush round when a view is pending, otherwise
    /// retry the active update to members that have not acked it.
    pub fn tick(&mut self) -> Vec<VsyncOutput> {
        let mut out = self.begin_flush();
        if self.flushing {
            if !self.blocked {
                return out;
            }
            let Some(head) = self.pending_views.front().cloned() else {
                return out;
            };
            if head.leader != Some(self.self_pid) {
                return out;
            }
            if head.members.is_subset(&self.flushed_by) {
                // Everyone flushed: install. The broadcast includes this
                // node, so our own state flips on our own delivery, and the
                // tick keeps re-broadcasting until then.
                tracing::info!("Installing view {} with reconciled state", head.id);
                out.push(VsyncOutput::Broadcast {
                    dests: head.members.clone(),
                    msg: VsyncMessage::ViewInstall {
                        view: head,
                        snapshot: self.latest.clone(),
                    },
                });
            } else {
                let dests: BTreeSet<ProcessId> = head
                    .members
                    .difference(&self.flushed_by)
                    .copied()
                    .collect();
                tracing::debug!(
                    "Requesting flush for view {} from {} members",
                    head.id,
                    dests.len()
                );
                out.push(VsyncOutput::Broadcast {
                    dests,
                    msg: VsyncMessage::FlushRequest {
                        new_view_id: head.id,
                        old_view_id: self.view_id,
                    },
                });
            }
            return out;
        }
        out.extend(self.drive_updates());
        out
    }

    /// A member asked the leader to order an update.
    pub fn on_update_request(&mut self, update: Snapshot, view_id: u64) -> Vec<VsyncOutput> {
        if view_id != self.view_id {
            return Vec::new();
        }
        let Some(view) = self.current_view.clone() else {
            return Vec::new();
        };
        match view.leader {
            Some(leader) if leader == self.self_pid => {
                self.pending_updates.push_back(update);
                if self.flushing {
                    Vec::new()
                } else {
                    self.drive_updates()
                }
            }
            // The sender trusted a stale leader; pass the request along.
            Some(leader) => vec![VsyncOutput::Send {
                to: leader,
                msg: VsyncMessage::UpdateRequest { update, view_id },
            }],
            None => Vec::new(),
        }
    }

    /// The leader delivered an update. Acked unconditionally (retries must be
    /// re-acked over a lossy transport); delivered upward only when newer.
    pub fn on_update_deliver(
        &mut self,
        update: Snapshot,
        view_id: u64,
        source: ProcessId,
    ) -> Vec<VsyncOutput> {
        if view_id != self.view_id {
            return Vec::new();
        }
        let Some(view) = &self.current_view else {
            return Vec::new();
        };
        if view.leader != Some(source) {
            return Vec::new();
        }
        let mut out = vec![VsyncOutput::Send {
            to: source,
            msg: VsyncMessage::UpdateAck {
                ts: update.ts,
                from: self.self_pid,
            },
        }];
        if self.is_newer(&update) {
            self.latest = Some(update.clone());
            out.push(VsyncOutput::UpdateDelivered(update));
        }
        out
    }

    /// A member acked the active update.
    pub fn on_update_ack(&mut self, ts: u64, from: ProcessId) -> Vec<VsyncOutput> {
        let Some(active) = &self.active_update else {
            return Vec::new();
        };
        if active.ts != ts {
            return Vec::new();
        }
        self.acked_by.insert(from);
        if let Some(view) = &self.current_view {
            if view.members.is_subset(&self.acked_by) {
                tracing::debug!("Update ts {} acked by the whole view", ts);
                self.active_update = None;
                return vec![VsyncOutput::OperationComplete { ts }];
            }
        }
        Vec::new()
    }

    /// The incoming leader asked for our state ahead of a view install.
    pub fn on_flush_request(&mut self, new_view_id: u64, old_view_id: u64) -> Vec<VsyncOutput> {
        if old_view_id != self.view_id && self.view_id != 0 {
            return Vec::new();
        }
        let Some(head) = self.pending_views.front() else {
            return Vec::new();
        };
        if head.id != new_view_id {
            return Vec::new();
        }
        let Some(leader) = head.leader else {
            return Vec::new();
        };
        let mut out = self.begin_flush();
        if !self.blocked {
            // State may still move until the application confirms the block;
            // the leader's retry will collect the flush afterwards.
            return out;
        }
        out.push(VsyncOutput::Send {
            to: leader,
            msg: VsyncMessage::Flush {
                snapshot: self.latest.clone(),
                new_view_id,
                old_view_id: self.view_id,
                from: self.self_pid,
            },
        });
        out
    }

    /// A member flushed its state to us, the incoming leader.
    pub fn on_flush(
        &mut self,
        snapshot: Option<Snapshot>,
        new_view_id: u64,
        old_view_id: u64,
        from: ProcessId,
    ) -> Vec<VsyncOutput> {
        let Some(head) = self.pending_views.front() else {
            return Vec::new();
        };
        if head.leader != Some(self.self_pid) || head.id != new_view_id {
            return Vec::new();
        }
        if old_view_id != self.view_id && old_view_id != 0 {
            return Vec::new();
        }
        self.flushed_by.insert(from);
        if let Some(s) = snapshot {
            if self.is_newer(&s) {
                tracing::debug!("Flush from {} carries newer state (ts {})", from, s.ts);
                self.latest = Some(s);
            }
        }
        Vec::new()
    }

    /// The leader installed a view: adopt it and the reconciled state,
    /// unblock, and release joiners held during the flush.
    pub fn on_view_install(&mut self, view: View, snapshot: Option<Snapshot>) -> Vec<VsyncOutput> {
        if view.id <= self.view_id {
            return Vec::new();
        }
        tracing::info!(
            "Installed view {} with {} members",
            view.id,
            view.members.len()
        );
        if self.pending_views.front().map(|v| v.id) == Some(view.id) {
            self.pending_views.pop_front();
        }
        self.view_id = view.id;
        self.current_view = Some(view.clone());
        self.blocked = false;
        self.flushing = false;
        self.flushed_by.clear();
        self.acked_by.clear();
        self.active_update = None;
        let mut out = Vec::new();
        if let Some(s) = snapshot {
            if self.is_newer(&s) {
                self.latest = Some(s);
            }
        }
        // Surface the reconciled state: members that flushed it already hold
        // it, but the layers above still need to observe it.
        if let Some(latest) = self.latest.clone() {
            out.push(VsyncOutput::UpdateDelivered(latest));
        }
        out.push(VsyncOutput::ViewDelivered(view.clone()));
        // Requeue leftover updates: they re-enter ordering under the new view.
        if view.leader != Some(self.self_pid) {
            if let Some(leader) = view.leader {
                for update in self.pending_updates.drain(..) {
                    out.push(VsyncOutput::Send {
                        to: leader,
                        msg: VsyncMessage::UpdateRequest {
                            update,
                            view_id: self.view_id,
                        },
                    });
                }
            }
        }
        for node in std::mem::take(&mut self.queued_joins) {
            out.push(VsyncOutput::JoinForward(node));
        }
        out
    }

    pub fn on_message(&mut self, msg: VsyncMessage) -> Vec<VsyncOutput> {
        match msg {
            VsyncMessage::UpdateRequest { update, view_id } => {
                self.on_update_request(update, view_id)
            }
            VsyncMessage::UpdateDeliver {
                update,
                view_id,
                source,
            } => self.on_update_deliver(update, view_id, source),
            VsyncMessage::UpdateAck { ts, from } => self.on_update_ack(ts, from),
            VsyncMessage::FlushRequest {
                new_view_id,
                old_view_id,
            } => self.on_flush_request(new_view_id, old_view_id),
            VsyncMessage::Flush {
                snapshot,
                new_view_id,
                old_view_id,
                from,
            } => self.on_flush(snapshot, new_view_id, old_view_id, from),
            VsyncMessage::ViewInstall { view, snapshot } => self.on_view_install(view, snapshot),
        }
    }

    /// Enter the flush phase if a view is pending; asks the application to
    /// block when it is not already.
    fn begin_flush(&mut self) -> Vec<VsyncOutput> {
        if self.pending_views.is_empty() || self.flushing {
            return Vec::new();
        }
        self.flushing = true;
        if self.blocked {
            Vec::new()
        } else {
            vec![VsyncOutput::Block]
        }
    }

    /// Leader-side update pump: activate the next queued update and retry the
    /// active one to members that have not acked it.
    fn drive_updates(&mut self) -> Vec<VsyncOutput> {
        let Some(view) = self.current_view.clone() else {
            return Vec::new();
        };
        if view.leader != Some(self.self_pid) {
            return Vec::new();
        }
        if self.active_update.is_none() {
            self.active_update = self.pending_updates.pop_front();
            self.acked_by.clear();
        }
        let Some(active) = self.active_update.clone() else {
            return Vec::new();
        };
        let dests: BTreeSet<ProcessId> =
            view.members.difference(&self.acked_by).copied().collect();
        vec![VsyncOutput::Broadcast {
            dests,
            msg: VsyncMessage::UpdateDeliver {
                update: active,
                view_id: self.view_id,
                source: self.self_pid,
            },
        }]
    }

    fn is_newer(&self, snapshot: &Snapshot) -> bool {
        self.latest.as_ref().map_or(true, |l| snapshot.ts > l.ts)
    }

    pub fn view(&self) -> Option<&View> {
        self.current_view.as_ref()
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.latest.as_ref()
    }

    /// Logical timestamp the next submitted update should carry.
    pub fn next_ts(&self) -> u64 {
        self.latest.as_ref().map_or(1, |s| s.ts + 1)
    }
}
