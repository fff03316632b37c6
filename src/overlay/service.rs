use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;

use super::lookup::LookupTable;
use super::types::{OverlayMessage, OverlayOutput, OverlayRole};
use crate::membership::View;
use crate::net::types::ProcessId;
use crate::vsync::Snapshot;

/// Ring maintenance service for one node.
///
/// Keeps a local copy of the lookup table, gossips the partition's committed
/// views, watches the successor partition, and admits or queues joiners.
/// The `store` field mirrors the replicated state delivered by virtual
/// synchrony; the overlay never mutates it directly, a split shrinks it by
/// submitting the retained entries back through the update path.
#[derive(Debug)]
pub struct OverlayService {
    self_pid: ProcessId,
    own_key: u64,
    table: LookupTable,
    store: BTreeMap<u64, String>,
    role: OverlayRole,
    own_view: Option<View>,
    replication_degree: usize,
    key_space: u64,
    /// Joiners queued at this (edge) partition until a quorum of them can
    /// found a new partition.
    pending_joins: BTreeSet<SocketAddr>,
    /// Joiners admitted into this partition, booted but not yet in a
    /// committed view. Keyed by address so a re-sent check-in re-uses the
    /// assigned id instead of minting a second one.
    admitted: BTreeMap<SocketAddr, ProcessId>,
    /// Highest view id observed per partition; gossip below it is stale.
    last_gossiped: BTreeMap<u64, u64>,
    suspected_successors: BTreeSet<ProcessId>,
}

impl OverlayService {
    pub fn new(
        self_pid: ProcessId,
        table: LookupTable,
        store: BTreeMap<u64, String>,
        replication_degree: usize,
        key_space: u64,
    ) -> Result<Self> {
        let own_key = table
            .reverse_lookup(self_pid)
            .with_context(|| format!("process {} is not in the lookup table", self_pid))?;
        Ok(Self {
            self_pid,
            own_key,
            table,
            store,
            role: OverlayRole::Booted,
            own_view: None,
            replication_degree,
            key_space,
            pending_joins: BTreeSet::new(),
            admitted: BTreeMap::new(),
            last_gossiped: BTreeMap::new(),
            suspected_successors: BTreeSet::new(),
        })
    }

    /// Effects to apply right after construction.
    pub fn bootstrap(&self) -> Vec<OverlayOutput> {
        vec![
            OverlayOutput::MonitorSuccessor(self.succ_members()),
            OverlayOutput::GlobalView(self.table.clone()),
        ]
    }

    /// Members of this node's own partition, per the current table.
    pub fn own_members(&self) -> BTreeSet<ProcessId> {
        self.table
            .partition(self.own_key)
            .cloned()
            .unwrap_or_default()
    }

    /// Virtual synchrony installed a view of our partition.
    pub fn on_view(&mut self, view: View) -> Vec<OverlayOutput> {
        self.role = if view.leader == Some(self.self_pid) {
            OverlayRole::Leader
        } else {
            OverlayRole::Backup
        };
        let seen = self.last_gossiped.entry(self.own_key).or_insert(0);
        *seen = (*seen).max(view.id);
        self.admitted.retain(|_, pid| !view.members.contains(pid));
        self.table.put_partition(self.own_key, view.members.clone());
        self.own_view = Some(view);
        let mut out = Vec::new();
        // A backup cannot queue joiners usefully; push them to the leader.
        if self.role == OverlayRole::Backup {
            out.extend(self.forward_pending_to_own_leader());
        }
        // A fresh leader may have inherited keys another partition owns by
        // now; shrink the served set to what the table says is ours.
        if self.role == OverlayRole::Leader {
            let (retained, moving) = self.split_store();
            if !moving.is_empty() {
                out.push(OverlayOutput::Handover(retained));
            }
        }
        out.push(OverlayOutput::GlobalView(self.table.clone()));
        out
    }

    /// Periodic step, leader only: police the successor, gossip the view,
    /// and found or feed the edge partition.
    pub fn tick(&mut self) -> Vec<OverlayOutput> {
        if self.role != OverlayRole::Leader {
            return Vec::new();
        }
        let Some(view) = self.own_view.clone() else {
            return Vec::new();
        };
        let mut out = Vec::new();

        // Successor below quorum: remove it from the ring and tell everyone.
        if let Some(succ) = self.table.succ(self.own_key) {
            if succ != self.own_key {
                if let Some(members) = self.table.partition(succ) {
                    let alive = members.difference(&self.suspected_successors).count();
                    if alive < self.replication_degree {
                        tracing::warn!(
                            "Successor partition {} fell below quorum ({} alive), removing it",
                            succ,
                            alive
                        );
                        self.table.remove_partition(succ);
                        self.suspected_successors.clear();
                        out.push(OverlayOutput::Broadcast {
                            dests: self.others(),
                            msg: OverlayMessage::Gossip {
                                partition: succ,
                                view: None,
                                crashed: true,
                                origin: self.self_pid,
                            },
                        });
                        out.push(OverlayOutput::MonitorSuccessor(self.succ_members()));
                        out.push(OverlayOutput::GlobalView(self.table.clone()));
                    }
                }
            }
        }

        out.push(OverlayOutput::Broadcast {
            dests: self.others(),
            msg: OverlayMessage::Gossip {
                partition: self.own_key,
                view: Some(view),
                crashed: false,
                origin: self.self_pid,
            },
        });

        if self.table.edge_key() == Some(self.own_key) {
            if self.pending_joins.len() >= self.replication_degree {
                out.extend(self.found_partition());
            }
        } else if !self.pending_joins.is_empty() {
            // Not the edge (a newer partition was founded meanwhile): push the
            // queue onward.
            out.extend(self.forward_pending_to_edge());
        }
        out
    }

    /// A joiner (or a relay on its behalf) checked in.
    pub fn on_check_in(&mut self, addr: SocketAddr) -> Vec<OverlayOutput> {
        match self.role {
            OverlayRole::Booted => {
                self.pending_joins.insert(addr);
                Vec::new()
            }
            OverlayRole::Backup => self.forward_check_in_to_own_leader(addr),
            OverlayRole::Leader => self.admit_or_route(addr),
        }
    }

    /// Epidemic announcement about a partition.
    pub fn on_gossip(
        &mut self,
        partition: u64,
        view: Option<View>,
        crashed: bool,
        origin: ProcessId,
    ) -> Vec<OverlayOutput> {
        if crashed {
            return self.on_crash_notice(partition);
        }
        let Some(view) = view else {
            return Vec::new();
        };
        // Staleness first: an old view of our own partition must never be
        // taken as evidence that we were evicted.
        let seen = self.last_gossiped.get(&partition).copied().unwrap_or(0);
        if view.id <= seen {
            return Vec::new();
        }
        if view.leader != Some(origin) {
            tracing::debug!(
                "Dropping gossip for partition {} relayed under a foreign origin",
                partition
            );
            return Vec::new();
        }
        if partition == self.own_key && !view.members.contains(&self.self_pid) {
            tracing::warn!(
                "A newer view {} of our own partition excludes this node, terminating",
                view.id
            );
            return vec![OverlayOutput::Shutdown(format!(
                "evicted from partition {} by view {}",
                partition, view.id
            ))];
        }
        tracing::debug!("Adopting gossiped view {} of partition {}", view.id, partition);
        self.last_gossiped.insert(partition, view.id);
        self.table.put_partition(partition, view.members.clone());
        let mut out = vec![OverlayOutput::Broadcast {
            dests: self.others(),
            msg: OverlayMessage::Gossip {
                partition,
                view: Some(view),
                crashed: false,
                origin,
            },
        }];
        if self.table.succ(self.own_key) == Some(partition) {
            out.push(OverlayOutput::MonitorSuccessor(self.succ_members()));
        }
        out.push(OverlayOutput::GlobalView(self.table.clone()));
        out
    }

    fn on_crash_notice(&mut self, partition: u64) -> Vec<OverlayOutput> {
        if partition == self.own_key {
            // We are demonstrably alive; our own gossip will correct the ring.
            return Vec::new();
        }
        if self.table.partition(partition).is_none() {
            return Vec::new();
        }
        tracing::info!("Partition {} reported crashed, removing from the ring", partition);
        let was_successor = self.table.succ(self.own_key) == Some(partition);
        self.table.remove_partition(partition);
        let mut out = vec![OverlayOutput::Broadcast {
            dests: self.others(),
            msg: OverlayMessage::Gossip {
                partition,
                view: None,
                crashed: true,
                origin: self.self_pid,
            },
        }];
        if was_successor {
            self.suspected_successors.clear();
            out.push(OverlayOutput::MonitorSuccessor(self.succ_members()));
        }
        out.push(OverlayOutput::GlobalView(self.table.clone()));
        out
    }

    /// Successor-detector indications.
    pub fn on_successor_suspect(&mut self, pid: ProcessId) {
        self.suspected_successors.insert(pid);
    }

    pub fn on_successor_restore(&mut self, pid: ProcessId) {
        self.suspected_successors.remove(&pid);
    }

    /// The replicated state advanced; refresh the local mirror.
    pub fn on_update_delivered(&mut self, snapshot: &Snapshot) {
        self.store = snapshot.data.clone();
    }

    pub fn on_message(&mut self, msg: OverlayMessage) -> Vec<OverlayOutput> {
        match msg {
            OverlayMessage::Gossip {
                partition,
                view,
                crashed,
                origin,
            } => self.on_gossip(partition, view, crashed, origin),
            OverlayMessage::CheckIn { addr } => self.on_check_in(addr),
            // Handled by the joining runtime, not by an established node.
            OverlayMessage::JoinPending | OverlayMessage::Boot { .. } => {
                tracing::debug!("Ignoring join-phase message on an established node");
                Vec::new()
            }
        }
    }

    fn admit_or_route(&mut self, addr: SocketAddr) -> Vec<OverlayOutput> {
        if self.table.find_by_addr(addr).is_some() {
            return Vec::new();
        }
        if let Some(pid) = self.admitted.get(&addr).copied() {
            // Boot got lost; re-send it with the same identity.
            return vec![OverlayOutput::Send {
                to: addr,
                msg: self.boot_message(pid),
            }];
        }
        let capacity = self.capacity();
        match self.table.free_partition(capacity) {
            Some(key) if key != self.own_key => self.forward_check_in(addr, key),
            _ => {
                let occupied = self.own_members().len() + self.admitted.len();
                if occupied < capacity {
                    self.admit(addr)
                } else if self.table.edge_key() == Some(self.own_key) {
                    tracing::info!("Ring is full, queuing joiner {} at the edge", addr);
                    self.pending_joins.insert(addr);
                    vec![OverlayOutput::Send {
                        to: addr,
                        msg: OverlayMessage::JoinPending,
                    }]
                } else if let Some(edge) = self.table.edge_key() {
                    self.forward_check_in(addr, edge)
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn admit(&mut self, addr: SocketAddr) -> Vec<OverlayOutput> {
        let id = self
            .admitted
            .values()
            .map(|p| p.id + 1)
            .max()
            .unwrap_or(0)
            .max(self.table.next_pid_id());
        let pid = ProcessId::new(id, addr);
        tracing::info!("Admitting joiner {} into partition {}", pid, self.own_key);
        self.admitted.insert(addr, pid);
        vec![
            OverlayOutput::Send {
                to: addr,
                msg: self.boot_message(pid),
            },
            OverlayOutput::Join(pid),
        ]
    }

    /// Enough joiners queued at the edge: found the next partition.
    fn found_partition(&mut self) -> Vec<OverlayOutput> {
        let new_key = self.own_key.wrapping_add(self.key_space);
        let capacity = self.capacity();
        let mut next_id = self.table.next_pid_id();
        let chosen: Vec<SocketAddr> = self
            .pending_joins
            .iter()
            .take(capacity)
            .copied()
            .collect();
        let mut members = BTreeSet::new();
        for addr in &chosen {
            self.pending_joins.remove(addr);
            members.insert(ProcessId::new(next_id, *addr));
            next_id += 1;
        }
        tracing::info!(
            "Founding partition {} with {} members",
            new_key,
            members.len()
        );
        self.table.put_partition(new_key, members.clone());

        let (retained, moving) = self.split_store();
        let mut out = Vec::new();
        if retained.len() != self.store.len() {
            // The shrink is replicated through the normal update path; the
            // local mirror follows once the update is delivered.
            out.push(OverlayOutput::Handover(retained));
        }
        for member in &members {
            out.push(OverlayOutput::Send {
                to: member.addr,
                msg: OverlayMessage::Boot {
                    table: self.table.clone(),
                    store: moving.clone(),
                },
            });
        }
        self.suspected_successors.clear();
        out.push(OverlayOutput::MonitorSuccessor(members));
        out.push(OverlayOutput::GlobalView(self.table.clone()));
        out
    }

    fn forward_check_in(&self, addr: SocketAddr, partition: u64) -> Vec<OverlayOutput> {
        // The minimum id is the member everyone's elector converges on.
        match self.table.partition(partition).and_then(|m| m.iter().next()) {
            Some(target) => vec![OverlayOutput::Send {
                to: target.addr,
                msg: OverlayMessage::CheckIn { addr },
            }],
            None => Vec::new(),
        }
    }

    fn forward_check_in_to_own_leader(&self, addr: SocketAddr) -> Vec<OverlayOutput> {
        match self.own_view.as_ref().and_then(|v| v.leader) {
            Some(leader) if leader != self.self_pid => vec![OverlayOutput::Send {
                to: leader.addr,
                msg: OverlayMessage::CheckIn { addr },
            }],
            _ => Vec::new(),
        }
    }

    fn forward_pending_to_own_leader(&mut self) -> Vec<OverlayOutput> {
        let pending: Vec<SocketAddr> = std::mem::take(&mut self.pending_joins)
            .into_iter()
            .collect();
        pending
            .into_iter()
            .flat_map(|addr| self.forward_check_in_to_own_leader(addr))
            .collect()
    }

    fn forward_pending_to_edge(&mut self) -> Vec<OverlayOutput> {
        let Some(edge) = self.table.edge_key() else {
            return Vec::new();
        };
        let pending: Vec<SocketAddr> = std::mem::take(&mut self.pending_joins)
            .into_iter()
            .collect();
        pending
            .into_iter()
            .flat_map(|addr| self.forward_check_in(addr, edge))
            .collect()
    }

    fn boot_message(&self, pid: ProcessId) -> OverlayMessage {
        let mut table = self.table.clone();
        table.insert_node(self.own_key, pid);
        OverlayMessage::Boot {
            table,
            store: self.store.clone(),
        }
    }

    /// Partition the local mirror into entries we keep serving and entries
    /// now owned by another partition.
    fn split_store(&self) -> (BTreeMap<u64, String>, BTreeMap<u64, String>) {
        let mut retained = BTreeMap::new();
        let mut moving = BTreeMap::new();
        for (hash, value) in &self.store {
            if self.table.lookup_partition_key(*hash) == Some(self.own_key) {
                retained.insert(*hash, value.clone());
            } else {
                moving.insert(*hash, value.clone());
            }
        }
        (retained, moving)
    }

    fn succ_members(&self) -> BTreeSet<ProcessId> {
        match self.table.succ(self.own_key) {
            Some(key) if key != self.own_key => {
                self.table.partition(key).cloned().unwrap_or_default()
            }
            _ => BTreeSet::new(),
        }
    }

    /// Everyone in the ring except this node.
    fn others(&self) -> BTreeSet<ProcessId> {
        let mut nodes = self.table.nodes();
        nodes.remove(&self.self_pid);
        nodes
    }

    fn capacity(&self) -> usize {
        self.replication_degree * 2 - 1
    }

    pub fn table(&self) -> &LookupTable {
        &self.table
    }

    pub fn role(&self) -> OverlayRole {
        self.role
    }

    pub fn own_key(&self) -> u64 {
        self.own_key
    }

    pub fn store(&self) -> &BTreeMap<u64, String> {
        &self.store
    }
}
