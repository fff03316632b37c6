use std::collections::BTreeSet;

use crate::net::types::ProcessId;

/// Eventual leader elector over one replication group.
///
/// Accumulates Suspect/Restore indications from the group's failure detector
/// and, on its own periodic tick, trusts the lowest-id non-suspected process.
/// Re-initializing with a new node set fully resets the accumulated state;
/// the owner is expected to re-initialize the underlying detector alongside.
#[derive(Debug)]
pub struct LeaderElector {
    all: BTreeSet<ProcessId>,
    suspected: BTreeSet<ProcessId>,
    leader: Option<ProcessId>,
}

impl LeaderElector {
    pub fn new() -> Self {
        Self {
            all: BTreeSet::new(),
            suspected: BTreeSet::new(),
            leader: None,
        }
    }

    pub fn init(&mut self, nodes: BTreeSet<ProcessId>) {
        tracing::debug!("Elector initialized over {} nodes", nodes.len());
        self.all = nodes;
        self.suspected.clear();
        self.leader = None;
    }

    pub fn on_suspect(&mut self, pid: ProcessId) {
        self.suspected.insert(pid);
    }

    pub fn on_restore(&mut self, pid: ProcessId) {
        self.suspected.remove(&pid);
    }

    /// Re-evaluate the candidate; emits a Trust indication only on change.
    /// An empty candidate set yields nothing.
    pub fn tick(&mut self) -> Option<ProcessId> {
        let candidate = self.rank_select()?;
        if self.leader != Some(candidate) {
            self.leader = Some(candidate);
            tracing::info!("New leader trusted: {}", candidate);
            return Some(candidate);
        }
        None
    }

    pub fn trusted(&self) -> Option<ProcessId> {
        self.leader
    }

    /// Deterministic rank rule: lowest numeric id among non-suspected nodes.
    fn rank_select(&self) -> Option<ProcessId> {
        self.all.difference(&self.suspected).next().copied()
    }
}

impl Default for LeaderElector {
    fn default() -> Self {
        Self::new()
    }
}
