use std::collections::BTreeSet;
use std::time::Duration;

use super::types::{DetectorMessage, DetectorOutput};
use crate::net::types::ProcessId;

/// Eventually-perfect failure detector over a monitored set of processes.
///
/// Pure state machine: the owner delivers ticks and heartbeat messages and
/// performs the returned sends. The owner must schedule the next tick using
/// [`FailureDetector::delay`], which grows whenever a premature suspicion is
/// detected.
#[derive(Debug)]
pub struct FailureDetector {
    self_pid: ProcessId,
    delta: Duration,
    delay: Duration,
    seq: u64,
    all: BTreeSet<ProcessId>,
    alive: BTreeSet<ProcessId>,
    suspected: BTreeSet<ProcessId>,
}

impl FailureDetector {
    pub fn new(self_pid: ProcessId, delta: Duration) -> Self {
        Self {
            self_pid,
            delta,
            delay: delta,
            seq: 0,
            all: BTreeSet::new(),
            alive: BTreeSet::new(),
            suspected: BTreeSet::new(),
        }
    }

    /// Start monitoring a fresh set of peers, discarding all accumulated
    /// state. Peers start out alive so the first round cannot suspect anyone.
    pub fn init(&mut self, peers: BTreeSet<ProcessId>) {
        tracing::debug!("Detector initialized, monitoring {} processes", peers.len());
        self.alive = peers.clone();
        self.all = peers;
        self.suspected.clear();
        self.seq = 0;
        self.delay = self.delta;
    }

    /// Add newly joined peers to the monitored set without resetting existing
    /// state. New peers get one round of grace before they can be suspected.
    pub fn reconfigure(&mut self, peers: BTreeSet<ProcessId>) {
        for pid in peers {
            self.all.insert(pid);
            self.alive.insert(pid);
        }
    }

    /// One detector round.
    pub fn tick(&mut self) -> Vec<DetectorOutput> {
        let mut out = Vec::new();
        if self.alive.intersection(&self.suspected).next().is_some() {
            self.delay += self.delta;
            tracing::info!(
                "Premature suspicion detected, increasing round delay to {:?}",
                self.delay
            );
        }
        self.seq += 1;
        for pid in self.all.clone() {
            if !self.alive.contains(&pid) && !self.suspected.contains(&pid) {
                tracing::warn!("Suspecting {}", pid);
                self.suspected.insert(pid);
                out.push(DetectorOutput::Suspect(pid));
            } else if self.alive.contains(&pid) && self.suspected.contains(&pid) {
                tracing::info!("Restoring previously suspected {}", pid);
                self.suspected.remove(&pid);
                out.push(DetectorOutput::Restore(pid));
            }
            out.push(DetectorOutput::Send {
                to: pid,
                msg: DetectorMessage::HeartbeatRequest {
                    seq: self.seq,
                    from: self.self_pid,
                },
            });
        }
        self.alive.clear();
        out
    }

    /// Handle heartbeat traffic addressed to this instance.
    pub fn on_message(&mut self, msg: DetectorMessage) -> Vec<DetectorOutput> {
        match msg {
            DetectorMessage::HeartbeatRequest { seq, from } => {
                vec![DetectorOutput::Send {
                    to: from,
                    msg: DetectorMessage::HeartbeatReply {
                        seq,
                        from: self.self_pid,
                    },
                }]
            }
            DetectorMessage::HeartbeatReply { seq, from } => {
                if seq == self.seq || self.suspected.contains(&from) {
                    self.alive.insert(from);
                }
                Vec::new()
            }
        }
    }

    /// Current round delay; the owner schedules the next tick this far out.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn suspected(&self) -> &BTreeSet<ProcessId> {
        &self.suspected
    }

    pub fn monitored(&self) -> &BTreeSet<ProcessId> {
        &self.all
    }
}
