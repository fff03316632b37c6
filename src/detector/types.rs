use serde::{Deserialize, Serialize};

use crate::net::types::ProcessId;

/// Heartbeat traffic between a detector and the peers it monitors.
///
/// Replies echo the request's sequence number; a reply for an old round is
/// ignored unless the sender is currently suspected (a late reply is exactly
/// the evidence needed to restore it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DetectorMessage {
    HeartbeatRequest { seq: u64, from: ProcessId },
    HeartbeatReply { seq: u64, from: ProcessId },
}

/// Indications and sends produced by one detector step.
#[derive(Debug, Clone)]
pub enum DetectorOutput {
    Suspect(ProcessId),
    Restore(ProcessId),
    Send { to: ProcessId, msg: DetectorMessage },
}
