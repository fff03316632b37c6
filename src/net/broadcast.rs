//! Best-effort broadcast: stateless fan-out of one payload to a set of
//! destinations. Source identity travels inside the payload, so receivers can
//! attribute a delivery without trusting the transport.

use std::net::SocketAddr;

use super::types::{NetMessage, ProcessId};

/// One point-to-point send produced by a protocol handler.
///
/// Handlers return these instead of touching the socket; the node runtime
/// (or a test harness) performs the actual delivery.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub to: SocketAddr,
    pub msg: NetMessage,
}

/// Fan a payload out to every destination, one point-to-point message each.
///
/// No ordering, reliability, or retry: protocols that need those re-broadcast
/// on their periodic tick until acknowledged.
pub fn broadcast<I>(msg: NetMessage, dests: I) -> Vec<Outgoing>
where
    I: IntoIterator<Item = ProcessId>,
{
    dests
        .into_iter()
        .map(|pid| Outgoing {
            to: pid.addr,
            msg: msg.clone(),
        })
        .collect()
}

/// Single point-to-point send to a known process.
pub fn send(to: ProcessId, msg: NetMessage) -> Outgoing {
    Outgoing { to: to.addr, msg }
}

/// Single point-to-point send to a bare address (used before the peer has a
/// ProcessId, e.g. check-in and boot traffic).
pub fn send_addr(to: SocketAddr, msg: NetMessage) -> Outgoing {
    Outgoing { to, msg }
}
