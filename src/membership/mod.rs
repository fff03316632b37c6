//! Group Membership Module
//!
//! Quorum-based view agreement for one replication group.
//!
//! ## Core Concepts
//! - **View**: an agreed (members, id, leader) triple. Views are immutable
//!   values; a new view supersedes the old one, nothing is patched in place.
//! - **Propose / ack / commit**: the trusted leader proposes a view, collects
//!   acknowledgements until a quorum of the proposed members acked, then
//!   commits. Proposals are retried every tick until the quorum acks; the
//!   commit is retried every tick until the install is confirmed, so a lost
//!   datagram cannot strand a member outside the view.
//! - **Self-eviction**: a leader whose working set falls below the quorum
//!   terminates the node rather than serve a minority view.

pub mod service;
pub mod types;

pub use service::MembershipService;
pub use types::View;

#[cfg(test)]
mod tests;
