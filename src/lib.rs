//! Partitioned Replicated Key-Value Cluster Library
//!
//! This library crate defines the protocol stack of one cluster node. It
//! serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! The stack is composed of loosely coupled subsystems, each a pure state
//! machine driven by the `node` layer:
//!
//! - **`net`**: The wire layer. One bincode-encoded message enum over UDP,
//!   plus a stateless best-effort broadcast helper.
//! - **`detector`**: Eventually-perfect failure detection over a monitored
//!   set, with an adaptive round delay.
//! - **`elector`**: Eventual leader election; trusts the lowest-id process
//!   not currently suspected.
//! - **`membership`**: Quorum-based view agreement for one replication group,
//!   driven by the trusted leader.
//! - **`vsync`**: Virtually synchronous replication; blocks, flushes and
//!   installs state across view changes so members never diverge.
//! - **`overlay`**: The partitioned ring. A gossiped lookup table routes keys
//!   to partitions, successors are monitored, and joiners are admitted or
//!   queued until they can found a new partition.
//! - **`node`**: Composition: the synchronous routing core and the async
//!   runtime around it.

pub mod config;
pub mod detector;
pub mod elector;
pub mod membership;
pub mod net;
pub mod node;
pub mod overlay;
pub mod vsync;
