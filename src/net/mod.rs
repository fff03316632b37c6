//! Cluster Networking Module
//!
//! Point-to-point messaging between nodes and the best-effort broadcast
//! primitive built on top of it.
//!
//! ## Core Concepts
//! - **ProcessId**: network address plus numeric id, the unit of membership.
//! - **Wire format**: one `NetMessage` enum for the whole node, serialized
//!   with bincode and sent over UDP (fair-loss, unordered).
//! - **Broadcast**: stateless fan-out; every reliability guarantee is layered
//!   above it by explicit acknowledgement and tick-driven retry.

pub mod broadcast;
pub mod types;
pub mod udp;
