//! Partition Overlay Module
//!
//! Ties independent replication groups into one key-partitioned ring.
//!
//! ## Core Concepts
//! - **Lookup table**: a sorted map from partition key to member set; a data
//!   key is served by the partition with the greatest key not above its hash,
//!   wrapping to the highest partition key below the lowest one.
//! - **Gossip**: each partition leader broadcasts its committed view; nodes
//!   adopt strictly newer views only and re-broadcast on first observation,
//!   so the tables converge epidemically.
//! - **Successor monitoring**: every partition watches the next partition on
//!   the ring with a dedicated failure-detector instance, and removes it from
//!   the table when it falls below quorum.
//! - **Joins**: new nodes check in anywhere; requests funnel to the partition
//!   with room, or queue at the edge partition until enough joiners arrived
//!   to found a new partition one key-space step further along the ring.

pub mod lookup;
pub mod service;
pub mod types;

pub use lookup::LookupTable;
pub use service::OverlayService;
