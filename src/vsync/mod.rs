//! Virtual Synchrony Module
//!
//! View-synchronous replication on top of group membership: every member
//! delivers the same set of updates between any two consecutive views.
//!
//! ## Core Concepts
//! - **Block / flush / install**: when a new view is pending, the application
//!   is blocked, every member flushes its latest state to the incoming
//!   leader, and the leader installs the view together with the freshest
//!   flushed state.
//! - **Leader-driven updates**: all updates funnel through the view leader,
//!   which re-broadcasts each one until every member of the view acked it.
//! - **State as snapshot**: an update carries the full replicated state plus
//!   a logical timestamp; reconciliation is "highest timestamp wins".

pub mod service;
pub mod types;

pub use service::VsyncService;
pub use types::Snapshot;
