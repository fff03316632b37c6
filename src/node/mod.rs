//! Node Module
//!
//! Composes the protocol stack of one cluster node.
//!
//! ## Core Concepts
//! - **Core**: a synchronous hub owning every protocol state machine. It
//!   routes indications between layers (detector to elector to membership to
//!   virtual synchrony to overlay) and collects the resulting sends and
//!   application events into one `Effects` value per input.
//! - **Runtime**: the async shell around the core. One event at a time: a
//!   received datagram or an expired timer is fed to the core, then its
//!   effects are flushed to the socket. No protocol state is shared across
//!   tasks.

pub mod core;
pub mod runtime;

pub use self::core::{AppEvent, Effects, NodeCore};
pub use runtime::{run_node, NodeMode};
