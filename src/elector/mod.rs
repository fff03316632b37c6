//! Leader Elector Module
//!
//! Eventual leader detector layered on the failure detector. All correct
//! processes eventually and permanently trust the same minimum-id process
//! that is no longer suspected. The minimum-id rule is the single ranking
//! rule used everywhere in this crate.

pub mod elector;

pub use elector::LeaderElector;
