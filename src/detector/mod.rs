//! Failure Detector Module
//!
//! Eventually-perfect failure detector: strong completeness (a crashed peer
//! is eventually suspected forever) and eventual strong accuracy once the
//! adaptive round delay exceeds the true round-trip bound.
//!
//! ## Core Concepts
//! - **Rounds**: each tick suspects peers that missed the round, restores
//!   late repliers, and sends fresh heartbeat requests.
//! - **Adaptive delay**: a reply from an already-suspected peer means the
//!   round was too short; the delay grows by one delta. This is the timing
//!   assumption of partial synchrony made operational.

pub mod detector;
pub mod types;

pub use detector::FailureDetector;

#[cfg(test)]
mod tests;
