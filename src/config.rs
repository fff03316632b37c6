//! Node Configuration
//!
//! All tunables are collected into one immutable struct that is injected at
//! construction time. Protocol modules never read ambient/global state.

use std::time::Duration;

/// Static configuration for a single cluster node.
///
/// `replication_degree` doubles as the quorum size: a replication group
/// targets `2 * replication_degree - 1` members and needs `replication_degree`
/// of them to commit a view or an update.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Initial failure-detector round delay, and the increment applied each
    /// time a premature suspicion is detected.
    pub delta: Duration,
    /// Leader-elector re-evaluation period.
    pub elector_tick: Duration,
    /// Membership propose/retry period.
    pub membership_tick: Duration,
    /// Virtual-synchrony flush/update retry period.
    pub vsync_tick: Duration,
    /// Overlay gossip period.
    pub overlay_tick: Duration,
    /// Quorum size; a full partition holds `2 * replication_degree - 1` nodes.
    pub replication_degree: usize,
    /// Distance between consecutive partition keys in the ring.
    pub key_space: u64,
}

impl NodeConfig {
    /// Maximum number of members in one replication group.
    pub fn group_capacity(&self) -> usize {
        self.replication_degree * 2 - 1
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            delta: Duration::from_millis(100),
            elector_tick: Duration::from_millis(150),
            membership_tick: Duration::from_millis(200),
            vsync_tick: Duration::from_millis(200),
            overlay_tick: Duration::from_millis(500),
            replication_degree: 2,
            key_space: 1 << 58,
        }
    }
}
