use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::ops::Bound;

use crate::net::types::ProcessId;

/// Hash a data key onto the ring.
pub fn hash_key(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// The ring: partition keys mapped to the member set replicating that range.
///
/// A partition with key `k` owns every hash in `[k, succ(k))`; hashes below
/// the lowest partition key wrap around to the highest partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupTable {
    partitions: BTreeMap<u64, BTreeSet<ProcessId>>,
}

impl LookupTable {
    /// Build the genesis table: addresses are chunked into groups of
    /// `2 * replication_degree - 1`, placed at keys `0, key_space, ...`, with
    /// process ids handed out sequentially from 1.
    pub fn generate(
        addrs: &[SocketAddr],
        replication_degree: usize,
        key_space: u64,
    ) -> Result<Self> {
        let capacity = replication_degree * 2 - 1;
        if addrs.len() < replication_degree {
            bail!(
                "need at least {} nodes to form a quorum, got {}",
                replication_degree,
                addrs.len()
            );
        }
        let mut table = Self::default();
        let mut next_id = 1u64;
        for (i, chunk) in addrs.chunks(capacity).enumerate() {
            if chunk.len() < replication_degree {
                bail!(
                    "leftover group of {} nodes cannot reach quorum {}",
                    chunk.len(),
                    replication_degree
                );
            }
            let key = i as u64 * key_space;
            let members = chunk
                .iter()
                .map(|addr| {
                    let pid = ProcessId::new(next_id, *addr);
                    next_id += 1;
                    pid
                })
                .collect();
            table.partitions.insert(key, members);
        }
        Ok(table)
    }

    /// The partition responsible for a hash.
    pub fn lookup(&self, hash: u64) -> Option<(u64, &BTreeSet<ProcessId>)> {
        self.partitions
            .range(..=hash)
            .next_back()
            .or_else(|| self.partitions.iter().next_back())
            .map(|(k, v)| (*k, v))
    }

    pub fn lookup_partition_key(&self, hash: u64) -> Option<u64> {
        self.lookup(hash).map(|(k, _)| k)
    }

    /// The partition a process belongs to.
    pub fn reverse_lookup(&self, pid: ProcessId) -> Option<u64> {
        self.partitions
            .iter()
            .find(|(_, members)| members.contains(&pid))
            .map(|(k, _)| *k)
    }

    /// The next partition key on the ring, wrapping to the lowest.
    pub fn succ(&self, key: u64) -> Option<u64> {
        self.partitions
            .range((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .or_else(|| self.partitions.iter().next())
            .map(|(k, _)| *k)
    }

    /// The highest partition key: new partitions are founded past it.
    pub fn edge_key(&self) -> Option<u64> {
        self.partitions.keys().next_back().copied()
    }

    pub fn partition(&self, key: u64) -> Option<&BTreeSet<ProcessId>> {
        self.partitions.get(&key)
    }

    pub fn put_partition(&mut self, key: u64, members: BTreeSet<ProcessId>) {
        self.partitions.insert(key, members);
    }

    pub fn remove_partition(&mut self, key: u64) -> Option<BTreeSet<ProcessId>> {
        self.partitions.remove(&key)
    }

    pub fn insert_node(&mut self, key: u64, pid: ProcessId) {
        self.partitions.entry(key).or_default().insert(pid);
    }

    /// Every process in the ring.
    pub fn nodes(&self) -> BTreeSet<ProcessId> {
        self.partitions.values().flatten().copied().collect()
    }

    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<ProcessId> {
        self.partitions
            .values()
            .flatten()
            .find(|p| p.addr == addr)
            .copied()
    }

    /// Smallest process id never handed out yet.
    pub fn next_pid_id(&self) -> u64 {
        self.partitions
            .values()
            .flatten()
            .map(|p| p.id)
            .max()
            .map_or(1, |m| m + 1)
    }

    /// First partition with room below `capacity`, scanning in key order;
    /// `None` when the ring is full and joiners must queue at the edge.
    pub fn free_partition(&self, capacity: usize) -> Option<u64> {
        self.partitions
            .iter()
            .find(|(_, members)| members.len() < capacity)
            .map(|(k, _)| *k)
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &BTreeSet<ProcessId>)> {
        self.partitions.iter().map(|(k, v)| (*k, v))
    }
}
