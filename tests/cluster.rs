//! In-memory cluster tests.
//!
//! Drives several `NodeCore` stacks with a deterministic message queue
//! instead of sockets and timers. One "round" ticks every protocol timer on
//! every live node once, then delivers queued messages until the cluster
//! quiesces. Crashes drop a node and all traffic to it.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;

use ringstore::config::NodeConfig;
use ringstore::membership::types::MembershipMessage;
use ringstore::net::types::{NetMessage, ProcessId};
use ringstore::node::{AppEvent, Effects, NodeCore};
use ringstore::overlay::types::OverlayMessage;
use ringstore::overlay::LookupTable;

const STEP: u64 = 1000;

fn config() -> NodeConfig {
    NodeConfig {
        delta: Duration::from_millis(100),
        replication_degree: 2,
        key_space: STEP,
        ..NodeConfig::default()
    }
}

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{}", port).parse().unwrap()
}

struct Cluster {
    config: NodeConfig,
    nodes: BTreeMap<SocketAddr, NodeCore>,
    crashed: BTreeSet<SocketAddr>,
    /// Joiners waiting for a Boot, keyed by address with their seed.
    joining: BTreeMap<SocketAddr, SocketAddr>,
    queue: VecDeque<(SocketAddr, NetMessage)>,
    /// Fair-loss injection: drop the next N view commits sent to an address.
    drop_commits_to: Option<(SocketAddr, usize)>,
    shutdowns: BTreeMap<SocketAddr, String>,
    completed_ops: Vec<u64>,
}

impl Cluster {
    /// Found a cluster over `n` nodes at ports 9000..9000+n.
    fn genesis(n: u16) -> Self {
        let config = config();
        let addrs: Vec<SocketAddr> = (0..n).map(|i| addr(9000 + i)).collect();
        let table =
            LookupTable::generate(&addrs, config.replication_degree, config.key_space).unwrap();
        let mut cluster = Self {
            config: config.clone(),
            nodes: BTreeMap::new(),
            crashed: BTreeSet::new(),
            joining: BTreeMap::new(),
            queue: VecDeque::new(),
            drop_commits_to: None,
            shutdowns: BTreeMap::new(),
            completed_ops: Vec::new(),
        };
        for a in addrs {
            let pid = table.find_by_addr(a).unwrap();
            let (core, fx) =
                NodeCore::new(&config, pid, table.clone(), BTreeMap::new()).unwrap();
            cluster.nodes.insert(a, core);
            cluster.apply(a, fx);
        }
        cluster.deliver_all();
        cluster
    }

    fn join(&mut self, joiner: SocketAddr, seed: SocketAddr) {
        self.joining.insert(joiner, seed);
    }

    fn crash(&mut self, a: SocketAddr) {
        self.crashed.insert(a);
    }

    fn live(&self) -> Vec<SocketAddr> {
        self.nodes
            .keys()
            .filter(|a| !self.crashed.contains(a))
            .copied()
            .collect()
    }

    fn node(&self, a: SocketAddr) -> &NodeCore {
        &self.nodes[&a]
    }

    /// One timer round on every live node, then full message delivery.
    fn round(&mut self) {
        for (joiner, seed) in self.joining.clone() {
            self.queue
                .push_back((seed, NetMessage::Overlay(OverlayMessage::CheckIn { addr: joiner })));
        }
        for a in self.live() {
            let ticks = [
                NodeCore::tick_group_detector,
                NodeCore::tick_successor_detector,
                NodeCore::tick_elector,
                NodeCore::tick_membership,
                NodeCore::tick_vsync,
                NodeCore::tick_overlay,
            ];
            for tick in ticks {
                let fx = tick(self.nodes.get_mut(&a).unwrap());
                self.apply(a, fx);
            }
        }
        self.deliver_all();
    }

    fn rounds(&mut self, n: usize) {
        for _ in 0..n {
            self.round();
        }
    }

    fn submit(&mut self, a: SocketAddr, data: BTreeMap<u64, String>) {
        let fx = self.nodes.get_mut(&a).unwrap().submit_update(data);
        self.apply(a, fx);
        self.deliver_all();
    }

    fn deliver_all(&mut self) {
        while let Some((to, msg)) = self.queue.pop_front() {
            if self.crashed.contains(&to) {
                continue;
            }
            if let Some((target, remaining)) = &mut self.drop_commits_to {
                if *remaining > 0
                    && to == *target
                    && matches!(msg, NetMessage::Membership(MembershipMessage::ViewCommit(_)))
                {
                    *remaining -= 1;
                    continue;
                }
            }
            if let Some(core) = self.nodes.get_mut(&to) {
                let fx = core.handle_message(msg);
                self.apply(to, fx);
            } else if self.joining.contains_key(&to) {
                match msg {
                    NetMessage::Overlay(OverlayMessage::Boot { table, store }) => {
                        self.joining.remove(&to);
                        let pid = table.find_by_addr(to).unwrap();
                        let (core, fx) =
                            NodeCore::new(&self.config, pid, table, store).unwrap();
                        self.nodes.insert(to, core);
                        self.apply(to, fx);
                    }
                    // JoinPending and stray traffic: keep checking in.
                    _ => {}
                }
            }
        }
    }

    fn apply(&mut self, from: SocketAddr, fx: Effects) {
        for out in fx.sends {
            self.queue.push_back((out.to, out.msg));
        }
        for event in fx.app {
            match event {
                AppEvent::Block => self.nodes.get_mut(&from).unwrap().block_ok(),
                AppEvent::OperationComplete { ts } => self.completed_ops.push(ts),
                _ => {}
            }
        }
        if let Some(reason) = fx.shutdown {
            self.shutdowns.insert(from, reason);
            self.crashed.insert(from);
        }
    }

    /// The installed view of a node's partition, if any.
    fn view_members(&self, a: SocketAddr) -> Option<BTreeSet<ProcessId>> {
        self.node(a).vsync().view().map(|v| v.members.clone())
    }
}

#[test]
fn test_genesis_cluster_converges_on_one_view() {
    let mut cluster = Cluster::genesis(3);
    cluster.rounds(10);
    let views: Vec<_> = cluster
        .live()
        .into_iter()
        .map(|a| cluster.node(a).vsync().view().cloned().expect("view installed"))
        .collect();
    assert_eq!(views[0].members.len(), 3);
    // everyone installed the same view under the lowest-id leader
    for v in &views {
        assert_eq!(v, &views[0]);
        assert_eq!(v.leader.unwrap().id, 1);
    }
}

#[test]
fn test_lost_commit_is_recovered_by_retry() {
    let mut cluster = Cluster::genesis(3);
    // one member loses the first few commit datagrams; the per-tick
    // re-broadcast must still get the view (and its flush round) through
    cluster.drop_commits_to = Some((addr(9002), 3));
    cluster.rounds(10);
    for a in cluster.live() {
        let members = cluster
            .view_members(a)
            .expect("view installed despite losses");
        assert_eq!(members.len(), 3);
    }
}

#[test]
fn test_update_replicates_to_every_member() {
    let mut cluster = Cluster::genesis(3);
    cluster.rounds(10);
    let leader = addr(9000);
    let mut data = BTreeMap::new();
    data.insert(42u64, "value".to_string());
    cluster.submit(leader, data.clone());
    cluster.rounds(3);
    for a in cluster.live() {
        let latest = cluster.node(a).vsync().latest().expect("state replicated");
        assert_eq!(latest.data, data);
    }
    assert!(cluster.completed_ops.contains(&1));
}

#[test]
fn test_member_crash_shrinks_the_view() {
    let mut cluster = Cluster::genesis(3);
    cluster.rounds(10);
    let victim = addr(9002);
    cluster.crash(victim);
    cluster.rounds(15);
    for a in cluster.live() {
        let members = cluster.view_members(a).expect("view installed");
        assert_eq!(members.len(), 2);
        assert!(!members.iter().any(|p| p.addr == victim));
    }
}

#[test]
fn test_under_quorum_group_terminates() {
    let mut cluster = Cluster::genesis(3);
    cluster.rounds(10);
    cluster.crash(addr(9001));
    cluster.crash(addr(9002));
    cluster.rounds(15);
    // the surviving leader cannot reach quorum 2 and evicts itself
    assert!(cluster.shutdowns.contains_key(&addr(9000)));
    assert!(cluster.live().is_empty());
}

#[test]
fn test_two_joiners_found_a_new_partition() {
    let mut cluster = Cluster::genesis(3);
    cluster.rounds(10);
    // the single partition is at capacity: joiners queue at the edge
    cluster.join(addr(9100), addr(9000));
    cluster.rounds(3);
    assert!(cluster.joining.contains_key(&addr(9100)));
    cluster.join(addr(9101), addr(9000));
    cluster.rounds(15);

    // both joiners booted and installed a view of their own partition
    for joiner in [addr(9100), addr(9101)] {
        assert!(!cluster.joining.contains_key(&joiner));
        let members = cluster.view_members(joiner).expect("joiner has a view");
        assert_eq!(members.len(), 2);
    }
    // every node's table converged on the two-partition ring
    for a in cluster.live() {
        let table = cluster.node(a).overlay().table();
        assert_eq!(table.len(), 2);
        assert!(table.partition(STEP).is_some());
    }
}

#[test]
fn test_split_hands_keys_over_to_the_new_partition() {
    let mut cluster = Cluster::genesis(3);
    cluster.rounds(10);
    let leader = addr(9000);
    let mut data = BTreeMap::new();
    data.insert(5u64, "stays".to_string());
    data.insert(STEP + 5, "moves".to_string());
    cluster.submit(leader, data);
    cluster.rounds(3);

    cluster.join(addr(9100), leader);
    cluster.join(addr(9101), leader);
    cluster.rounds(20);

    // the old partition dropped the moved key from its replicated state
    for a in [addr(9000), addr(9001), addr(9002)] {
        let latest = cluster.node(a).vsync().latest().unwrap();
        assert_eq!(latest.data.keys().copied().collect::<Vec<_>>(), [5]);
    }
    // the new partition serves it
    let booted = cluster.node(addr(9100)).overlay().store();
    assert_eq!(booted.keys().copied().collect::<Vec<_>>(), [STEP + 5]);
}

#[test]
fn test_random_update_sequence_converges() {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    let mut cluster = Cluster::genesis(3);
    cluster.rounds(10);
    let leader = addr(9000);
    let mut rng = StdRng::seed_from_u64(7);
    let mut data = BTreeMap::new();
    for _ in 0..20 {
        data.insert(rng.gen_range(0..10_000u64), format!("v{}", rng.gen::<u32>()));
        cluster.submit(leader, data.clone());
    }
    cluster.rounds(5);
    for a in cluster.live() {
        let latest = cluster.node(a).vsync().latest().unwrap();
        assert_eq!(latest.data, data);
        assert_eq!(latest.ts, 20);
    }
}

#[test]
fn test_join_fills_partition_below_capacity() {
    // two genesis nodes leave one seat open in the partition
    let mut cluster = Cluster::genesis(2);
    cluster.rounds(10);
    cluster.join(addr(9100), addr(9000));
    cluster.rounds(15);
    assert!(!cluster.joining.contains_key(&addr(9100)));
    for a in cluster.live() {
        let members = cluster.view_members(a).expect("view installed");
        assert_eq!(members.len(), 3, "joiner absorbed into the open seat");
    }
}
