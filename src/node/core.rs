use anyhow::Result;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::NodeConfig;
use crate::detector::types::DetectorOutput;
use crate::detector::FailureDetector;
use crate::elector::LeaderElector;
use crate::membership::types::MembershipOutput;
use crate::membership::{MembershipService, View};
use crate::net::broadcast::{broadcast, send, send_addr, Outgoing};
use crate::net::types::{DetectorId, NetMessage, ProcessId};
use crate::overlay::types::OverlayOutput;
use crate::overlay::{LookupTable, OverlayService};
use crate::vsync::types::VsyncOutput;
use crate::vsync::{Snapshot, VsyncService};

/// Events surfaced to the embedding application.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// Stop submitting updates; confirm with [`NodeCore::block_ok`].
    Block,
    /// A view of this node's partition was installed.
    View(View),
    /// The ring changed; use this table to route requests.
    GlobalView(LookupTable),
    /// The replicated state advanced.
    UpdateDelivered(Snapshot),
    /// A submitted update was acked by the whole view.
    OperationComplete { ts: u64 },
    /// This node's served key set shrank to these entries.
    Handover(BTreeMap<u64, String>),
}

/// Everything one input produced: datagrams to send, events for the
/// application, and possibly a fatal shutdown reason.
#[derive(Debug, Default)]
pub struct Effects {
    pub sends: Vec<Outgoing>,
    pub app: Vec<AppEvent>,
    pub shutdown: Option<String>,
}

/// The protocol stack of one node, composed as pure state machines.
///
/// Every inbound datagram or timer is handled synchronously: indications are
/// routed downward and upward until the stack quiesces, and the accumulated
/// effects are returned to the caller. The core never touches the network or
/// the clock.
pub struct NodeCore {
    self_pid: ProcessId,
    group_detector: FailureDetector,
    successor_detector: FailureDetector,
    elector: LeaderElector,
    membership: MembershipService,
    vsync: VsyncService,
    overlay: OverlayService,
}

impl NodeCore {
    /// Assemble the stack over a lookup table that contains `self_pid`.
    ///
    /// `store` seeds the replicated state: empty at genesis, the handed-over
    /// key range for a booted joiner. Returns the startup effects alongside.
    pub fn new(
        config: &NodeConfig,
        self_pid: ProcessId,
        table: LookupTable,
        store: BTreeMap<u64, String>,
    ) -> Result<(Self, Effects)> {
        let seed = if store.is_empty() {
            None
        } else {
            Some(Snapshot {
                ts: 1,
                data: store.clone(),
            })
        };
        let overlay = OverlayService::new(
            self_pid,
            table,
            store,
            config.replication_degree,
            config.key_space,
        )?;
        let mut core = Self {
            self_pid,
            group_detector: FailureDetector::new(self_pid, config.delta),
            successor_detector: FailureDetector::new(self_pid, config.delta),
            elector: LeaderElector::new(),
            membership: MembershipService::new(self_pid, config.replication_degree),
            vsync: VsyncService::new(self_pid),
            overlay,
        };
        let mut fx = Effects::default();
        let boot = core.overlay.bootstrap();
        core.apply_overlay(boot, &mut fx);
        let init = core.vsync.init(core.overlay.own_members(), seed);
        core.apply_vsync(init, &mut fx);
        Ok((core, fx))
    }

    /// Feed one inbound datagram through the stack.
    pub fn handle_message(&mut self, msg: NetMessage) -> Effects {
        let mut fx = Effects::default();
        match msg {
            NetMessage::Detector { instance, msg } => {
                let outs = match instance {
                    DetectorId::Group => self.group_detector.on_message(msg),
                    DetectorId::Successor => self.successor_detector.on_message(msg),
                };
                self.apply_detector(instance, outs, &mut fx);
            }
            NetMessage::Membership(msg) => {
                let outs = self.membership.on_message(msg);
                self.apply_membership(outs, &mut fx);
            }
            NetMessage::Vsync(msg) => {
                let outs = self.vsync.on_message(msg);
                self.apply_vsync(outs, &mut fx);
            }
            NetMessage::Overlay(msg) => {
                let outs = self.overlay.on_message(msg);
                self.apply_overlay(outs, &mut fx);
            }
        }
        fx
    }

    pub fn tick_group_detector(&mut self) -> Effects {
        let mut fx = Effects::default();
        let outs = self.group_detector.tick();
        self.apply_detector(DetectorId::Group, outs, &mut fx);
        fx
    }

    pub fn tick_successor_detector(&mut self) -> Effects {
        let mut fx = Effects::default();
        let outs = self.successor_detector.tick();
        self.apply_detector(DetectorId::Successor, outs, &mut fx);
        fx
    }

    pub fn tick_elector(&mut self) -> Effects {
        if let Some(leader) = self.elector.tick() {
            self.membership.on_trust(leader);
        }
        Effects::default()
    }

    pub fn tick_membership(&mut self) -> Effects {
        let mut fx = Effects::default();
        let outs = self.membership.tick();
        self.apply_membership(outs, &mut fx);
        fx
    }

    pub fn tick_vsync(&mut self) -> Effects {
        let mut fx = Effects::default();
        let outs = self.vsync.tick();
        self.apply_vsync(outs, &mut fx);
        fx
    }

    pub fn tick_overlay(&mut self) -> Effects {
        let mut fx = Effects::default();
        let outs = self.overlay.tick();
        self.apply_overlay(outs, &mut fx);
        fx
    }

    /// The application confirmed the block requested by [`AppEvent::Block`].
    pub fn block_ok(&mut self) {
        self.vsync.on_block_ok();
    }

    /// Submit a new full state for replication, stamped one past the latest.
    pub fn submit_update(&mut self, data: BTreeMap<u64, String>) -> Effects {
        let mut fx = Effects::default();
        let snapshot = Snapshot {
            ts: self.vsync.next_ts(),
            data,
        };
        let outs = self.vsync.submit(snapshot);
        self.apply_vsync(outs, &mut fx);
        fx
    }

    /// Current round delay of the group detector; schedules its next tick.
    pub fn group_delay(&self) -> Duration {
        self.group_detector.delay()
    }

    pub fn successor_delay(&self) -> Duration {
        self.successor_detector.delay()
    }

    pub fn vsync(&self) -> &VsyncService {
        &self.vsync
    }

    pub fn overlay(&self) -> &OverlayService {
        &self.overlay
    }

    fn apply_detector(
        &mut self,
        instance: DetectorId,
        outs: Vec<DetectorOutput>,
        fx: &mut Effects,
    ) {
        for out in outs {
            match out {
                DetectorOutput::Suspect(pid) => match instance {
                    DetectorId::Group => {
                        self.elector.on_suspect(pid);
                        self.membership.on_suspect(pid);
                    }
                    DetectorId::Successor => self.overlay.on_successor_suspect(pid),
                },
                DetectorOutput::Restore(pid) => match instance {
                    DetectorId::Group => self.elector.on_restore(pid),
                    DetectorId::Successor => self.overlay.on_successor_restore(pid),
                },
                DetectorOutput::Send { to, msg } => {
                    fx.sends
                        .push(send(to, NetMessage::Detector { instance, msg }));
                }
            }
        }
    }

    fn apply_membership(&mut self, outs: Vec<MembershipOutput>, fx: &mut Effects) {
        for out in outs {
            match out {
                MembershipOutput::Send { to, msg } => {
                    fx.sends.push(send(to, NetMessage::Membership(msg)));
                }
                MembershipOutput::Broadcast { dests, msg } => {
                    fx.sends
                        .extend(broadcast(NetMessage::Membership(msg), dests));
                }
                MembershipOutput::ViewDelivered(view) => {
                    let outs = self.vsync.on_view(view);
                    self.apply_vsync(outs, fx);
                }
                MembershipOutput::ElectorInit(nodes) => {
                    self.elector.init(nodes.clone());
                    // The detector watches peers only; self-suspicion through
                    // a stalled loopback must never unseat a live leader.
                    let mut peers = nodes;
                    peers.remove(&self.self_pid);
                    self.group_detector.init(peers);
                }
                MembershipOutput::Reconfigure(nodes) => {
                    let mut peers = nodes;
                    peers.remove(&self.self_pid);
                    self.group_detector.reconfigure(peers);
                }
                MembershipOutput::Shutdown(reason) => fx.shutdown = Some(reason),
            }
        }
    }

    fn apply_vsync(&mut self, outs: Vec<VsyncOutput>, fx: &mut Effects) {
        for out in outs {
            match out {
                VsyncOutput::Send { to, msg } => {
                    fx.sends.push(send(to, NetMessage::Vsync(msg)));
                }
                VsyncOutput::Broadcast { dests, msg } => {
                    fx.sends.extend(broadcast(NetMessage::Vsync(msg), dests));
                }
                VsyncOutput::MembershipInit(nodes) => {
                    let outs = self.membership.init(nodes);
                    self.apply_membership(outs, fx);
                }
                VsyncOutput::JoinForward(pid) => {
                    let outs = self.membership.on_join(pid);
                    self.apply_membership(outs, fx);
                }
                VsyncOutput::Block => fx.app.push(AppEvent::Block),
                VsyncOutput::ViewDelivered(view) => {
                    self.membership.on_view_installed(view.id);
                    let outs = self.overlay.on_view(view.clone());
                    self.apply_overlay(outs, fx);
                    fx.app.push(AppEvent::View(view));
                }
                VsyncOutput::UpdateDelivered(snapshot) => {
                    self.overlay.on_update_delivered(&snapshot);
                    fx.app.push(AppEvent::UpdateDelivered(snapshot));
                }
                VsyncOutput::OperationComplete { ts } => {
                    fx.app.push(AppEvent::OperationComplete { ts });
                }
            }
        }
    }

    fn apply_overlay(&mut self, outs: Vec<OverlayOutput>, fx: &mut Effects) {
        for out in outs {
            match out {
                OverlayOutput::Send { to, msg } => {
                    fx.sends.push(send_addr(to, NetMessage::Overlay(msg)));
                }
                OverlayOutput::Broadcast { dests, msg } => {
                    fx.sends.extend(broadcast(NetMessage::Overlay(msg), dests));
                }
                OverlayOutput::GlobalView(table) => {
                    fx.app.push(AppEvent::GlobalView(table));
                }
                OverlayOutput::Handover(retained) => {
                    // Replicate the shrunk key set through the ordinary
                    // update path so the whole partition agrees on it.
                    fx.app.push(AppEvent::Handover(retained.clone()));
                    let snapshot = Snapshot {
                        ts: self.vsync.next_ts(),
                        data: retained,
                    };
                    let outs = self.vsync.submit(snapshot);
                    self.apply_vsync(outs, fx);
                }
                OverlayOutput::MonitorSuccessor(members) => {
                    self.successor_detector.init(members);
                }
                OverlayOutput::Join(pid) => {
                    let outs = self.vsync.on_join(pid);
                    self.apply_vsync(outs, fx);
                }
                OverlayOutput::Shutdown(reason) => fx.shutdown = Some(reason),
            }
        }
    }
}
