//! Votequorum Engine
//!
//! Computes, for every membership view, whether the local partition is
//! quorate, and publishes that decision through the Quorum Façade.
//! Grounded on `original_source/exec/votequorum.c` end to end; state
//! layout follows the teacher's `state.rs` (one struct owning
//! `DashMap`s of per-entity state behind `parking_lot`).

pub mod config;
pub mod messages;
pub mod persist;
pub mod quorum_calc;

use crate::cmap::{CmapStore, CmapValue};
use crate::config::{AtbMode, QuorumConfig};
use crate::dispatch::ServiceEngine;
use crate::error::{CoreError, Result};
use crate::node::{NodeId, RingId};
use crate::quorum_facade::{QuorumFacade, QuorumProvider};
use crate::sync_engine::Syncable;
use crate::timer::{TimerCore, TimerHandle};
use crate::totem::{Guarantee, TotemAdapter};
use crate::wire::Endianness;
use dashmap::DashMap;
use messages::{node_flags, NodeInfo, QdeviceReg, QdeviceRegOp, QdeviceReconfigure, Reconfigure, ReconfigureParam, VotequorumMessage};
use quorum_calc::{are_we_quorate, calculate_quorum, AutoTieBreaker, QuorateInputs};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

pub const VOTEQUORUM_GROUP: &str = "votequorum";
pub const VOTEQUORUM_SERVICE_ID: u16 = 2;

/// Per-node membership state, distinct from the Votequorum-specific flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Member,
    Dead,
    Leaving,
}

/// Votequorum's view of one cluster node.
#[derive(Debug, Clone)]
pub struct ClusterNode {
    pub node_id: NodeId,
    pub state: NodeState,
    pub votes: u32,
    pub expected_votes: u32,
    pub flags: u32,
}

impl ClusterNode {
    fn new(node_id: NodeId, votes: u32, expected_votes: u32) -> Self {
        ClusterNode {
            node_id,
            state: NodeState::Member,
            votes,
            expected_votes,
            flags: 0,
        }
    }
}

/// A snapshot answer to `getinfo`.
#[derive(Debug, Clone)]
pub struct QuorumInfo {
    pub state: NodeState,
    pub votes: u32,
    pub expected_votes: u32,
    pub highest_expected: u32,
    pub total_votes: u32,
    pub quorum: u32,
    pub flags: u32,
    pub qdevice_votes: u32,
    pub qdevice_name: Option<String>,
}

struct QdeviceState {
    name: Option<String>,
    poll_timer: Option<TimerHandle>,
}

/// The quorum decision engine. Owns per-node votequorum state, the
/// qdevice registration, and the wait-for-all / ATB / allow-downscale
/// policy knobs; publishes transitions through the `QuorumFacade`.
pub struct VotequorumEngine {
    my_nodeid: NodeId,
    totem: Arc<dyn TotemAdapter>,
    facade: Arc<QuorumFacade>,
    cmap: Arc<CmapStore>,
    timers: Arc<TimerCore>,
    nodes: DashMap<NodeId, ClusterNode>,
    effective: Mutex<config::EffectiveConfig>,
    atb: Mutex<Option<AutoTieBreaker>>,
    ev_barrier: Mutex<persist::EvTrackingBarrier>,
    wait_for_all_armed: AtomicBool,
    quorate: AtomicBool,
    current_ring: Mutex<RingId>,
    current_member_list: Mutex<BTreeSet<NodeId>>,
    previous_member_list: Mutex<BTreeSet<NodeId>>,
    qdevice: Mutex<QdeviceState>,
    qdevice_votes: AtomicU32,
    qdevice_timeout_ms: u32,
    qdevice_sync_timeout_ms: u32,
    self_weak: std::sync::Weak<VotequorumEngine>,
}

impl VotequorumEngine {
    /// Build the engine from a validated cluster config.
    pub fn new(
        my_nodeid: NodeId,
        cfg: &QuorumConfig,
        my_votes: u32,
        static_total_votes: u32,
        cluster_size_is_odd: bool,
        totem: Arc<dyn TotemAdapter>,
        facade: Arc<QuorumFacade>,
        cmap: Arc<CmapStore>,
        timers: Arc<TimerCore>,
        ev_barrier: persist::EvTrackingBarrier,
    ) -> std::result::Result<Arc<Self>, config::ConfigError> {
        let effective = config::validate(cfg, static_total_votes, cluster_size_is_odd)?;
        let atb = effective.auto_tie_breaker.map(|mode| AutoTieBreaker {
            mode,
            node: cfg.auto_tie_breaker_node,
            list: cfg.auto_tie_breaker_list.clone(),
        });
        let engine = Arc::new_cyclic(|weak| VotequorumEngine {
            my_nodeid,
            totem,
            facade,
            cmap,
            timers,
            nodes: DashMap::new(),
            effective: Mutex::new(effective.clone()),
            atb: Mutex::new(atb),
            ev_barrier: Mutex::new(ev_barrier),
            wait_for_all_armed: AtomicBool::new(effective.wait_for_all),
            quorate: AtomicBool::new(false),
            current_ring: Mutex::new(RingId::new(my_nodeid, 0)),
            current_member_list: Mutex::new(BTreeSet::new()),
            previous_member_list: Mutex::new(BTreeSet::new()),
            qdevice: Mutex::new(QdeviceState { name: None, poll_timer: None }),
            qdevice_votes: AtomicU32::new(cfg.qdevice_votes.unwrap_or(0)),
            qdevice_timeout_ms: cfg.qdevice_timeout_ms,
            qdevice_sync_timeout_ms: cfg.qdevice_sync_timeout_ms,
            self_weak: weak.clone(),
        });
        engine.nodes.insert(my_nodeid, ClusterNode::new(my_nodeid, my_votes, cfg.expected_votes));
        Ok(engine)
    }

    // ---- library operations (spec §4.3) ----

    /// `getinfo(node_id?)`; `None` means "the local node".
    pub fn getinfo(&self, node_id: Option<NodeId>) -> Result<QuorumInfo> {
        let target = node_id.unwrap_or(self.my_nodeid);
        let node = self
            .nodes
            .get(&target)
            .ok_or_else(|| CoreError::NotExist(format!("node {target}")))?;
        let highest_expected = self.highest_expected();
        let total_votes = self.total_votes();
        let quorum = self.current_quorum(total_votes, highest_expected);
        Ok(QuorumInfo {
            state: node.state,
            votes: node.votes,
            expected_votes: node.expected_votes,
            highest_expected,
            total_votes,
            quorum,
            flags: node.flags,
            qdevice_votes: self.qdevice_votes.load(Ordering::Relaxed),
            qdevice_name: self.qdevice.lock().name.clone(),
        })
    }

    /// `setexpected(n)` for the local node.
    pub fn setexpected(&self, n: u32) -> Result<()> {
        let total_votes = self.total_votes();
        let resulting_quorum = calculate_quorum(total_votes, n, self.effective.lock().two_node, self.nodes.len());
        if resulting_quorum < total_votes / 2 || resulting_quorum > total_votes {
            return Err(CoreError::InvalidParam(
                "resulting quorum out of [total/2, total] range".into(),
            ));
        }
        if let Some(mut node) = self.nodes.get_mut(&self.my_nodeid) {
            node.expected_votes = n;
        }
        self.raise_ev_barrier(n)?;
        self.multicast(VotequorumMessage::Reconfigure(Reconfigure {
            param: ReconfigureParam::ExpectedVotes,
            target_node: self.my_nodeid,
            value: n,
        }));
        self.recalculate();
        Ok(())
    }

    /// `setvotes(node_id, v)`.
    pub fn setvotes(&self, node_id: NodeId, v: u32) -> Result<()> {
        let total_votes = self.total_votes();
        let highest_expected = self.highest_expected();
        let resulting_quorum = calculate_quorum(total_votes, highest_expected, self.effective.lock().two_node, self.nodes.len());
        if resulting_quorum < total_votes / 2 || resulting_quorum > total_votes {
            return Err(CoreError::InvalidParam(
                "resulting quorum out of [total/2, total] range".into(),
            ));
        }
        {
            let mut node = self
                .nodes
                .get_mut(&node_id)
                .ok_or_else(|| CoreError::NotExist(format!("node {node_id}")))?;
            node.votes = v;
        }
        self.multicast(VotequorumMessage::Reconfigure(Reconfigure {
            param: ReconfigureParam::NodeVotes,
            target_node: node_id,
            value: v,
        }));
        self.recalculate();
        Ok(())
    }

    /// `qdevice_register(name)`.
    pub fn qdevice_register(&self, name: &str) -> Result<()> {
        if !self.effective.lock().qdevice_enabled {
            return Err(CoreError::Access);
        }
        let mut qdevice = self.qdevice.lock();
        match &qdevice.name {
            Some(existing) if existing != name => return Err(CoreError::Exist(existing.clone())),
            Some(_) => return Err(CoreError::TryAgain),
            None => {}
        }
        qdevice.name = Some(name.to_string());
        drop(qdevice);
        if let Some(mut node) = self.nodes.get_mut(&self.my_nodeid) {
            node.flags |= node_flags::QDEVICE_REGISTERED;
        }
        self.multicast(VotequorumMessage::QdeviceReg(QdeviceReg {
            op: QdeviceRegOp::Register,
            name: name.to_string(),
        }));
        Ok(())
    }

    /// `qdevice_unregister(name)`.
    pub fn qdevice_unregister(&self, name: &str) -> Result<()> {
        let mut qdevice = self.qdevice.lock();
        match &qdevice.name {
            None => return Err(CoreError::NotExist("qdevice".into())),
            Some(existing) if existing != name => {
                return Err(CoreError::InvalidParam("qdevice name mismatch".into()))
            }
            Some(_) => {}
        }
        qdevice.name = None;
        drop(qdevice);
        if let Some(mut node) = self.nodes.get_mut(&self.my_nodeid) {
            node.flags &= !(node_flags::QDEVICE_REGISTERED | node_flags::QDEVICE_ALIVE | node_flags::QDEVICE_CAST_VOTE);
        }
        self.multicast(VotequorumMessage::QdeviceReg(QdeviceReg {
            op: QdeviceRegOp::Unregister,
            name: name.to_string(),
        }));
        self.recalculate();
        Ok(())
    }

    /// `qdevice_poll(name, cast_vote, ring_id)`.
    pub fn qdevice_poll(&self, name: &str, cast_vote: bool, ring_id: RingId) -> Result<()> {
        if ring_id != *self.current_ring.lock() {
            return Err(CoreError::MessageError("qdevice poll ring id mismatch".into()));
        }
        {
            let qdevice = self.qdevice.lock();
            match &qdevice.name {
                Some(existing) if existing == name => {}
                _ => return Err(CoreError::InvalidParam("qdevice name mismatch".into())),
            }
        }
        if let Some(mut node) = self.nodes.get_mut(&self.my_nodeid) {
            node.flags |= node_flags::QDEVICE_ALIVE;
            if cast_vote {
                node.flags |= node_flags::QDEVICE_CAST_VOTE;
            } else {
                node.flags &= !node_flags::QDEVICE_CAST_VOTE;
            }
        }
        self.arm_qdevice_timeout();
        self.recalculate();
        Ok(())
    }

    /// `qdevice_master_wins(name, allow)`.
    pub fn qdevice_master_wins(&self, name: &str, allow: bool) -> Result<()> {
        if !self.effective.lock().qdevice_enabled {
            return Err(CoreError::Access);
        }
        if let Some(mut node) = self.nodes.get_mut(&self.my_nodeid) {
            if allow {
                node.flags |= node_flags::QDEVICE_MASTER_WINS;
            } else {
                node.flags &= !node_flags::QDEVICE_MASTER_WINS;
            }
        }
        self.multicast(VotequorumMessage::QdeviceReconfigure(QdeviceReconfigure {
            old_name: name.to_string(),
            new_name: name.to_string(),
        }));
        self.recalculate();
        Ok(())
    }

    fn arm_qdevice_timeout(&self) {
        let engine = self.self_weak.clone();
        let timeout = Duration::from_millis(self.qdevice_timeout_ms as u64);
        let handle = self.timers.timer_add_duration(0, timeout, 0, move |_| {
            if let Some(engine) = engine.upgrade() {
                engine.on_qdevice_timeout();
            }
        });
        let mut qdevice = self.qdevice.lock();
        if let Some(old) = qdevice.poll_timer.replace(handle) {
            self.timers.timer_delete(old);
        }
    }

    fn on_qdevice_timeout(&self) {
        warn!("qdevice poll timeout expired, clearing alive/cast_vote");
        if let Some(mut node) = self.nodes.get_mut(&self.my_nodeid) {
            node.flags &= !(node_flags::QDEVICE_ALIVE | node_flags::QDEVICE_CAST_VOTE);
        }
        self.recalculate();
    }

    // ---- quorum computation ----

    fn total_votes(&self) -> u32 {
        let qdevice_counts = self
            .nodes
            .get(&self.my_nodeid)
            .map(|n| n.flags & node_flags::QDEVICE_CAST_VOTE != 0)
            .unwrap_or(false);
        let base: u32 = self
            .nodes
            .iter()
            .filter(|n| n.state == NodeState::Member)
            .map(|n| n.votes)
            .sum();
        if qdevice_counts {
            base + self.qdevice_votes.load(Ordering::Relaxed)
        } else {
            base
        }
    }

    fn highest_expected(&self) -> u32 {
        self.nodes
            .iter()
            .filter(|n| n.state == NodeState::Member)
            .map(|n| n.expected_votes)
            .max()
            .unwrap_or(0)
    }

    fn current_quorum(&self, total_votes: u32, highest_expected: u32) -> u32 {
        let member_count = self.nodes.iter().filter(|n| n.state == NodeState::Member).count();
        calculate_quorum(total_votes, highest_expected, self.effective.lock().two_node, member_count)
    }

    fn raise_ev_barrier(&self, candidate: u32) -> Result<()> {
        if !self.effective.lock().allow_downscale {
            return Ok(());
        }
        self.ev_barrier.lock().raise(candidate)
    }

    /// Recompute quorate state and publish a transition if it changed.
    fn recalculate(&self) {
        let total_votes = self.total_votes();
        let highest_expected = self.highest_expected();
        let quorum = self.current_quorum(total_votes, highest_expected);
        let member_list: BTreeSet<NodeId> = self
            .nodes
            .iter()
            .filter(|n| n.state == NodeState::Member)
            .map(|n| n.node_id)
            .collect();
        let previous = self.previous_member_list.lock().clone();
        let master_wins_active = self.nodes.iter().any(|n| {
            n.state == NodeState::Member
                && n.flags & node_flags::QDEVICE_CAST_VOTE != 0
                && n.flags & node_flags::QDEVICE_MASTER_WINS != 0
        });
        let atb_guard = self.atb.lock();
        let inputs = QuorateInputs {
            total_votes,
            expected_votes: self.nodes.get(&self.my_nodeid).map(|n| n.expected_votes).unwrap_or(0),
            quorum,
            member_list: &member_list,
            previous_member_list: &previous,
            wait_for_all_armed: self.wait_for_all_armed.load(Ordering::Relaxed),
            atb: atb_guard.as_ref(),
            qdevice_master_wins_active: master_wins_active,
        };
        let result = are_we_quorate(&inputs);
        drop(atb_guard);
        if result.disarm_wait_for_all {
            self.wait_for_all_armed.store(false, Ordering::Relaxed);
        }
        if let Some(mut node) = self.nodes.get_mut(&self.my_nodeid) {
            if self.wait_for_all_armed.load(Ordering::Relaxed) {
                node.flags |= node_flags::WFASTATUS;
            } else {
                node.flags &= !node_flags::WFASTATUS;
            }
            if result.quorate {
                node.flags |= node_flags::QUORATE;
            } else {
                node.flags &= !node_flags::QUORATE;
            }
        }
        let previously_quorate = self.quorate.swap(result.quorate, Ordering::Relaxed);
        self.publish_status(quorum, total_votes, result.quorate);
        if previously_quorate != result.quorate {
            info!(quorate = result.quorate, quorum, total_votes, "quorum transition");
            self.facade.notify(result.quorate);
        }
    }

    fn publish_status(&self, quorum: u32, total_votes: u32, quorate: bool) {
        let effective = self.effective.lock();
        let _ = self.cmap.set_internal("runtime.votequorum.quorum", CmapValue::U32(quorum));
        let _ = self.cmap.set_internal("runtime.votequorum.total_votes", CmapValue::U32(total_votes));
        let _ = self.cmap.set_internal("runtime.votequorum.quorate", CmapValue::U8(quorate as u8));
        let _ = self.cmap.set_internal("runtime.votequorum.two_node", CmapValue::U8(effective.two_node as u8));
        let _ = self.cmap.set_internal("runtime.votequorum.wait_for_all_status", CmapValue::U8(self.wait_for_all_armed.load(Ordering::Relaxed) as u8));
        let _ = self.cmap.set_internal("runtime.votequorum.ev_barrier", CmapValue::U32(self.ev_barrier.lock().get()));
    }

    fn multicast(&self, msg: VotequorumMessage) {
        let encoded = bincode::serialize(&msg).expect("votequorum message always encodes");
        if let Err(e) = self.totem.mcast(VOTEQUORUM_GROUP, &encoded, Guarantee::Agreed) {
            warn!(error = %e, "votequorum: mcast failed");
        }
    }

    /// Entry point for messages delivered on the `"votequorum"` group.
    pub fn on_message(&self, sender: NodeId, sender_order: Endianness, payload: &[u8]) {
        let mut msg: VotequorumMessage = match bincode::deserialize(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "votequorum: dropping malformed message");
                return;
            }
        };
        crate::wire::convert_if_needed(&mut msg, sender_order);
        match msg {
            VotequorumMessage::NodeInfo(info) => self.on_nodeinfo(sender, info),
            VotequorumMessage::Reconfigure(r) => self.on_reconfigure(r),
            VotequorumMessage::QdeviceReg(r) => self.on_qdevice_reg(sender, r),
            VotequorumMessage::QdeviceReconfigure(_) => trace!(sender, "qdevice reconfigure noted"),
        }
        self.recalculate();
    }

    fn on_nodeinfo(&self, sender: NodeId, info: NodeInfo) {
        debug!(sender, ?info, "votequorum: nodeinfo");
        self.nodes
            .entry(info.nodeid)
            .and_modify(|n| {
                n.votes = info.votes;
                n.expected_votes = n.expected_votes.max(info.expected_votes);
                n.flags = info.flags;
                n.state = NodeState::Member;
            })
            .or_insert_with(|| ClusterNode::new(info.nodeid, info.votes, info.expected_votes));
    }

    fn on_reconfigure(&self, r: Reconfigure) {
        match r.param {
            ReconfigureParam::ExpectedVotes => {
                if let Some(mut node) = self.nodes.get_mut(&r.target_node) {
                    node.expected_votes = r.value;
                }
            }
            ReconfigureParam::NodeVotes => {
                if let Some(mut node) = self.nodes.get_mut(&r.target_node) {
                    node.votes = r.value;
                }
            }
            ReconfigureParam::CancelWfa => {
                self.wait_for_all_armed.store(false, Ordering::Relaxed);
            }
        }
    }

    fn on_qdevice_reg(&self, sender: NodeId, reg: QdeviceReg) {
        if let Some(mut node) = self.nodes.get_mut(&sender) {
            match reg.op {
                QdeviceRegOp::Register => node.flags |= node_flags::QDEVICE_REGISTERED,
                QdeviceRegOp::Unregister => node.flags &= !node_flags::QDEVICE_REGISTERED,
            }
        }
    }

    /// Snapshot of the quorate flag, for the `QuorumProvider` impl and tests.
    pub fn is_quorate(&self) -> bool {
        self.quorate.load(Ordering::Relaxed)
    }
}

impl QuorumProvider for VotequorumEngine {
    fn is_quorate(&self) -> bool {
        self.is_quorate()
    }
}

impl ServiceEngine for VotequorumEngine {
    fn service_id(&self) -> u16 {
        VOTEQUORUM_SERVICE_ID
    }

    fn exec(&self, _function_id: u16, sender: NodeId, sender_order: Endianness, payload: &[u8]) {
        self.on_message(sender, sender_order, payload);
    }
}

impl Syncable for VotequorumEngine {
    fn service_id(&self) -> u16 {
        VOTEQUORUM_SERVICE_ID
    }

    fn sync_init(&self, _trans_list: &BTreeSet<NodeId>, member_list: &BTreeSet<NodeId>, ring_id: RingId) {
        *self.current_ring.lock() = ring_id;
        let old_members = std::mem::replace(&mut *self.current_member_list.lock(), member_list.clone());
        *self.previous_member_list.lock() = old_members;

        // Any tracked node absent from the new ring's member list is dead,
        // mirroring votequorum_sync_init walking quorum_members against
        // the incoming member_list.
        for mut node in self.nodes.iter_mut() {
            if !member_list.contains(&node.node_id) {
                node.state = NodeState::Dead;
            }
        }
        for &node_id in member_list {
            self.nodes
                .entry(node_id)
                .and_modify(|n| n.state = NodeState::Member)
                .or_insert_with(|| ClusterNode::new(node_id, 1, 0));
        }
    }

    fn sync_process(&self) -> bool {
        if let Some(node) = self.nodes.get(&self.my_nodeid) {
            self.multicast(VotequorumMessage::NodeInfo(NodeInfo {
                nodeid: self.my_nodeid,
                votes: node.votes,
                expected_votes: node.expected_votes,
                flags: node.flags,
            }));
        }
        let qdevice_registered = self.qdevice.lock().name.is_some();
        let qdevice_alive = self
            .nodes
            .get(&self.my_nodeid)
            .map(|n| n.flags & node_flags::QDEVICE_ALIVE != 0)
            .unwrap_or(false);
        !(qdevice_registered && qdevice_alive)
    }

    fn sync_activate(&self) {
        self.recalculate();
    }

    fn sync_abort(&self) {
        debug!("votequorum: sync aborted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::totem::LoopbackTotem;

    fn engine(my_nodeid: NodeId, cfg: &QuorumConfig, votes: u32, odd: bool) -> Arc<VotequorumEngine> {
        let totem = LoopbackTotem::new(my_nodeid);
        totem.groups_initialize(VOTEQUORUM_GROUP, Box::new(|_s, _p, _o| {})).unwrap();
        let facade = Arc::new(QuorumFacade::new());
        let cmap = Arc::new(CmapStore::new());
        let timers = Arc::new(TimerCore::new());
        let dir = std::env::temp_dir().join(format!("rq-test-{}-{}", std::process::id(), my_nodeid));
        std::fs::create_dir_all(&dir).unwrap();
        let barrier = persist::EvTrackingBarrier::open(&dir).unwrap();
        VotequorumEngine::new(my_nodeid, cfg, 1, votes, odd, totem, facade, cmap, timers, barrier).unwrap()
    }

    fn base_cfg() -> QuorumConfig {
        QuorumConfig {
            expected_votes: 3,
            two_node: false,
            wait_for_all: false,
            last_man_standing: false,
            last_man_standing_window_ms: 10_000,
            auto_tie_breaker: None,
            auto_tie_breaker_node: None,
            auto_tie_breaker_list: vec![],
            allow_downscale: false,
            qdevice_enabled: false,
            qdevice_votes: None,
            qdevice_name: None,
            qdevice_timeout_ms: 10_000,
            qdevice_sync_timeout_ms: 30_000,
        }
    }

    #[test]
    fn getinfo_on_unknown_node_fails() {
        let cfg = base_cfg();
        let e = engine(1, &cfg, 3, true);
        assert!(matches!(e.getinfo(Some(99)).unwrap_err(), CoreError::NotExist(_)));
    }

    #[test]
    fn single_node_cluster_is_quorate_by_default_expectation() {
        let mut cfg = base_cfg();
        cfg.expected_votes = 1;
        let e = engine(1, &cfg, 1, true);
        e.recalculate();
        assert!(e.is_quorate());
    }

    #[test]
    fn setexpected_rejects_quorum_out_of_range() {
        let cfg = base_cfg();
        let e = engine(1, &cfg, 3, true);
        // A single-node engine's total_votes is 1; expected_votes=1000
        // pushes the resulting quorum (≈501) far past total_votes, which
        // setexpected must refuse rather than adopt.
        assert!(matches!(e.setexpected(1000).unwrap_err(), CoreError::InvalidParam(_)));
    }

    #[test]
    fn setexpected_accepts_quorum_within_range() {
        let cfg = base_cfg();
        let e = engine(1, &cfg, 3, true);
        e.setexpected(1).unwrap();
        assert_eq!(e.getinfo(None).unwrap().expected_votes, 1);
    }

    #[test]
    fn qdevice_register_fails_when_not_enabled() {
        let cfg = base_cfg();
        let e = engine(1, &cfg, 3, true);
        assert!(matches!(e.qdevice_register("qnetd").unwrap_err(), CoreError::Access));
    }
}
