//! The single owning `Context`
//!
//! Wires together the Totem Adapter, SYNC Engine, Votequorum Engine,
//! CPG Engine, Quorum Façade, Timer/Scheduled-Work Core and Config Map
//! into one process. Spec §5 is single-threaded cooperative: there is
//! no lock contention inside `Context` itself, only `Arc`/`DashMap`
//! sharing with whatever outer host drives `pump_event` (see
//! `runtime.rs`). Grounded on the teacher's top-level `lib.rs`, which
//! similarly owns every subsystem behind one struct and wires them at
//! construction time.

use crate::cmap::CmapStore;
use crate::config::ClusterConfig;
use crate::cpg::{CpgEngine, CPG_GROUP};
use crate::dispatch::ServiceDispatcher;
use crate::error::Result;
use crate::node::{NodeId, RingId};
use crate::quorum_facade::QuorumFacade;
use crate::sync_engine::SyncEngine;
use crate::timer::TimerCore;
use crate::totem::{LoopbackTotem, TotemAdapter};
use crate::votequorum::{persist::EvTrackingBarrier, VotequorumEngine, VOTEQUORUM_GROUP};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// One process's worth of wired-together engines.
pub struct Context {
    pub totem: Arc<dyn TotemAdapter>,
    /// Set when `totem` is a `LoopbackTotem`, so tests and the `sim`
    /// harness can drive view changes without downcasting.
    pub loopback: Option<Arc<LoopbackTotem>>,
    pub dispatcher: Arc<ServiceDispatcher>,
    pub sync_engine: Arc<SyncEngine>,
    pub votequorum: Arc<VotequorumEngine>,
    pub cpg: Arc<CpgEngine>,
    pub quorum_facade: Arc<QuorumFacade>,
    pub cmap: Arc<CmapStore>,
    pub timers: Arc<TimerCore>,
}

impl Context {
    /// Build a full context over a `LoopbackTotem`, the way single-node
    /// tests construct simulations. A production host would instead
    /// supply a real `TotemAdapter` via `Context::new`.
    pub fn new_loopback(my_nodeid: NodeId, config: &ClusterConfig, state_dir: &Path) -> Result<Arc<Self>> {
        let totem = LoopbackTotem::new(my_nodeid);
        let loopback = Some(totem.clone());
        Self::new(my_nodeid, config, state_dir, totem, loopback)
    }

    /// Build a full context over any `TotemAdapter`, the way a
    /// multi-process or multi-node simulation wires each member up
    /// against a shared network fixture. `loopback` is only populated
    /// by `new_loopback`, for tests/harnesses that want the concrete
    /// `LoopbackTotem` handle to drive view changes directly.
    pub fn new(
        my_nodeid: NodeId,
        config: &ClusterConfig,
        state_dir: &Path,
        totem: Arc<dyn TotemAdapter>,
        loopback: Option<Arc<LoopbackTotem>>,
    ) -> Result<Arc<Self>> {
        let cmap = Arc::new(CmapStore::new());
        config.seed_cmap(&cmap);
        cmap.protect("runtime.votequorum.");

        let timers = Arc::new(TimerCore::new());
        let facade = Arc::new(QuorumFacade::new());
        let dispatcher = Arc::new(ServiceDispatcher::new());

        let ev_barrier = EvTrackingBarrier::open(state_dir)?;
        let node_votes = config.node_votes();
        let total_votes: u32 = node_votes.values().sum();
        let cluster_size_is_odd = node_votes.len() % 2 == 1;
        let my_votes = node_votes.get(&my_nodeid).copied().unwrap_or(1);

        let votequorum = VotequorumEngine::new(
            my_nodeid,
            &config.quorum,
            my_votes,
            total_votes,
            cluster_size_is_odd,
            totem.clone(),
            facade.clone(),
            cmap.clone(),
            timers.clone(),
            ev_barrier,
        )
        .map_err(|e| crate::error::CoreError::Init(e.to_string()))?;
        facade.initialize(votequorum.clone());

        let cpg = CpgEngine::new(my_nodeid, totem.clone());

        let sync_engine = SyncEngine::new(totem.clone());
        sync_engine.register_service(votequorum.clone());
        sync_engine.register_service(cpg.clone());

        dispatcher.register(votequorum.clone());
        dispatcher.register(cpg.clone());

        totem.groups_initialize(VOTEQUORUM_GROUP, {
            let votequorum = votequorum.clone();
            Box::new(move |sender, payload, order| votequorum.on_message(sender, order, payload))
        })?;
        totem.groups_initialize(CPG_GROUP, {
            let cpg = cpg.clone();
            Box::new(move |sender, payload, order| cpg.on_message(sender, order, payload))
        })?;
        totem.groups_initialize(crate::sync_engine::SYNC_GROUP, {
            let sync_engine = sync_engine.clone();
            Box::new(move |sender, payload, order| sync_engine.on_message(sender, order, payload))
        })?;

        totem.groups_join(VOTEQUORUM_GROUP)?;
        totem.groups_join(CPG_GROUP)?;
        totem.groups_join(crate::sync_engine::SYNC_GROUP)?;

        info!(my_nodeid, "context wired up");

        Ok(Arc::new(Context {
            totem,
            loopback,
            dispatcher,
            sync_engine,
            votequorum,
            cpg,
            quorum_facade: facade,
            cmap,
            timers,
        }))
    }

    /// Drive a membership view through SYNC, the way the Totem Adapter
    /// would on every real ring change.
    pub fn deliver_view(&self, ring_id: RingId, member_list: BTreeSet<NodeId>, trans_list: BTreeSet<NodeId>) {
        if let Some(loopback) = &self.loopback {
            loopback.deliver_view(ring_id, member_list.clone(), trans_list.clone());
        }
        self.sync_engine.save_transitional(trans_list.clone());
        self.sync_engine.start(member_list, trans_list, ring_id);
    }

    /// Pump every outstanding timer/scheduled-work item whose time has
    /// come, the one "non-message" event source in the cooperative loop.
    pub fn pump_event(&self, now_ns: u64) {
        self.timers.expire_timers(now_ns);
        self.timers.run_schedwrk_locked();
    }
}
