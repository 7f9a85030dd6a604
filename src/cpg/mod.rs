//! CPG (Closed Process Group) Engine
//!
//! Replicated per-process group membership with joined/left event
//! delivery and ordered fragmented multicast. Grounded end to end on
//! `original_source/exec/cpg.c`; handle-table shape for client
//! descriptors borrowed from the teacher's `state.rs::CommandLog`
//! (`DashMap`-keyed-by-integer-handle).

pub mod messages;
pub mod sync;

use crate::dispatch::ServiceEngine;
use crate::error::{CoreError, Result};
use crate::node::{NodeId, RingId};
use crate::sync_engine::Syncable;
use crate::totem::{Guarantee, TotemAdapter};
use crate::wire::Endianness;
use dashmap::DashMap;
use messages::{
    CpgMessage, Downlist, FragmentType, JoinLeaveReason, Joinlist, JoinlistEntry, Mcast,
    PartialMcast, ProcJoinLeave,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use sync::{elect_downlist_master, DownlistSubmission};
use tracing::{debug, warn};

pub const CPG_GROUP: &str = "cpg";
pub const CPG_SERVICE_ID: u16 = 3;
pub const GROUP_NAME_MAXLEN: usize = 128;

/// Opaque handle to a local client descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpgHandle(u64);

/// Opaque handle to a zero-copy region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ZeroCopyRegion(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpdState {
    Unjoined,
    LeaveStarted,
    JoinStarted,
    JoinCompleted,
}

/// A globally-replicated process/group membership entry, sorted in the
/// owning list by `(node_id, pid)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProcessInfo {
    pub node_id: NodeId,
    pub pid: u32,
    pub group_name: String,
}

/// A local client connection's CPG state.
pub struct CpgClientDescriptor {
    pub group_name: String,
    pub pid: u32,
    pub state: CpdState,
    pub initial_totem_conf_sent: bool,
    pub transition_counter: u64,
    pub initial_transition_counter: u64,
}

/// `confchg(group, members, joined, left)` delivered to local subscribers.
pub type ConfchgCallback = Box<dyn Fn(&str, &[NodeId], &[(NodeId, u32)], &[(NodeId, u32)]) + Send + Sync>;
/// `deliver(group, sender_node, sender_pid, bytes)`.
pub type DeliverCallback = Box<dyn Fn(&str, NodeId, u32, &[u8]) + Send + Sync>;

struct ClientSubscriptions {
    confchg: Vec<ConfchgCallback>,
    deliver: Vec<DeliverCallback>,
}

struct RingRound {
    ring_id: RingId,
    old_members: BTreeSet<NodeId>,
    trans_list: BTreeSet<NodeId>,
    member_count: usize,
    downlist_sent: bool,
    joinlist_sent: bool,
    downlists: Vec<DownlistSubmission>,
    joinlists: BTreeMap<NodeId, Vec<JoinlistEntry>>,
    departures_applied: bool,
}

/// Maintains the global process-info list, drives the two-phase
/// downlist/joinlist SYNC exchange, and delivers `confchg`/`deliver`
/// to local subscribers.
pub struct CpgEngine {
    my_nodeid: NodeId,
    totem: Arc<dyn TotemAdapter>,
    process_info: Mutex<BTreeSet<ProcessInfo>>,
    clients: DashMap<CpgHandle, Mutex<CpgClientDescriptor>>,
    subscriptions: Mutex<ClientSubscriptions>,
    next_handle: AtomicU64,
    round: Mutex<Option<RingRound>>,
    zero_copy_regions: DashMap<ZeroCopyRegion, Vec<u8>>,
    next_region: AtomicU64,
}

impl CpgEngine {
    pub fn new(my_nodeid: NodeId, totem: Arc<dyn TotemAdapter>) -> Arc<Self> {
        Arc::new(CpgEngine {
            my_nodeid,
            totem,
            process_info: Mutex::new(BTreeSet::new()),
            clients: DashMap::new(),
            subscriptions: Mutex::new(ClientSubscriptions { confchg: Vec::new(), deliver: Vec::new() }),
            next_handle: AtomicU64::new(1),
            round: Mutex::new(None),
            zero_copy_regions: DashMap::new(),
            next_region: AtomicU64::new(1),
        })
    }

    /// Map `size` bytes of scratch space under a named path, returning
    /// an opaque handle. A real deployment backs this with shared
    /// memory; here it's a plain owned buffer, matching the "portable
    /// crate can't assume shared mmap" scoping note in spec §4.4.
    pub fn zcb_alloc(&self, size: usize) -> ZeroCopyRegion {
        let handle = ZeroCopyRegion(self.next_region.fetch_add(1, Ordering::Relaxed));
        self.zero_copy_regions.insert(handle, vec![0u8; size]);
        handle
    }

    /// Write `payload` into a previously allocated region. The
    /// server-address embedded in the handle itself is what survives a
    /// store/reload round trip, not the buffer contents.
    pub fn zcb_execute(&self, handle: ZeroCopyRegion, payload: &[u8]) -> Result<()> {
        let mut region = self
            .zero_copy_regions
            .get_mut(&handle)
            .ok_or(CoreError::BadHandle)?;
        if payload.len() > region.len() {
            return Err(CoreError::TooBig);
        }
        region[..payload.len()].copy_from_slice(payload);
        Ok(())
    }

    /// Release a zero-copy region.
    pub fn zcb_free(&self, handle: ZeroCopyRegion) {
        self.zero_copy_regions.remove(&handle);
    }

    pub fn on_confchg(&self, callback: ConfchgCallback) {
        self.subscriptions.lock().confchg.push(callback);
    }

    pub fn on_deliver(&self, callback: DeliverCallback) {
        self.subscriptions.lock().deliver.push(callback);
    }

    fn validate_group_name(group: &str) -> Result<()> {
        if group.is_empty() || group.len() > GROUP_NAME_MAXLEN {
            return Err(CoreError::NameTooLong);
        }
        Ok(())
    }

    // ---- local library operations (spec §4.4) ----

    /// `join(group, pid, flags)`.
    pub fn join(&self, group: &str, pid: u32) -> Result<CpgHandle> {
        Self::validate_group_name(group)?;
        let handle = CpgHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.clients.insert(
            handle,
            Mutex::new(CpgClientDescriptor {
                group_name: group.to_string(),
                pid,
                state: CpdState::JoinStarted,
                initial_totem_conf_sent: false,
                transition_counter: 0,
                initial_transition_counter: 0,
            }),
        );
        self.multicast(CpgMessage::ProcJoinLeave(ProcJoinLeave {
            group_name: group.to_string(),
            pid,
            reason: JoinLeaveReason::Join,
        }));
        Ok(handle)
    }

    /// `leave(group, pid)`.
    pub fn leave(&self, handle: CpgHandle) -> Result<()> {
        let entry = self.clients.get(&handle).ok_or(CoreError::BadHandle)?;
        let mut desc = entry.lock();
        match desc.state {
            CpdState::JoinCompleted => {
                desc.state = CpdState::LeaveStarted;
                let (group_name, pid) = (desc.group_name.clone(), desc.pid);
                drop(desc);
                self.multicast(CpgMessage::ProcJoinLeave(ProcJoinLeave {
                    group_name,
                    pid,
                    reason: JoinLeaveReason::Leave,
                }));
                Ok(())
            }
            CpdState::JoinStarted => Err(CoreError::Busy),
            CpdState::Unjoined | CpdState::LeaveStarted => Err(CoreError::NotExist(desc.group_name.clone())),
        }
    }

    /// `mcast(handle, payload)`.
    pub fn mcast(&self, handle: CpgHandle, payload: &[u8]) -> Result<()> {
        let entry = self.clients.get(&handle).ok_or(CoreError::BadHandle)?;
        let desc = entry.lock();
        match desc.state {
            CpdState::JoinStarted | CpdState::JoinCompleted => {
                self.multicast(CpgMessage::Mcast(Mcast {
                    group_name: desc.group_name.clone(),
                    pid: desc.pid,
                    source: self.my_nodeid,
                    bytes: payload.to_vec(),
                }));
                Ok(())
            }
            _ => Err(CoreError::NotExist(handle_desc_group(&desc))),
        }
    }

    /// `partial_mcast(handle, type, payload, total_len)`.
    pub fn partial_mcast(&self, handle: CpgHandle, fragment_type: FragmentType, payload: &[u8], total_len: u32) -> Result<()> {
        let entry = self.clients.get(&handle).ok_or(CoreError::BadHandle)?;
        let mut desc = entry.lock();
        if matches!(fragment_type, FragmentType::First) {
            desc.initial_transition_counter = desc.transition_counter;
        } else if desc.initial_transition_counter != desc.transition_counter {
            return Err(CoreError::Interrupt);
        }
        self.multicast(CpgMessage::PartialMcast(PartialMcast {
            group_name: desc.group_name.clone(),
            pid: desc.pid,
            source: self.my_nodeid,
            msglen: total_len,
            fragment_type,
            bytes: payload.to_vec(),
        }));
        Ok(())
    }

    fn multicast(&self, msg: CpgMessage) {
        let encoded = bincode::serialize(&msg).expect("cpg message always encodes");
        if let Err(e) = self.totem.mcast(CPG_GROUP, &encoded, Guarantee::Agreed) {
            warn!(error = %e, "cpg: mcast failed");
        }
    }

    /// Entry point for messages delivered on the `"cpg"` group.
    pub fn on_message(&self, sender: NodeId, sender_order: Endianness, payload: &[u8]) {
        let mut msg: CpgMessage = match bincode::deserialize(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "cpg: dropping malformed message");
                return;
            }
        };
        crate::wire::convert_if_needed(&mut msg, sender_order);
        match msg {
            CpgMessage::ProcJoinLeave(m) => self.on_procjoinleave(sender, m),
            CpgMessage::Mcast(m) => self.on_mcast(sender, m),
            CpgMessage::PartialMcast(m) => self.on_partial_mcast(sender, m),
            CpgMessage::Downlist(d) => self.on_downlist(sender, d),
            CpgMessage::DownlistOld(_) => warn!(sender, "cpg: DOWNLIST_OLD from legacy peer, dropping"),
            CpgMessage::Joinlist(j) => self.on_joinlist(sender, j),
        }
    }

    fn on_procjoinleave(&self, sender: NodeId, m: ProcJoinLeave) {
        match m.reason {
            JoinLeaveReason::Join => {
                self.do_proc_join(sender, m.pid, &m.group_name);
            }
            JoinLeaveReason::Leave | JoinLeaveReason::Procdown => {
                self.do_proc_leave(sender, m.pid, &m.group_name, m.reason);
            }
        }
    }

    fn do_proc_join(&self, node_id: NodeId, pid: u32, group_name: &str) {
        let entry = ProcessInfo { node_id, pid, group_name: group_name.to_string() };
        self.process_info.lock().insert(entry);
        self.deliver_confchg(group_name, &[(node_id, pid)], &[]);
    }

    fn do_proc_leave(&self, node_id: NodeId, pid: u32, group_name: &str, reason: JoinLeaveReason) {
        let entry = ProcessInfo { node_id, pid, group_name: group_name.to_string() };
        self.process_info.lock().remove(&entry);
        let _ = reason;
        self.deliver_confchg(group_name, &[], &[(node_id, pid)]);
    }

    fn deliver_confchg(&self, group_name: &str, joined: &[(NodeId, u32)], left: &[(NodeId, u32)]) {
        let members: Vec<NodeId> = self
            .process_info
            .lock()
            .iter()
            .filter(|p| p.group_name == group_name)
            .map(|p| p.node_id)
            .collect();
        for sub in self.subscriptions.lock().confchg.iter() {
            sub(group_name, &members, joined, left);
        }
        for entry in self.clients.iter() {
            let mut desc = entry.value().lock();
            if desc.group_name != group_name {
                continue;
            }
            let mut delivered = false;
            if joined.iter().any(|&(n, p)| n == self.my_nodeid && p == desc.pid) {
                desc.state = CpdState::JoinCompleted;
                delivered = true;
            }
            if let Some(&(n, p)) = left.first() {
                if n == self.my_nodeid && p == desc.pid {
                    desc.group_name.clear();
                    desc.pid = 0;
                    desc.state = CpdState::Unjoined;
                    delivered = true;
                }
            }
            if delivered {
                desc.transition_counter += 1;
            }
        }
    }

    fn on_mcast(&self, sender: NodeId, m: Mcast) {
        self.dispatch_to_local(&m.group_name, sender, m.pid, &m.bytes);
    }

    fn on_partial_mcast(&self, sender: NodeId, m: PartialMcast) {
        self.dispatch_to_local(&m.group_name, sender, m.pid, &m.bytes);
    }

    fn dispatch_to_local(&self, group_name: &str, sender: NodeId, pid: u32, bytes: &[u8]) {
        let known = self
            .process_info
            .lock()
            .iter()
            .any(|p| p.group_name == group_name && p.node_id == sender);
        if !known {
            warn!(group_name, sender, "cpg: dropping message from unknown node for group");
            return;
        }
        let has_subscriber = self.clients.iter().any(|e| {
            let d = e.value().lock();
            d.group_name == group_name && matches!(d.state, CpdState::JoinCompleted | CpdState::LeaveStarted)
        });
        if !has_subscriber {
            return;
        }
        for cb in self.subscriptions.lock().deliver.iter() {
            cb(group_name, sender, pid, bytes);
        }
    }

    // ---- SYNC integration (two-phase downlist/joinlist, spec §4.4) ----

    fn begin_round(&self, ring_id: RingId, trans_list: BTreeSet<NodeId>, member_count: usize) {
        let old_members: BTreeSet<NodeId> = self.process_info.lock().iter().map(|p| p.node_id).collect();
        *self.round.lock() = Some(RingRound {
            ring_id,
            old_members,
            trans_list,
            member_count,
            downlist_sent: false,
            joinlist_sent: false,
            downlists: Vec::new(),
            joinlists: BTreeMap::new(),
            departures_applied: false,
        });
    }

    fn send_downlist_phase(&self) {
        let mut round = self.round.lock();
        let Some(r) = round.as_mut() else { return };
        if r.downlist_sent {
            return;
        }
        let left_nodes: BTreeSet<NodeId> = r.old_members.difference(&r.trans_list).copied().collect();
        let old_members_count = r.old_members.len() as u32;
        r.downlists.push(DownlistSubmission {
            sender: self.my_nodeid,
            old_members_count,
            left_nodes: left_nodes.clone(),
        });
        r.downlist_sent = true;
        drop(round);
        self.multicast(CpgMessage::Downlist(Downlist {
            old_members_count,
            left_nodes: left_nodes.into_iter().collect(),
        }));
    }

    fn on_downlist(&self, sender: NodeId, d: Downlist) {
        let mut round = self.round.lock();
        if let Some(r) = round.as_mut() {
            r.downlists.push(DownlistSubmission {
                sender,
                old_members_count: d.old_members_count,
                left_nodes: d.left_nodes.into_iter().collect(),
            });
        }
    }

    fn send_joinlist_phase(&self) {
        let mut round = self.round.lock();
        let Some(r) = round.as_mut() else { return };
        if r.joinlist_sent {
            return;
        }
        r.joinlist_sent = true;
        drop(round);
        let entries: Vec<JoinlistEntry> = self
            .clients
            .iter()
            .filter_map(|e| {
                let d = e.value().lock();
                matches!(d.state, CpdState::JoinStarted | CpdState::JoinCompleted)
                    .then(|| JoinlistEntry { pid: d.pid, group_name: d.group_name.clone() })
            })
            .collect();
        self.multicast(CpgMessage::Joinlist(Joinlist { entries: entries.clone() }));
        self.round.lock().as_mut().unwrap().joinlists.insert(self.my_nodeid, entries);
    }

    fn on_joinlist(&self, sender: NodeId, j: Joinlist) {
        let mut round = self.round.lock();
        if let Some(r) = round.as_mut() {
            r.joinlists.insert(sender, j.entries);
        }
    }

    /// Every member sent both phases: elect the downlist master, apply
    /// its departures, then apply joinlist arrivals. Called once per
    /// ring round, typically from `sync_process` once every expected
    /// member is accounted for.
    fn finalize_round_if_ready(&self, member_count: usize) {
        let mut round = self.round.lock();
        let Some(r) = round.as_mut() else { return };
        if r.departures_applied || r.downlists.len() < member_count || r.joinlists.len() < member_count {
            return;
        }
        let master = elect_downlist_master(&r.downlists).cloned();
        r.departures_applied = true;
        let joinlists = r.joinlists.clone();
        drop(round);

        if let Some(master) = master {
            let mut by_group: BTreeMap<String, Vec<(NodeId, u32)>> = BTreeMap::new();
            {
                let info = self.process_info.lock();
                for node_id in &master.left_nodes {
                    for p in info.iter().filter(|p| p.node_id == *node_id) {
                        by_group.entry(p.group_name.clone()).or_default().push((p.node_id, p.pid));
                    }
                }
            }
            {
                let mut info = self.process_info.lock();
                info.retain(|p| !master.left_nodes.contains(&p.node_id));
            }
            for (group, left) in by_group {
                self.deliver_confchg(&group, &[], &left);
            }
        }

        for (sender, entries) in joinlists {
            for e in entries {
                let already_present = self
                    .process_info
                    .lock()
                    .contains(&ProcessInfo { node_id: sender, pid: e.pid, group_name: e.group_name.clone() });
                if !already_present {
                    self.do_proc_join(sender, e.pid, &e.group_name);
                }
            }
        }
    }
}

fn handle_desc_group(desc: &CpgClientDescriptor) -> String {
    desc.group_name.clone()
}

impl ServiceEngine for CpgEngine {
    fn service_id(&self) -> u16 {
        CPG_SERVICE_ID
    }

    fn exec(&self, _function_id: u16, sender: NodeId, sender_order: Endianness, payload: &[u8]) {
        self.on_message(sender, sender_order, payload);
    }
}

impl Syncable for CpgEngine {
    fn service_id(&self) -> u16 {
        CPG_SERVICE_ID
    }

    fn sync_init(&self, trans_list: &BTreeSet<NodeId>, member_list: &BTreeSet<NodeId>, ring_id: RingId) {
        self.begin_round(ring_id, trans_list.clone(), member_list.len());
    }

    fn sync_process(&self) -> bool {
        self.send_downlist_phase();
        self.send_joinlist_phase();
        let round = self.round.lock();
        match round.as_ref() {
            Some(r) => r.downlist_sent && r.joinlist_sent,
            None => true,
        }
    }

    fn sync_activate(&self) {
        let member_count = self.round.lock().as_ref().map(|r| r.member_count).unwrap_or(1);
        self.finalize_round_if_ready(member_count);
        *self.round.lock() = None;
    }

    fn sync_abort(&self) {
        *self.round.lock() = None;
        debug!("cpg: sync aborted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::totem::LoopbackTotem;

    fn engine(node: NodeId) -> Arc<CpgEngine> {
        let totem = LoopbackTotem::new(node);
        totem.groups_initialize(CPG_GROUP, Box::new(|_s, _p, _o| {})).unwrap();
        CpgEngine::new(node, totem)
    }

    #[test]
    fn join_rejects_group_name_too_long() {
        let e = engine(1);
        let long = "g".repeat(GROUP_NAME_MAXLEN + 1);
        assert!(matches!(e.join(&long, 100).unwrap_err(), CoreError::NameTooLong));
    }

    #[test]
    fn leave_before_join_completed_is_rejected() {
        let e = engine(1);
        let handle = e.join("g1", 100).unwrap();
        assert!(matches!(e.leave(handle).unwrap_err(), CoreError::Busy));
    }

    #[test]
    fn mcast_outside_join_states_is_rejected() {
        let e = engine(1);
        // bad handle entirely
        assert!(matches!(e.mcast(CpgHandle(9999), b"x").unwrap_err(), CoreError::BadHandle));
    }

    #[test]
    fn procjoin_for_self_advances_to_join_completed() {
        let e = engine(1);
        let handle = e.join("g1", 100).unwrap();
        e.on_message(1, Endianness::native(), &bincode::serialize(&CpgMessage::ProcJoinLeave(ProcJoinLeave {
            group_name: "g1".into(),
            pid: 100,
            reason: JoinLeaveReason::Join,
        })).unwrap());
        let entry = e.clients.get(&handle).unwrap();
        assert_eq!(entry.lock().state, CpdState::JoinCompleted);
    }
}
