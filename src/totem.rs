//! Totem Adapter — the totally-ordered reliable group-messaging substrate
//!
//! This module abstracts the totem protocol as a collaborator trait
//! (see spec §6, Non-goals in §1): the core never re-implements ordered
//! multicast itself, it only consumes `mcast`, view-change notification,
//! and named-group registration through this seam.
//!
//! `LoopbackTotem` is a single-process reference implementation used by
//! tests and by the `sim` test harness: it delivers membership views
//! deterministically and keeps a single global delivery order per ring.

use crate::error::{CoreError, Result};
use crate::node::{MembershipView, NodeId, RingId};
use crate::wire::Endianness;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Delivery guarantee requested for a multicast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guarantee {
    /// All correct members deliver the same ordered stream.
    Agreed,
}

/// A group-scoped delivery callback: `(sender, payload, sender_order)`.
pub type GroupCallback = Box<dyn Fn(NodeId, &[u8], Endianness) + Send + Sync>;

/// A view-change callback: `(trans_list, member_list, ring_id)`.
pub type ViewChangeCallback =
    Box<dyn Fn(&BTreeSet<NodeId>, &BTreeSet<NodeId>, RingId) + Send + Sync>;

/// The capabilities the core consumes from the totem substrate.
pub trait TotemAdapter: Send + Sync {
    /// This process's node id.
    fn my_nodeid(&self) -> NodeId;

    /// Totally ordered reliable group multicast.
    fn mcast(&self, group: &str, iov: &[u8], guarantee: Guarantee) -> Result<()>;

    /// Register a named delivery group with a receive callback.
    fn groups_initialize(&self, group: &str, callback: GroupCallback) -> Result<()>;

    /// Join an already-initialized group (idempotent).
    fn groups_join(&self, group: &str) -> Result<()>;

    /// Register to be notified on every membership transition.
    fn on_view_change(&self, callback: ViewChangeCallback);
}

struct GroupState {
    callback: GroupCallback,
}

/// In-memory single-process totem reference implementation.
///
/// Deliveries are synchronous and happen in `mcast` call order, which
/// satisfies AGREED semantics trivially within one process — exactly
/// the scope a unit/integration test needs.
pub struct LoopbackTotem {
    my_nodeid: NodeId,
    groups: DashMap<String, GroupState>,
    view_callbacks: Mutex<Vec<ViewChangeCallback>>,
    current_ring: Mutex<RingId>,
}

impl LoopbackTotem {
    /// Construct a loopback adapter for `my_nodeid`, starting at ring `(my_nodeid, 0)`.
    pub fn new(my_nodeid: NodeId) -> Arc<Self> {
        Arc::new(LoopbackTotem {
            my_nodeid,
            groups: DashMap::new(),
            view_callbacks: Mutex::new(Vec::new()),
            current_ring: Mutex::new(RingId::new(my_nodeid, 0)),
        })
    }

    /// Drive a membership transition: advances the ring id (the
    /// representative and sequence are caller-supplied so tests can
    /// construct the exact scenarios in spec §8) and notifies every
    /// registered view-change callback.
    pub fn deliver_view(
        &self,
        ring_id: RingId,
        member_list: BTreeSet<NodeId>,
        trans_list: BTreeSet<NodeId>,
    ) {
        {
            let mut cur = self.current_ring.lock();
            assert!(
                ring_id > *cur,
                "ring id must be strictly increasing: {} -> {}",
                *cur,
                ring_id
            );
            *cur = ring_id;
        }
        debug!(%ring_id, members = member_list.len(), "delivering view change");
        for cb in self.view_callbacks.lock().iter() {
            cb(&trans_list, &member_list, ring_id);
        }
    }

    /// Construct a view, checking the subset invariant, for tests that
    /// want a `MembershipView` rather than raw sets.
    pub fn build_view(
        ring_id: RingId,
        member_list: BTreeSet<NodeId>,
        trans_list: BTreeSet<NodeId>,
        previous_member_list: &BTreeSet<NodeId>,
    ) -> MembershipView {
        MembershipView::new(ring_id, member_list, trans_list, previous_member_list)
    }

    /// Deliver a payload to a group's local subscriber directly, as if
    /// it had arrived from `sender` over the wire. Used by tests that
    /// want to simulate a remote peer without a full multi-process
    /// simulation.
    pub fn inject(&self, group: &str, sender: NodeId, payload: &[u8]) {
        if let Some(state) = self.groups.get(group) {
            (state.callback)(sender, payload, Endianness::native());
        } else {
            warn!(group, "inject: no local subscriber for group");
        }
    }
}

impl TotemAdapter for LoopbackTotem {
    fn my_nodeid(&self) -> NodeId {
        self.my_nodeid
    }

    fn mcast(&self, group: &str, iov: &[u8], guarantee: Guarantee) -> Result<()> {
        trace!(group, len = iov.len(), ?guarantee, "mcast");
        if let Some(state) = self.groups.get(group) {
            (state.callback)(self.my_nodeid, iov, Endianness::native());
            Ok(())
        } else {
            Err(CoreError::NotExist(format!("group {group} not joined")))
        }
    }

    fn groups_initialize(&self, group: &str, callback: GroupCallback) -> Result<()> {
        self.groups
            .insert(group.to_string(), GroupState { callback });
        Ok(())
    }

    fn groups_join(&self, group: &str) -> Result<()> {
        if self.groups.contains_key(group) {
            Ok(())
        } else {
            Err(CoreError::NotExist(format!(
                "group {group} not initialized"
            )))
        }
    }

    fn on_view_change(&self, callback: ViewChangeCallback) {
        self.view_callbacks.lock().push(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn mcast_to_unjoined_group_is_rejected() {
        let totem = LoopbackTotem::new(1);
        let err = totem.mcast("sync", b"hi", Guarantee::Agreed).unwrap_err();
        assert!(matches!(err, CoreError::NotExist(_)));
    }

    #[test]
    fn mcast_delivers_to_local_subscriber() {
        let totem = LoopbackTotem::new(1);
        let received = Arc::new(AtomicUsize::new(0));
        let r2 = received.clone();
        totem
            .groups_initialize(
                "sync",
                Box::new(move |_sender, payload, _order| {
                    assert_eq!(payload, b"hello");
                    r2.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        totem.mcast("sync", b"hello", Guarantee::Agreed).unwrap();
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn view_change_notifies_every_callback() {
        let totem = LoopbackTotem::new(1);
        let seen = Arc::new(AtomicUsize::new(0));
        let s2 = seen.clone();
        totem.on_view_change(Box::new(move |_t, _m, _r| {
            s2.fetch_add(1, Ordering::SeqCst);
        }));
        totem.deliver_view(RingId::new(1, 1), [1].into_iter().collect(), BTreeSet::new());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "strictly increasing")]
    fn view_change_requires_monotonic_ring_id() {
        let totem = LoopbackTotem::new(1);
        totem.deliver_view(RingId::new(1, 1), [1].into_iter().collect(), BTreeSet::new());
        totem.deliver_view(RingId::new(1, 1), [1].into_iter().collect(), BTreeSet::new());
    }
}
