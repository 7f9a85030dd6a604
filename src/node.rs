//! Node identity and membership view data model
//!
//! Mirrors corosync's `totem_ip_if_str`/`memb_ring_id` concepts: a ring
//! is identified by the node that was representative when it formed
//! plus a monotonic sequence, and membership is expressed as ordered
//! sets of node ids.

use crate::wire::WireConvert;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// An unsigned 32-bit identifier, unique within the cluster.
pub type NodeId = u32;

/// Reserved node id denoting the external quorum device pseudo-node.
pub const QDEVICE_NODEID: NodeId = 0;

/// A membership view's ring identifier: `(representative_node_id, sequence)`.
///
/// Two ring ids are equal iff both fields are equal. Sequence numbers
/// are strictly monotonic per node's view; messages stamped with a
/// ring id other than the receiver's current one are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RingId {
    /// Node id that was representative when this ring formed.
    pub representative: NodeId,
    /// Strictly monotonic sequence number for that representative.
    pub seq: u64,
}

impl RingId {
    /// Construct a ring id.
    pub fn new(representative: NodeId, seq: u64) -> Self {
        RingId { representative, seq }
    }
}

impl std::fmt::Display for RingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.representative, self.seq)
    }
}

impl WireConvert for RingId {
    fn endian_convert(&mut self) {
        self.representative = self.representative.swap_bytes();
        self.seq = self.seq.swap_bytes();
    }
}

/// A membership view delivered by the totem adapter on a ring change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipView {
    /// This view's ring id.
    pub ring_id: RingId,
    /// Ordered set of members in the new ring.
    pub member_list: BTreeSet<NodeId>,
    /// Members present both before and after the transition.
    pub trans_list: BTreeSet<NodeId>,
}

impl MembershipView {
    /// Construct a view, asserting `trans_list` only contains nodes
    /// also present in `member_list` or `previous_member_list`.
    pub fn new(
        ring_id: RingId,
        member_list: BTreeSet<NodeId>,
        trans_list: BTreeSet<NodeId>,
        previous_member_list: &BTreeSet<NodeId>,
    ) -> Self {
        debug_assert!(trans_list
            .iter()
            .all(|n| member_list.contains(n) || previous_member_list.contains(n)));
        MembershipView {
            ring_id,
            member_list,
            trans_list,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_id_ordering_is_lexicographic() {
        let a = RingId::new(1, 4);
        let b = RingId::new(1, 5);
        let c = RingId::new(3, 1);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn ring_id_equality_requires_both_fields() {
        assert_eq!(RingId::new(1, 4), RingId::new(1, 4));
        assert_ne!(RingId::new(1, 4), RingId::new(2, 4));
        assert_ne!(RingId::new(1, 4), RingId::new(1, 5));
    }

    #[test]
    fn ring_id_endian_convert_is_involutive() {
        let original = RingId::new(7, 9);
        let mut r = original;
        r.endian_convert();
        assert_ne!(r, original);
        r.endian_convert();
        assert_eq!(r, original);
    }

    #[test]
    fn membership_view_trans_list_subset_invariant() {
        let prev: BTreeSet<NodeId> = [1, 2, 3].into_iter().collect();
        let members: BTreeSet<NodeId> = [1, 2].into_iter().collect();
        let trans: BTreeSet<NodeId> = [1, 2, 3].into_iter().collect();
        let _ = MembershipView::new(RingId::new(1, 2), members, trans, &prev);
    }
}
