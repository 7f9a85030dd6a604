//! CPG downlist-master election
//!
//! Pure function extracted from the two-phase DOWNLIST/JOINLIST SYNC
//! exchange in `original_source/exec/cpg.c`, so the deterministic
//! selection rule in spec §4.4 can be tested without standing up a
//! full engine.

use crate::node::NodeId;
use std::collections::BTreeSet;

/// One member's downlist submission for the current ring.
#[derive(Debug, Clone)]
pub struct DownlistSubmission {
    pub sender: NodeId,
    pub old_members_count: u32,
    pub left_nodes: BTreeSet<NodeId>,
}

/// Pick the downlist master: highest `(old_members - left_nodes.len())`,
/// tie-break by highest `old_members`, then by lowest `sender`.
/// Submissions that list the sender itself among `left_nodes` are
/// ignored (a node cannot report its own departure).
pub fn elect_downlist_master(submissions: &[DownlistSubmission]) -> Option<&DownlistSubmission> {
    submissions
        .iter()
        .filter(|s| !s.left_nodes.contains(&s.sender))
        .max_by(|a, b| {
            let surviving_a = a.old_members_count as i64 - a.left_nodes.len() as i64;
            let surviving_b = b.old_members_count as i64 - b.left_nodes.len() as i64;
            surviving_a
                .cmp(&surviving_b)
                .then(a.old_members_count.cmp(&b.old_members_count))
                .then(b.sender.cmp(&a.sender)) // lowest sender wins ties
        })
}
