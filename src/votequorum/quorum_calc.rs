//! Pure quorum computation
//!
//! Transcribed from `original_source/exec/votequorum.c`'s
//! `calculate_quorum()` and `are_we_quorate()`. Kept free of engine
//! state so the seven-step algorithm in spec §4.3 can be property-
//! tested in isolation.

use crate::config::AtbMode;
use crate::node::NodeId;
use std::collections::BTreeSet;

/// `q = max((highest_expected+2)/2, (total_votes+2)/2)`, collapsed to
/// `1` when `two_node` and total members `<= 2`.
pub fn calculate_quorum(total_votes: u32, highest_expected: u32, two_node: bool, member_count: usize) -> u32 {
    if two_node && member_count <= 2 {
        return 1;
    }
    let q1 = (highest_expected + 2) / 2;
    let q2 = (total_votes + 2) / 2;
    q1.max(q2)
}

/// Auto-tie-breaker configuration, resolved from `config::QuorumConfig`.
#[derive(Debug, Clone)]
pub struct AutoTieBreaker {
    pub mode: AtbMode,
    pub node: Option<NodeId>,
    pub list: Vec<NodeId>,
}

/// Inputs to the quorate decision, one recalculation's worth of state.
#[derive(Debug, Clone)]
pub struct QuorateInputs<'a> {
    pub total_votes: u32,
    pub expected_votes: u32,
    pub quorum: u32,
    pub member_list: &'a BTreeSet<NodeId>,
    pub previous_member_list: &'a BTreeSet<NodeId>,
    pub wait_for_all_armed: bool,
    pub atb: Option<&'a AutoTieBreaker>,
    pub qdevice_master_wins_active: bool,
}

/// Outcome of one quorate recalculation: the decision plus whether WFA
/// should disarm as a side effect (spec: "once all-seen, disarm WFA").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorateResult {
    pub quorate: bool,
    pub disarm_wait_for_all: bool,
}

/// Step 4-7 of spec §4.3's quorum computation: WFA gate, ATB override,
/// qdevice master-wins override.
pub fn are_we_quorate(inputs: &QuorateInputs<'_>) -> QuorateResult {
    let mut quorate = inputs.total_votes >= inputs.quorum;
    let mut disarm_wait_for_all = false;

    if inputs.wait_for_all_armed {
        if inputs.total_votes != inputs.expected_votes {
            quorate = false;
        } else {
            disarm_wait_for_all = true;
        }
    }

    if !quorate {
        if let Some(atb) = inputs.atb {
            // The other partition might also satisfy ATB's rule, in which case
            // neither side may unilaterally claim the tie. Mirrors the original's
            // `previous_quorum_members_entries - quorum_members_entries < quorum`.
            let member_drop = inputs.previous_member_list.len() as i64 - inputs.member_list.len() as i64;
            if inputs.total_votes * 2 == inputs.expected_votes
                && member_drop < inputs.quorum as i64
                && check_auto_tie_breaker(atb, inputs.member_list, inputs.previous_member_list)
            {
                quorate = true;
            }
        }
    }

    if !quorate && inputs.qdevice_master_wins_active {
        quorate = true;
    }

    QuorateResult { quorate, disarm_wait_for_all }
}

/// ATB decision for an even 50/50 split: did *this* partition win the tie?
///
/// `LOWEST`/`HIGHEST`: this side wins iff the globally lowest/highest
/// ever-seen node id is a current member. `LIST`: walk the configured
/// list in order; the first entry found in `member_list` wins, unless
/// an earlier entry in the list was present in `previous_member_list`
/// (meaning the other partition might legitimately also claim the tie,
/// so we defer and report non-quorate here).
fn check_auto_tie_breaker(atb: &AutoTieBreaker, member_list: &BTreeSet<NodeId>, previous_member_list: &BTreeSet<NodeId>) -> bool {
    match atb.mode {
        AtbMode::Lowest => {
            let Some(&lowest) = previous_member_list.iter().chain(member_list.iter()).min() else {
                return false;
            };
            member_list.contains(&lowest)
        }
        AtbMode::Highest => {
            let Some(&highest) = previous_member_list.iter().chain(member_list.iter()).max() else {
                return false;
            };
            member_list.contains(&highest)
        }
        AtbMode::List => {
            for &candidate in &atb.list {
                if member_list.contains(&candidate) {
                    return true;
                }
                if previous_member_list.contains(&candidate) {
                    return false;
                }
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_node_quorum_is_two() {
        assert_eq!(calculate_quorum(3, 3, false, 3), 2);
    }

    #[test]
    fn two_node_collapses_to_one() {
        assert_eq!(calculate_quorum(2, 2, true, 2), 1);
    }

    #[test]
    fn two_node_flag_does_not_collapse_larger_membership() {
        assert_eq!(calculate_quorum(3, 3, true, 3), 2);
    }

    fn set(ids: &[NodeId]) -> BTreeSet<NodeId> {
        ids.iter().copied().collect()
    }

    #[test]
    fn wait_for_all_blocks_until_every_node_seen() {
        let members = set(&[1]);
        let prev = BTreeSet::new();
        let inputs = QuorateInputs {
            total_votes: 1,
            expected_votes: 3,
            quorum: 2,
            member_list: &members,
            previous_member_list: &prev,
            wait_for_all_armed: true,
            atb: None,
            qdevice_master_wins_active: false,
        };
        let result = are_we_quorate(&inputs);
        assert!(!result.quorate);
        assert!(!result.disarm_wait_for_all);
    }

    #[test]
    fn wait_for_all_disarms_once_total_votes_matches_expected() {
        let members = set(&[1, 2, 3]);
        let prev = BTreeSet::new();
        let inputs = QuorateInputs {
            total_votes: 3,
            expected_votes: 3,
            quorum: 2,
            member_list: &members,
            previous_member_list: &prev,
            wait_for_all_armed: true,
            atb: None,
            qdevice_master_wins_active: false,
        };
        let result = are_we_quorate(&inputs);
        assert!(result.quorate);
        assert!(result.disarm_wait_for_all);
    }

    #[test]
    fn atb_lowest_favours_partition_containing_lowest_node() {
        let atb = AutoTieBreaker { mode: AtbMode::Lowest, node: None, list: vec![] };
        let members = set(&[1, 2]);
        let prev = set(&[1, 2, 3, 4]);
        let inputs = QuorateInputs {
            total_votes: 2,
            expected_votes: 4,
            quorum: 3,
            member_list: &members,
            previous_member_list: &prev,
            wait_for_all_armed: false,
            atb: Some(&atb),
            qdevice_master_wins_active: false,
        };
        assert!(are_we_quorate(&inputs).quorate);
    }

    #[test]
    fn atb_lowest_denies_partition_without_lowest_node() {
        let atb = AutoTieBreaker { mode: AtbMode::Lowest, node: None, list: vec![] };
        let members = set(&[3, 4]);
        let prev = set(&[1, 2, 3, 4]);
        let inputs = QuorateInputs {
            total_votes: 2,
            expected_votes: 4,
            quorum: 3,
            member_list: &members,
            previous_member_list: &prev,
            wait_for_all_armed: false,
            atb: Some(&atb),
            qdevice_master_wins_active: false,
        };
        assert!(!are_we_quorate(&inputs).quorate);
    }

    #[test]
    fn atb_lowest_denies_minority_partition_the_other_side_could_also_claim() {
        // 4 members dropping to 1: the 3-node side could equally claim the
        // tie, so ATB must not hand quorum to this lone lowest-id survivor.
        let atb = AutoTieBreaker { mode: AtbMode::Lowest, node: None, list: vec![] };
        let members = set(&[1]);
        let prev = set(&[1, 2, 3, 4]);
        let inputs = QuorateInputs {
            total_votes: 2,
            expected_votes: 4,
            quorum: 3,
            member_list: &members,
            previous_member_list: &prev,
            wait_for_all_armed: false,
            atb: Some(&atb),
            qdevice_master_wins_active: false,
        };
        assert!(!are_we_quorate(&inputs).quorate);
    }

    #[test]
    fn qdevice_master_wins_overrides_non_quorate() {
        let members = set(&[1]);
        let prev = set(&[1, 2]);
        let inputs = QuorateInputs {
            total_votes: 1,
            expected_votes: 2,
            quorum: 2,
            member_list: &members,
            previous_member_list: &prev,
            wait_for_all_armed: false,
            atb: None,
            qdevice_master_wins_active: true,
        };
        assert!(are_we_quorate(&inputs).quorate);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// `quorum` is never 0 and never exceeds `total_votes.max(highest_expected) + 1`,
        /// for any inputs a live cluster could produce.
        #[test]
        fn prop_quorum_is_bounded(
            total_votes in 0u32..10_000,
            highest_expected in 0u32..10_000,
            two_node in any::<bool>(),
            member_count in 0usize..10,
        ) {
            let q = calculate_quorum(total_votes, highest_expected, two_node, member_count);
            prop_assert!(q >= 1);
            prop_assert!(q <= total_votes.max(highest_expected) / 2 + 2);
        }

        /// Two-node collapse only ever applies at `member_count <= 2`; above
        /// that the formula is identical regardless of the `two_node` flag.
        #[test]
        fn prop_two_node_collapse_only_below_three_members(
            total_votes in 0u32..10_000,
            highest_expected in 0u32..10_000,
            member_count in 3usize..10,
        ) {
            let with_flag = calculate_quorum(total_votes, highest_expected, true, member_count);
            let without_flag = calculate_quorum(total_votes, highest_expected, false, member_count);
            prop_assert_eq!(with_flag, without_flag);
        }

        /// Raising `total_votes` (all else equal) never lowers the quorum
        /// threshold's own pass/fail direction on total_votes itself: a
        /// partition that was quorate stays quorate as it only gains votes.
        #[test]
        fn prop_quorum_formula_is_monotonic_in_total_votes(
            total_votes in 0u32..10_000,
            highest_expected in 0u32..10_000,
            member_count in 1usize..10,
            extra_votes in 0u32..100,
        ) {
            let q = calculate_quorum(total_votes, highest_expected, false, member_count);
            let q_more = calculate_quorum(total_votes + extra_votes, highest_expected, false, member_count);
            if total_votes >= q {
                prop_assert!(total_votes + extra_votes >= q_more);
            }
        }
    }
}
