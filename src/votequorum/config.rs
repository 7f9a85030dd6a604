//! Votequorum startup configuration validation
//!
//! Transcribed from `original_source/exec/votequorum.c`'s
//! `votequorum_readconfig()`, which rejects or silently adjusts a
//! handful of mutually incompatible option combinations before the
//! engine ever starts running. Spec §8 samples three of these as
//! boundary cases; SPEC_FULL.md calls out that the full chain belongs
//! here since it's genuine startup validation logic, not a feature.

use crate::config::{AtbMode, QuorumConfig};
use tracing::warn;

/// A configuration rejected at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("two_node is incompatible with auto_tie_breaker")]
    TwoNodeWithAtb,
    #[error("last_man_standing with auto_tie_breaker requires wait_for_all on an odd-sized cluster")]
    LmsWithAtbRequiresWfa,
    #[error("qdevice is incompatible with two_node")]
    QdeviceWithTwoNode,
    #[error("qdevice_votes must be specified when the cluster has an even total vote count")]
    QdeviceVotesRequired,
}

/// The validated, possibly-adjusted effective configuration.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub two_node: bool,
    pub wait_for_all: bool,
    pub last_man_standing: bool,
    pub auto_tie_breaker: Option<AtbMode>,
    pub allow_downscale: bool,
    pub qdevice_enabled: bool,
}

/// Validate (and, where the original does, silently adjust) a raw
/// `QuorumConfig` against a known total static vote count, returning
/// the effective settings the engine should actually run with.
pub fn validate(cfg: &QuorumConfig, static_total_votes: u32, cluster_size_is_odd: bool) -> Result<EffectiveConfig, ConfigError> {
    let mut wait_for_all = cfg.wait_for_all;
    let mut auto_tie_breaker = cfg.auto_tie_breaker;
    let two_node = cfg.two_node;

    // two_node auto-enables wait_for_all.
    if two_node {
        wait_for_all = true;
    }

    if two_node && auto_tie_breaker.is_some() {
        return Err(ConfigError::TwoNodeWithAtb);
    }

    if auto_tie_breaker.is_some() && cluster_size_is_odd && !wait_for_all {
        if cfg.last_man_standing {
            return Err(ConfigError::LmsWithAtbRequiresWfa);
        }
        warn!("auto_tie_breaker disabled: odd-sized cluster without wait_for_all");
        auto_tie_breaker = None;
    }

    let mut qdevice_enabled = cfg.qdevice_enabled;

    if qdevice_enabled && cfg.last_man_standing {
        warn!("qdevice disabled: incompatible with last_man_standing");
        qdevice_enabled = false;
    }
    if qdevice_enabled && cfg.allow_downscale {
        warn!("qdevice disabled: incompatible with allow_downscale");
        qdevice_enabled = false;
    }

    if qdevice_enabled {
        if two_node {
            return Err(ConfigError::QdeviceWithTwoNode);
        }
        if cfg.qdevice_votes.is_none() && static_total_votes % 2 == 0 {
            return Err(ConfigError::QdeviceVotesRequired);
        }
    }

    Ok(EffectiveConfig {
        two_node,
        wait_for_all,
        last_man_standing: cfg.last_man_standing,
        auto_tie_breaker,
        allow_downscale: cfg.allow_downscale,
        qdevice_enabled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> QuorumConfig {
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
    fn two_node_with_atb_is_rejected() {
        let mut cfg = base();
        cfg.two_node = true;
        cfg.auto_tie_breaker = Some(AtbMode::Lowest);
        assert_eq!(validate(&cfg, 2, false), Err(ConfigError::TwoNodeWithAtb));
    }

    #[test]
    fn atb_on_odd_cluster_without_wfa_is_disabled_not_rejected() {
        let mut cfg = base();
        cfg.auto_tie_breaker = Some(AtbMode::Lowest);
        let effective = validate(&cfg, 3, true).unwrap();
        assert_eq!(effective.auto_tie_breaker, None);
    }

    #[test]
    fn lms_with_atb_on_odd_cluster_without_wfa_is_fatal() {
        let mut cfg = base();
        cfg.auto_tie_breaker = Some(AtbMode::Lowest);
        cfg.last_man_standing = true;
        assert_eq!(
            validate(&cfg, 3, true),
            Err(ConfigError::LmsWithAtbRequiresWfa)
        );
    }

    #[test]
    fn qdevice_with_last_man_standing_disables_qdevice_not_startup() {
        let mut cfg = base();
        cfg.qdevice_enabled = true;
        cfg.last_man_standing = true;
        cfg.qdevice_votes = Some(1);
        let effective = validate(&cfg, 4, false).unwrap();
        assert!(!effective.qdevice_enabled);
    }

    #[test]
    fn qdevice_with_allow_downscale_disables_qdevice_not_startup() {
        let mut cfg = base();
        cfg.qdevice_enabled = true;
        cfg.allow_downscale = true;
        cfg.qdevice_votes = Some(1);
        let effective = validate(&cfg, 4, false).unwrap();
        assert!(!effective.qdevice_enabled);
    }

    #[test]
    fn qdevice_requires_explicit_votes_on_even_total() {
        let mut cfg = base();
        cfg.qdevice_enabled = true;
        assert_eq!(
            validate(&cfg, 4, false),
            Err(ConfigError::QdeviceVotesRequired)
        );
    }

    #[test]
    fn two_node_auto_enables_wait_for_all() {
        let mut cfg = base();
        cfg.two_node = true;
        let effective = validate(&cfg, 2, false).unwrap();
        assert!(effective.wait_for_all);
    }
}
