//! Cluster configuration loading
//!
//! Seeds a `CmapStore` from a TOML snapshot at startup, mirroring how
//! corosync's `icmap` is populated from `corosync.conf` before
//! `votequorum_readconfig` ever runs (`original_source/exec/votequorum.c`).
//! The validation chain itself lives on `VotequorumConfig::validate` in
//! `votequorum::config` — this module only owns parsing and CMAP seeding.

use crate::cmap::{CmapStore, CmapValue};
use crate::error::{CoreError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::info;

/// `auto_tie_breaker` node selection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtbMode {
    Lowest,
    Highest,
    List,
}

/// `[quorum]` table of a cluster config snapshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuorumConfig {
    pub expected_votes: u32,
    pub two_node: bool,
    pub wait_for_all: bool,
    pub last_man_standing: bool,
    pub last_man_standing_window_ms: u32,
    pub auto_tie_breaker: Option<AtbMode>,
    pub auto_tie_breaker_node: Option<u32>,
    pub auto_tie_breaker_list: Vec<u32>,
    pub allow_downscale: bool,
    pub qdevice_enabled: bool,
    pub qdevice_votes: Option<u32>,
    pub qdevice_name: Option<String>,
    pub qdevice_timeout_ms: u32,
    pub qdevice_sync_timeout_ms: u32,
}

impl Default for QuorumConfig {
    fn default() -> Self {
        QuorumConfig {
            expected_votes: 0,
            two_node: false,
            wait_for_all: false,
            last_man_standing: false,
            last_man_standing_window_ms: 10_000,
            auto_tie_breaker: None,
            auto_tie_breaker_node: None,
            auto_tie_breaker_list: Vec::new(),
            allow_downscale: false,
            qdevice_enabled: false,
            qdevice_votes: None,
            qdevice_name: None,
            qdevice_timeout_ms: 10_000,
            qdevice_sync_timeout_ms: 30_000,
        }
    }
}

/// One `[[nodelist.node]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub nodeid: u32,
    #[serde(default = "default_votes")]
    pub votes: u32,
}

fn default_votes() -> u32 {
    1
}

/// A full cluster configuration snapshot.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ClusterConfig {
    #[serde(default)]
    pub quorum: QuorumConfig,
    #[serde(default)]
    pub nodelist: NodeList,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NodeList {
    #[serde(default)]
    pub node: Vec<NodeConfig>,
}

impl ClusterConfig {
    /// Parse a cluster configuration from a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| CoreError::InvalidParam(format!("config: {e}")))
    }

    /// Seed a `CmapStore` with this configuration's `quorum.*` and
    /// `nodelist.*` keys, the way `corosync.conf` populates `icmap`.
    pub fn seed_cmap(&self, cmap: &CmapStore) {
        cmap.set_internal(
            "quorum.expected_votes",
            CmapValue::U32(self.quorum.expected_votes),
        )
        .expect("valid key");
        cmap.set_internal("quorum.two_node", CmapValue::U8(self.quorum.two_node as u8))
            .expect("valid key");
        cmap.set_internal(
            "quorum.wait_for_all",
            CmapValue::U8(self.quorum.wait_for_all as u8),
        )
        .expect("valid key");
        cmap.set_internal(
            "quorum.last_man_standing",
            CmapValue::U8(self.quorum.last_man_standing as u8),
        )
        .expect("valid key");
        cmap.set_internal(
            "quorum.last_man_standing_window",
            CmapValue::U32(self.quorum.last_man_standing_window_ms),
        )
        .expect("valid key");
        cmap.set_internal(
            "quorum.allow_downscale",
            CmapValue::U8(self.quorum.allow_downscale as u8),
        )
        .expect("valid key");
        if self.quorum.qdevice_enabled {
            cmap.set_internal("quorum.device.model", CmapValue::String("net".into()))
                .expect("valid key");
        }
        for node in &self.nodelist.node {
            let prefix = format!("nodelist.node.{}", node.nodeid);
            cmap.set_internal(&format!("{prefix}.nodeid"), CmapValue::U32(node.nodeid))
                .expect("valid key");
            cmap.set_internal(&format!("{prefix}.votes"), CmapValue::U32(node.votes))
                .expect("valid key");
        }
        info!(
            nodes = self.nodelist.node.len(),
            expected_votes = self.quorum.expected_votes,
            "seeded cmap from cluster config"
        );
    }

    /// Per-node configured vote counts, keyed by node id.
    pub fn node_votes(&self) -> BTreeMap<u32, u32> {
        self.nodelist
            .node
            .iter()
            .map(|n| (n.nodeid, n.votes))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_document() {
        let cfg = ClusterConfig::from_toml(
            r#"
            [quorum]
            expected_votes = 3
            two_node = false

            [[nodelist.node]]
            nodeid = 1
            votes = 1

            [[nodelist.node]]
            nodeid = 2
            votes = 1
            "#,
        )
        .unwrap();
        assert_eq!(cfg.quorum.expected_votes, 3);
        assert_eq!(cfg.nodelist.node.len(), 2);
        assert_eq!(cfg.quorum.last_man_standing_window_ms, 10_000);
    }

    #[test]
    fn seed_cmap_populates_expected_keys() {
        let cfg = ClusterConfig::from_toml(
            r#"
            [quorum]
            expected_votes = 2
            two_node = true

            [[nodelist.node]]
            nodeid = 1
            "#,
        )
        .unwrap();
        let cmap = CmapStore::new();
        cfg.seed_cmap(&cmap);
        assert_eq!(
            cmap.get("quorum.expected_votes"),
            Some(CmapValue::U32(2))
        );
        assert_eq!(cmap.get("nodelist.node.1.votes"), Some(CmapValue::U32(1)));
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(ClusterConfig::from_toml("not = [valid").is_err());
    }
}
