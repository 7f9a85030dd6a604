//! ringquorum — cluster membership and quorum engine
//!
//! A corosync-style membership stack: SYNC drives new-ring barrier
//! transitions, VOTEQUORUM decides whether the current ring is
//! quorate, and CPG delivers totally-ordered multicast to named
//! process groups on top of the same rings. `Context` is the one
//! place all three, plus the shared Config Map and Timer/Scheduled-
//! Work core, are wired together.
//!
//! # Architecture
//!
//! - **Totem Adapter**: ring membership and group multicast, behind a
//!   trait so tests run over an in-process `LoopbackTotem`
//! - **SYNC Engine**: three-phase barrier (`SERVICELIST_BUILD` →
//!   `PROCESS` → `BARRIER`) that every other service rides on a ring change
//! - **Votequorum Engine**: quorum formula, two-node mode, wait-for-all,
//!   last-man-standing, auto-tie-breaker, qdevice
//! - **CPG Engine**: closed process groups, fragmented mcast, the
//!   downlist/joinlist membership exchange
//! - **Config Map**: in-memory key/value store backing both static
//!   cluster configuration and live runtime status
//! - **Timer/Scheduled-Work Core**: the one non-message event source in
//!   the cooperative loop

#![warn(missing_docs)]

pub mod cmap;
pub mod config;
pub mod context;
pub mod cpg;
pub mod dispatch;
pub mod error;
pub mod node;
pub mod quorum_facade;
pub mod runtime;
pub mod sync_engine;
pub mod timer;
pub mod totem;
pub mod votequorum;
pub mod wire;

pub use cmap::CmapStore;
pub use config::{ClusterConfig, QuorumConfig};
pub use context::Context;
pub use cpg::CpgEngine;
pub use dispatch::ServiceDispatcher;
pub use error::{CoreError, Result};
pub use node::{MembershipView, NodeId, RingId};
pub use quorum_facade::QuorumFacade;
pub use sync_engine::SyncEngine;
pub use timer::TimerCore;
pub use totem::{LoopbackTotem, TotemAdapter};
pub use votequorum::VotequorumEngine;

/// Crate version, exposed for diagnostics and the `runtime.votequorum.*` status keys.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_wires_up_a_single_node_cluster() {
        let cfg = ClusterConfig::from_toml(
            r#"
            [quorum]
            expected_votes = 1

            [[nodelist.node]]
            nodeid = 1
            "#,
        )
        .unwrap();
        let dir = std::env::temp_dir().join(format!("rq-lib-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let context = Context::new_loopback(1, &cfg, &dir).unwrap();
        assert!(context.votequorum.is_quorate());
    }
}
