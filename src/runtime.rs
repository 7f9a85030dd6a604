//! Optional async host shell
//!
//! The core's engines are deliberately synchronous (spec §5: single-
//! threaded cooperative event loop). This module is the one place
//! `tokio` actually runs anything: a small ticking task that calls
//! `Context::pump_event` on an interval so timers and scheduled-work
//! fire without an embedder having to drive the loop by hand. Grounded
//! on the only async modules in the teacher crate (`gossip::hierarchical`,
//! `gossip::protocol`), which likewise wrap a synchronous core in a thin
//! tokio task rather than making the core itself `async`.

use crate::context::Context;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Drives `Context::pump_event` on a fixed tick, entirely optional:
/// nothing about the core requires it, and tests drive timers directly.
pub struct Runtime {
    handle: JoinHandle<()>,
}

impl Runtime {
    /// Spawn the tick task on the current tokio runtime. `tick` is the
    /// polling granularity for timer/scheduled-work expiry.
    pub fn spawn(context: Arc<Context>, tick: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let start = Instant::now();
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                let now_ns = start.elapsed().as_nanos() as u64;
                context.pump_event(now_ns);
                debug!(now_ns, "runtime tick");
            }
        });
        Runtime { handle }
    }

    /// Stop the tick task. Any timers still pending simply never fire.
    pub fn shutdown(self) {
        self.handle.abort();
        warn!("runtime shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;

    #[tokio::test]
    async fn tick_task_pumps_without_panicking() {
        let cfg = ClusterConfig::from_toml(
            r#"
            [quorum]
            expected_votes = 1

            [[nodelist.node]]
            nodeid = 1
            "#,
        )
        .unwrap();
        let dir = std::env::temp_dir().join(format!("rq-runtime-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let context = Context::new_loopback(1, &cfg, &dir).unwrap();
        let runtime = Runtime::spawn(context, Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(20)).await;
        runtime.shutdown();
    }
}
