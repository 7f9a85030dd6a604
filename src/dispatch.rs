//! Service Dispatcher
//!
//! Maps incoming ordered wire messages to a service engine's `exec`
//! handler by `(service_id, function_id)` packed in `WireHeader::id`,
//! converting the header's own endianness before dispatch and passing
//! the sender's byte order through so the engine can convert its own
//! decoded payload. Modeled on the teacher's `validator.rs`
//! registry-of-handlers pattern, swapped from "validator kind -> check
//! fn" to "service id -> engine".

use crate::node::NodeId;
use crate::wire::{Endianness, WireHeader};
use dashmap::DashMap;
use tracing::{error, warn};

/// A replicated message handler, addressed by `(service_id, function_id)`.
///
/// Handlers never fail outward (spec §7): a malformed payload is
/// logged and dropped by the handler itself rather than by the
/// dispatcher, so the dispatcher's own signature carries no `Result`.
pub trait ServiceEngine: Send + Sync {
    /// Stable id this engine is registered under.
    fn service_id(&self) -> u16;

    /// Handle one already header-stripped payload. `sender_order` is the
    /// byte order the sender stamped the ring message with; the engine
    /// decodes the payload into its own wire type and runs that type's
    /// `WireConvert::endian_convert` via `wire::convert_if_needed` before
    /// acting on it.
    fn exec(&self, function_id: u16, sender: NodeId, sender_order: Endianness, payload: &[u8]);
}

/// Routes incoming `(header, payload)` pairs to registered engines.
pub struct ServiceDispatcher {
    engines: DashMap<u16, std::sync::Arc<dyn ServiceEngine>>,
}

impl Default for ServiceDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceDispatcher {
    pub fn new() -> Self {
        ServiceDispatcher {
            engines: DashMap::new(),
        }
    }

    /// Register an engine under its own `service_id`.
    pub fn register(&self, engine: std::sync::Arc<dyn ServiceEngine>) {
        self.engines.insert(engine.service_id(), engine);
    }

    /// Dispatch one incoming frame. `header` is consumed by value so the
    /// endian-convert happens on a local copy, not shared state.
    pub fn dispatch(&self, mut header: WireHeader, sender: NodeId, sender_order: Endianness, payload: &[u8]) {
        crate::wire::convert_if_needed(&mut header, sender_order);
        let service_id = header.service_id();
        let function_id = header.function_id();
        match self.engines.get(&service_id) {
            Some(engine) => engine.exec(function_id, sender, sender_order, payload),
            None => warn!(service_id, function_id, "dispatch: unknown service id, dropping"),
        }
    }
}

impl crate::wire::WireConvert for WireHeader {
    fn endian_convert(&mut self) {
        WireHeader::endian_convert(self)
    }
}

/// Log-and-drop for a payload that failed to decode, the uniform
/// "replicated messages may not fail" response required by spec §7.
pub fn drop_malformed(service_id: u16, function_id: u16, reason: &str) {
    error!(service_id, function_id, reason, "dropping malformed replicated message");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingEngine {
        id: u16,
        count: Arc<AtomicUsize>,
    }

    impl ServiceEngine for CountingEngine {
        fn service_id(&self) -> u16 {
            self.id
        }
        fn exec(&self, _function_id: u16, _sender: NodeId, _sender_order: Endianness, _payload: &[u8]) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn dispatch_routes_to_matching_service_id() {
        let dispatcher = ServiceDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        dispatcher.register(Arc::new(CountingEngine { id: 2, count: count.clone() }));
        let header = WireHeader::new(2, 5, 8);
        dispatcher.dispatch(header, 1, Endianness::native(), &[]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_to_unknown_service_is_dropped_not_panicking() {
        let dispatcher = ServiceDispatcher::new();
        let header = WireHeader::new(99, 0, 8);
        dispatcher.dispatch(header, 1, Endianness::native(), &[]);
    }
}
