//! Quorum Façade
//!
//! A thin singleton indirection so that CPG, the dispatcher, and any
//! future alternative quorum provider can query/subscribe to "are we
//! quorate" without depending on the Votequorum engine directly.
//! Grounded on the teacher's own small-surface façade pattern in
//! `src/lib.rs` (one struct gating access to a swappable backend).

use parking_lot::Mutex;
use std::sync::Arc;

/// Something that can answer "is the local partition quorate".
pub trait QuorumProvider: Send + Sync {
    fn is_quorate(&self) -> bool;
}

/// `(quorate)` callback invoked on every quorum transition.
pub type QuorumCallback = Arc<dyn Fn(bool) + Send + Sync>;

struct Registration {
    callback: QuorumCallback,
}

/// Indirection between quorum consumers and whichever provider is installed.
///
/// `is_quorate` returns `true` when no provider has been installed —
/// the "no quorum service configured" default every caller can rely on.
pub struct QuorumFacade {
    provider: Mutex<Option<Arc<dyn QuorumProvider>>>,
    callbacks: Mutex<Vec<Registration>>,
}

impl Default for QuorumFacade {
    fn default() -> Self {
        Self::new()
    }
}

impl QuorumFacade {
    pub fn new() -> Self {
        QuorumFacade {
            provider: Mutex::new(None),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Install (or replace) the active quorum provider.
    pub fn initialize(&self, provider: Arc<dyn QuorumProvider>) {
        *self.provider.lock() = Some(provider);
    }

    /// Current quorate state; `true` if no provider is installed.
    pub fn is_quorate(&self) -> bool {
        match self.provider.lock().as_ref() {
            Some(p) => p.is_quorate(),
            None => true,
        }
    }

    /// Register a quorum-transition callback. Registering the same
    /// `Arc` pointer twice is idempotent.
    pub fn register_callback(&self, callback: QuorumCallback) {
        let mut callbacks = self.callbacks.lock();
        if callbacks
            .iter()
            .any(|r| Arc::ptr_eq(&r.callback, &callback))
        {
            return;
        }
        callbacks.push(Registration { callback });
    }

    /// Unregister a previously registered callback. Fails silently if
    /// it was never registered or already removed.
    pub fn unregister_callback(&self, callback: &QuorumCallback) {
        self.callbacks
            .lock()
            .retain(|r| !Arc::ptr_eq(&r.callback, callback));
    }

    /// Notify every registered callback of a quorum transition.
    pub fn notify(&self, quorate: bool) {
        for r in self.callbacks.lock().iter() {
            (r.callback)(quorate);
        }
    }
}
