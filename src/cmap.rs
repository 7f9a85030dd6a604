//! Config Map Tracker
//!
//! A process-wide typed key/value store keyed by `.`-separated path
//! strings, with prefix-scoped change-tracking subscriptions. Grounded
//! on the teacher's `state.rs` (`DashMap`-backed shared state guarded
//! by `parking_lot`) and on corosync's `icmap`: values carry an
//! explicit type tag rather than being stringly typed, and a key or
//! prefix can be marked read-only so that only internal callers may
//! still mutate it.

use crate::error::{CoreError, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// Minimum length of a key's full path string.
pub const CMAP_KEYNAME_MINLEN: usize = 3;
/// Maximum length of a key's full path string.
pub const CMAP_KEYNAME_MAXLEN: usize = 255;

/// A typed config-map value.
#[derive(Debug, Clone, PartialEq)]
pub enum CmapValue {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Binary(Vec<u8>),
}

impl CmapValue {
    fn is_int(&self) -> bool {
        matches!(
            self,
            CmapValue::I8(_)
                | CmapValue::U8(_)
                | CmapValue::I16(_)
                | CmapValue::U16(_)
                | CmapValue::I32(_)
                | CmapValue::U32(_)
                | CmapValue::I64(_)
                | CmapValue::U64(_)
        )
    }

    fn as_i64(&self) -> Option<i64> {
        match *self {
            CmapValue::I8(v) => Some(v as i64),
            CmapValue::U8(v) => Some(v as i64),
            CmapValue::I16(v) => Some(v as i64),
            CmapValue::U16(v) => Some(v as i64),
            CmapValue::I32(v) => Some(v as i64),
            CmapValue::U32(v) => Some(v as i64),
            CmapValue::I64(v) => Some(v),
            CmapValue::U64(v) => Some(v as i64),
            _ => None,
        }
    }

    /// Rebuild a value of the same integer variant from a new `i64`,
    /// used by `adjust_int` to keep the original type tag.
    fn with_i64(&self, v: i64) -> CmapValue {
        match *self {
            CmapValue::I8(_) => CmapValue::I8(v as i8),
            CmapValue::U8(_) => CmapValue::U8(v as u8),
            CmapValue::I16(_) => CmapValue::I16(v as i16),
            CmapValue::U16(_) => CmapValue::U16(v as u16),
            CmapValue::I32(_) => CmapValue::I32(v as i32),
            CmapValue::U32(_) => CmapValue::U32(v as u32),
            CmapValue::I64(_) => CmapValue::I64(v),
            CmapValue::U64(_) => CmapValue::U64(v as u64),
            ref other => other.clone(),
        }
    }
}

/// The kind of change a tracker subscription was notified for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEvent {
    Add,
    Modify,
    Delete,
}

/// Which event kinds, and whether the subscription is prefix-scoped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackFlags {
    pub add: bool,
    pub modify: bool,
    pub delete: bool,
    pub prefix: bool,
}

impl TrackFlags {
    /// Subscribe to every event kind.
    pub fn all() -> Self {
        TrackFlags {
            add: true,
            modify: true,
            delete: true,
            prefix: false,
        }
    }

    fn matches(&self, event: TrackEvent) -> bool {
        match event {
            TrackEvent::Add => self.add,
            TrackEvent::Modify => self.modify,
            TrackEvent::Delete => self.delete,
        }
    }
}

/// `(event, full_key_name, new_value, old_value)`.
pub type TrackCallback = Box<dyn Fn(TrackEvent, &str, Option<&CmapValue>, Option<&CmapValue>) + Send + Sync>;

/// Opaque handle returned by `track_add`, used to cancel a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackHandle(u64);

struct Subscription {
    key_or_prefix: String,
    flags: TrackFlags,
    callback: TrackCallback,
}

/// Process-wide typed key/value store with prefix-scoped subscriptions.
pub struct CmapStore {
    values: DashMap<String, CmapValue>,
    readonly_prefixes: DashMap<String, ()>,
    subscriptions: Mutex<Vec<(TrackHandle, Subscription)>>,
    next_track_id: AtomicU64,
}

impl Default for CmapStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CmapStore {
    /// Construct an empty store.
    pub fn new() -> Self {
        CmapStore {
            values: DashMap::new(),
            readonly_prefixes: DashMap::new(),
            subscriptions: Mutex::new(Vec::new()),
            next_track_id: AtomicU64::new(1),
        }
    }

    fn validate_key(key: &str) -> Result<()> {
        if key.len() < CMAP_KEYNAME_MINLEN || key.len() > CMAP_KEYNAME_MAXLEN {
            return Err(CoreError::InvalidParam(format!(
                "key {key} length out of bounds"
            )));
        }
        Ok(())
    }

    fn is_readonly(&self, key: &str) -> bool {
        self.readonly_prefixes
            .iter()
            .any(|e| key == e.key().as_str() || key.starts_with(e.key().as_str()))
    }

    /// Mark a key or prefix read-only for external (library-call) writers.
    pub fn protect(&self, key_or_prefix: &str) {
        self.readonly_prefixes.insert(key_or_prefix.to_string(), ());
    }

    /// Read a key's current value.
    pub fn get(&self, key: &str) -> Option<CmapValue> {
        self.values.get(key).map(|v| v.clone())
    }

    /// Write a key, bypassing read-only protection (internal callers only).
    pub fn set_internal(&self, key: &str, value: CmapValue) -> Result<()> {
        Self::validate_key(key)?;
        let old = self.values.get(key).map(|v| v.clone());
        self.values.insert(key.to_string(), value.clone());
        let event = if old.is_some() {
            TrackEvent::Modify
        } else {
            TrackEvent::Add
        };
        self.notify(event, key, Some(&value), old.as_ref());
        trace!(key, "cmap set_internal");
        Ok(())
    }

    /// Write a key through the external CMAP interface: fails with
    /// `Access` if the key or any covering prefix is marked read-only.
    pub fn set(&self, key: &str, value: CmapValue) -> Result<()> {
        if self.is_readonly(key) {
            return Err(CoreError::Access);
        }
        self.set_internal(key, value)
    }

    /// Delete a key, bypassing read-only protection.
    pub fn delete_internal(&self, key: &str) -> Result<()> {
        if let Some((_, old)) = self.values.remove(key) {
            self.notify(TrackEvent::Delete, key, None, Some(&old));
        }
        Ok(())
    }

    /// Delete a key through the external interface.
    pub fn delete(&self, key: &str) -> Result<()> {
        if self.is_readonly(key) {
            return Err(CoreError::Access);
        }
        self.delete_internal(key)
    }

    /// Atomically add `delta` to an integer key and return the new value.
    /// Materializes the old value for the change callback.
    pub fn adjust_int(&self, key: &str, delta: i64) -> Result<i64> {
        self.adjust_int_impl(key, delta, true)
    }

    /// Like `adjust_int`, but the change callback receives no old value
    /// (cheaper: skips a clone of the previous value).
    pub fn fast_adjust_int(&self, key: &str, delta: i64) -> Result<i64> {
        self.adjust_int_impl(key, delta, false)
    }

    fn adjust_int_impl(&self, key: &str, delta: i64, materialize_old: bool) -> Result<i64> {
        let mut entry = self
            .values
            .get_mut(key)
            .ok_or_else(|| CoreError::NotExist(key.to_string()))?;
        if !entry.is_int() {
            return Err(CoreError::InvalidParam(format!("{key} is not an integer")));
        }
        let old_value = entry.clone();
        let new_i64 = entry
            .as_i64()
            .expect("is_int checked above")
            .saturating_add(delta);
        let new_value = entry.with_i64(new_i64);
        *entry = new_value.clone();
        drop(entry);
        self.notify(
            TrackEvent::Modify,
            key,
            Some(&new_value),
            if materialize_old { Some(&old_value) } else { None },
        );
        Ok(new_i64)
    }

    /// Every key whose name starts with `prefix`.
    pub fn iter_prefix(&self, prefix: &str) -> Vec<(String, CmapValue)> {
        self.values
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Register a change-tracking subscription on a key or prefix.
    pub fn track_add(
        &self,
        key_or_prefix: &str,
        flags: TrackFlags,
        callback: TrackCallback,
    ) -> TrackHandle {
        let handle = TrackHandle(self.next_track_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.lock().push((
            handle,
            Subscription {
                key_or_prefix: key_or_prefix.to_string(),
                flags,
                callback,
            },
        ));
        debug!(key_or_prefix, "cmap track_add");
        handle
    }

    /// Cancel a change-tracking subscription.
    pub fn track_delete(&self, handle: TrackHandle) {
        self.subscriptions.lock().retain(|(h, _)| *h != handle);
    }

    fn notify(
        &self,
        event: TrackEvent,
        key: &str,
        new_value: Option<&CmapValue>,
        old_value: Option<&CmapValue>,
    ) {
        for (_, sub) in self.subscriptions.lock().iter() {
            if !sub.flags.matches(event) {
                continue;
            }
            let matches = if sub.flags.prefix {
                key.starts_with(&sub.key_or_prefix)
            } else {
                key == sub.key_or_prefix
            };
            if matches {
                (sub.callback)(event, key, new_value, old_value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn set_then_get_roundtrips() {
        let store = CmapStore::new();
        store.set("quorum.expected_votes", CmapValue::U32(3)).unwrap();
        assert_eq!(store.get("quorum.expected_votes"), Some(CmapValue::U32(3)));
    }

    #[test]
    fn readonly_prefix_rejects_external_write() {
        let store = CmapStore::new();
        store.set_internal("runtime.votequorum.ev_barrier", CmapValue::U32(1)).unwrap();
        store.protect("runtime.votequorum.");
        let err = store
            .set("runtime.votequorum.ev_barrier", CmapValue::U32(2))
            .unwrap_err();
        assert!(matches!(err, CoreError::Access));
        // internal callers still bypass the flag
        store
            .set_internal("runtime.votequorum.ev_barrier", CmapValue::U32(2))
            .unwrap();
        assert_eq!(
            store.get("runtime.votequorum.ev_barrier"),
            Some(CmapValue::U32(2))
        );
    }

    #[test]
    fn adjust_int_preserves_type_tag() {
        let store = CmapStore::new();
        store.set_internal("votequorum.votes", CmapValue::I32(1)).unwrap();
        let new_val = store.adjust_int("votequorum.votes", 2).unwrap();
        assert_eq!(new_val, 3);
        assert_eq!(store.get("votequorum.votes"), Some(CmapValue::I32(3)));
    }

    #[test]
    fn adjust_int_on_non_integer_fails() {
        let store = CmapStore::new();
        store
            .set_internal("cluster.name", CmapValue::String("ring0".into()))
            .unwrap();
        assert!(store.adjust_int("cluster.name", 1).is_err());
    }

    #[test]
    fn prefix_subscription_fires_for_every_key_under_it() {
        let store = CmapStore::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c2 = count.clone();
        store.track_add(
            "nodelist.node",
            TrackFlags {
                prefix: true,
                ..TrackFlags::all()
            },
            Box::new(move |_e, _k, _n, _o| {
                c2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        store.set("nodelist.node.1.nodeid", CmapValue::U32(1)).unwrap();
        store.set("nodelist.node.2.nodeid", CmapValue::U32(2)).unwrap();
        store.set("unrelated.key", CmapValue::U32(0)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn track_delete_stops_future_notifications() {
        let store = CmapStore::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c2 = count.clone();
        let handle = store.track_add(
            "foo.bar",
            TrackFlags::all(),
            Box::new(move |_e, _k, _n, _o| {
                c2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        store.set("foo.bar", CmapValue::U8(1)).unwrap();
        store.track_delete(handle);
        store.set("foo.bar", CmapValue::U8(2)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
