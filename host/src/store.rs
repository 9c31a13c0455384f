//! ==============================================================================
//! store.rs - observable reading store
//! ==============================================================================
//!
//! purpose:
//!     holds every reading recorded this session, in insertion order, and tells
//!     subscribers about each mutation. this is the single source of truth the
//!     dashboard, the exporter and the persistence layer read from.
//!
//! design:
//!     - one store instance is built in main.rs and handed to consumers. handles
//!       are cheap clones sharing the same state (same pattern as the runtime
//!       handle the web server and poll loop share).
//!     - listeners are invoked after the lock is released, so a listener may
//!       read the store without deadlocking.
//!     - restore() never fails loudly: a malformed snapshot is logged and the
//!       current state is kept.
//!
//! relationships:
//!     - written by: poll.rs (ticks), server.rs (clear/remove)
//!     - read by: server.rs, export.rs, persist.rs
//!
//! ==============================================================================

use crate::domain::{Reading, RecordedReading, Snapshot};

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// what changed, delivered to every subscriber after the mutation
#[derive(Clone, Debug, PartialEq)]
pub enum StoreEvent {
    Added { id: String, reading: Reading },
    Removed { id: String },
    Cleared,
    Restored { count: usize },
}

pub type Listener = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

#[derive(Default)]
struct Shared {
    readings: RwLock<Vec<(String, Reading)>>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener_id: AtomicU64,
}

impl Shared {
    fn notify(&self, event: StoreEvent) {
        // copy out so listeners run without holding the registry lock
        let listeners: Vec<Listener> = self.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener(&event);
        }
    }
}

/// ordered mapping reading-id -> reading
#[derive(Clone, Default)]
pub struct ReadingStore {
    shared: Arc<Shared>,
}

impl ReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// insert, or overwrite in place if the id is already present
    pub fn add_reading(&self, id: impl Into<String>, reading: Reading) {
        let id = id.into();
        {
            let mut readings = self.shared.readings.write();
            match readings.iter_mut().find(|(existing, _)| *existing == id) {
                Some(slot) => slot.1 = reading.clone(),
                None => readings.push((id.clone(), reading.clone())),
            }
        }
        self.shared.notify(StoreEvent::Added { id, reading });
    }

    /// delete the entry if present; no-op otherwise
    pub fn remove_reading(&self, id: &str) -> bool {
        let removed = {
            let mut readings = self.shared.readings.write();
            let before = readings.len();
            readings.retain(|(existing, _)| existing != id);
            readings.len() != before
        };
        if removed {
            self.shared.notify(StoreEvent::Removed { id: id.to_string() });
        }
        removed
    }

    pub fn clear_readings(&self) {
        self.shared.readings.write().clear();
        self.shared.notify(StoreEvent::Cleared);
    }

    pub fn get(&self, id: &str) -> Option<Reading> {
        self.shared
            .readings
            .read()
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, r)| r.clone())
    }

    pub fn len(&self) -> usize {
        self.shared.readings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// readings in display (insertion) order
    pub fn readings(&self) -> Vec<RecordedReading> {
        self.shared
            .readings
            .read()
            .iter()
            .map(|(id, reading)| RecordedReading { id: id.clone(), reading: reading.clone() })
            .collect()
    }

    /// deep copy sufficient to rebuild the store
    pub fn snapshot(&self) -> Snapshot {
        Snapshot { readings: self.shared.readings.read().clone() }
    }

    /// replace state wholesale with an already-validated snapshot
    pub fn apply_snapshot(&self, snapshot: Snapshot) {
        let count = snapshot.len();
        *self.shared.readings.write() = snapshot.readings;
        self.shared.notify(StoreEvent::Restored { count });
    }

    /// replace state from snapshot json text
    ///
    /// returns false (and logs) when the text is not a snapshot; the store is
    /// left exactly as it was. takes text rather than a parsed Value so object
    /// key order, and with it display order, survives.
    pub fn restore(&self, raw: &str) -> bool {
        match serde_json::from_str::<Snapshot>(raw) {
            Ok(snapshot) => {
                self.apply_snapshot(snapshot);
                true
            }
            Err(e) => {
                tracing::warn!("[STORE] ignoring malformed snapshot: {}", e);
                false
            }
        }
    }

    /// register a listener called after every mutation
    ///
    /// the listener stays registered until the returned subscription is
    /// dropped or `unsubscribe()` is called on it.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        let id = self.shared.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.shared.listeners.lock().push((id, Arc::new(listener)));
        Subscription { shared: Arc::downgrade(&self.shared), id }
    }
}

/// handle keeping a store listener registered
pub struct Subscription {
    shared: Weak<Shared>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn reading(v: f64) -> Reading {
        Reading::new(format!("t{}", v), v)
    }

    #[test]
    fn snapshot_len_counts_distinct_ids() {
        let store = ReadingStore::new();
        for i in 0..5 {
            store.add_reading(format!("id-{}", i), reading(i as f64));
        }
        assert_eq!(store.snapshot().len(), 5);
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn restore_of_snapshot_round_trips() {
        let store = ReadingStore::new();
        store.add_reading("z", reading(1.0));
        store.add_reading("x", reading(2.0));
        store.add_reading("y", reading(3.0));
        let snap = store.snapshot();

        let other = ReadingStore::new();
        other.add_reading("stale", reading(9.0));
        assert!(other.restore(&serde_json::to_string(&snap).unwrap()));
        assert_eq!(other.snapshot(), snap);
        assert!(other.get("stale").is_none());
    }

    #[test]
    fn clear_always_yields_empty_snapshot() {
        let store = ReadingStore::new();
        store.clear_readings();
        assert!(store.snapshot().is_empty());

        store.add_reading("a", reading(1.0));
        store.clear_readings();
        store.clear_readings();
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn overwrite_keeps_original_position() {
        let store = ReadingStore::new();
        store.add_reading("a", reading(1.0));
        store.add_reading("b", reading(2.0));
        store.add_reading("a", reading(3.0));

        let ids: Vec<_> = store.readings().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(store.get("a"), Some(reading(3.0)));
    }

    #[test]
    fn remove_missing_is_noop() {
        let store = ReadingStore::new();
        store.add_reading("a", reading(1.0));
        assert!(!store.remove_reading("nope"));
        assert!(store.remove_reading("a"));
        assert!(store.is_empty());
    }

    #[test]
    fn malformed_restore_keeps_state() {
        let store = ReadingStore::new();
        store.add_reading("a", reading(1.0));
        let before = store.snapshot();

        assert!(!store.restore(r#"{"readings": "nope"}"#));
        assert!(!store.restore("42"));
        assert!(!store.restore("{not json"));
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn subscribers_see_each_mutation_until_unsubscribed() {
        let store = ReadingStore::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let sub = store.subscribe(move |e| sink.lock().push(e.clone()));

        store.add_reading("a", reading(1.0));
        store.remove_reading("a");
        store.remove_reading("a");
        store.clear_readings();
        sub.unsubscribe();
        store.add_reading("b", reading(2.0));

        assert_eq!(
            *events.lock(),
            vec![
                StoreEvent::Added { id: "a".into(), reading: reading(1.0) },
                StoreEvent::Removed { id: "a".into() },
                StoreEvent::Cleared,
            ]
        );
    }

    #[test]
    fn listener_can_read_store() {
        let store = ReadingStore::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let (reader, seen2) = (store.clone(), seen.clone());
        let _sub = store.subscribe(move |_| {
            seen2.store(reader.len(), Ordering::SeqCst);
        });

        store.add_reading("a", reading(1.0));
        store.add_reading("b", reading(2.0));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
