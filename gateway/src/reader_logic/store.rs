use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Detection metadata captured when a pallet tag is first seen.
#[derive(Debug, Clone)]
pub struct PalletDetection {
    pub detected_at: Instant,
    pub rssi_dbm: f64,
    pub antenna_port: u16,
}

struct PendingEntry {
    detection: PalletDetection,
    resolved: bool,
}

/// TTL-keyed table of pallets waiting for an operator badge.
///
/// The `resolved` flag only ever transitions false -> true, through
/// [`PendingStore::claim`]. The resolver and the expiry sweeper both go
/// through that claim, so exactly one of them performs the side effects for
/// a given entry; the loser observes `None` and backs off. Entries are
/// removed once their outcome has been emitted, so the table holds pending
/// work only, never history.
pub struct PendingStore {
    window: Duration,
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingStore {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Inserts a fresh entry unless one already exists for this EPC.
    /// Returns true if the entry was inserted.
    pub fn insert_if_absent(&self, epc: &str, detection: PalletDetection) -> bool {
        let mut entries = self.entries.lock().expect("pending store lock poisoned");
        if entries.contains_key(epc) {
            return false;
        }
        entries.insert(
            epc.to_string(),
            PendingEntry {
                detection,
                resolved: false,
            },
        );
        true
    }

    /// EPCs of unresolved entries still inside the correlation window.
    pub fn unresolved_within_window(&self) -> Vec<String> {
        let now = Instant::now();
        let entries = self.entries.lock().expect("pending store lock poisoned");
        entries
            .iter()
            .filter(|(_, e)| !e.resolved && now.duration_since(e.detection.detected_at) < self.window)
            .map(|(epc, _)| epc.clone())
            .collect()
    }

    /// EPCs of unresolved entries whose correlation window has elapsed.
    pub fn expired_unresolved(&self) -> Vec<String> {
        let now = Instant::now();
        let entries = self.entries.lock().expect("pending store lock poisoned");
        entries
            .iter()
            .filter(|(_, e)| !e.resolved && now.duration_since(e.detection.detected_at) >= self.window)
            .map(|(epc, _)| epc.clone())
            .collect()
    }

    /// Atomic resolution claim: flips `resolved` false -> true and hands the
    /// detection metadata to the caller. Returns `None` if the entry is gone
    /// or some other path already claimed it.
    pub fn claim(&self, epc: &str) -> Option<PalletDetection> {
        let mut entries = self.entries.lock().expect("pending store lock poisoned");
        let entry = entries.get_mut(epc)?;
        if entry.resolved {
            return None;
        }
        entry.resolved = true;
        Some(entry.detection.clone())
    }

    /// Drops an entry after its outcome event has been emitted.
    pub fn remove(&self, epc: &str) {
        let mut entries = self.entries.lock().expect("pending store lock poisoned");
        entries.remove(epc);
    }

    /// Number of entries still awaiting resolution.
    pub fn pending_count(&self) -> usize {
        let entries = self.entries.lock().expect("pending store lock poisoned");
        entries.values().filter(|e| !e.resolved).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries
            .lock()
            .expect("pending store lock poisoned")
            .is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection() -> PalletDetection {
        PalletDetection {
            detected_at: Instant::now(),
            rssi_dbm: -50.0,
            antenna_port: 1,
        }
    }

    #[test]
    fn insert_is_idempotent_per_epc() {
        let store = PendingStore::new(Duration::from_secs(3));
        assert!(store.insert_if_absent("A1B2C3D4E5F60718", detection()));
        assert!(!store.insert_if_absent("A1B2C3D4E5F60718", detection()));
        assert_eq!(store.pending_count(), 1);
    }

    #[test]
    fn claim_succeeds_exactly_once() {
        let store = PendingStore::new(Duration::from_secs(3));
        store.insert_if_absent("A1B2C3D4E5F60718", detection());
        assert!(store.claim("A1B2C3D4E5F60718").is_some());
        assert!(store.claim("A1B2C3D4E5F60718").is_none());
        // A claimed entry no longer counts as pending and cannot be
        // resurrected by a second read.
        assert_eq!(store.pending_count(), 0);
        assert!(!store.insert_if_absent("A1B2C3D4E5F60718", detection()));
    }

    #[test]
    fn window_splits_candidates_from_expired() {
        let store = PendingStore::new(Duration::from_millis(30));
        store.insert_if_absent("A1B2C3D4E5F60718", detection());
        assert_eq!(store.unresolved_within_window().len(), 1);
        assert!(store.expired_unresolved().is_empty());

        std::thread::sleep(Duration::from_millis(40));
        assert!(store.unresolved_within_window().is_empty());
        assert_eq!(store.expired_unresolved(), vec!["A1B2C3D4E5F60718".to_string()]);
    }

    #[test]
    fn remove_after_emit_leaves_store_empty() {
        let store = PendingStore::new(Duration::from_secs(3));
        store.insert_if_absent("A1B2C3D4E5F60718", detection());
        store.claim("A1B2C3D4E5F60718");
        store.remove("A1B2C3D4E5F60718");
        assert!(store.is_empty());
    }
}
