use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Short-TTL cache that suppresses repeat processing of the same tag inside
/// the cooldown window. The check-then-stamp is atomic under one lock, so a
/// burst of identical reads arriving in the same instant admits exactly one.
pub struct TagDedup {
    cooldown: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl TagDedup {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true (and stamps the tag) if the tag has not been accepted
    /// within the cooldown window; false suppresses the read.
    pub fn should_process(&self, epc: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().expect("dedup lock poisoned");
        match seen.get(epc) {
            Some(last) if now.duration_since(*last) < self.cooldown => false,
            _ => {
                seen.insert(epc.to_string(), now);
                true
            }
        }
    }

    /// Drops entries older than the cooldown window. Purely a memory bound;
    /// expired entries never block reprocessing either way.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut seen = self.seen.lock().expect("dedup lock poisoned");
        let before = seen.len();
        seen.retain(|_, last| now.duration_since(*last) < self.cooldown);
        before - seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().expect("dedup lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
