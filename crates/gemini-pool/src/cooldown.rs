//! Per-key cooldown deadlines
//!
//! Keys that hit a quota error are parked until a deadline (the upstream
//! retry hint, or a fixed default). Expired entries are purged lazily on
//! lookup; there is no background sweeper.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Cooldown applied when the upstream gave no retry hint.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Deadline table keyed by credential value.
#[derive(Debug, Default)]
pub struct CooldownTable {
    entries: Mutex<HashMap<String, Instant>>,
}

impl CooldownTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a key until `duration` from now.
    pub async fn set(&self, key: &str, duration: Duration) {
        self.entries
            .lock()
            .await
            .insert(key.to_owned(), Instant::now() + duration);
    }

    /// Time left before the key may be retried. Expired entries are
    /// removed and report `None`.
    pub async fn remaining(&self, key: &str) -> Option<Duration> {
        let mut entries = self.entries.lock().await;
        let until = *entries.get(key)?;
        let now = Instant::now();
        if now >= until {
            entries.remove(key);
            return None;
        }
        Some(until - now)
    }

    pub async fn clear(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }
}
