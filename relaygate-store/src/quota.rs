use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use relaygate_core::{Identity, UsageCounter};
use tokio::sync::Mutex;

const WINDOW: ChronoDuration = ChronoDuration::hours(24);

/// Per-identity monotonic request counter with a rolling 24h window.
///
/// The lock registry is a `DashMap` whose `entry` API makes get-or-create
/// atomic; it grows monotonically and is never swept, matching the
/// original's `sync.Map`-backed mutex registry (an accepted, documented
/// leak for realistic key-space cardinality).
#[derive(Debug, Default)]
pub struct QuotaCounter {
    locks: DashMap<String, Arc<Mutex<UsageCounter>>>,
}

impl QuotaCounter {
    pub fn new() -> Self {
        QuotaCounter::default()
    }

    fn lock_for(&self, identity: &Identity) -> Arc<Mutex<UsageCounter>> {
        self.locks
            .entry(identity.as_str().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(UsageCounter::new(Utc::now()))))
            .clone()
    }

    /// `limit == 0` means unlimited. Returns `true` if admitted. The limit
    /// is checked against the count *before* this call's increment is
    /// applied, so a freshly created or freshly reset window (count = 0)
    /// always admits its first call regardless of `limit`.
    pub async fn increment(&self, identity: &Identity, limit: u64) -> bool {
        let lock = self.lock_for(identity);
        let mut counter = lock.lock().await;

        let now = Utc::now();
        if now - counter.window_start >= WINDOW {
            *counter = UsageCounter::new(now);
        }

        if limit > 0 && counter.count >= limit {
            return false;
        }

        counter.count += 1;
        true
    }

    pub fn registered_identities(&self) -> usize {
        self.locks.len()
    }
}
