use std::time::{Duration, Instant};

use dashmap::DashMap;
use relaygate_core::ApiKeyRecord;

const TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// `api_key -> ApiKeyRecord` with an absolute TTL from insert time. Misses
/// are filled by the caller via `insert` after a store lookup; concurrent
/// misses for the same key may each perform a lookup, and the last insert
/// wins (records are immutable within a TTL window, so this is harmless).
#[derive(Debug, Default)]
pub struct AuthCache {
    entries: DashMap<String, (ApiKeyRecord, Instant)>,
}

impl AuthCache {
    pub fn new() -> Self {
        AuthCache::default()
    }

    /// Returns `None` on miss or on an expired entry (lazily evicted here).
    pub fn get(&self, api_key: &str) -> Option<ApiKeyRecord> {
        let expired = match self.entries.get(api_key) {
            Some(entry) => entry.1.elapsed() >= TTL,
            None => return None,
        };
        if expired {
            self.entries.remove(api_key);
            return None;
        }
        self.entries.get(api_key).map(|entry| entry.0.clone())
    }

    pub fn insert(&self, record: ApiKeyRecord) {
        self.entries.insert(record.api_key.clone(), (record, Instant::now()));
    }

    /// Purged only when the store reports the key as not found.
    pub fn evict(&self, api_key: &str) {
        self.entries.remove(api_key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
