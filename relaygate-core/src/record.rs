use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authorization metadata for an api key, immutable within its cache lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub api_key: String,
    pub chain: String,
    pub org: String,
    pub org_id: String,
    pub limit: u64,
}

impl ApiKeyRecord {
    /// The synthetic record handed to public `/chain/<name>` callers.
    pub fn public(chain: impl Into<String>) -> Self {
        ApiKeyRecord {
            api_key: String::new(),
            chain: chain.into(),
            org: "public".to_string(),
            org_id: "0".to_string(),
            limit: 10_000,
        }
    }

    /// `limit == 0` means unlimited.
    pub fn is_unlimited(&self) -> bool {
        self.limit == 0
    }
}

/// Per-identity request counter for the rolling 24h quota window.
#[derive(Debug, Clone)]
pub struct UsageCounter {
    pub count: u64,
    pub window_start: DateTime<Utc>,
}

impl UsageCounter {
    /// A freshly opened window has admitted nothing yet — the caller
    /// increments after checking the limit, not before.
    pub fn new(now: DateTime<Utc>) -> Self {
        UsageCounter {
            count: 0,
            window_start: now,
        }
    }
}

/// The key under which a `UsageCounter` is tracked — an api key on the
/// private route, or `<ip>/<chain>` on the public route.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn keyed(api_key: &str) -> Self {
        Identity(api_key.to_string())
    }

    pub fn public(remote_ip: &str, chain: &str) -> Self {
        Identity(format!("{remote_ip}/{chain}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
