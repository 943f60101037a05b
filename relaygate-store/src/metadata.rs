use async_trait::async_trait;
use dashmap::DashMap;
use relaygate_core::{ApiKeyRecord, StoreError};

/// Lookup interface for api-key authorization metadata and chain existence.
/// Implementations must be safe for concurrent use; the dispatcher calls
/// this on every authorization-cache miss and every public-route request.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn lookup_key(&self, api_key: &str) -> Result<ApiKeyRecord, StoreError>;

    async fn chain_exists(&self, chain: &str) -> Result<bool, StoreError>;
}

/// In-memory substitute for `MySqlMetadataStore`, used throughout the test
/// suite so the dispatcher and caches are exercised against the trait
/// without a real database.
#[derive(Debug, Default)]
pub struct MockMetadataStore {
    keys: DashMap<String, ApiKeyRecord>,
    chains: DashMap<String, ()>,
}

impl MockMetadataStore {
    pub fn new() -> Self {
        MockMetadataStore::default()
    }

    pub fn with_key(self, record: ApiKeyRecord) -> Self {
        self.keys.insert(record.api_key.clone(), record);
        self
    }

    pub fn with_chain(self, chain: impl Into<String>) -> Self {
        self.chains.insert(chain.into(), ());
        self
    }
}

#[async_trait]
impl MetadataStore for MockMetadataStore {
    async fn lookup_key(&self, api_key: &str) -> Result<ApiKeyRecord, StoreError> {
        self.keys
            .get(api_key)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn chain_exists(&self, chain: &str) -> Result<bool, StoreError> {
        Ok(self.chains.contains_key(chain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_hit() {
        let rec = ApiKeyRecord {
            api_key: "k1".into(),
            chain: "ethereum".into(),
            org: "acme".into(),
            org_id: "1".into(),
            limit: 100,
        };
        let store = MockMetadataStore::new().with_key(rec.clone());
        let looked_up = store.lookup_key("k1").await.unwrap();
        assert_eq!(looked_up, rec);
    }

    #[tokio::test]
    async fn test_lookup_miss_is_not_found() {
        let store = MockMetadataStore::new();
        let err = store.lookup_key("unknown").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_chain_exists() {
        let store = MockMetadataStore::new().with_chain("ethereum");
        assert!(store.chain_exists("ethereum").await.unwrap());
        assert!(!store.chain_exists("bitcoin").await.unwrap());
    }
}
