use std::time::Duration;

use async_trait::async_trait;
use relaygate_core::{ApiKeyRecord, DbConfig, StoreError};
use sqlx::mysql::MySqlPoolOptions;
use sqlx::{MySqlPool, Row};

use crate::metadata::MetadataStore;

/// `MetadataStore` implementation backed by a pooled MySQL connection,
/// grounded in the original service's `go-sql-driver/mysql` schema.
pub struct MySqlMetadataStore {
    pool: MySqlPool,
}

impl MySqlMetadataStore {
    pub async fn connect(config: &DbConfig) -> anyhow::Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .connect(&config.connection_url())
            .await?;
        Ok(MySqlMetadataStore { pool })
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        MySqlMetadataStore { pool }
    }
}

#[async_trait]
impl MetadataStore for MySqlMetadataStore {
    async fn lookup_key(&self, api_key: &str) -> Result<ApiKeyRecord, StoreError> {
        let row = sqlx::query("SELECT chain_name, org_name, `limit`, org_id FROM api_keys WHERE api_key = ?")
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        let row = row.ok_or(StoreError::NotFound)?;

        let limit: i64 = row.try_get("limit").map_err(|e| StoreError::Transient(e.to_string()))?;
        let org_id: i64 = row.try_get("org_id").map_err(|e| StoreError::Transient(e.to_string()))?;

        Ok(ApiKeyRecord {
            api_key: api_key.to_string(),
            chain: row.try_get("chain_name").map_err(|e| StoreError::Transient(e.to_string()))?,
            org: row.try_get("org_name").map_err(|e| StoreError::Transient(e.to_string()))?,
            org_id: org_id.to_string(),
            limit: limit.max(0) as u64,
        })
    }

    async fn chain_exists(&self, chain: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM chains WHERE name = ? LIMIT 1")
            .bind(chain)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(row.is_some())
    }
}

fn map_sqlx_err(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        other => StoreError::Transient(other.to_string()),
    }
}
