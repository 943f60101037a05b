pub mod auth_cache;
pub mod metadata;
pub mod mysql;
pub mod quota;

pub use auth_cache::AuthCache;
pub use metadata::{MetadataStore, MockMetadataStore};
pub use mysql::MySqlMetadataStore;
pub use quota::QuotaCounter;
