pub mod chain;
pub mod config;
pub mod error;
pub mod record;

pub use chain::{ChainFile, ChainRoute, ChainRouter};
pub use config::{AppConfig, CliOverrides, DbConfig};
pub use error::{GatewayError, StoreError};
pub use record::{ApiKeyRecord, Identity, UsageCounter};
