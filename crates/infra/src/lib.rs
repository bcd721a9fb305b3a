//! Infrastructure layer: entity store, configuration and the store-backed
//! authorization components.

pub mod access;
pub mod config;
pub mod store;

pub use access::AuthorizationGate;
pub use config::{ApiConfig, ConfigError, DatabaseConfig};
pub use store::{EntityStore, InMemoryEntityStore, PostgresEntityStore, StoreError};
