//! Service layer of the relaydrive gateway.
//!
//! Wires the streaming engine from `common` to the outside world:
//! - `catalog`: manifests stored as JSON documents on disk
//! - `host_api`: fresh attachment links from the host's message API
//! - `http`: the axum router serving `/files/:file_id` and health checks
//! - `config` and `state`: toml configuration and the shared handler state

pub mod catalog;
pub mod config;
pub mod host_api;
pub mod http;
pub mod state;
pub mod version;

pub use catalog::{CatalogError, CatalogResolver};
pub use config::{Config, ConfigError, HostApiConfig};
pub use host_api::{HostApi, HostApiError};
pub use state::{State as ServiceState, StateSetupError};
