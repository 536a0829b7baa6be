use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::fetch::{ChunkSource, HttpChunkSource};
use common::stream::{EngineConfig, StreamEngine};

use super::catalog::CatalogResolver;
use super::config::Config;
use super::host_api::{HostApi, HostApiError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Main service state, shared by every request handler
#[derive(Debug, Clone)]
pub struct State {
    engine: StreamEngine,
    catalog: CatalogResolver,
}

impl State {
    pub fn from_config(config: &Config) -> Result<Self, StateSetupError> {
        // 1. Catalog of manifests
        if !config.catalog_dir.is_dir() {
            return Err(StateSetupError::CatalogMissing(config.catalog_dir.clone()));
        }
        tracing::info!(dir = %config.catalog_dir.display(), "using manifest catalog");

        // 2. Host API for link refresh, if we have credentials for it
        let host_api = match config.host_api.token {
            Some(_) => Some(HostApi::from_config(&config.host_api)?),
            None => {
                tracing::warn!("no host API token configured, expired attachment links will not be refreshed");
                None
            }
        };
        let catalog = CatalogResolver::new(&config.catalog_dir, host_api);

        // 3. Upstream chunk source. No overall timeout: bodies stream for as long as the reader wants
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(StateSetupError::HttpClient)?;
        let source = Arc::new(HttpChunkSource::new(client));

        Ok(Self::new(catalog, source, config.engine.clone()))
    }

    pub fn new(
        catalog: CatalogResolver,
        source: Arc<dyn ChunkSource>,
        engine_config: EngineConfig,
    ) -> Self {
        let engine = StreamEngine::new(Arc::new(catalog.clone()), source, engine_config);
        tracing::debug!(window = engine.window(), "stream engine ready");
        Self { engine, catalog }
    }

    pub fn engine(&self) -> &StreamEngine {
        &self.engine
    }

    pub fn catalog(&self) -> &CatalogResolver {
        &self.catalog
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateSetupError {
    #[error("catalog directory {0} does not exist")]
    CatalogMissing(PathBuf),
    #[error("host API setup failed: {0}")]
    HostApi(#[from] HostApiError),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_catalog_dir_is_rejected() {
        let config = Config {
            catalog_dir: PathBuf::from("/definitely/not/a/catalog"),
            ..Config::default()
        };
        let err = State::from_config(&config).unwrap_err();
        assert!(matches!(err, StateSetupError::CatalogMissing(_)));
    }

    #[test]
    fn test_from_config_without_token() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config {
            catalog_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        config.engine.window = 5;

        let state = State::from_config(&config).unwrap();
        assert_eq!(state.engine().window(), 5);
        assert!(!state.catalog().can_refresh());
    }

    #[test]
    fn test_bad_api_base_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config {
            catalog_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        config.host_api.token = Some("token".to_string());
        config.host_api.base_url = "not a url".to_string();

        let err = State::from_config(&config).unwrap_err();
        assert!(matches!(err, StateSetupError::HostApi(HostApiError::InvalidBaseUrl(_))));
    }
}
