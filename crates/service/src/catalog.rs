use std::path::{Path, PathBuf};

use async_trait::async_trait;

use common::manifest::{ChunkRef, FileId, Locator, LogicalFile, ManifestError, ManifestResolver};

use crate::host_api::HostApi;

const MANIFEST_EXTENSION: &str = "json";

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("invalid file id: {0:?}")]
    InvalidId(String),
    #[error("file not found: {0}")]
    NotFound(FileId),
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("manifest for {file_id} is not valid json: {source}")]
    Parse {
        file_id: FileId,
        source: serde_json::Error,
    },
    #[error("failed to serialize manifest: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<CatalogError> for ManifestError {
    fn from(err: CatalogError) -> Self {
        match err {
            // an id that can't name a file can't have a manifest either
            CatalogError::InvalidId(id) => ManifestError::NotFound(FileId::new(id)),
            CatalogError::NotFound(id) => ManifestError::NotFound(id),
            CatalogError::Parse { file_id, source } => ManifestError::Corrupt {
                file_id,
                reason: source.to_string(),
            },
            other => ManifestError::Backend(other.to_string()),
        }
    }
}

/// Manifests stored as `<file_id>.json` documents in a directory
///
/// Expired attachment links are refreshed through the [`HostApi`] when one is configured.
#[derive(Debug, Clone)]
pub struct CatalogResolver {
    dir: PathBuf,
    host_api: Option<HostApi>,
}

impl CatalogResolver {
    pub fn new(dir: impl Into<PathBuf>, host_api: Option<HostApi>) -> Self {
        Self {
            dir: dir.into(),
            host_api,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn can_refresh(&self) -> bool {
        self.host_api.is_some()
    }

    fn manifest_path(&self, file_id: &FileId) -> Result<PathBuf, CatalogError> {
        let id = file_id.as_str();
        let valid = !id.is_empty()
            && !id.starts_with('.')
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(CatalogError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.{MANIFEST_EXTENSION}")))
    }

    /// Read the manifest for `file_id` without validating it
    pub async fn load(&self, file_id: &FileId) -> Result<LogicalFile, CatalogError> {
        let path = self.manifest_path(file_id)?;
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CatalogError::NotFound(file_id.clone()))
            }
            Err(source) => return Err(CatalogError::Io { path, source }),
        };

        serde_json::from_slice(&raw).map_err(|source| CatalogError::Parse {
            file_id: file_id.clone(),
            source,
        })
    }

    /// Write `file` into the catalog, replacing any manifest under the same id
    pub async fn store(&self, file: &LogicalFile) -> Result<(), CatalogError> {
        let path = self.manifest_path(&file.id)?;
        let raw = serde_json::to_vec_pretty(file)?;
        tokio::fs::write(&path, raw)
            .await
            .map_err(|source| CatalogError::Io { path, source })
    }

    /// Whether the catalog directory can be read
    pub async fn is_available(&self) -> bool {
        tokio::fs::metadata(&self.dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }
}

#[async_trait]
impl ManifestResolver for CatalogResolver {
    async fn resolve(&self, file_id: &FileId) -> Result<LogicalFile, ManifestError> {
        let file = self.load(file_id).await?;
        tracing::debug!(file_id = %file_id, chunks = file.chunks.len(), "manifest loaded");
        Ok(file)
    }

    async fn refresh_locator(&self, chunk: &ChunkRef) -> Result<Locator, ManifestError> {
        let Some(api) = &self.host_api else {
            return Err(ManifestError::Refresh {
                index: chunk.index,
                reason: "no host API configured".to_string(),
            });
        };

        let locator = api
            .attachment_locator(&chunk.attachment, Some(&chunk.locator))
            .await
            .map_err(|e| ManifestError::Refresh {
                index: chunk.index,
                reason: e.to_string(),
            })?;
        tracing::info!(
            index = chunk.index,
            attachment_id = %chunk.attachment.attachment_id,
            expires_at = ?locator.expires_at(),
            "attachment link refreshed"
        );
        Ok(locator)
    }
}
