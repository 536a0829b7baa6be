use async_trait::async_trait;

use super::{ChunkRef, FileId, Locator, LogicalFile};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    /// No manifest is stored under the id
    #[error("manifest not found: {0}")]
    NotFound(FileId),
    /// The stored manifest breaks an invariant
    ///  (lengths don't add up, chunks out of order, bad cipher params)
    #[error("manifest for {file_id} is corrupt: {reason}")]
    Corrupt { file_id: FileId, reason: String },
    /// The store itself failed
    #[error("manifest backend error: {0}")]
    Backend(String),
    /// A fresh locator could not be obtained for a chunk
    #[error("failed to refresh locator for chunk {index}: {reason}")]
    Refresh { index: usize, reason: String },
}

/// Source of manifests and fresh chunk locators
///
/// Implementations must hand out manifests that pass [`LogicalFile::validate`]; the engine
///  validates again before using one and treats a failure as [`ManifestError::Corrupt`].
#[async_trait]
pub trait ManifestResolver: Send + Sync + std::fmt::Debug + 'static {
    /// Look up the manifest for a file
    ///
    /// # Arguments
    /// * `file_id` - The file to resolve
    ///
    /// # Returns
    /// * `Ok(LogicalFile)` - The full chunk list
    /// * `Err(ManifestError::NotFound)` - Nothing stored under `file_id`
    async fn resolve(&self, file_id: &FileId) -> Result<LogicalFile, ManifestError>;

    /// Obtain a fresh locator for a chunk whose current one has expired.
    ///
    /// The chunk's identity (index, length, cipher params) is unchanged by a refresh; only
    ///  where its bytes live is.
    async fn refresh_locator(&self, chunk: &ChunkRef) -> Result<Locator, ManifestError>;
}
