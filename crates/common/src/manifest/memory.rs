use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::resolver::{ManifestError, ManifestResolver};
use super::{ChunkRef, FileId, Locator, LogicalFile};

/// In-memory manifest store
///
/// Fresh locators are registered per attachment id with [`Self::set_fresh_locator`]; a refresh
///  for an attachment with nothing registered hands back the chunk's current locator.
#[derive(Debug, Clone, Default)]
pub struct MemoryManifestStore {
    inner: Arc<RwLock<MemoryManifestStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryManifestStoreInner {
    /// file id -> manifest
    files: HashMap<FileId, LogicalFile>,
    /// attachment id -> locator handed out on refresh
    fresh: HashMap<String, Locator>,
    /// attachment id -> number of refreshes served
    refreshes: HashMap<String, usize>,
}

impl MemoryManifestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, file: LogicalFile) -> Result<(), ManifestError> {
        let mut inner = self.write()?;
        inner.files.insert(file.id.clone(), file);
        Ok(())
    }

    pub fn remove(&self, file_id: &FileId) -> Result<Option<LogicalFile>, ManifestError> {
        let mut inner = self.write()?;
        Ok(inner.files.remove(file_id))
    }

    /// Register the locator a refresh of `attachment_id` returns
    pub fn set_fresh_locator(
        &self,
        attachment_id: impl Into<String>,
        locator: Locator,
    ) -> Result<(), ManifestError> {
        let mut inner = self.write()?;
        inner.fresh.insert(attachment_id.into(), locator);
        Ok(())
    }

    /// Number of refreshes served for `attachment_id`
    pub fn refresh_count(&self, attachment_id: &str) -> usize {
        self.inner
            .read()
            .map(|inner| inner.refreshes.get(attachment_id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, MemoryManifestStoreInner>, ManifestError> {
        self.inner.read().map_err(|e| {
            ManifestError::Backend(format!("failed to acquire read lock: {}", e))
        })
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, MemoryManifestStoreInner>, ManifestError> {
        self.inner.write().map_err(|e| {
            ManifestError::Backend(format!("failed to acquire write lock: {}", e))
        })
    }
}

#[async_trait]
impl ManifestResolver for MemoryManifestStore {
    async fn resolve(&self, file_id: &FileId) -> Result<LogicalFile, ManifestError> {
        let inner = self.read()?;
        inner
            .files
            .get(file_id)
            .cloned()
            .ok_or_else(|| ManifestError::NotFound(file_id.clone()))
    }

    async fn refresh_locator(&self, chunk: &ChunkRef) -> Result<Locator, ManifestError> {
        let mut inner = self.write()?;
        let attachment_id = &chunk.attachment.attachment_id;
        *inner.refreshes.entry(attachment_id.clone()).or_default() += 1;

        Ok(inner
            .fresh
            .get(attachment_id)
            .cloned()
            .unwrap_or_else(|| chunk.locator.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::tests::chunk;

    fn file(id: &str) -> LogicalFile {
        LogicalFile {
            id: FileId::new(id),
            name: format!("{id}.bin"),
            mime_type: Some("application/octet-stream".to_string()),
            total_size: 8,
            chunks: vec![chunk(0, 8)],
        }
    }

    #[tokio::test]
    async fn test_resolve_inserted_manifest() {
        let store = MemoryManifestStore::new();
        store.insert(file("a")).unwrap();

        let resolved = store.resolve(&FileId::new("a")).await.unwrap();
        assert_eq!(resolved, file("a"));
    }

    #[tokio::test]
    async fn test_resolve_missing_is_not_found() {
        let store = MemoryManifestStore::new();
        let result = store.resolve(&FileId::new("missing")).await;
        assert_eq!(result, Err(ManifestError::NotFound(FileId::new("missing"))));
    }

    #[tokio::test]
    async fn test_refresh_prefers_registered_locator() {
        let store = MemoryManifestStore::new();
        let c = chunk(0, 8);

        let same = store.refresh_locator(&c).await.unwrap();
        assert_eq!(same, c.locator);

        let fresh: Locator = "https://cdn.example.com/fresh".parse().unwrap();
        store
            .set_fresh_locator(c.attachment.attachment_id.clone(), fresh.clone())
            .unwrap();
        assert_eq!(store.refresh_locator(&c).await.unwrap(), fresh);
        assert_eq!(store.refresh_count(&c.attachment.attachment_id), 2);
    }
}
