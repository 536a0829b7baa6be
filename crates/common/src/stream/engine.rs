use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::chunk::ChunkRead;
use super::range::ByteSpan;
use super::session::StreamSession;
use crate::error::StreamError;
use crate::fetch::{ChunkFetcher, ChunkSource, RetryConfig};
use crate::manifest::{FileId, LogicalFile, ManifestResolver};

/// Chunks fetched ahead of delivery by default
pub const DEFAULT_WINDOW: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prefetch window: chunks in flight or buffered ahead of delivery
    pub window: usize,
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            retry: RetryConfig::default(),
        }
    }
}

/// An opened read, with what a response needs to describe it
#[derive(Debug)]
pub struct OpenStream {
    pub session: StreamSession,
    pub span: ByteSpan,
    pub total_size: u64,
    pub filename: String,
    pub mime_type: Option<String>,
}

impl OpenStream {
    pub fn content_length(&self) -> u64 {
        self.span.len()
    }
}

/// Entry point for range reads over logical files
#[derive(Debug, Clone)]
pub struct StreamEngine {
    resolver: Arc<dyn ManifestResolver>,
    fetcher: ChunkFetcher,
    window: usize,
}

impl StreamEngine {
    pub fn new(
        resolver: Arc<dyn ManifestResolver>,
        source: Arc<dyn ChunkSource>,
        config: EngineConfig,
    ) -> Self {
        let fetcher = ChunkFetcher::new(source, resolver.clone(), config.retry);
        Self {
            resolver,
            fetcher,
            window: config.window.max(1),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Resolve and validate the manifest for `file_id`
    pub async fn resolve(&self, file_id: &FileId) -> Result<LogicalFile, StreamError> {
        let file = self.resolver.resolve(file_id).await?;
        if file.id != *file_id {
            return Err(StreamError::ManifestCorrupt {
                file_id: file_id.clone(),
                reason: format!("resolved manifest is for {}", file.id),
            });
        }
        file.validate()?;
        Ok(file)
    }

    /// Open `[from, to)` of a file, or `[from, end)` when `to` is omitted
    #[tracing::instrument(skip(self))]
    pub async fn open_range(
        &self,
        file_id: &FileId,
        from: u64,
        to: Option<u64>,
    ) -> Result<OpenStream, StreamError> {
        let file = self.resolve(file_id).await?;
        let span = ByteSpan::checked(from, to, file.total_size)?;
        Ok(self.open_resolved(&file, span))
    }

    /// Open the whole of a file. Unlike [`Self::open_range`] this accepts empty files.
    #[tracing::instrument(skip(self))]
    pub async fn open_file(&self, file_id: &FileId) -> Result<OpenStream, StreamError> {
        let file = self.resolve(file_id).await?;
        let span = ByteSpan::whole(file.total_size);
        Ok(self.open_resolved(&file, span))
    }

    /// Open `span` of an already resolved manifest. `span` must lie within the file.
    pub fn open_resolved(&self, file: &LogicalFile, span: ByteSpan) -> OpenStream {
        let reads = plan(file, span);
        tracing::info!(
            file_id = %file.id,
            span = %span,
            total_size = file.total_size,
            chunks = reads.len(),
            window = self.window,
            "opening stream session"
        );

        let session = StreamSession::new(
            file.id.clone(),
            span,
            reads,
            self.fetcher.clone(),
            self.window,
        );
        OpenStream {
            session,
            span,
            total_size: file.total_size,
            filename: file.name.clone(),
            mime_type: file.mime_type.clone(),
        }
    }
}

/// Chunk reads covering `span`, first chunk cut at the start offset and last at the end
fn plan(file: &LogicalFile, span: ByteSpan) -> Vec<ChunkRead> {
    if span.is_empty() {
        return Vec::new();
    }
    let layout = file.layout();
    let (Some(first), Some(last)) = (layout.locate(span.start), layout.locate(span.end - 1)) else {
        return Vec::new();
    };

    (first.index..=last.index)
        .map(|index| {
            let chunk = &file.chunks[index];
            let from = if index == first.index { first.offset } else { 0 };
            let to = if index == last.index {
                last.offset + 1
            } else {
                chunk.byte_length
            };
            ChunkRead {
                chunk: chunk.clone(),
                from,
                to,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::tests::chunk;

    fn file(lengths: &[u64]) -> LogicalFile {
        LogicalFile {
            id: FileId::new("f"),
            name: "f.bin".to_string(),
            mime_type: None,
            total_size: lengths.iter().sum(),
            chunks: lengths
                .iter()
                .enumerate()
                .map(|(i, len)| chunk(i, *len))
                .collect(),
        }
    }

    fn shape(reads: &[ChunkRead]) -> Vec<(usize, u64, u64)> {
        reads.iter().map(|r| (r.chunk.index, r.from, r.to)).collect()
    }

    #[test]
    fn test_plan_spanning_chunks() {
        let f = file(&[10, 10, 10]);
        let reads = plan(&f, ByteSpan { start: 5, end: 25 });
        assert_eq!(shape(&reads), vec![(0, 5, 10), (1, 0, 10), (2, 0, 5)]);
    }

    #[test]
    fn test_plan_inside_one_chunk() {
        let f = file(&[10, 10, 10]);
        let reads = plan(&f, ByteSpan { start: 12, end: 13 });
        assert_eq!(shape(&reads), vec![(1, 2, 3)]);
    }

    #[test]
    fn test_plan_stops_at_end_chunk() {
        let f = file(&[10, 10, 10]);
        let reads = plan(&f, ByteSpan { start: 0, end: 10 });
        assert_eq!(shape(&reads), vec![(0, 0, 10)]);
    }

    #[test]
    fn test_plan_empty_span() {
        let f = file(&[10]);
        assert!(plan(&f, ByteSpan { start: 4, end: 4 }).is_empty());
        assert!(plan(&file(&[]), ByteSpan::whole(0)).is_empty());
    }
}
