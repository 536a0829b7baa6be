use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::manifest::Locator;

/// Half-open byte range `[start, end)` of a stored chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// `Range` header value, inclusive end. `None` for an empty range.
    pub fn header_value(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        Some(format!("bytes={}-{}", self.start, self.end - 1))
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Connection failures, resets, 5xx, 408, 429
    #[error("transient upstream failure: {0}")]
    Transient(String),
    /// The locator was rejected (404, 403, 410); it needs a refresh
    #[error("locator rejected with status {0}")]
    Expired(u16),
    /// Any other non-success status
    #[error("upstream returned status {0}")]
    Status(u16),
    /// The response does not match what was asked for
    #[error("malformed upstream response: {0}")]
    Malformed(String),
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Incremental body of one fetch attempt
pub type ByteStream = BoxStream<'static, Result<Bytes, SourceError>>;

/// Where chunk ciphertext comes from
///
/// One call is one outbound request. Retries, refreshes and resumption live in
///  [`ChunkFetcher`](super::ChunkFetcher), not here.
#[async_trait]
pub trait ChunkSource: Send + Sync + fmt::Debug + 'static {
    /// Open the stored bytes `range` behind `locator`.
    ///
    /// The returned stream must yield exactly the bytes of `range` and then end. A shorter
    ///  stream is reported by the fetcher as truncated.
    async fn open(&self, locator: &Locator, range: ByteRange) -> Result<ByteStream, SourceError>;
}
