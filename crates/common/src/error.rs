use crate::crypto::DecryptError;
use crate::manifest::{FileId, ManifestError};

/// Terminal errors of a stream session
///
/// Transient network failures never show up here; the fetcher retries them and only reports
/// [`StreamError::ChunkUnavailable`] once its retry budget is spent. Every variant ends the
/// session it was raised in. Bytes delivered before the error are not retracted, so a caller
/// must treat a mid-stream error as fatal for that stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("file not found: {0}")]
    ManifestNotFound(FileId),
    #[error("manifest for {file_id} is corrupt: {reason}")]
    ManifestCorrupt { file_id: FileId, reason: String },
    #[error("manifest store unavailable: {0}")]
    ManifestUnavailable(String),
    #[error("chunk {index} unavailable: {reason}")]
    ChunkUnavailable { index: usize, reason: String },
    #[error("chunk {index} body malformed: expected {expected} bytes, received {received}")]
    ChunkTruncated {
        index: usize,
        expected: u64,
        received: u64,
    },
    #[error("chunk {index} failed integrity verification")]
    IntegrityFailure { index: usize },
    #[error("range {from}..{} out of bounds for file of {total_size} bytes", .to.map(|t| t.to_string()).unwrap_or_default())]
    RangeOutOfBounds {
        from: u64,
        to: Option<u64>,
        total_size: u64,
    },
    #[error("stream cancelled")]
    Cancelled,
}

impl StreamError {
    /// Map a cipher failure on chunk `index` of `file_id`
    pub fn from_decrypt(file_id: &FileId, index: usize, err: DecryptError) -> Self {
        match err {
            DecryptError::Integrity => Self::IntegrityFailure { index },
            other => Self::ManifestCorrupt {
                file_id: file_id.clone(),
                reason: format!("chunk {index}: {other}"),
            },
        }
    }

    /// Whether the failure was caused by the request rather than the stored data
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::RangeOutOfBounds { .. } | Self::ManifestNotFound(_))
    }
}

impl From<ManifestError> for StreamError {
    fn from(err: ManifestError) -> Self {
        match err {
            ManifestError::NotFound(id) => Self::ManifestNotFound(id),
            ManifestError::Corrupt { file_id, reason } => Self::ManifestCorrupt { file_id, reason },
            ManifestError::Backend(msg) => Self::ManifestUnavailable(msg),
            ManifestError::Refresh { index, reason } => Self::ChunkUnavailable { index, reason },
        }
    }
}
