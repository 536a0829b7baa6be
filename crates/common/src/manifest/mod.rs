//! Logical files and their chunk manifests
//!
//! A [`LogicalFile`] is the ordered list of [`ChunkRef`]s that reconstructs one file. Each chunk
//! is a separately encrypted attachment on the upstream host. Manifests come from a
//! [`ManifestResolver`], which also knows how to refresh a chunk's expiring [`Locator`].

mod locator;
mod memory;
mod resolver;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::crypto::CipherParams;

pub use locator::Locator;
pub use memory::MemoryManifestStore;
pub use resolver::{ManifestError, ManifestResolver};

/// Stable identifier of a logical file
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FileId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for FileId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Stable reference to the message attachment holding a chunk.
///
/// Unlike the [`Locator`], this never expires; it is what a locator refresh looks up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub channel_id: String,
    pub message_id: String,
    pub attachment_id: String,
}

/// One chunk of a logical file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    /// 0-based position in the file
    pub index: usize,
    /// Plaintext length of the chunk
    pub byte_length: u64,
    pub locator: Locator,
    pub attachment: AttachmentRef,
    pub cipher: CipherParams,
}

impl ChunkRef {
    /// Length of the stored attachment, including any authentication tag
    pub fn stored_length(&self) -> u64 {
        self.cipher.stored_len(self.byte_length)
    }
}

/// A file as an ordered list of chunks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalFile {
    pub id: FileId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub total_size: u64,
    pub chunks: Vec<ChunkRef>,
}

impl LogicalFile {
    /// Check the manifest invariants: chunks are indexed `0..n` in order, none is empty,
    ///  their lengths add up to `total_size`, and every chunk's cipher params fit its mode.
    pub fn validate(&self) -> Result<(), ManifestError> {
        let corrupt = |reason: String| ManifestError::Corrupt {
            file_id: self.id.clone(),
            reason,
        };

        let mut sum: u64 = 0;
        for (position, chunk) in self.chunks.iter().enumerate() {
            if chunk.index != position {
                return Err(corrupt(format!(
                    "chunk at position {} has index {}",
                    position, chunk.index
                )));
            }
            if chunk.byte_length == 0 {
                return Err(corrupt(format!("chunk {} is empty", chunk.index)));
            }
            chunk
                .cipher
                .validate()
                .map_err(|e| corrupt(format!("chunk {}: {}", chunk.index, e)))?;
            sum = sum
                .checked_add(chunk.byte_length)
                .ok_or_else(|| corrupt("chunk lengths overflow".to_string()))?;
        }

        if sum != self.total_size {
            return Err(corrupt(format!(
                "chunk lengths sum to {} but total size is {}",
                sum, self.total_size
            )));
        }
        Ok(())
    }

    pub fn layout(&self) -> ChunkLayout {
        ChunkLayout::new(self)
    }
}

/// Position of a file offset inside the chunk list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPosition {
    pub index: usize,
    pub offset: u64,
}

/// Prefix sums over a manifest's chunk lengths
#[derive(Debug, Clone)]
pub struct ChunkLayout {
    starts: Vec<u64>,
    total_size: u64,
}

impl ChunkLayout {
    fn new(file: &LogicalFile) -> Self {
        let mut starts = Vec::with_capacity(file.chunks.len());
        let mut next = 0;
        for chunk in &file.chunks {
            starts.push(next);
            next += chunk.byte_length;
        }
        Self {
            starts,
            total_size: next,
        }
    }

    /// File offset of chunk `index`'s first byte
    pub fn chunk_start(&self, index: usize) -> u64 {
        self.starts.get(index).copied().unwrap_or(self.total_size)
    }

    /// Chunk and intra-chunk offset holding file offset `offset`
    pub fn locate(&self, offset: u64) -> Option<ChunkPosition> {
        if offset >= self.total_size {
            return None;
        }
        // first chunk starting after `offset`, minus one
        let index = self.starts.partition_point(|start| *start <= offset) - 1;
        Some(ChunkPosition {
            index,
            offset: offset - self.starts[index],
        })
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }
}
