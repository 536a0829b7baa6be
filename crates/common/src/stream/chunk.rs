use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::crypto::ChunkDecryptor;
use crate::error::StreamError;
use crate::fetch::{ByteRange, ChunkFetcher};
use crate::manifest::{ChunkRef, FileId};

/// The part of one chunk a session delivers, in chunk-relative plaintext offsets
#[derive(Debug, Clone)]
pub(crate) struct ChunkRead {
    pub chunk: ChunkRef,
    pub from: u64,
    pub to: u64,
}

impl ChunkRead {
    pub fn len(&self) -> u64 {
        self.to - self.from
    }

    /// Stored bytes needed to produce `[from, to)`
    ///
    /// Counter modes map plaintext offsets one to one onto stored offsets. Authenticated modes
    ///  need the whole stored chunk, tag included.
    fn stored_range(&self, decryptor: &ChunkDecryptor) -> ByteRange {
        if self.chunk.cipher.is_seekable() {
            ByteRange::new(decryptor.fetch_offset(), self.to)
        } else {
            ByteRange::new(decryptor.fetch_offset(), self.chunk.stored_length())
        }
    }
}

/// Fetch and decrypt one chunk read into memory
pub(crate) async fn read_chunk(
    fetcher: ChunkFetcher,
    file_id: FileId,
    read: ChunkRead,
    cancel: CancellationToken,
) -> Result<Bytes, StreamError> {
    let index = read.chunk.index;
    let mut decryptor = ChunkDecryptor::open(&read.chunk.cipher, read.from)
        .map_err(|e| StreamError::from_decrypt(&file_id, index, e))?;
    let stored = read.stored_range(&decryptor);

    tracing::debug!(
        file_id = %file_id,
        chunk = index,
        cipher = ?read.chunk.cipher.kind,
        from = read.from,
        to = read.to,
        stored = %stored,
        "reading chunk"
    );

    let mut body = fetcher.fetch(read.chunk.clone(), stored, cancel);
    let mut plaintext = BytesMut::with_capacity(read.len() as usize);
    while let Some(ciphertext) = body.next().await {
        plaintext.extend_from_slice(&decryptor.update(ciphertext?));
    }

    let tail = decryptor.finalize().map_err(|e| {
        tracing::error!(file_id = %file_id, chunk = index, error = %e, "chunk failed to decrypt");
        StreamError::from_decrypt(&file_id, index, e)
    })?;
    plaintext.extend_from_slice(&tail);
    plaintext.truncate(read.len() as usize);

    Ok(plaintext.freeze())
}
