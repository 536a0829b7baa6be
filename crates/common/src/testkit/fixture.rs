use anyhow::Result;
use chrono::{Duration, Utc};
use url::Url;

use super::source::MockChunkSource;
use crate::crypto::{CipherKind, CipherParams};
use crate::manifest::{AttachmentRef, ChunkRef, FileId, Locator, LogicalFile, MemoryManifestStore};

/// Host the fixture locators point at
pub const FIXTURE_HOST: &str = "https://cdn.relaydrive.test";

/// A stored file and the plaintext it must stream back as
#[derive(Debug, Clone)]
pub struct FileFixture {
    pub file: LogicalFile,
    pub plaintext: Vec<u8>,
}

impl FileFixture {
    pub fn id(&self) -> &FileId {
        &self.file.id
    }

    pub fn chunk(&self, index: usize) -> &ChunkRef {
        &self.file.chunks[index]
    }

    /// Plaintext of `[from, to)`
    pub fn slice(&self, from: u64, to: u64) -> &[u8] {
        &self.plaintext[from as usize..to as usize]
    }
}

/// Builds a file, encrypts its chunks and registers them with a store and a source
///
/// ```rust,ignore
/// let fixture = FixtureBuilder::new("movie")
///     .chunks(&[4096, 4096, 100], CipherKind::AesCtr)
///     .build(&store, &source)?;
/// ```
#[derive(Debug, Clone)]
pub struct FixtureBuilder {
    id: String,
    name: Option<String>,
    mime_type: Option<String>,
    chunks: Vec<(u64, CipherKind)>,
    plaintext: Option<Vec<u8>>,
    file_wide: Option<CipherKind>,
    expired_locators: bool,
}

impl FixtureBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            mime_type: None,
            chunks: Vec::new(),
            plaintext: None,
            file_wide: None,
            expired_locators: false,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn chunk(mut self, byte_length: u64, kind: CipherKind) -> Self {
        self.chunks.push((byte_length, kind));
        self
    }

    pub fn chunks(mut self, lengths: &[u64], kind: CipherKind) -> Self {
        self.chunks
            .extend(lengths.iter().map(|length| (*length, kind)));
        self
    }

    /// Use this plaintext instead of the generated pattern. Its length must match the chunks.
    pub fn plaintext(mut self, plaintext: Vec<u8>) -> Self {
        self.plaintext = Some(plaintext);
        self
    }

    /// Encrypt every chunk with one key and IV, each chunk starting at its file offset in the
    ///  keystream. Only counter modes can be laid out this way.
    pub fn file_wide(mut self, kind: CipherKind) -> Self {
        self.file_wide = Some(kind);
        self
    }

    /// Give every chunk a locator whose `ex` expiry has already passed
    pub fn expired_locators(mut self) -> Self {
        self.expired_locators = true;
        self
    }

    pub fn build(self, store: &MemoryManifestStore, source: &MockChunkSource) -> Result<FileFixture> {
        let total_size: u64 = self.chunks.iter().map(|(length, _)| *length).sum();
        let plaintext = match self.plaintext {
            Some(plaintext) => {
                anyhow::ensure!(
                    plaintext.len() as u64 == total_size,
                    "plaintext is {} bytes but chunks add up to {}",
                    plaintext.len(),
                    total_size
                );
                plaintext
            }
            None => pattern(total_size as usize),
        };

        let shared = match self.file_wide {
            Some(kind) => {
                anyhow::ensure!(kind.is_seekable(), "{:?} cannot be laid out file wide", kind);
                Some(CipherParams::generate(kind)?)
            }
            None => None,
        };

        let mut chunks = Vec::with_capacity(self.chunks.len());
        let mut start = 0u64;
        for (index, (length, kind)) in self.chunks.iter().enumerate() {
            let cipher = match &shared {
                Some(params) => params.clone().with_keystream_offset(start),
                None => CipherParams::generate(*kind)?,
            };

            let end = start + length;
            let stored = cipher.seal(&plaintext[start as usize..end as usize])?;

            let locator = locator(&self.id, index, self.expired_locators)?;
            source.put(&locator, stored);

            chunks.push(ChunkRef {
                index,
                byte_length: *length,
                locator,
                attachment: AttachmentRef {
                    channel_id: "fixtures".to_string(),
                    message_id: format!("{}-msg-{}", self.id, index),
                    attachment_id: format!("{}-att-{}", self.id, index),
                },
                cipher,
            });
            start = end;
        }

        let file = LogicalFile {
            id: FileId::new(self.id.clone()),
            name: self.name.unwrap_or_else(|| format!("{}.bin", self.id)),
            mime_type: self.mime_type,
            total_size,
            chunks,
        };
        file.validate()?;
        store.insert(file.clone())?;

        Ok(FileFixture { file, plaintext })
    }
}

/// Register a fresh, unexpired locator for a chunk with the store and copy its bytes over
pub fn rotate_locator(
    store: &MemoryManifestStore,
    source: &MockChunkSource,
    chunk: &ChunkRef,
    bytes: &[u8],
) -> Result<Locator> {
    let fresh: Locator = Url::parse(&format!(
        "{}/attachments/{}/{}/fresh",
        FIXTURE_HOST, chunk.attachment.channel_id, chunk.attachment.attachment_id
    ))?
    .into();
    source.put(&fresh, bytes.to_vec());
    store.set_fresh_locator(chunk.attachment.attachment_id.clone(), fresh.clone())?;
    Ok(fresh)
}

fn locator(file_id: &str, index: usize, expired: bool) -> Result<Locator> {
    let expiry = if expired {
        Utc::now() - Duration::hours(1)
    } else {
        Utc::now() + Duration::hours(24)
    };
    let url = Url::parse(&format!(
        "{}/attachments/fixtures/{}/{}?ex={:x}&hm=fixture",
        FIXTURE_HOST,
        file_id,
        index,
        expiry.timestamp()
    ))?;
    Ok(url.into())
}

/// Deterministic plaintext that differs at every offset of a small period
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + 7) % 251) as u8).collect()
}
