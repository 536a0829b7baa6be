//! Streaming chunk decryption
//!
//! A [`ChunkDecryptor`] is the per-read cipher context for one chunk. It is opened at an
//! intra-chunk offset and then fed ciphertext in chunk order starting at [`ChunkDecryptor::fetch_offset`].
//!
//! Counter modes (AES-CTR, ChaCha20) are seekable: the keystream for any block is derived
//! straight from the counter, so a read starting at offset `o` sets the counter to
//! `base + o / block_size`, decrypts from that block boundary and drops `o % block_size`
//! bytes of keystream. Nothing before the containing block is fetched or decrypted.
//!
//! Authenticated modes (ChaCha20-Poly1305, AES-GCM) are not. The tag covers the whole chunk,
//! so the read always starts at byte 0, the chunk is buffered until the tag is verified, and
//! the prefix before `o` is dropped afterwards. Seeking into such a chunk costs a full chunk
//! download and decrypt; chunks that are likely seek targets (large video) should be stored
//! with a counter mode. Plaintext from an authenticated chunk is never released before its
//! tag verifies.

use aes::Aes256;
use aes_gcm::Aes256Gcm;
use bytes::{Bytes, BytesMut};
use chacha20::ChaCha20;
use chacha20poly1305::aead::generic_array::GenericArray;
use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;
use ctr::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};

use super::cipher::{CipherKind, CipherParams, AES_BLOCK_SIZE, CHACHA20_BLOCK_SIZE, TAG_SIZE};
use super::secret::Secret;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

#[derive(Debug, thiserror::Error)]
pub enum DecryptError {
    #[error("cipher {0:?} requires a key")]
    MissingKey(CipherKind),
    #[error("invalid IV length for {kind:?}, expected {expected}, got {actual}")]
    InvalidIvLength {
        kind: CipherKind,
        expected: usize,
        actual: usize,
    },
    #[error("keystream offsets are not supported for {0:?}")]
    UnexpectedKeystreamOffset(CipherKind),
    #[error("keystream position {0} is past the end of the cipher's counter space")]
    CounterOverflow(u64),
    #[error("authentication tag verification failed")]
    Integrity,
    #[error("encryption failed")]
    Encrypt,
    #[error("failed to generate key material: {0}")]
    Random(String),
}

/// Where a counter-mode read starts inside the keystream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekPoint {
    /// Blocks to add to the base counter
    pub block_index: u64,
    /// Keystream bytes to drop inside that block
    pub discard: usize,
}

impl SeekPoint {
    pub fn new(position: u64, block_size: usize) -> Self {
        let block_size = block_size as u64;
        Self {
            block_index: position / block_size,
            discard: (position % block_size) as usize,
        }
    }
}

enum State {
    Plain,
    AesCtr(Box<Aes256Ctr>),
    ChaCha20(Box<ChaCha20>),
    Sealed {
        params: CipherParams,
        buffer: BytesMut,
    },
}

/// Decrypting transform for one read of one chunk. Never shared between reads.
pub struct ChunkDecryptor {
    kind: CipherKind,
    offset: u64,
    state: State,
}

impl std::fmt::Debug for ChunkDecryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkDecryptor")
            .field("kind", &self.kind)
            .field("offset", &self.offset)
            .finish()
    }
}

impl ChunkDecryptor {
    /// Open a decryptor for a read starting `offset` bytes into the chunk's plaintext
    pub fn open(params: &CipherParams, offset: u64) -> Result<Self, DecryptError> {
        params.validate()?;
        let state = match params.kind {
            CipherKind::Plain => State::Plain,
            CipherKind::AesCtr | CipherKind::ChaCha20 => {
                let position = params
                    .keystream_offset
                    .checked_add(offset)
                    .ok_or(DecryptError::CounterOverflow(u64::MAX))?;
                keystream_at(params, position)?
            }
            CipherKind::ChaCha20Poly1305 | CipherKind::AesGcm => State::Sealed {
                params: params.clone(),
                buffer: BytesMut::new(),
            },
        };

        Ok(Self {
            kind: params.kind,
            offset,
            state,
        })
    }

    pub fn kind(&self) -> CipherKind {
        self.kind
    }

    /// Chunk-relative offset the ciphertext feed must start at
    pub fn fetch_offset(&self) -> u64 {
        if self.kind.is_seekable() {
            self.offset
        } else {
            0
        }
    }

    /// Feed the next ciphertext bytes, returning whatever plaintext can be released now.
    ///
    /// Authenticated modes buffer everything and release nothing until [`Self::finalize`].
    pub fn update(&mut self, ciphertext: Bytes) -> Bytes {
        match &mut self.state {
            State::Plain => ciphertext,
            State::AesCtr(cipher) => {
                let mut buf = BytesMut::from(ciphertext.as_ref());
                cipher.apply_keystream(&mut buf);
                buf.freeze()
            }
            State::ChaCha20(cipher) => {
                let mut buf = BytesMut::from(ciphertext.as_ref());
                cipher.apply_keystream(&mut buf);
                buf.freeze()
            }
            State::Sealed { buffer, .. } => {
                buffer.extend_from_slice(&ciphertext);
                Bytes::new()
            }
        }
    }

    /// Finish the read. For authenticated modes this verifies the tag and returns the
    /// plaintext from the requested offset on; a bad tag is [`DecryptError::Integrity`].
    pub fn finalize(self) -> Result<Bytes, DecryptError> {
        match self.state {
            State::Plain | State::AesCtr(_) | State::ChaCha20(_) => Ok(Bytes::new()),
            State::Sealed { params, mut buffer } => {
                if buffer.len() < TAG_SIZE {
                    return Err(DecryptError::Integrity);
                }
                let tag = buffer.split_off(buffer.len() - TAG_SIZE);
                open_sealed(&params, &mut buffer, &tag)?;

                let plaintext = buffer.freeze();
                let start = (self.offset as usize).min(plaintext.len());
                Ok(plaintext.slice(start..))
            }
        }
    }
}

fn key_of(params: &CipherParams) -> Result<&Secret, DecryptError> {
    params
        .key
        .as_ref()
        .ok_or(DecryptError::MissingKey(params.kind))
}

/// Build a counter-mode keystream positioned at `position`
fn keystream_at(params: &CipherParams, position: u64) -> Result<State, DecryptError> {
    let key = key_of(params)?;
    match params.kind {
        CipherKind::AesCtr => {
            let seek = SeekPoint::new(position, AES_BLOCK_SIZE);
            let mut base = [0u8; AES_BLOCK_SIZE];
            base.copy_from_slice(params.iv.bytes());
            let counter = u128::from_be_bytes(base).wrapping_add(seek.block_index as u128);

            let mut cipher = Aes256Ctr::new(
                GenericArray::from_slice(key.bytes()),
                GenericArray::from_slice(&counter.to_be_bytes()),
            );
            discard(&mut cipher, seek.discard);
            Ok(State::AesCtr(Box::new(cipher)))
        }
        CipherKind::ChaCha20 => {
            let seek = SeekPoint::new(position, CHACHA20_BLOCK_SIZE);
            let mut cipher = ChaCha20::new(
                GenericArray::from_slice(key.bytes()),
                GenericArray::from_slice(params.iv.bytes()),
            );
            let block_start = seek
                .block_index
                .checked_mul(CHACHA20_BLOCK_SIZE as u64)
                .ok_or(DecryptError::CounterOverflow(position))?;
            cipher
                .try_seek(block_start)
                .map_err(|_| DecryptError::CounterOverflow(position))?;
            discard(&mut cipher, seek.discard);
            Ok(State::ChaCha20(Box::new(cipher)))
        }
        kind => Err(DecryptError::UnexpectedKeystreamOffset(kind)),
    }
}

/// Advance a keystream by `len` bytes without producing output
fn discard<C: StreamCipher>(cipher: &mut C, len: usize) {
    if len > 0 {
        let mut scratch = vec![0u8; len];
        cipher.apply_keystream(&mut scratch);
    }
}

fn open_sealed(params: &CipherParams, buffer: &mut [u8], tag: &[u8]) -> Result<(), DecryptError> {
    let key = key_of(params)?;
    let nonce = GenericArray::from_slice(params.iv.bytes());
    let tag = GenericArray::from_slice(tag);
    let result = match params.kind {
        CipherKind::ChaCha20Poly1305 => ChaCha20Poly1305::new(GenericArray::from_slice(key.bytes()))
            .decrypt_in_place_detached(nonce, b"", buffer, tag),
        CipherKind::AesGcm => Aes256Gcm::new(GenericArray::from_slice(key.bytes()))
            .decrypt_in_place_detached(nonce, b"", buffer, tag),
        _ => return Err(DecryptError::Integrity),
    };
    result.map_err(|_| DecryptError::Integrity)
}

pub(crate) fn seal(params: &CipherParams, plaintext: &[u8]) -> Result<Vec<u8>, DecryptError> {
    match params.kind {
        CipherKind::Plain => Ok(plaintext.to_vec()),
        CipherKind::AesCtr | CipherKind::ChaCha20 => {
            let mut out = plaintext.to_vec();
            match keystream_at(params, params.keystream_offset)? {
                State::AesCtr(mut cipher) => cipher.apply_keystream(&mut out),
                State::ChaCha20(mut cipher) => cipher.apply_keystream(&mut out),
                _ => return Err(DecryptError::Encrypt),
            }
            Ok(out)
        }
        CipherKind::ChaCha20Poly1305 | CipherKind::AesGcm => {
            let key = key_of(params)?;
            let nonce = GenericArray::from_slice(params.iv.bytes());
            let mut out = plaintext.to_vec();
            let tag = match params.kind {
                CipherKind::ChaCha20Poly1305 => {
                    ChaCha20Poly1305::new(GenericArray::from_slice(key.bytes()))
                        .encrypt_in_place_detached(nonce, b"", &mut out)
                }
                _ => Aes256Gcm::new(GenericArray::from_slice(key.bytes()))
                    .encrypt_in_place_detached(nonce, b"", &mut out),
            }
            .map_err(|_| DecryptError::Encrypt)?;
            out.extend_from_slice(tag.as_slice());
            Ok(out)
        }
    }
}
