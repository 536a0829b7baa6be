//! Chunk key material
//!
//! Every chunk in a manifest carries its own `Secret` and IV. There is no process-wide key:
//! a `ChunkRef` is a self-contained decryption capability, so compromising or rotating one
//! chunk's key never touches any other chunk.

use std::fmt;
use std::ops::Deref;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Size of a chunk key in bytes (256 bits). Both AES-256 and ChaCha20 take 32 byte keys.
pub const SECRET_SIZE: usize = 32;

/// Errors that can occur when building key material
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("invalid secret size, expected {expected}, got {actual}")]
    InvalidSize { expected: usize, actual: usize },
    #[error("invalid base64 key material: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("failed to generate random bytes: {0}")]
    Random(String),
}

/// A 256-bit symmetric key for one chunk
///
/// Serialized as standard base64, which is how the manifest store keeps keys.
/// `Debug` never prints the key bytes.
#[derive(PartialEq, Eq, Clone)]
pub struct Secret([u8; SECRET_SIZE]);

impl Default for Secret {
    fn default() -> Self {
        Secret([0; SECRET_SIZE])
    }
}

impl Deref for Secret {
    type Target = [u8; SECRET_SIZE];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<[u8; SECRET_SIZE]> for Secret {
    fn from(bytes: [u8; SECRET_SIZE]) -> Self {
        Secret(bytes)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

impl Secret {
    /// Generate a new random secret using a cryptographically secure RNG
    pub fn generate() -> Result<Self, SecretError> {
        let mut buff = [0; SECRET_SIZE];
        getrandom::getrandom(&mut buff).map_err(|e| SecretError::Random(e.to_string()))?;
        Ok(Self(buff))
    }

    /// Create a secret from a byte slice
    ///
    /// # Errors
    ///
    /// Returns an error if the slice length is not exactly `SECRET_SIZE` bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, SecretError> {
        if data.len() != SECRET_SIZE {
            return Err(SecretError::InvalidSize {
                expected: SECRET_SIZE,
                actual: data.len(),
            });
        }
        let mut buff = [0; SECRET_SIZE];
        buff.copy_from_slice(data);
        Ok(buff.into())
    }

    /// Decode a secret from standard base64
    pub fn from_base64(encoded: &str) -> Result<Self, SecretError> {
        let bytes = BASE64.decode(encoded)?;
        Self::from_slice(&bytes)
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Get a reference to the secret key bytes
    pub fn bytes(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Secret::from_base64(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Nonce / IV bytes for a chunk cipher
///
/// The required length depends on the cipher: 16 bytes for AES-CTR (the full initial counter
/// block), 12 bytes for ChaCha20 and the AEAD modes. Length is checked when a decryptor is
/// opened, not here.
#[derive(PartialEq, Eq, Clone, Default)]
pub struct Iv(Vec<u8>);

impl Iv {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Generate `len` random IV bytes
    pub fn generate(len: usize) -> Result<Self, SecretError> {
        let mut buff = vec![0; len];
        getrandom::getrandom(&mut buff).map_err(|e| SecretError::Random(e.to_string()))?;
        Ok(Self(buff))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Iv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Iv({} bytes)", self.0.len())
    }
}

impl Serialize for Iv {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Iv {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded)
            .map(Iv)
            .map_err(serde::de::Error::custom)
    }
}
