use serde::{Deserialize, Serialize};

use super::decryptor::{self, DecryptError};
use super::secret::{Iv, Secret};

/// Authentication tag length shared by both AEAD modes we read
pub const TAG_SIZE: usize = 16;
pub const AES_BLOCK_SIZE: usize = 16;
pub const CHACHA20_BLOCK_SIZE: usize = 64;
pub const AES_CTR_IV_SIZE: usize = 16;
pub const NONCE_SIZE: usize = 12;

/// Cipher mode pinned on every chunk of a manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CipherKind {
    /// Stored as-is
    Plain,
    /// AES-256 in counter mode, 16 byte IV holding the initial 128-bit big-endian counter block
    AesCtr,
    /// IETF ChaCha20, 12 byte nonce with a 32-bit block counter
    #[serde(rename = "chacha20")]
    ChaCha20,
    /// ChaCha20-Poly1305, stored as `ciphertext || tag`
    #[serde(rename = "chacha20_poly1305")]
    ChaCha20Poly1305,
    /// AES-256-GCM, stored as `ciphertext || tag`
    AesGcm,
}

impl CipherKind {
    /// Whether a read may start in the middle of a chunk without touching earlier bytes.
    pub fn is_seekable(self) -> bool {
        matches!(self, Self::Plain | Self::AesCtr | Self::ChaCha20)
    }

    pub fn is_authenticated(self) -> bool {
        matches!(self, Self::ChaCha20Poly1305 | Self::AesGcm)
    }

    /// Keystream block size for counter modes. Plain is byte addressable.
    pub fn block_size(self) -> usize {
        match self {
            Self::Plain => 1,
            Self::AesCtr => AES_BLOCK_SIZE,
            Self::ChaCha20 => CHACHA20_BLOCK_SIZE,
            Self::ChaCha20Poly1305 | Self::AesGcm => 1,
        }
    }

    pub fn iv_size(self) -> usize {
        match self {
            Self::Plain => 0,
            Self::AesCtr => AES_CTR_IV_SIZE,
            Self::ChaCha20 | Self::ChaCha20Poly1305 | Self::AesGcm => NONCE_SIZE,
        }
    }

    /// Bytes the stored attachment carries on top of the plaintext
    pub fn overhead(self) -> u64 {
        if self.is_authenticated() {
            TAG_SIZE as u64
        } else {
            0
        }
    }

    pub fn needs_key(self) -> bool {
        !matches!(self, Self::Plain)
    }
}

/// Per-chunk decryption capability
///
/// `keystream_offset` is the keystream position of the chunk's first byte. Chunks encrypted
/// with their own key and IV use 0. Files uploaded with a single key/IV for the whole file put
/// each chunk at its file offset, which keeps the keystream from ever being reused across
/// chunks. It is meaningless for authenticated modes and must be 0 there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherParams {
    pub kind: CipherKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Secret>,
    #[serde(default)]
    pub iv: Iv,
    #[serde(default)]
    pub keystream_offset: u64,
}

impl CipherParams {
    pub fn plain() -> Self {
        Self {
            kind: CipherKind::Plain,
            key: None,
            iv: Iv::default(),
            keystream_offset: 0,
        }
    }

    pub fn new(kind: CipherKind, key: Secret, iv: Iv) -> Self {
        Self {
            kind,
            key: Some(key),
            iv,
            keystream_offset: 0,
        }
    }

    /// Fresh random key and IV for `kind`
    pub fn generate(kind: CipherKind) -> Result<Self, DecryptError> {
        if !kind.needs_key() {
            return Ok(Self::plain());
        }
        let key = Secret::generate().map_err(|e| DecryptError::Random(e.to_string()))?;
        let iv = Iv::generate(kind.iv_size()).map_err(|e| DecryptError::Random(e.to_string()))?;
        Ok(Self::new(kind, key, iv))
    }

    pub fn with_keystream_offset(mut self, offset: u64) -> Self {
        self.keystream_offset = offset;
        self
    }

    pub fn is_seekable(&self) -> bool {
        self.kind.is_seekable()
    }

    /// Size of the stored attachment for a chunk holding `plaintext_len` bytes
    pub fn stored_len(&self, plaintext_len: u64) -> u64 {
        plaintext_len + self.kind.overhead()
    }

    /// Check that the key and IV fit the declared mode
    pub fn validate(&self) -> Result<(), DecryptError> {
        if self.kind.needs_key() && self.key.is_none() {
            return Err(DecryptError::MissingKey(self.kind));
        }
        if self.iv.len() != self.kind.iv_size() {
            return Err(DecryptError::InvalidIvLength {
                kind: self.kind,
                expected: self.kind.iv_size(),
                actual: self.iv.len(),
            });
        }
        if self.kind.is_authenticated() && self.keystream_offset != 0 {
            return Err(DecryptError::UnexpectedKeystreamOffset(self.kind));
        }
        Ok(())
    }

    /// Encrypt a whole chunk the way the uploader stores it.
    ///
    /// Only fixtures and tooling write chunks; the streaming path never calls this.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, DecryptError> {
        self.validate()?;
        decryptor::seal(self, plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_follow_mode() {
        assert!(CipherKind::AesCtr.is_seekable());
        assert!(CipherKind::ChaCha20.is_seekable());
        assert!(CipherKind::Plain.is_seekable());
        assert!(!CipherKind::AesGcm.is_seekable());
        assert!(!CipherKind::ChaCha20Poly1305.is_seekable());

        assert_eq!(CipherKind::AesGcm.overhead(), TAG_SIZE as u64);
        assert_eq!(CipherKind::AesCtr.overhead(), 0);
    }

    #[test]
    fn test_validate_rejects_wrong_iv() {
        let mut params = CipherParams::generate(CipherKind::AesCtr).unwrap();
        assert!(params.validate().is_ok());

        params.iv = Iv::new(vec![0u8; NONCE_SIZE]);
        assert!(matches!(
            params.validate(),
            Err(DecryptError::InvalidIvLength { expected: 16, actual: 12, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_missing_key() {
        let mut params = CipherParams::generate(CipherKind::ChaCha20).unwrap();
        params.key = None;
        assert!(matches!(params.validate(), Err(DecryptError::MissingKey(_))));
    }

    #[test]
    fn test_params_serde_shape() {
        let params = CipherParams::generate(CipherKind::ChaCha20Poly1305).unwrap();
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["kind"], "chacha20_poly1305");
        assert!(value["key"].is_string());

        let back: CipherParams = serde_json::from_value(value).unwrap();
        assert_eq!(back, params);
    }
}
