//! Chunk cryptography
//!
//! Every chunk of a logical file is encrypted independently and carries its own
//! [`CipherParams`]. Reading a chunk derives a fresh [`ChunkDecryptor`] from those params;
//! nothing about cipher state is global or shared between reads.
//!
//! # Modes
//!
//! - **Counter modes** (`aes_ctr`, `chacha20`): seekable. A read can start at any byte of a
//!   chunk without fetching or decrypting what comes before it.
//! - **Authenticated modes** (`chacha20_poly1305`, `aes_gcm`): not seekable. The whole chunk is
//!   fetched and its tag verified before any of its bytes are released.
//! - **Plain**: stored unencrypted, seekable.
//!
//! Whether a chunk is seekable is a capability of its pinned mode
//! ([`CipherParams::is_seekable`]) rather than something the reader assumes.

mod cipher;
mod decryptor;
mod secret;

pub use cipher::{
    CipherKind, CipherParams, AES_BLOCK_SIZE, AES_CTR_IV_SIZE, CHACHA20_BLOCK_SIZE, NONCE_SIZE,
    TAG_SIZE,
};
pub use decryptor::{ChunkDecryptor, DecryptError, SeekPoint};
pub use secret::{Iv, Secret, SecretError, SECRET_SIZE};
