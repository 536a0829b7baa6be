/**
 * Per-chunk cipher parameters and the streaming
 *  decryptors derived from them.
 *  - Seekable counter modes (AES-CTR, ChaCha20)
 *  - Authenticated modes (ChaCha20-Poly1305, AES-GCM)
 */
pub mod crypto;
/**
 * Terminal errors of a stream session.
 */
pub mod error;
/**
 * Fetching chunk ciphertext from the upstream host,
 *  with retries, locator refresh and resumption.
 */
pub mod fetch;
/**
 * Logical files as ordered lists of encrypted
 *  chunks, and the resolvers that hand them out.
 */
pub mod manifest;
/**
 * Range reads: prefetch window, reorder buffer
 *  and in-order delivery of decrypted bytes.
 */
pub mod stream;
pub mod testkit;

pub mod prelude {
    pub use crate::crypto::{CipherKind, CipherParams, ChunkDecryptor, Secret};
    pub use crate::error::StreamError;
    pub use crate::fetch::{ChunkFetcher, ChunkSource, HttpChunkSource, RetryConfig};
    pub use crate::manifest::{ChunkRef, FileId, Locator, LogicalFile, ManifestResolver};
    pub use crate::stream::{ByteSpan, EngineConfig, OpenStream, StreamEngine, StreamSession};
}
