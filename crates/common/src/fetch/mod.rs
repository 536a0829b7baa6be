//! Fetching chunk ciphertext from the upstream host
//!
//! A [`ChunkSource`] performs single requests. The [`ChunkFetcher`] layers the failure policy
//! on top of it: bounded retries with backoff for transient failures, one locator refresh for
//! links the host rejects, and resumption from the last received byte.

mod fetcher;
mod http;
mod retry;
mod source;

pub use fetcher::ChunkFetcher;
pub use http::{classify_status, HttpChunkSource};
pub use retry::RetryConfig;
pub use source::{ByteRange, ByteStream, ChunkSource, SourceError};
