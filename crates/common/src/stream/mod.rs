//! Range reads over logical files
//!
//! [`StreamEngine::open_range`] resolves the manifest once, maps the requested byte range onto
//! the chunks that hold it and opens a [`StreamSession`]. The session prefetches a bounded
//! window of chunks concurrently and hands their decrypted bytes back strictly in file order.

mod chunk;
mod engine;
mod range;
mod session;

pub use engine::{EngineConfig, OpenStream, StreamEngine, DEFAULT_WINDOW};
pub use range::{ByteSpan, RangeHeader, RangeHeaderError};
pub use session::StreamSession;
