//! In-process harness for streaming tests
//!
//! Provides a scripted [`MockChunkSource`] standing in for the attachment CDN and a
//! [`FixtureBuilder`] that encrypts plaintext into chunks and registers the manifest.
//!
//! # Example
//!
//! ```rust,ignore
//! use common::testkit::TestHarness;
//!
//! #[tokio::test]
//! async fn test_stream_range() -> anyhow::Result<()> {
//!     let harness = TestHarness::new();
//!     let fixture = harness
//!         .fixture("clip")
//!         .chunks(&[1000, 1000], CipherKind::AesCtr)
//!         .build(&harness.store, &harness.source)?;
//!
//!     let engine = harness.engine(2);
//!     let open = engine.open_range(fixture.id(), 10, Some(1500)).await?;
//!     Ok(())
//! }
//! ```

mod fixture;
mod source;

use std::sync::Arc;

pub use fixture::{pattern, rotate_locator, FileFixture, FixtureBuilder, FIXTURE_HOST};
pub use source::{Fault, MockChunkSource, Request};

use crate::fetch::RetryConfig;
use crate::manifest::MemoryManifestStore;
use crate::stream::{EngineConfig, StreamEngine};

/// Manifest store plus mock source, wired into engines on demand
#[derive(Debug, Clone, Default)]
pub struct TestHarness {
    pub store: MemoryManifestStore,
    pub source: MockChunkSource,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fixture(&self, id: impl Into<String>) -> FixtureBuilder {
        FixtureBuilder::new(id)
    }

    /// Engine with prefetch `window` and three immediate retries
    pub fn engine(&self, window: usize) -> StreamEngine {
        self.engine_with(EngineConfig {
            window,
            retry: RetryConfig::immediate(3),
        })
    }

    pub fn engine_with(&self, config: EngineConfig) -> StreamEngine {
        StreamEngine::new(
            Arc::new(self.store.clone()),
            Arc::new(self.source.clone()),
            config,
        )
    }
}
