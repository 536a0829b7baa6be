//! Shared test utilities for streaming integration tests
#![allow(dead_code)]

use common::crypto::CipherKind;
use common::error::StreamError;
use common::stream::{StreamEngine, StreamSession};
use common::testkit::{FileFixture, TestHarness};

/// Chunk lengths that put boundaries off the cipher block sizes
pub const ODD_CHUNKS: &[u64] = &[97, 128, 64, 333, 1];

/// Set up a harness with one file of `lengths` chunks, all encrypted with `kind`
pub fn setup_file(id: &str, lengths: &[u64], kind: CipherKind) -> (TestHarness, FileFixture) {
    let harness = TestHarness::new();
    let fixture = harness
        .fixture(id)
        .chunks(lengths, kind)
        .build(&harness.store, &harness.source)
        .unwrap();
    (harness, fixture)
}

/// Read a session to its end, returning what was delivered and the terminal error, if any
pub async fn drain(mut session: StreamSession) -> (Vec<u8>, Option<StreamError>) {
    let mut out = Vec::new();
    while let Some(item) = session.next_chunk().await {
        match item {
            Ok(bytes) => out.extend_from_slice(&bytes),
            Err(err) => {
                assert!(session.next_chunk().await.is_none(), "error was not terminal");
                return (out, Some(err));
            }
        }
    }
    (out, None)
}

/// Read `[from, to)` and expect it to succeed
pub async fn read_range(engine: &StreamEngine, fixture: &FileFixture, from: u64, to: Option<u64>) -> Vec<u8> {
    let open = engine.open_range(fixture.id(), from, to).await.unwrap();
    let expected_len = open.content_length();
    let (bytes, err) = drain(open.session).await;
    assert!(err.is_none(), "unexpected error: {:?}", err);
    assert_eq!(bytes.len() as u64, expected_len);
    bytes
}
