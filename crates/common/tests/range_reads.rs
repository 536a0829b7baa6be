//! Integration tests for reading byte ranges back out of encrypted chunked files

mod common;

use ::common::crypto::CipherKind;
use ::common::error::StreamError;
use ::common::manifest::FileId;
use crate::common::{drain, read_range, setup_file, ODD_CHUNKS};

const ALL_KINDS: &[CipherKind] = &[
    CipherKind::Plain,
    CipherKind::AesCtr,
    CipherKind::ChaCha20,
    CipherKind::ChaCha20Poly1305,
    CipherKind::AesGcm,
];

#[tokio::test]
async fn test_ranges_match_plaintext_for_every_mode() {
    for kind in ALL_KINDS {
        let (harness, fixture) = setup_file("ranges", ODD_CHUNKS, *kind);
        let engine = harness.engine(3);
        let total = fixture.file.total_size;

        let ranges = [
            (0, None),
            (0, Some(1)),
            (1, Some(96)),
            (96, Some(98)),
            (97, Some(225)),
            (100, Some(600)),
            (289, Some(290)),
            (total - 1, None),
            (17, Some(total)),
        ];
        for (from, to) in ranges {
            let bytes = read_range(&engine, &fixture, from, to).await;
            assert_eq!(
                bytes,
                fixture.slice(from, to.unwrap_or(total)),
                "{:?} range {}..{:?}",
                kind,
                from,
                to
            );
        }
    }
}

#[tokio::test]
async fn test_mixed_modes_in_one_file() {
    let harness = ::common::testkit::TestHarness::new();
    let fixture = harness
        .fixture("mixed")
        .chunk(200, CipherKind::AesCtr)
        .chunk(150, CipherKind::AesGcm)
        .chunk(90, CipherKind::ChaCha20)
        .chunk(10, CipherKind::Plain)
        .chunk(70, CipherKind::ChaCha20Poly1305)
        .build(&harness.store, &harness.source)
        .unwrap();
    let engine = harness.engine(2);

    let bytes = read_range(&engine, &fixture, 123, Some(500)).await;
    assert_eq!(bytes, fixture.slice(123, 500));
}

#[tokio::test]
async fn test_file_wide_keystream_layout() {
    for kind in [CipherKind::AesCtr, CipherKind::ChaCha20] {
        let harness = ::common::testkit::TestHarness::new();
        let fixture = harness
            .fixture("file-wide")
            .chunks(&[100, 100, 57], kind)
            .file_wide(kind)
            .build(&harness.store, &harness.source)
            .unwrap();
        let engine = harness.engine(3);

        assert_eq!(fixture.chunk(2).cipher.keystream_offset, 200);
        let bytes = read_range(&engine, &fixture, 150, Some(230)).await;
        assert_eq!(bytes, fixture.slice(150, 230));
    }
}

#[tokio::test]
async fn test_same_range_twice_is_identical() {
    let (harness, fixture) = setup_file("twice", ODD_CHUNKS, CipherKind::ChaCha20);
    let engine = harness.engine(2);

    let first = read_range(&engine, &fixture, 50, Some(400)).await;
    let second = read_range(&engine, &fixture, 50, Some(400)).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_window_of_one_still_streams_everything() {
    let (harness, fixture) = setup_file("serial", ODD_CHUNKS, CipherKind::AesCtr);
    let engine = harness.engine(1);
    let bytes = read_range(&engine, &fixture, 0, None).await;
    assert_eq!(bytes, fixture.plaintext);
}

#[tokio::test]
async fn test_empty_range_fetches_nothing() {
    let (harness, fixture) = setup_file("empty-range", ODD_CHUNKS, CipherKind::AesCtr);
    let engine = harness.engine(3);

    let open = engine.open_range(fixture.id(), 42, Some(42)).await.unwrap();
    assert_eq!(open.content_length(), 0);
    let (bytes, err) = drain(open.session).await;
    assert!(bytes.is_empty());
    assert!(err.is_none());
    assert_eq!(harness.source.request_count(), 0);
}

#[tokio::test]
async fn test_out_of_bounds_ranges() {
    let (harness, fixture) = setup_file("oob", &[10, 10], CipherKind::AesCtr);
    let engine = harness.engine(3);

    for (from, to) in [(20, None), (25, Some(30)), (20, Some(20)), (5, Some(21)), (6, Some(5))] {
        let result = engine.open_range(fixture.id(), from, to).await;
        assert!(
            matches!(result, Err(StreamError::RangeOutOfBounds { total_size: 20, .. })),
            "range {}..{:?}",
            from,
            to
        );
    }
    assert_eq!(harness.source.request_count(), 0);
}

#[tokio::test]
async fn test_open_file_reads_everything_and_accepts_empty_files() {
    let (harness, fixture) = setup_file("whole", ODD_CHUNKS, CipherKind::AesGcm);
    let engine = harness.engine(3);

    let open = engine.open_file(fixture.id()).await.unwrap();
    assert_eq!(open.filename, "whole.bin");
    assert_eq!(open.total_size, fixture.file.total_size);
    let (bytes, err) = drain(open.session).await;
    assert!(err.is_none());
    assert_eq!(bytes, fixture.plaintext);

    let empty = harness
        .fixture("empty")
        .build(&harness.store, &harness.source)
        .unwrap();
    let open = engine.open_file(empty.id()).await.unwrap();
    assert_eq!(open.content_length(), 0);
    let (bytes, err) = drain(open.session).await;
    assert!(bytes.is_empty() && err.is_none());

    assert!(matches!(
        engine.open_range(empty.id(), 0, None).await,
        Err(StreamError::RangeOutOfBounds { .. })
    ));
}

#[tokio::test]
async fn test_unknown_file_is_not_found() {
    let (harness, _) = setup_file("known", &[10], CipherKind::Plain);
    let engine = harness.engine(3);

    let result = engine.open_range(&FileId::new("unknown"), 0, None).await;
    assert!(matches!(result, Err(StreamError::ManifestNotFound(id)) if id.as_str() == "unknown"));
}

#[tokio::test]
async fn test_corrupt_manifest_is_rejected_before_fetching() {
    let (harness, fixture) = setup_file("corrupt", &[10, 10], CipherKind::AesCtr);
    let mut broken = fixture.file.clone();
    broken.total_size = 25;
    harness.store.insert(broken).unwrap();

    let engine = harness.engine(3);
    let result = engine.open_range(fixture.id(), 0, None).await;
    assert!(matches!(result, Err(StreamError::ManifestCorrupt { .. })));
    assert_eq!(harness.source.request_count(), 0);
}
