//! End-to-end chunked transfers against the in-memory server.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ecfs_core::config::TransferConfig;
use ecfs_core::{EcfsError, Item, ItemKind};
use ecfs_crypto::legacy::{seal_raw_key, seal_salted};
use ecfs_crypto::Keyring;
use ecfs_storage::api::endpoint;
use ecfs_storage::{ApiClient, MemoryTransport};
use ecfs_sync::metrics::encode_text;
use ecfs_sync::{MetadataCache, TempStore, TransferEngine, TransferMetrics};
use prometheus_client::registry::Registry;
use proptest::prelude::*;
use tempfile::TempDir;

const MIB: u64 = 1024 * 1024;

struct Harness {
    dir: TempDir,
    server: Arc<MemoryTransport>,
    cache: MetadataCache,
    engine: TransferEngine,
}

fn harness(chunk_size: u64) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = Arc::new(MemoryTransport::new());
    let cache = MetadataCache::open(&dir.path().join("cache.sqlite3")).expect("cache");
    let transfer = TransferConfig {
        chunk_size,
        ..TransferConfig::default()
    };
    let engine = TransferEngine::new(
        ApiClient::new(server.clone()),
        cache.clone(),
        Arc::new(Keyring::from_keys(["old-master", "new-master"])),
        &transfer,
        TempStore::new(dir.path().join("tmp")).expect("temp"),
        dir.path().join("files"),
    );
    Harness {
        dir,
        server,
        cache,
        engine,
    }
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn write_file(dir: &Path, name: &str, data: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).expect("write test file");
    path
}

#[tokio::test]
async fn two_and_a_half_mib_is_three_chunks() {
    let h = harness(MIB);
    let data = patterned((2 * MIB + MIB / 2) as usize);
    let src = write_file(h.dir.path(), "report.pdf", &data);

    let up = h.engine.upload(&src, "root").await.unwrap();
    assert_eq!(up.item.chunk_count, 3);
    assert_eq!(up.item.size, data.len() as u64);
    assert_eq!(up.item.mime, "application/pdf");
    assert_eq!(h.server.chunk_puts().len(), 3);

    let finalize = h.server.calls_to(endpoint::UPLOAD_DONE);
    assert_eq!(finalize.len(), 1);
    let body = finalize[0].json();
    assert_eq!(body["chunks"], 3);
    assert_eq!(body["version"], 2);
    assert_eq!(body["uuid"], up.item.uuid.as_str());

    let down = h.engine.download(&up.item.uuid, None, None).await.unwrap();
    assert!(down.downloaded);
    assert_eq!(down.chunks, 3);
    assert_eq!(down.path, h.dir.path().join("files").join(&up.item.uuid).join("report.pdf"));
    assert_eq!(std::fs::read(&down.path).unwrap(), data);
}

#[tokio::test]
async fn failed_chunk_blocks_finalize() {
    let h = harness(MIB);
    let src = write_file(h.dir.path(), "big.bin", &patterned((2 * MIB + MIB / 2) as usize));
    h.server.fail_chunk_upload(2);

    match h.engine.upload(&src, "root").await {
        Err(EcfsError::PartialTransfer { failed_indices, .. }) => assert_eq!(failed_indices, vec![2]),
        other => panic!("expected PartialTransfer, got {other:?}"),
    }
    assert!(h.server.calls_to(endpoint::UPLOAD_DONE).is_empty());
    assert!(h.cache.children("root").await.unwrap().is_empty());
}

#[tokio::test]
async fn finalize_failure_reports_orphans() {
    let h = harness(1024);
    let src = write_file(h.dir.path(), "a.bin", &patterned(3000));
    h.server.fail_endpoint(endpoint::UPLOAD_DONE);

    match h.engine.upload(&src, "root").await {
        Err(EcfsError::OrphanedChunks { chunks, .. }) => assert_eq!(chunks, 3),
        other => panic!("expected OrphanedChunks, got {other:?}"),
    }
    assert_eq!(h.server.chunk_puts().len(), 3);
    assert!(h.cache.children("root").await.unwrap().is_empty());
}

#[tokio::test]
async fn reversed_completion_is_reassembled_in_order() {
    let h = harness(1024);
    let data = patterned(4 * 1024);
    let src = write_file(h.dir.path(), "ordered.bin", &data);
    let up = h.engine.upload(&src, "root").await.unwrap();
    assert_eq!(up.item.chunk_count, 4);

    for (index, millis) in [(0, 200), (1, 150), (2, 100), (3, 20)] {
        h.server.set_download_latency(index, Duration::from_millis(millis));
    }
    let dest = h.dir.path().join("out.bin");
    let down = h.engine.download(&up.item.uuid, Some(&dest), None).await.unwrap();
    assert_eq!(down.bytes, data.len() as u64);
    assert_eq!(std::fs::read(&dest).unwrap(), data);
}

#[tokio::test]
async fn concurrent_downloads_of_one_item_transfer_once() {
    let h = Arc::new(harness(1024));
    let data = patterned(3 * 1024);
    let src = write_file(h.dir.path(), "shared.bin", &data);
    let up = h.engine.upload(&src, "root").await.unwrap();
    h.server.set_download_latency(0, Duration::from_millis(100));

    let (a, b) = tokio::join!(
        h.engine.download(&up.item.uuid, None, None),
        h.engine.download(&up.item.uuid, None, None)
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.path, b.path);
    assert!(a.downloaded ^ b.downloaded, "exactly one call transfers");
    assert_eq!(h.server.chunk_gets(), 3);
    assert_eq!(std::fs::read(&a.path).unwrap(), data);
}

#[tokio::test]
async fn failed_download_chunk_leaves_nothing_behind() {
    let h = harness(1024);
    let src = write_file(h.dir.path(), "x.bin", &patterned(4 * 1024));
    let up = h.engine.upload(&src, "root").await.unwrap();
    h.server.fail_chunk_download(1);

    let dest = h.dir.path().join("x.out");
    match h.engine.download(&up.item.uuid, Some(&dest), None).await {
        Err(EcfsError::PartialTransfer { failed_indices, uuid }) => {
            assert_eq!(failed_indices, vec![1]);
            assert_eq!(uuid, up.item.uuid);
        }
        other => panic!("expected PartialTransfer, got {other:?}"),
    }
    assert!(!dest.exists());
    assert_eq!(std::fs::read_dir(h.dir.path().join("tmp")).unwrap().count(), 0);
}

#[tokio::test]
async fn capped_download_does_not_shadow_local_copy() {
    let h = harness(MIB);
    let data = patterned((2 * MIB + MIB / 2) as usize);
    let src = write_file(h.dir.path(), "movie.bin", &data);
    let up = h.engine.upload(&src, "root").await.unwrap();
    let local = h.dir.path().join("files").join(&up.item.uuid).join("movie.bin");

    let head = h.engine.download(&up.item.uuid, None, Some(1)).await.unwrap();
    assert!(head.downloaded);
    assert_eq!(head.chunks, 1);
    assert_ne!(head.path, local);
    assert_eq!(std::fs::read(&head.path).unwrap(), &data[..MIB as usize]);
    assert!(!local.exists());

    let full = h.engine.download(&up.item.uuid, None, None).await.unwrap();
    assert!(full.downloaded);
    assert_eq!(full.path, local);
    assert_eq!(std::fs::read(&full.path).unwrap(), data);

    // A cap at or above the chunk count is a full download.
    let again = h.engine.download(&up.item.uuid, None, Some(10)).await.unwrap();
    assert!(!again.downloaded);
    assert_eq!(again.path, local);
}

#[tokio::test]
async fn legacy_chunks_decrypt() {
    let h = harness(MIB);
    let key = "0123456789abcdef0123456789abcdef";
    h.server
        .put_object("legacy", 0, seal_salted(b"first half, ", key.as_bytes(), *b"saltsalt"))
        .await
        .unwrap();
    h.server
        .put_object("legacy", 1, seal_raw_key(b"second half", key).unwrap())
        .await
        .unwrap();
    h.cache
        .upsert_item(&Item {
            uuid: "legacy".into(),
            parent: "root".into(),
            name: "old.txt".into(),
            kind: ItemKind::File,
            mime: "text/plain".into(),
            size: 23,
            created_at: 0,
            modified_at: 0,
            file_key: key.into(),
            chunk_count: 2,
            region: "r".into(),
            bucket: "b".into(),
            version: 1,
        })
        .await
        .unwrap();

    let down = h.engine.download("legacy", None, None).await.unwrap();
    assert_eq!(std::fs::read(&down.path).unwrap(), b"first half, second half");
}

#[tokio::test]
async fn metrics_track_chunks_and_bytes() {
    let mut registry = Registry::default();
    let metrics = TransferMetrics::new(&mut registry);
    let Harness {
        dir, server, cache, ..
    } = harness(1024);
    let engine = TransferEngine::new(
        ApiClient::new(server.clone()),
        cache,
        Arc::new(Keyring::from_keys(["m"])),
        &TransferConfig {
            chunk_size: 1024,
            ..TransferConfig::default()
        },
        TempStore::new(dir.path().join("tmp2")).unwrap(),
        dir.path().join("files2"),
    )
    .with_metrics(metrics);

    let src = write_file(dir.path(), "m.bin", &patterned(2500));
    let up = engine.upload(&src, "root").await.unwrap();
    engine.download(&up.item.uuid, None, None).await.unwrap();

    let text = encode_text(&registry).unwrap();
    assert!(text.contains("ecfs_chunks_uploaded_total 3"));
    assert!(text.contains("ecfs_chunks_downloaded_total 3"));
    assert!(text.contains(r#"ecfs_transfer_bytes_total{direction="download"} 2500"#));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn chunk_count_is_ceiling(len in 1usize..5000, chunk_size in 64u64..700) {
        tokio_test::block_on(async {
            let h = harness(chunk_size);
            let data = patterned(len);
            let src = write_file(h.dir.path(), "p.bin", &data);
            let up = h.engine.upload(&src, "root").await.unwrap();
            assert_eq!(up.item.chunk_count, (len as u64).div_ceil(chunk_size));

            let down = h.engine.download(&up.item.uuid, None, None).await.unwrap();
            assert_eq!(std::fs::read(&down.path).unwrap(), data);
        });
    }
}
