//! Folder listing reconciliation: replace semantics, memoization, skipping.

use std::sync::Arc;

use ecfs_core::{FileMetadata, FolderMetadata, ItemKind};
use ecfs_crypto::{encrypt_file_metadata, encrypt_folder_metadata, Keyring};
use ecfs_storage::{ApiClient, DirContent, MemoryTransport, RemoteFile, RemoteFolder};
use ecfs_sync::{DirectorySync, MetadataCache, SyncReport};

fn keyring() -> Arc<Keyring> {
    Arc::new(Keyring::from_keys(["k0", "k1"]))
}

fn remote_file(uuid: &str, parent: &str, metadata: String) -> RemoteFile {
    RemoteFile {
        uuid: uuid.into(),
        metadata,
        rm: String::new(),
        timestamp: 1_700_000_000,
        chunks: 1,
        size: 42,
        bucket: "bucket".into(),
        region: "region".into(),
        parent: parent.into(),
        version: 2,
        favorited: 0,
    }
}

fn remote_folder(uuid: &str, parent: &str, name: String) -> RemoteFolder {
    RemoteFolder {
        uuid: uuid.into(),
        name,
        parent: parent.into(),
        color: None,
        timestamp: 1_700_000_000,
        favorited: 0,
    }
}

fn file_meta(name: &str) -> FileMetadata {
    FileMetadata {
        name: name.into(),
        size: Some(42),
        mime: Some("text/plain".into()),
        key: "k".repeat(32),
        last_modified: Some(1_600_000_000_000),
        hash: None,
    }
}

#[tokio::test]
async fn listing_replaces_children() {
    let server = Arc::new(MemoryTransport::new());
    let cache = MetadataCache::open_in_memory().unwrap();
    let keys = keyring();
    let sync = DirectorySync::new(ApiClient::new(server.clone()), cache.clone(), keys.clone());

    // Written under the older key: found by trial decryption.
    let older = Keyring::from_keys(["k0"]);
    let a = encrypt_file_metadata(&file_meta("a.txt"), &older).unwrap();
    let b = encrypt_file_metadata(&file_meta("b.txt"), &keys).unwrap();
    let docs = encrypt_folder_metadata(&FolderMetadata { name: "docs".into() }, &keys).unwrap();
    server.set_listing(
        "root",
        DirContent {
            uploads: vec![remote_file("fa", "root", a.clone()), remote_file("fb", "root", b)],
            folders: vec![remote_folder("d1", "root", docs)],
        },
    );

    let report = sync.sync_folder("root").await.unwrap();
    assert_eq!(report, SyncReport { files: 2, folders: 1, skipped: 0 });

    let children = cache.children("root").await.unwrap();
    let names: Vec<&str> = children.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["docs", "a.txt", "b.txt"]);
    let fa = cache.get_item("fa").await.unwrap().unwrap();
    assert_eq!(fa.kind, ItemKind::File);
    assert_eq!(fa.created_at, 1_700_000_000_000);
    assert_eq!(fa.modified_at, 1_600_000_000_000);
    assert_eq!(fa.file_key.len(), 32);

    // "b.txt" and "docs" were deleted remotely.
    server.set_listing(
        "root",
        DirContent {
            uploads: vec![remote_file("fa", "root", a)],
            folders: vec![],
        },
    );
    sync.sync_folder("root").await.unwrap();
    let children = cache.children("root").await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].uuid, "fa");

    // An empty listing empties the folder.
    server.set_listing("root", DirContent::default());
    sync.sync_folder("root").await.unwrap();
    assert!(cache.children("root").await.unwrap().is_empty());
}

#[tokio::test]
async fn decrypted_metadata_is_memoized_by_ciphertext() {
    let server = Arc::new(MemoryTransport::new());
    let cache = MetadataCache::open_in_memory().unwrap();
    let keys = keyring();
    let sync = DirectorySync::new(ApiClient::new(server.clone()), cache.clone(), keys.clone());

    let blob = encrypt_file_metadata(&file_meta("memo.txt"), &keys).unwrap();
    assert!(cache.memo_lookup_file(&blob).await.unwrap().is_none());

    server.set_listing(
        "root",
        DirContent {
            uploads: vec![remote_file("fm", "root", blob.clone())],
            folders: vec![],
        },
    );
    sync.sync_folder("root").await.unwrap();

    let memo = cache.memo_lookup_file(&blob).await.unwrap().unwrap();
    assert_eq!(memo.name, "memo.txt");

    // A sync with an empty keyring still resolves the unchanged entry.
    let keyless = DirectorySync::new(ApiClient::new(server.clone()), cache.clone(), Arc::new(Keyring::new()));
    let report = keyless.sync_folder("root").await.unwrap();
    assert_eq!(report.files, 1);
    assert_eq!(cache.get_item("fm").await.unwrap().unwrap().name, "memo.txt");
}

#[tokio::test]
async fn undecryptable_entries_are_skipped() {
    let server = Arc::new(MemoryTransport::new());
    let cache = MetadataCache::open_in_memory().unwrap();
    let keys = keyring();
    let sync = DirectorySync::new(ApiClient::new(server.clone()), cache.clone(), keys.clone());

    let foreign = encrypt_file_metadata(&file_meta("theirs.txt"), &Keyring::from_keys(["other"])).unwrap();
    let ok = encrypt_file_metadata(&file_meta("mine.txt"), &keys).unwrap();
    server.set_listing(
        "root",
        DirContent {
            uploads: vec![
                remote_file("f1", "root", foreign),
                remote_file("f2", "root", ok),
                remote_file("f3", "root", "not-an-envelope".into()),
            ],
            folders: vec![remote_folder("base-folder", "root", "default".into())],
        },
    );

    let report = sync.sync_folder("root").await.unwrap();
    assert_eq!(report, SyncReport { files: 1, folders: 1, skipped: 2 });
    assert_eq!(cache.get_item("base-folder").await.unwrap().unwrap().name, "Default");
    assert!(cache.get_item("f1").await.unwrap().is_none());
}

#[tokio::test]
async fn working_set_refreshes_known_parents() {
    let server = Arc::new(MemoryTransport::new());
    let cache = MetadataCache::open_in_memory().unwrap();
    let keys = keyring();
    let sync = DirectorySync::new(ApiClient::new(server.clone()), cache.clone(), keys.clone());

    let first = encrypt_file_metadata(&file_meta("one.txt"), &keys).unwrap();
    server.set_listing(
        "p1",
        DirContent {
            uploads: vec![remote_file("x1", "p1", first)],
            folders: vec![],
        },
    );
    sync.sync_folder("p1").await.unwrap();

    let second = encrypt_file_metadata(&file_meta("two.txt"), &keys).unwrap();
    server.set_listing(
        "p1",
        DirContent {
            uploads: vec![remote_file("x2", "p1", second)],
            folders: vec![],
        },
    );
    let refreshed = sync.sync_working_set().await.unwrap();
    assert_eq!(refreshed.len(), 1);
    assert_eq!(refreshed[0].0, "p1");
    assert!(cache.get_item("x1").await.unwrap().is_none());
    assert!(cache.get_item("x2").await.unwrap().is_some());
}
