//! Reconcile remote folder listings into the metadata cache.
//!
//! Each listing is an authoritative snapshot: the parent's cached children
//! are replaced wholesale. Entries whose metadata cannot be decrypted with
//! any master key are left out rather than failing the listing.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use ecfs_core::{EcfsResult, FileMetadata, Item, ItemKind};
use ecfs_crypto::{decrypt_file_metadata, decrypt_folder_name, Keyring};
use ecfs_storage::{ApiClient, RemoteFile, RemoteFolder};
use tracing::{debug, info, warn};

use crate::state::MetadataCache;

/// Outcome of syncing one folder.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub files: usize,
    pub folders: usize,
    /// Entries dropped because their metadata did not decrypt
    pub skipped: usize,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Normalize a server timestamp that may be in seconds or milliseconds.
pub fn convert_timestamp_to_ms(timestamp: i64) -> i64 {
    convert_timestamp_at(timestamp, now_ms())
}

fn convert_timestamp_at(timestamp: i64, now: i64) -> i64 {
    let as_ms = timestamp.saturating_mul(1000);
    if now.abs_diff(timestamp) < now.abs_diff(as_ms) {
        timestamp
    } else {
        as_ms
    }
}

pub struct DirectorySync {
    api: ApiClient,
    cache: MetadataCache,
    keyring: Arc<Keyring>,
}

impl DirectorySync {
    pub fn new(api: ApiClient, cache: MetadataCache, keyring: Arc<Keyring>) -> Self {
        Self { api, cache, keyring }
    }

    /// Fetch `parent`'s listing and replace its cached children.
    pub async fn sync_folder(&self, parent: &str) -> EcfsResult<SyncReport> {
        let content = self.api.dir_content(parent).await?;
        let mut report = SyncReport::default();
        let mut items = Vec::with_capacity(content.folders.len() + content.uploads.len());

        for folder in &content.folders {
            match self.folder_item(folder).await? {
                Some(item) => {
                    report.folders += 1;
                    items.push(item);
                }
                None => {
                    warn!(uuid = %folder.uuid, parent, "skipping folder with undecryptable name");
                    report.skipped += 1;
                }
            }
        }
        for file in &content.uploads {
            match self.file_item(file).await? {
                Some(item) => {
                    report.files += 1;
                    items.push(item);
                }
                None => {
                    warn!(uuid = %file.uuid, parent, "skipping file with undecryptable metadata");
                    report.skipped += 1;
                }
            }
        }

        self.cache.replace_children(parent, items).await?;
        info!(
            parent,
            files = report.files,
            folders = report.folders,
            skipped = report.skipped,
            "folder synced"
        );
        Ok(report)
    }

    /// Re-sync every folder that currently has children in the cache.
    /// Per-folder failures are logged and the pass continues.
    pub async fn sync_working_set(&self) -> EcfsResult<Vec<(String, SyncReport)>> {
        let parents = self.cache.distinct_parents().await?;
        let mut out = Vec::with_capacity(parents.len());
        for parent in parents {
            match self.sync_folder(&parent).await {
                Ok(report) => out.push((parent, report)),
                Err(e) => warn!(parent = %parent, "working-set sync failed: {e}"),
            }
        }
        Ok(out)
    }

    async fn folder_item(&self, folder: &RemoteFolder) -> EcfsResult<Option<Item>> {
        let name = match self.cache.memo_lookup_folder(&folder.name).await? {
            Some(name) => name,
            None => {
                let Some(name) = decrypt_folder_name(&folder.name, &self.keyring) else {
                    return Ok(None);
                };
                self.cache
                    .memo_store_folder(&folder.uuid, &folder.name, &name)
                    .await?;
                name
            }
        };
        if name.is_empty() {
            return Ok(None);
        }
        Ok(Some(Item::folder(
            &folder.uuid,
            &folder.parent,
            name,
            convert_timestamp_to_ms(folder.timestamp),
        )))
    }

    async fn file_item(&self, file: &RemoteFile) -> EcfsResult<Option<Item>> {
        let meta = match self.cache.memo_lookup_file(&file.metadata).await? {
            Some(meta) => meta,
            None => {
                let Some(meta) = decrypt_file_metadata(&file.metadata, &self.keyring) else {
                    return Ok(None);
                };
                self.cache
                    .memo_store_file(&file.uuid, &file.metadata, &meta)
                    .await?;
                debug!(uuid = %file.uuid, "memoized file metadata");
                meta
            }
        };
        Ok(file_from_metadata(file, meta, now_ms()))
    }
}

/// Build a cache row from a listing entry and its decrypted metadata.
///
/// Metadata without `lastModified` is stamped with `now`.
fn file_from_metadata(file: &RemoteFile, meta: FileMetadata, now: i64) -> Option<Item> {
    if meta.name.is_empty() || meta.key.is_empty() {
        return None;
    }
    let created_at = convert_timestamp_at(file.timestamp, now);
    Some(Item {
        uuid: file.uuid.clone(),
        parent: file.parent.clone(),
        name: meta.name,
        kind: ItemKind::File,
        mime: meta.mime.unwrap_or_default(),
        size: meta.size.unwrap_or(file.size),
        created_at,
        modified_at: meta
            .last_modified
            .map(|t| convert_timestamp_at(t, now))
            .unwrap_or(now),
        file_key: meta.key,
        chunk_count: file.chunks,
        region: file.region.clone(),
        bucket: file.bucket.clone(),
        version: file.version,
    })
}
