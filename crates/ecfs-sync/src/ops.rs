//! Drive: the operations a filesystem front end calls.
//!
//! Structural mutations hit the server first, then the cache, then fan out
//! to shares and links. Propagation results are reported, never raised.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ecfs_core::config::{expand_tilde, EcfsConfig, TransferConfig};
use ecfs_core::{EcfsError, EcfsResult, FolderMetadata, Item, ItemKind, ItemMetadata};
use ecfs_crypto::{encrypt_file_metadata, encrypt_folder_metadata, encrypt_metadata, name_hash, Keyring};
use ecfs_storage::{ApiClient, Transport};
use tracing::{debug, info, warn};

use crate::engine::{DownloadOutcome, TransferEngine, UploadOutcome};
use crate::listing::{DirectorySync, SyncReport};
use crate::metrics::TransferMetrics;
use crate::share::PropagationReport;
use crate::state::MetadataCache;
use crate::temp::TempStore;

pub struct Drive {
    api: ApiClient,
    cache: MetadataCache,
    keyring: Arc<Keyring>,
    engine: TransferEngine,
    sync: DirectorySync,
}

impl Drive {
    /// Open the on-disk cache and scratch dirs named by `config`.
    pub fn open(config: &EcfsConfig, transport: Arc<dyn Transport>, keyring: Arc<Keyring>) -> EcfsResult<Self> {
        config.validate()?;
        let cache = MetadataCache::open(&expand_tilde(&config.cache.db_path))?;
        let temp = TempStore::new(expand_tilde(&config.cache.temp_dir))?;
        Ok(Self::new(
            ApiClient::new(transport),
            cache,
            keyring,
            &config.transfer,
            temp,
            expand_tilde(&config.cache.files_dir),
        ))
    }

    pub fn new(
        api: ApiClient,
        cache: MetadataCache,
        keyring: Arc<Keyring>,
        transfer: &TransferConfig,
        temp: TempStore,
        files_dir: impl Into<PathBuf>,
    ) -> Self {
        let engine = TransferEngine::new(api.clone(), cache.clone(), keyring.clone(), transfer, temp, files_dir);
        let sync = DirectorySync::new(api.clone(), cache.clone(), keyring.clone());
        Self {
            api,
            cache,
            keyring,
            engine,
            sync,
        }
    }

    pub fn with_metrics(mut self, metrics: TransferMetrics) -> Self {
        self.engine = self.engine.with_metrics(metrics);
        self
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    pub fn engine(&self) -> &TransferEngine {
        &self.engine
    }

    async fn cached(&self, uuid: &str) -> EcfsResult<Item> {
        self.cache
            .get_item(uuid)
            .await?
            .ok_or_else(|| EcfsError::State(format!("item {uuid} is not in the cache")))
    }

    pub async fn create_folder(&self, name: &str, parent: &str) -> EcfsResult<(Item, PropagationReport)> {
        let meta = FolderMetadata { name: name.to_string() };
        let encrypted = encrypt_folder_metadata(&meta, &self.keyring)?;
        let uuid = uuid::Uuid::new_v4().to_string();
        let assigned = self
            .api
            .create_folder(&uuid, &encrypted, &name_hash(&name.to_lowercase()), parent)
            .await?;

        let item = Item::folder(assigned, parent, name, now_ms());
        self.cache.upsert_item(&item).await?;
        info!(uuid = %item.uuid, parent, "folder created");

        let report = self
            .engine
            .share()
            .propagate_to_parent(parent, &item.uuid, &ItemMetadata::Folder(meta))
            .await;
        Ok((item, report))
    }

    pub async fn rename_folder(&self, uuid: &str, new_name: &str) -> EcfsResult<PropagationReport> {
        let mut item = self.cached(uuid).await?;
        if !item.is_folder() {
            return Err(EcfsError::State(format!("{uuid} is not a folder")));
        }
        let meta = FolderMetadata {
            name: new_name.to_string(),
        };
        let encrypted = encrypt_folder_metadata(&meta, &self.keyring)?;
        self.api
            .rename_folder(uuid, &encrypted, &name_hash(&new_name.to_lowercase()))
            .await?;

        item.name = new_name.to_string();
        self.cache.upsert_item(&item).await?;
        Ok(self
            .engine
            .share()
            .propagate_rename(uuid, &ItemMetadata::Folder(meta))
            .await)
    }

    pub async fn rename_file(&self, uuid: &str, new_name: &str) -> EcfsResult<PropagationReport> {
        let mut item = self.cached(uuid).await?;
        if item.is_folder() {
            return Err(EcfsError::State(format!("{uuid} is a folder")));
        }
        let old_path = self.engine.local_path(&item);

        let mut meta = item.file_metadata();
        meta.name = new_name.to_string();
        let encrypted_name = encrypt_metadata(new_name, &item.file_key)?;
        let metadata = encrypt_file_metadata(&meta, &self.keyring)?;
        self.api
            .rename_file(uuid, &encrypted_name, &name_hash(&new_name.to_lowercase()), &metadata)
            .await?;

        item.name = new_name.to_string();
        self.cache.upsert_item(&item).await?;

        let new_path = self.engine.local_path(&item);
        match tokio::fs::rename(&old_path, &new_path).await {
            Ok(()) => debug!(uuid, "renamed local copy"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(uuid, "renaming local copy: {e}"),
        }

        Ok(self
            .engine
            .share()
            .propagate_rename(uuid, &ItemMetadata::File(meta))
            .await)
    }

    pub async fn move_item(&self, uuid: &str, new_parent: &str) -> EcfsResult<PropagationReport> {
        let mut item = self.cached(uuid).await?;
        self.api.move_item(item.kind, uuid, new_parent).await?;

        item.parent = new_parent.to_string();
        self.cache.upsert_item(&item).await?;
        info!(uuid, to = new_parent, "item moved");

        let metadata = match item.kind {
            ItemKind::File => ItemMetadata::File(item.file_metadata()),
            ItemKind::Folder => ItemMetadata::Folder(FolderMetadata { name: item.name.clone() }),
        };
        Ok(self
            .engine
            .share()
            .propagate_to_parent(new_parent, uuid, &metadata)
            .await)
    }

    /// Trash remotely, then drop the item and everything under it from the cache.
    pub async fn trash_item(&self, uuid: &str) -> EcfsResult<usize> {
        let item = self.cached(uuid).await?;
        self.api.trash_item(item.kind, uuid).await?;
        let removed = self.cache.delete_subtree_recursive(uuid).await?;
        info!(uuid, removed, "item trashed");
        Ok(removed)
    }

    pub async fn restore_item(&self, uuid: &str, kind: ItemKind) -> EcfsResult<()> {
        self.api.restore_item(kind, uuid).await
    }

    pub async fn delete_permanently(&self, uuid: &str, kind: ItemKind) -> EcfsResult<()> {
        self.api.delete_permanently(kind, uuid).await?;
        self.cache.delete_subtree_recursive(uuid).await?;
        Ok(())
    }

    pub async fn upload(&self, local_path: &Path, parent: &str) -> EcfsResult<UploadOutcome> {
        self.engine.upload(local_path, parent).await
    }

    pub async fn download(
        &self,
        uuid: &str,
        dest: Option<&Path>,
        max_chunks: Option<u64>,
    ) -> EcfsResult<DownloadOutcome> {
        self.engine.download(uuid, dest, max_chunks).await
    }

    pub async fn sync_folder(&self, parent: &str) -> EcfsResult<SyncReport> {
        self.sync.sync_folder(parent).await
    }

    pub async fn sync_working_set(&self) -> EcfsResult<Vec<(String, SyncReport)>> {
        self.sync.sync_working_set().await
    }

    pub async fn cleanup_temp(&self, max_age: Duration) -> EcfsResult<usize> {
        self.engine.temp().cleanup(max_age).await
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
