//! Chunked upload and download.
//!
//! Both directions dispatch one task per chunk index onto a shared bounded
//! pool. Downloads fetch and decrypt out of order but commit to the output
//! strictly by index through a reassembly gate; uploads have no ordering and
//! commit only through the finalize call once every chunk is stored.
//!
//! Cancellation is cooperative: when a chunk fails, tasks that have not yet
//! started notice the token and stand down, tasks already running finish.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use ecfs_core::config::TransferConfig;
use ecfs_core::{EcfsError, EcfsResult, FileMetadata, Item, ItemKind, ItemMetadata};
use ecfs_crypto::{
    encrypt_file_metadata, encrypt_metadata, generate_random_string, name_hash,
    stream_decrypt_chunk, stream_encrypt_chunk, Keyring, CONTENT_VERSION,
};
use ecfs_storage::{ApiClient, ChunkAddress, ChunkPlacement, ChunkUploadQuery, UploadDoneRequest};
use futures::future::join_all;
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::locks::TransferLocks;
use crate::metrics::{Direction, TransferMetrics};
use crate::share::{PropagationReport, SharePropagator};
use crate::state::MetadataCache;
use crate::temp::{discard, TempStore};

const TOKEN_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub path: PathBuf,
    /// False when an existing local copy was returned or no chunks were requested
    pub downloaded: bool,
    pub chunks: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub item: Item,
    pub propagation: PropagationReport,
}

/// Reassembly state shared by the chunk tasks of one download.
#[derive(Debug, Clone, Copy, Default)]
struct Gate {
    next: u64,
    failed: bool,
}

enum ChunkFailure {
    /// Stood down because another chunk failed
    Aborted,
    Failed(EcfsError),
}

impl From<EcfsError> for ChunkFailure {
    fn from(e: EcfsError) -> Self {
        ChunkFailure::Failed(e)
    }
}

impl From<ecfs_crypto::CryptoError> for ChunkFailure {
    fn from(e: ecfs_crypto::CryptoError) -> Self {
        ChunkFailure::Failed(e.into())
    }
}

impl From<std::io::Error> for ChunkFailure {
    fn from(e: std::io::Error) -> Self {
        ChunkFailure::Failed(e.into())
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn join_error(e: tokio::task::JoinError) -> EcfsError {
    EcfsError::Other(anyhow::anyhow!("chunk task panicked: {e}"))
}

async fn acquire(pool: &Arc<Semaphore>) -> EcfsResult<OwnedSemaphorePermit> {
    pool.clone()
        .acquire_owned()
        .await
        .map_err(|_| EcfsError::State("transfer pool closed".into()))
}

/// Rename, falling back to copy when source and target are on different filesystems.
async fn move_file(from: &Path, to: &Path) -> EcfsResult<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    discard(from).await;
    Ok(())
}

async fn append_file(src: &Path, dst: &Path) -> std::io::Result<u64> {
    let mut out = tokio::fs::OpenOptions::new().append(true).open(dst).await?;
    let mut input = tokio::fs::File::open(src).await?;
    let n = tokio::io::copy(&mut input, &mut out).await?;
    out.flush().await?;
    Ok(n)
}

/// Sort results into successes and the indices that genuinely failed.
fn collect<T>(
    uuid: &str,
    results: Vec<Result<Result<T, ChunkFailure>, tokio::task::JoinError>>,
) -> (Vec<T>, Vec<u64>) {
    let mut ok = Vec::with_capacity(results.len());
    let mut failed = Vec::new();
    for (index, result) in results.into_iter().enumerate() {
        let index = index as u64;
        match result.map_err(join_error) {
            Ok(Ok(v)) => ok.push(v),
            Ok(Err(ChunkFailure::Aborted)) => debug!(uuid, index, "chunk stood down"),
            Ok(Err(ChunkFailure::Failed(e))) | Err(e) => {
                warn!(uuid, index, "chunk failed: {e}");
                failed.push(index);
            }
        }
    }
    (ok, failed)
}

pub struct TransferEngine {
    api: ApiClient,
    cache: MetadataCache,
    keyring: Arc<Keyring>,
    locks: Arc<TransferLocks>,
    chunk_pool: Arc<Semaphore>,
    download_slots: Arc<Semaphore>,
    upload_slots: Arc<Semaphore>,
    temp: TempStore,
    files_dir: PathBuf,
    chunk_size: u64,
    metrics: Option<TransferMetrics>,
    share: SharePropagator,
}

impl TransferEngine {
    pub fn new(
        api: ApiClient,
        cache: MetadataCache,
        keyring: Arc<Keyring>,
        transfer: &TransferConfig,
        temp: TempStore,
        files_dir: impl Into<PathBuf>,
    ) -> Self {
        let share = SharePropagator::new(api.clone(), keyring.clone());
        Self {
            api,
            cache,
            keyring,
            locks: Arc::new(TransferLocks::new()),
            chunk_pool: Arc::new(Semaphore::new(transfer.chunk_pool_size)),
            download_slots: Arc::new(Semaphore::new(transfer.max_concurrent_downloads)),
            upload_slots: Arc::new(Semaphore::new(transfer.max_concurrent_uploads)),
            temp,
            files_dir: files_dir.into(),
            chunk_size: transfer.chunk_size,
            metrics: None,
            share,
        }
    }

    pub fn with_metrics(mut self, metrics: TransferMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn temp(&self) -> &TempStore {
        &self.temp
    }

    pub fn share(&self) -> &SharePropagator {
        &self.share
    }

    pub fn locks(&self) -> &TransferLocks {
        &self.locks
    }

    /// Where the decrypted copy of `item` lives: `{files_dir}/{uuid}/{name}`.
    pub fn local_path(&self, item: &Item) -> PathBuf {
        self.files_dir.join(&item.uuid).join(&item.name)
    }

    fn record_failure(&self, direction: Direction) {
        if let Some(m) = &self.metrics {
            m.transfer_failed(direction);
        }
    }

    /// Download a cached file item to `dest` (default: [`Self::local_path`]).
    ///
    /// `max_chunks` caps how many leading chunks are fetched; `Some(0)`
    /// returns the target path without touching disk or network. A capped
    /// download without `dest` that stops short of the last chunk is written
    /// to a fresh scratch file, never to the local copy path.
    pub async fn download(
        &self,
        uuid: &str,
        dest: Option<&Path>,
        max_chunks: Option<u64>,
    ) -> EcfsResult<DownloadOutcome> {
        let item = self
            .cache
            .get_item(uuid)
            .await?
            .ok_or_else(|| EcfsError::State(format!("item {uuid} is not in the cache")))?;
        if item.is_folder() {
            return Err(EcfsError::State(format!("{uuid} is a folder")));
        }
        let existing = |path: PathBuf| DownloadOutcome {
            path,
            downloaded: false,
            chunks: 0,
            bytes: 0,
        };
        if max_chunks == Some(0) {
            let target = dest.map(Path::to_path_buf).unwrap_or_else(|| self.local_path(&item));
            return Ok(existing(target));
        }

        let truncated = max_chunks.is_some_and(|m| m < item.chunk_count);
        let dest = match dest {
            Some(path) => path.to_path_buf(),
            None if truncated => self.temp.path(&item.uuid, "head"),
            None => self.local_path(&item),
        };
        if tokio::fs::try_exists(&dest).await? {
            debug!(uuid, path = %dest.display(), "local copy present");
            return Ok(existing(dest));
        }

        let _guard = self.locks.acquire(uuid).await;
        // Someone else may have finished while we waited for the lock.
        if tokio::fs::try_exists(&dest).await? {
            return Ok(existing(dest));
        }
        let _slot = acquire(&self.download_slots).await?;

        let started = Instant::now();
        match self.fetch(&item, &dest, max_chunks).await {
            Ok(outcome) => {
                if let Some(m) = &self.metrics {
                    m.transfer_done(Direction::Download, outcome.bytes, started.elapsed());
                }
                info!(uuid, chunks = outcome.chunks, bytes = outcome.bytes, "download complete");
                Ok(outcome)
            }
            Err(e) => {
                self.record_failure(Direction::Download);
                Err(e)
            }
        }
    }

    async fn fetch(&self, item: &Item, dest: &Path, max_chunks: Option<u64>) -> EcfsResult<DownloadOutcome> {
        let chunks = max_chunks.map_or(item.chunk_count, |m| m.min(item.chunk_count));
        if let Some(dir) = dest.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let part = self.temp.path(&item.uuid, "part");
        if chunks == 0 {
            tokio::fs::File::create(&part).await?;
        }

        let (gate_tx, _) = watch::channel(Gate::default());
        let gate = Arc::new(gate_tx);
        let cancel = CancellationToken::new();

        let mut handles = Vec::with_capacity(chunks as usize);
        for index in 0..chunks {
            let address = ChunkAddress {
                region: item.region.clone(),
                bucket: item.bucket.clone(),
                uuid: item.uuid.clone(),
                index,
            };
            let task = DownloadChunk {
                api: self.api.clone(),
                pool: self.chunk_pool.clone(),
                cancel: cancel.clone(),
                gate: gate.clone(),
                temp: self.temp.clone(),
                part: part.clone(),
                key: item.file_key.clone(),
                version: item.version,
                metrics: self.metrics.clone(),
            };
            handles.push(tokio::spawn(task.run(address)));
        }

        let (sizes, failed) = collect(&item.uuid, join_all(handles).await);
        if !failed.is_empty() {
            discard(&part).await;
            return Err(EcfsError::PartialTransfer {
                uuid: item.uuid.clone(),
                failed_indices: failed,
            });
        }

        move_file(&part, dest).await?;
        Ok(DownloadOutcome {
            path: dest.to_path_buf(),
            downloaded: true,
            chunks,
            bytes: sizes.iter().sum(),
        })
    }

    /// Upload `local_path` into folder `parent`.
    ///
    /// Chunks go up in parallel; finalize runs only once every chunk has
    /// been stored. A finalize failure leaves the stored chunks orphaned and
    /// is reported as [`EcfsError::OrphanedChunks`].
    pub async fn upload(&self, local_path: &Path, parent: &str) -> EcfsResult<UploadOutcome> {
        let _guard = self
            .locks
            .acquire(&TransferLocks::upload_key(local_path, parent))
            .await;

        let stat = tokio::fs::metadata(local_path).await?;
        if !stat.is_file() {
            return Err(EcfsError::State(format!("{} is not a regular file", local_path.display())));
        }
        let size = stat.len();
        if size == 0 {
            return Err(EcfsError::State(format!(
                "{} is empty; zero-byte files cannot be uploaded",
                local_path.display()
            )));
        }
        if self.keyring.is_empty() {
            return Err(EcfsError::NotAuthenticated("no master keys loaded".into()));
        }
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| EcfsError::State(format!("{} has no file name", local_path.display())))?;

        let _slot = acquire(&self.upload_slots).await?;
        let started = Instant::now();
        match self.send(local_path, parent, name, &stat).await {
            Ok(outcome) => {
                if let Some(m) = &self.metrics {
                    m.transfer_done(Direction::Upload, size, started.elapsed());
                }
                Ok(outcome)
            }
            Err(e) => {
                self.record_failure(Direction::Upload);
                Err(e)
            }
        }
    }

    async fn send(
        &self,
        local_path: &Path,
        parent: &str,
        name: String,
        stat: &std::fs::Metadata,
    ) -> EcfsResult<UploadOutcome> {
        let size = stat.len();
        let chunks = size.div_ceil(self.chunk_size);
        let uuid = uuid::Uuid::new_v4().to_string();
        let file_key = generate_random_string(TOKEN_LEN);
        let upload_key = generate_random_string(TOKEN_LEN);
        let rm = generate_random_string(TOKEN_LEN);
        let mime = mime_guess::from_path(local_path)
            .first()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_default();
        let last_modified = stat
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or_else(now_ms);

        let meta = FileMetadata {
            name: name.clone(),
            size: Some(size),
            mime: Some(mime.clone()),
            key: file_key.clone(),
            last_modified: Some(last_modified),
            hash: None,
        };
        let request = UploadDoneRequest {
            uuid: uuid.clone(),
            name: encrypt_metadata(&name, &file_key)?,
            name_hashed: name_hash(&name.to_lowercase()),
            size: encrypt_metadata(&size.to_string(), &file_key)?,
            chunks,
            mime: encrypt_metadata(&mime, &file_key)?,
            rm,
            metadata: encrypt_file_metadata(&meta, &self.keyring)?,
            version: CONTENT_VERSION,
            upload_key: upload_key.clone(),
        };
        debug!(uuid = %uuid, parent, chunks, bytes = size, "upload dispatching");

        let cancel = CancellationToken::new();
        let mut handles = Vec::with_capacity(chunks as usize);
        for index in 0..chunks {
            let task = UploadChunk {
                api: self.api.clone(),
                pool: self.chunk_pool.clone(),
                cancel: cancel.clone(),
                temp: self.temp.clone(),
                source: local_path.to_path_buf(),
                chunk_size: self.chunk_size,
                key: file_key.clone(),
                query: ChunkUploadQuery {
                    uuid: uuid.clone(),
                    index,
                    upload_key: upload_key.clone(),
                    parent: parent.to_string(),
                    hash: String::new(),
                },
                metrics: self.metrics.clone(),
            };
            handles.push(tokio::spawn(task.run()));
        }

        let (placements, failed) = collect(&uuid, join_all(handles).await);
        if !failed.is_empty() {
            return Err(EcfsError::PartialTransfer {
                uuid,
                failed_indices: failed,
            });
        }
        let placement = placements
            .into_iter()
            .find(ChunkPlacement::is_known)
            .ok_or_else(|| EcfsError::State(format!("no storage placement learned for {uuid}")))?;

        let done = match self.api.upload_done(&request).await {
            Ok(done) => done,
            Err(e) => {
                warn!(uuid = %uuid, chunks, "finalize failed, chunks left orphaned: {e}");
                return Err(EcfsError::OrphanedChunks {
                    uuid,
                    chunks,
                    reason: e.to_string(),
                });
            }
        };

        let item = Item {
            uuid: uuid.clone(),
            parent: parent.to_string(),
            name,
            kind: ItemKind::File,
            mime,
            size,
            created_at: now_ms(),
            modified_at: last_modified,
            file_key,
            chunk_count: done.chunks,
            region: placement.region,
            bucket: placement.bucket,
            version: CONTENT_VERSION,
        };
        self.cache.upsert_item(&item).await?;
        info!(uuid = %uuid, parent, chunks, bytes = size, "upload finalized");

        let propagation = self
            .share
            .propagate_to_parent(parent, &uuid, &ItemMetadata::File(meta))
            .await;
        Ok(UploadOutcome { item, propagation })
    }
}

struct DownloadChunk {
    api: ApiClient,
    pool: Arc<Semaphore>,
    cancel: CancellationToken,
    gate: Arc<watch::Sender<Gate>>,
    temp: TempStore,
    part: PathBuf,
    key: String,
    version: u32,
    metrics: Option<TransferMetrics>,
}

impl DownloadChunk {
    async fn run(self, address: ChunkAddress) -> Result<u64, ChunkFailure> {
        let result = self.fetch_and_commit(&address).await;
        if let Err(ChunkFailure::Failed(_)) = &result {
            self.cancel.cancel();
            self.gate.send_modify(|g| g.failed = true);
        }
        result
    }

    async fn fetch_and_commit(&self, address: &ChunkAddress) -> Result<u64, ChunkFailure> {
        let index = address.index;
        if self.cancel.is_cancelled() {
            return Err(ChunkFailure::Aborted);
        }
        let permit = acquire(&self.pool).await?;
        if self.cancel.is_cancelled() {
            return Err(ChunkFailure::Aborted);
        }

        let data = self.api.download_chunk(address).await?;
        let encrypted = self.temp.path(&address.uuid, "enc");
        let decrypted = self.temp.path(&address.uuid, "dec");
        tokio::fs::write(&encrypted, &data).await?;
        drop(data);

        let (src, dst, key, version) = (encrypted.clone(), decrypted.clone(), self.key.clone(), self.version);
        let opened = tokio::task::spawn_blocking(move || stream_decrypt_chunk(&src, &dst, &key, version))
            .await
            .map_err(join_error)?;
        discard(&encrypted).await;
        let len = match opened {
            Ok(len) => len,
            Err(e) => {
                discard(&decrypted).await;
                return Err(e.into());
            }
        };
        drop(permit);
        debug!(uuid = %address.uuid, index, bytes = len, "chunk decrypted");

        let mut rx = self.gate.subscribe();
        let gate = *rx
            .wait_for(|g| g.failed || g.next == index)
            .await
            .map_err(|_| EcfsError::State("reassembly gate closed".into()))?;
        if gate.failed {
            discard(&decrypted).await;
            return Err(ChunkFailure::Aborted);
        }

        let committed = if index == 0 {
            tokio::fs::rename(&decrypted, &self.part).await
        } else {
            let appended = append_file(&decrypted, &self.part).await.map(|_| ());
            discard(&decrypted).await;
            appended
        };
        committed?;
        self.gate.send_modify(|g| g.next += 1);

        if let Some(m) = &self.metrics {
            m.chunk_downloaded();
        }
        Ok(len)
    }
}

struct UploadChunk {
    api: ApiClient,
    pool: Arc<Semaphore>,
    cancel: CancellationToken,
    temp: TempStore,
    source: PathBuf,
    chunk_size: u64,
    key: String,
    query: ChunkUploadQuery,
    metrics: Option<TransferMetrics>,
}

impl UploadChunk {
    async fn run(self) -> Result<ChunkPlacement, ChunkFailure> {
        let result = self.encrypt_and_send().await;
        if let Err(ChunkFailure::Failed(_)) = &result {
            self.cancel.cancel();
        }
        result
    }

    async fn encrypt_and_send(&self) -> Result<ChunkPlacement, ChunkFailure> {
        if self.cancel.is_cancelled() {
            return Err(ChunkFailure::Aborted);
        }
        let _permit = acquire(&self.pool).await?;
        if self.cancel.is_cancelled() {
            return Err(ChunkFailure::Aborted);
        }

        let index = self.query.index;
        let output = self.temp.path(&self.query.uuid, &format!("up{index}"));
        let (src, dst, key, size) = (self.source.clone(), output.clone(), self.key.clone(), self.chunk_size);
        let sealed = tokio::task::spawn_blocking(move || stream_encrypt_chunk(&src, &dst, size, &key, index))
            .await
            .map_err(join_error)?;
        let chunk = match sealed {
            Ok(c) => c,
            Err(e) => {
                discard(&output).await;
                return Err(e.into());
            }
        };
        let data = tokio::fs::read(&chunk.path).await;
        discard(&chunk.path).await;
        let data = Bytes::from(data?);

        let query = ChunkUploadQuery {
            hash: chunk.checksum,
            ..self.query.clone()
        };
        let placement = self.api.upload_chunk(&query, data).await?;
        debug!(uuid = %query.uuid, index, bytes = chunk.plaintext_len, "chunk uploaded");
        if let Some(m) = &self.metrics {
            m.chunk_uploaded();
        }
        Ok(placement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecfs_storage::MemoryTransport;

    fn engine(dir: &Path, chunk_size: u64) -> (Arc<MemoryTransport>, TransferEngine) {
        let server = Arc::new(MemoryTransport::new());
        let api = ApiClient::new(server.clone());
        let cache = MetadataCache::open_in_memory().unwrap();
        let keyring = Arc::new(Keyring::from_keys(["master"]));
        let transfer = TransferConfig {
            chunk_size,
            ..TransferConfig::default()
        };
        let temp = TempStore::new(dir.join("tmp")).unwrap();
        let engine = TransferEngine::new(api, cache, keyring, &transfer, temp, dir.join("files"));
        (server, engine)
    }

    #[tokio::test]
    async fn zero_byte_upload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (server, engine) = engine(dir.path(), 16);
        let empty = dir.path().join("empty.bin");
        std::fs::write(&empty, b"").unwrap();

        let err = engine.upload(&empty, "root").await.unwrap_err();
        assert!(matches!(err, EcfsError::State(_)));
        assert!(server.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_item_is_state_error() {
        let dir = tempfile::tempdir().unwrap();
        let (_, engine) = engine(dir.path(), 16);
        let err = engine.download("missing", None, None).await.unwrap_err();
        assert!(matches!(err, EcfsError::State(_)));
    }

    #[tokio::test]
    async fn zero_max_chunks_returns_early() {
        let dir = tempfile::tempdir().unwrap();
        let (server, engine) = engine(dir.path(), 16);
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"some content here, more than one chunk").unwrap();
        let up = engine.upload(&src, "root").await.unwrap();

        let out = engine.download(&up.item.uuid, None, Some(0)).await.unwrap();
        assert!(!out.downloaded);
        assert!(!out.path.exists());
        assert_eq!(server.chunk_gets(), 0);
    }

    #[tokio::test]
    async fn max_chunks_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let (_, engine) = engine(dir.path(), 4);
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"aaaabbbbcc").unwrap();
        let up = engine.upload(&src, "root").await.unwrap();
        assert_eq!(up.item.chunk_count, 3);

        let dest = dir.path().join("head.txt");
        let out = engine.download(&up.item.uuid, Some(&dest), Some(2)).await.unwrap();
        assert_eq!(out.chunks, 2);
        assert_eq!(std::fs::read(&dest).unwrap(), b"aaaabbbb");
    }

    #[tokio::test]
    async fn mime_is_guessed_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let (_, engine) = engine(dir.path(), 1024);
        let src = dir.path().join("notes.txt");
        std::fs::write(&src, b"hi").unwrap();
        let up = engine.upload(&src, "root").await.unwrap();
        assert_eq!(up.item.mime, "text/plain");
        assert_eq!(up.item.region, ecfs_storage::memory::MEMORY_REGION);
        assert!(up.propagation.is_noop());
    }
}
