//! In-process fake server for tests.
//!
//! Chunk objects live in an OpenDAL in-memory operator; folder listings,
//! share/link state and failures are scripted by the test.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ecfs_core::{EcfsError, EcfsResult};
use ecfs_crypto::checksum_bytes;
use opendal::Operator;
use serde_json::{json, Value};

use crate::api::{endpoint, DirContent, DirTree, Linking, Sharing};
use crate::transport::{ApiResponse, ChunkAddress, ChunkUploadQuery, Transport};

pub const MEMORY_REGION: &str = "mem-1";
pub const MEMORY_BUCKET: &str = "ecfs-memory";

/// One request seen by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub endpoint: String,
    pub body: String,
}

impl RecordedCall {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

#[derive(Default)]
struct State {
    calls: Vec<RecordedCall>,
    listings: HashMap<String, DirContent>,
    trees: HashMap<String, DirTree>,
    folder_sharing: HashMap<String, Sharing>,
    folder_linking: HashMap<String, Linking>,
    item_sharing: HashMap<String, Sharing>,
    item_linking: HashMap<String, Linking>,
    failing_endpoints: HashSet<String>,
    failing_uploads: HashSet<u64>,
    failing_downloads: HashSet<u64>,
    upload_latency: HashMap<u64, Duration>,
    download_latency: HashMap<u64, Duration>,
    chunk_puts: Vec<(String, u64)>,
    chunk_gets: u64,
}

pub struct MemoryTransport {
    op: Operator,
    state: Mutex<State>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn object_path(uuid: &str, index: u64) -> String {
    format!("{uuid}/{index}")
}

impl MemoryTransport {
    pub fn new() -> Self {
        let op = match Operator::new(opendal::services::Memory::default()) {
            Ok(builder) => builder.finish(),
            Err(e) => unreachable!("memory operator cannot fail to build: {e}"),
        };
        Self {
            op,
            state: Mutex::new(State::default()),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    // ── scripting ──

    pub fn set_listing(&self, folder: &str, content: DirContent) {
        self.with_state(|s| s.listings.insert(folder.to_string(), content));
    }

    pub fn set_tree(&self, folder: &str, tree: DirTree) {
        self.with_state(|s| s.trees.insert(folder.to_string(), tree));
    }

    pub fn set_folder_sharing(&self, folder: &str, sharing: Sharing) {
        self.with_state(|s| s.folder_sharing.insert(folder.to_string(), sharing));
    }

    pub fn set_folder_linking(&self, folder: &str, linking: Linking) {
        self.with_state(|s| s.folder_linking.insert(folder.to_string(), linking));
    }

    pub fn set_item_sharing(&self, uuid: &str, sharing: Sharing) {
        self.with_state(|s| s.item_sharing.insert(uuid.to_string(), sharing));
    }

    pub fn set_item_linking(&self, uuid: &str, linking: Linking) {
        self.with_state(|s| s.item_linking.insert(uuid.to_string(), linking));
    }

    /// Every later call to `endpoint` answers `status: false`.
    pub fn fail_endpoint(&self, endpoint: &str) {
        self.with_state(|s| s.failing_endpoints.insert(endpoint.to_string()));
    }

    pub fn fail_chunk_upload(&self, index: u64) {
        self.with_state(|s| s.failing_uploads.insert(index));
    }

    pub fn fail_chunk_download(&self, index: u64) {
        self.with_state(|s| s.failing_downloads.insert(index));
    }

    pub fn set_upload_latency(&self, index: u64, latency: Duration) {
        self.with_state(|s| s.upload_latency.insert(index, latency));
    }

    pub fn set_download_latency(&self, index: u64, latency: Duration) {
        self.with_state(|s| s.download_latency.insert(index, latency));
    }

    /// Seed an encrypted chunk object for download tests.
    pub async fn put_object(&self, uuid: &str, index: u64, data: Vec<u8>) -> EcfsResult<()> {
        self.op
            .write(&object_path(uuid, index), data)
            .await
            .map(|_| ())
            .map_err(|e| EcfsError::transport("memory", e.to_string()))
    }

    pub async fn object(&self, uuid: &str, index: u64) -> Option<Bytes> {
        self.op
            .read(&object_path(uuid, index))
            .await
            .ok()
            .map(|buf| buf.to_bytes())
    }

    // ── inspection ──

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.with_state(|s| s.calls.clone())
    }

    pub fn calls_to(&self, endpoint: &str) -> Vec<RecordedCall> {
        self.with_state(|s| {
            s.calls
                .iter()
                .filter(|c| c.endpoint == endpoint)
                .cloned()
                .collect()
        })
    }

    /// `(uuid, index)` of every accepted chunk upload, in arrival order.
    pub fn chunk_puts(&self) -> Vec<(String, u64)> {
        self.with_state(|s| s.chunk_puts.clone())
    }

    pub fn chunk_gets(&self) -> u64 {
        self.with_state(|s| s.chunk_gets)
    }

    fn respond(&self, endpoint: &str, body: &Value) -> ApiResponse {
        let uuid = body.get("uuid").and_then(Value::as_str).unwrap_or_default();
        self.with_state(|s| {
            let data = match endpoint {
                endpoint::DIR_CONTENT => match s.listings.get(uuid) {
                    Some(c) => json!(c),
                    None => return ApiResponse::failed("folder_not_found", "no such folder"),
                },
                endpoint::DIR_DOWNLOAD => json!(s.trees.get(uuid).cloned().unwrap_or_default()),
                endpoint::DIR_CREATE => json!({ "uuid": uuid }),
                endpoint::DIR_SHARED => json!(s.folder_sharing.get(uuid).cloned().unwrap_or_default()),
                endpoint::DIR_LINKED => json!(s.folder_linking.get(uuid).cloned().unwrap_or_default()),
                endpoint::ITEM_SHARED => json!(s.item_sharing.get(uuid).cloned().unwrap_or_default()),
                endpoint::ITEM_LINKED => json!(s.item_linking.get(uuid).cloned().unwrap_or_default()),
                endpoint::UPLOAD_DONE => {
                    let chunks = body.get("chunks").and_then(Value::as_u64).unwrap_or(0);
                    let stored = s.chunk_puts.iter().filter(|(u, _)| u == uuid).count() as u64;
                    if stored != chunks {
                        return ApiResponse::failed(
                            "chunks_mismatch",
                            format!("{stored} chunk(s) stored, finalize claims {chunks}"),
                        );
                    }
                    json!({ "chunks": chunks, "size": 0 })
                }
                _ => Value::Null,
            };
            ApiResponse::ok(data)
        })
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn post_json(&self, endpoint: &str, body: String, checksum: &str) -> EcfsResult<ApiResponse> {
        let call = RecordedCall {
            endpoint: endpoint.to_string(),
            body: body.clone(),
        };
        let failing = self.with_state(|s| {
            s.calls.push(call);
            s.failing_endpoints.contains(endpoint)
        });

        if checksum != checksum_bytes(body.as_bytes()) {
            return Ok(ApiResponse::failed("checksum_mismatch", "body checksum mismatch"));
        }
        if failing {
            return Ok(ApiResponse::failed("injected_failure", format!("{endpoint} failed")));
        }
        let parsed: Value = serde_json::from_str(&body)?;
        Ok(self.respond(endpoint, &parsed))
    }

    async fn put_chunk(
        &self,
        query: &ChunkUploadQuery,
        checksum: &str,
        data: Bytes,
    ) -> EcfsResult<ApiResponse> {
        let (latency, failing) = self.with_state(|s| {
            (
                s.upload_latency.get(&query.index).copied(),
                s.failing_uploads.contains(&query.index),
            )
        });
        if let Some(d) = latency {
            tokio::time::sleep(d).await;
        }
        if failing {
            return Err(EcfsError::transport(
                endpoint::CHUNK_UPLOAD,
                format!("injected failure for chunk {}", query.index),
            ));
        }
        if checksum != query.checksum() {
            return Ok(ApiResponse::failed("checksum_mismatch", "query checksum mismatch"));
        }
        if query.hash != checksum_bytes(&data) {
            return Ok(ApiResponse::failed("hash_mismatch", "chunk hash mismatch"));
        }

        self.put_object(&query.uuid, query.index, data.to_vec()).await?;
        self.with_state(|s| s.chunk_puts.push((query.uuid.clone(), query.index)));
        Ok(ApiResponse::ok(json!({
            "region": MEMORY_REGION,
            "bucket": MEMORY_BUCKET,
        })))
    }

    async fn get_chunk(&self, address: &ChunkAddress) -> EcfsResult<Bytes> {
        let (latency, failing) = self.with_state(|s| {
            s.chunk_gets += 1;
            (
                s.download_latency.get(&address.index).copied(),
                s.failing_downloads.contains(&address.index),
            )
        });
        if let Some(d) = latency {
            tokio::time::sleep(d).await;
        }
        if failing {
            return Err(EcfsError::transport(
                address.path(),
                "injected download failure",
            ));
        }
        self.op
            .read(&object_path(&address.uuid, address.index))
            .await
            .map(|buf| buf.to_bytes())
            .map_err(|e| EcfsError::transport(address.path(), e.to_string()))
    }
}
