//! Typed gateway API client.
//!
//! Every request body is a struct whose field order is the wire order; the
//! `Checksum` header is the SHA-512 hex of the exact serialized bytes.

use std::sync::Arc;

use bytes::Bytes;
use ecfs_core::{EcfsError, EcfsResult, ItemKind};
use ecfs_crypto::checksum_bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::transport::{ApiResponse, ChunkAddress, ChunkUploadQuery, Transport};

pub mod endpoint {
    pub const DIR_CONTENT: &str = "/v3/dir/content";
    pub const DIR_CREATE: &str = "/v3/dir/create";
    pub const DIR_RENAME: &str = "/v3/dir/rename";
    pub const FILE_RENAME: &str = "/v3/file/rename";
    pub const UPLOAD_DONE: &str = "/v3/upload/done";
    pub const DIR_SHARED: &str = "/v3/dir/shared";
    pub const DIR_LINKED: &str = "/v3/dir/linked";
    pub const ITEM_SHARED: &str = "/v3/item/shared";
    pub const ITEM_LINKED: &str = "/v3/item/linked";
    pub const ITEM_SHARE: &str = "/v3/item/share";
    pub const DIR_LINK_ADD: &str = "/v3/dir/link/add";
    pub const ITEM_SHARED_RENAME: &str = "/v3/item/shared/rename";
    pub const ITEM_LINKED_RENAME: &str = "/v3/item/linked/rename";
    pub const DIR_DOWNLOAD: &str = "/v3/dir/download";
    pub const CHUNK_UPLOAD: &str = "/v3/upload";

    use ecfs_core::ItemKind;

    /// `/v3/{file|dir}/{action}`
    pub fn for_kind(kind: ItemKind, action: &str) -> String {
        format!("/v3/{}/{action}", kind.endpoint_segment())
    }
}

// ── Requests ────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct UuidBody<'a> {
    uuid: &'a str,
}

#[derive(Serialize)]
struct CreateFolderBody<'a> {
    uuid: &'a str,
    name: &'a str,
    #[serde(rename = "nameHashed")]
    name_hashed: &'a str,
    parent: &'a str,
}

#[derive(Serialize)]
struct RenameFolderBody<'a> {
    uuid: &'a str,
    name: &'a str,
    #[serde(rename = "nameHashed")]
    name_hashed: &'a str,
}

#[derive(Serialize)]
struct RenameFileBody<'a> {
    uuid: &'a str,
    name: &'a str,
    #[serde(rename = "nameHashed")]
    name_hashed: &'a str,
    metadata: &'a str,
}

#[derive(Serialize)]
struct MoveBody<'a> {
    uuid: &'a str,
    to: &'a str,
}

#[derive(Serialize)]
struct ShareItemBody<'a> {
    uuid: &'a str,
    parent: &'a str,
    email: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    metadata: &'a str,
}

#[derive(Serialize)]
struct LinkAddBody<'a> {
    uuid: &'a str,
    parent: &'a str,
    #[serde(rename = "linkUUID")]
    link_uuid: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    metadata: &'a str,
    key: &'a str,
    expiration: &'a str,
}

#[derive(Serialize)]
struct SharedRenameBody<'a> {
    uuid: &'a str,
    #[serde(rename = "receiverId")]
    receiver_id: i64,
    metadata: &'a str,
}

#[derive(Serialize)]
struct LinkedRenameBody<'a> {
    uuid: &'a str,
    #[serde(rename = "linkUUID")]
    link_uuid: &'a str,
    metadata: &'a str,
}

/// Finalize payload; makes an uploaded file visible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadDoneRequest {
    pub uuid: String,
    /// Name encrypted under the file key
    pub name: String,
    #[serde(rename = "nameHashed")]
    pub name_hashed: String,
    /// Decimal size encrypted under the file key
    pub size: String,
    pub chunks: u64,
    /// MIME type encrypted under the file key
    pub mime: String,
    /// Deletion token
    pub rm: String,
    /// Full metadata JSON under the newest master key
    pub metadata: String,
    pub version: u32,
    #[serde(rename = "uploadKey")]
    pub upload_key: String,
}

// ── Responses ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub uuid: String,
    pub metadata: String,
    #[serde(default)]
    pub rm: String,
    pub timestamp: i64,
    pub chunks: u64,
    pub size: u64,
    pub bucket: String,
    pub region: String,
    pub parent: String,
    pub version: u32,
    #[serde(default)]
    pub favorited: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFolder {
    pub uuid: String,
    /// Encrypted folder name, or the literal `default`
    pub name: String,
    pub parent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub timestamp: i64,
    #[serde(default)]
    pub favorited: i64,
}

/// One folder level, from `/v3/dir/content`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirContent {
    #[serde(default)]
    pub uploads: Vec<RemoteFile>,
    #[serde(default)]
    pub folders: Vec<RemoteFolder>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeFile {
    pub uuid: String,
    pub bucket: String,
    pub region: String,
    pub chunks: u64,
    pub parent: String,
    pub metadata: String,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeFolder {
    pub uuid: String,
    pub name: String,
    pub parent: String,
}

/// Whole subtree, flat, from `/v3/dir/download`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirTree {
    #[serde(default)]
    pub files: Vec<TreeFile>,
    #[serde(default)]
    pub folders: Vec<TreeFolder>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareUser {
    pub email: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
    /// Receiver id; only present on item-level queries
    #[serde(default)]
    pub id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sharing {
    pub sharing: bool,
    #[serde(default)]
    pub users: Vec<ShareUser>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicLink {
    #[serde(rename = "linkUUID")]
    pub link_uuid: String,
    /// The link's symmetric key, encrypted under a master key
    #[serde(rename = "linkKey")]
    pub link_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Linking {
    pub link: bool,
    #[serde(default)]
    pub links: Vec<PublicLink>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadDone {
    pub chunks: u64,
    #[serde(default)]
    pub size: u64,
}

#[derive(Deserialize)]
struct CreatedFolder {
    uuid: String,
}

/// Storage placement returned by every chunk upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlacement {
    pub region: String,
    pub bucket: String,
}

impl ChunkPlacement {
    pub fn is_known(&self) -> bool {
        !self.region.is_empty() && !self.bucket.is_empty()
    }
}

// ── Client ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
}

fn check(endpoint: &str, resp: ApiResponse) -> EcfsResult<serde_json::Value> {
    if !resp.status {
        return Err(EcfsError::Transport {
            endpoint: endpoint.to_string(),
            code: resp.code,
            message: resp.message,
        });
    }
    Ok(resp.data)
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    async fn send<B: Serialize + ?Sized>(&self, endpoint: &str, body: &B) -> EcfsResult<serde_json::Value> {
        let body = serde_json::to_string(body)?;
        let checksum = checksum_bytes(body.as_bytes());
        debug!(endpoint, bytes = body.len(), "api request");
        let resp = self.transport.post_json(endpoint, body, &checksum).await?;
        check(endpoint, resp)
    }

    async fn request<B, R>(&self, endpoint: &str, body: &B) -> EcfsResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let data = self.send(endpoint, body).await?;
        if data.is_null() {
            return Err(EcfsError::transport(endpoint, "response carried no data"));
        }
        serde_json::from_value(data)
            .map_err(|e| EcfsError::transport(endpoint, format!("decoding response: {e}")))
    }

    async fn request_unit<B: Serialize + ?Sized>(&self, endpoint: &str, body: &B) -> EcfsResult<()> {
        self.send(endpoint, body).await.map(|_| ())
    }

    pub async fn dir_content(&self, uuid: &str) -> EcfsResult<DirContent> {
        self.request(endpoint::DIR_CONTENT, &UuidBody { uuid }).await
    }

    /// Returns the uuid the server assigned (normally the one sent).
    pub async fn create_folder(
        &self,
        uuid: &str,
        name: &str,
        name_hashed: &str,
        parent: &str,
    ) -> EcfsResult<String> {
        let created: CreatedFolder = self
            .request(
                endpoint::DIR_CREATE,
                &CreateFolderBody {
                    uuid,
                    name,
                    name_hashed,
                    parent,
                },
            )
            .await?;
        Ok(created.uuid)
    }

    pub async fn rename_folder(&self, uuid: &str, name: &str, name_hashed: &str) -> EcfsResult<()> {
        self.request_unit(
            endpoint::DIR_RENAME,
            &RenameFolderBody {
                uuid,
                name,
                name_hashed,
            },
        )
        .await
    }

    pub async fn rename_file(
        &self,
        uuid: &str,
        name: &str,
        name_hashed: &str,
        metadata: &str,
    ) -> EcfsResult<()> {
        self.request_unit(
            endpoint::FILE_RENAME,
            &RenameFileBody {
                uuid,
                name,
                name_hashed,
                metadata,
            },
        )
        .await
    }

    pub async fn move_item(&self, kind: ItemKind, uuid: &str, to: &str) -> EcfsResult<()> {
        self.request_unit(&endpoint::for_kind(kind, "move"), &MoveBody { uuid, to })
            .await
    }

    pub async fn trash_item(&self, kind: ItemKind, uuid: &str) -> EcfsResult<()> {
        self.request_unit(&endpoint::for_kind(kind, "trash"), &UuidBody { uuid })
            .await
    }

    pub async fn restore_item(&self, kind: ItemKind, uuid: &str) -> EcfsResult<()> {
        self.request_unit(&endpoint::for_kind(kind, "restore"), &UuidBody { uuid })
            .await
    }

    pub async fn delete_permanently(&self, kind: ItemKind, uuid: &str) -> EcfsResult<()> {
        self.request_unit(&endpoint::for_kind(kind, "delete/permanent"), &UuidBody { uuid })
            .await
    }

    pub async fn upload_done(&self, req: &UploadDoneRequest) -> EcfsResult<UploadDone> {
        self.request(endpoint::UPLOAD_DONE, req).await
    }

    pub async fn folder_sharing(&self, uuid: &str) -> EcfsResult<Sharing> {
        self.request(endpoint::DIR_SHARED, &UuidBody { uuid }).await
    }

    pub async fn folder_linking(&self, uuid: &str) -> EcfsResult<Linking> {
        self.request(endpoint::DIR_LINKED, &UuidBody { uuid }).await
    }

    pub async fn item_sharing(&self, uuid: &str) -> EcfsResult<Sharing> {
        self.request(endpoint::ITEM_SHARED, &UuidBody { uuid }).await
    }

    pub async fn item_linking(&self, uuid: &str) -> EcfsResult<Linking> {
        self.request(endpoint::ITEM_LINKED, &UuidBody { uuid }).await
    }

    pub async fn share_item(
        &self,
        uuid: &str,
        parent: &str,
        email: &str,
        kind: ItemKind,
        metadata: &str,
    ) -> EcfsResult<()> {
        self.request_unit(
            endpoint::ITEM_SHARE,
            &ShareItemBody {
                uuid,
                parent,
                email,
                kind: kind.as_str(),
                metadata,
            },
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn add_to_link(
        &self,
        uuid: &str,
        parent: &str,
        link_uuid: &str,
        kind: ItemKind,
        metadata: &str,
        key: &str,
        expiration: &str,
    ) -> EcfsResult<()> {
        self.request_unit(
            endpoint::DIR_LINK_ADD,
            &LinkAddBody {
                uuid,
                parent,
                link_uuid,
                kind: kind.as_str(),
                metadata,
                key,
                expiration,
            },
        )
        .await
    }

    pub async fn rename_shared_item(&self, uuid: &str, receiver_id: i64, metadata: &str) -> EcfsResult<()> {
        self.request_unit(
            endpoint::ITEM_SHARED_RENAME,
            &SharedRenameBody {
                uuid,
                receiver_id,
                metadata,
            },
        )
        .await
    }

    pub async fn rename_linked_item(&self, uuid: &str, link_uuid: &str, metadata: &str) -> EcfsResult<()> {
        self.request_unit(
            endpoint::ITEM_LINKED_RENAME,
            &LinkedRenameBody {
                uuid,
                link_uuid,
                metadata,
            },
        )
        .await
    }

    pub async fn dir_tree(&self, uuid: &str) -> EcfsResult<DirTree> {
        self.request(endpoint::DIR_DOWNLOAD, &UuidBody { uuid }).await
    }

    /// Upload one encrypted chunk and return where the server put it.
    pub async fn upload_chunk(&self, query: &ChunkUploadQuery, data: Bytes) -> EcfsResult<ChunkPlacement> {
        let checksum = query.checksum();
        let resp = self.transport.put_chunk(query, &checksum, data).await?;
        let data = check(endpoint::CHUNK_UPLOAD, resp)?;
        serde_json::from_value(data).map_err(|e| {
            EcfsError::transport(endpoint::CHUNK_UPLOAD, format!("decoding placement: {e}"))
        })
    }

    pub async fn download_chunk(&self, address: &ChunkAddress) -> EcfsResult<Bytes> {
        self.transport.get_chunk(address).await
    }
}
