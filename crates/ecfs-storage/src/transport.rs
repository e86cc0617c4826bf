//! Transport collaborator interface.

use async_trait::async_trait;
use bytes::Bytes;
use ecfs_core::EcfsResult;
use ecfs_crypto::checksum_bytes;
use serde::{Deserialize, Serialize};

/// Envelope of every gateway and ingest response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: bool,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ApiResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: true,
            code: String::new(),
            message: String::new(),
            data,
        }
    }

    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: false,
            code: code.into(),
            message: message.into(),
            data: serde_json::Value::Null,
        }
    }
}

/// Query parameters of a chunk upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkUploadQuery {
    pub uuid: String,
    pub index: u64,
    pub upload_key: String,
    pub parent: String,
    /// SHA-512 hex of the encrypted chunk object
    pub hash: String,
}

#[derive(Serialize)]
struct QueryJson<'a> {
    uuid: String,
    index: String,
    #[serde(rename = "uploadKey")]
    upload_key: &'a str,
    parent: String,
    hash: String,
}

impl ChunkUploadQuery {
    fn as_json(&self) -> QueryJson<'_> {
        QueryJson {
            uuid: self.uuid.to_lowercase(),
            index: self.index.to_string(),
            upload_key: &self.upload_key,
            parent: self.parent.to_lowercase(),
            hash: self.hash.to_lowercase(),
        }
    }

    /// `uuid=..&index=..&uploadKey=..&parent=..&hash=..`
    pub fn to_query_string(&self) -> String {
        let q = self.as_json();
        format!(
            "uuid={}&index={}&uploadKey={}&parent={}&hash={}",
            q.uuid, q.index, q.upload_key, q.parent, q.hash
        )
    }

    /// Request checksum: SHA-512 hex over the parameters rendered as a JSON
    /// object in query order, index as a string.
    pub fn checksum(&self) -> String {
        // Serializing a struct of strings cannot fail.
        let json = serde_json::to_string(&self.as_json()).unwrap_or_default();
        checksum_bytes(json.as_bytes())
    }
}

/// Location of one stored chunk object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkAddress {
    pub region: String,
    pub bucket: String,
    pub uuid: String,
    pub index: u64,
}

impl ChunkAddress {
    /// `{region}/{bucket}/{uuid}/{index}` relative to the egress endpoint.
    pub fn path(&self) -> String {
        format!("{}/{}/{}/{}", self.region, self.bucket, self.uuid, self.index)
    }
}

/// Network primitives supplied by the host.
///
/// Implementations send the checksum in a `Checksum` header and the bearer
/// API key in `Authorization`; neither retries.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST an already-serialized JSON body to a gateway endpoint.
    async fn post_json(&self, endpoint: &str, body: String, checksum: &str) -> EcfsResult<ApiResponse>;

    /// PUT an encrypted chunk to the ingest endpoint.
    async fn put_chunk(
        &self,
        query: &ChunkUploadQuery,
        checksum: &str,
        data: Bytes,
    ) -> EcfsResult<ApiResponse>;

    /// GET an encrypted chunk from the egress endpoint.
    async fn get_chunk(&self, address: &ChunkAddress) -> EcfsResult<Bytes>;
}
