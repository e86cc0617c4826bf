use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Kind of a cached drive entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::File => "file",
            ItemKind::Folder => "folder",
        }
    }

    /// Path segment used by the `/v3/{file|dir}/...` endpoints.
    pub fn endpoint_segment(&self) -> &'static str {
        match self {
            ItemKind::File => "file",
            ItemKind::Folder => "dir",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(ItemKind::File),
            "folder" => Some(ItemKind::Folder),
            _ => None,
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file or folder entry with decrypted metadata, as held in the local cache.
///
/// Folders carry an empty `file_key`, zero `chunk_count` and empty placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub uuid: String,
    pub parent: String,
    pub name: String,
    pub kind: ItemKind,
    pub mime: String,
    pub size: u64,
    /// Server-side creation timestamp (ms)
    pub created_at: i64,
    /// Client-reported last modification (ms)
    pub modified_at: i64,
    pub file_key: String,
    pub chunk_count: u64,
    pub region: String,
    pub bucket: String,
    /// Content encryption version (1 = legacy CBC, 2 = AES-GCM)
    pub version: u32,
}

impl Item {
    pub fn folder(uuid: impl Into<String>, parent: impl Into<String>, name: impl Into<String>, timestamp: i64) -> Self {
        Item {
            uuid: uuid.into(),
            parent: parent.into(),
            name: name.into(),
            kind: ItemKind::Folder,
            mime: String::new(),
            size: 0,
            created_at: timestamp,
            modified_at: timestamp,
            file_key: String::new(),
            chunk_count: 0,
            region: String::new(),
            bucket: String::new(),
            version: 0,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind == ItemKind::Folder
    }

    /// Plaintext metadata payload for a file entry.
    pub fn file_metadata(&self) -> FileMetadata {
        FileMetadata {
            name: self.name.clone(),
            size: Some(self.size),
            mime: Some(self.mime.clone()),
            key: self.file_key.clone(),
            last_modified: Some(self.modified_at),
            hash: None,
        }
    }
}

/// Decrypted file metadata JSON: `{"name","size","mime","key","lastModified"}`.
///
/// Field order is the wire order; it matters because request checksums are
/// computed over the exact serialized bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    pub key: String,
    #[serde(
        rename = "lastModified",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_modified: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Decrypted folder metadata JSON: `{"name"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderMetadata {
    pub name: String,
}

/// Plaintext metadata of either kind, used when re-encrypting for share targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemMetadata {
    File(FileMetadata),
    Folder(FolderMetadata),
}

impl ItemMetadata {
    pub fn kind(&self) -> ItemKind {
        match self {
            ItemMetadata::File(_) => ItemKind::File,
            ItemMetadata::Folder(_) => ItemKind::Folder,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ItemMetadata::File(m) => &m.name,
            ItemMetadata::Folder(m) => &m.name,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        match self {
            ItemMetadata::File(m) => serde_json::to_string(m),
            ItemMetadata::Folder(m) => serde_json::to_string(m),
        }
    }

    /// JSON handed to share recipients and public links.
    ///
    /// File payloads always carry every field, `hash` included; absent
    /// values become `0`, `""` or the current time for `lastModified`.
    pub fn to_share_json(&self) -> serde_json::Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        self.to_share_json_at(now)
    }

    fn to_share_json_at(&self, now: i64) -> serde_json::Result<String> {
        match self {
            ItemMetadata::File(m) => serde_json::to_string(&SharedFileMetadata {
                name: &m.name,
                size: m.size.unwrap_or(0),
                mime: m.mime.as_deref().unwrap_or(""),
                key: &m.key,
                last_modified: m.last_modified.unwrap_or(now),
                hash: m.hash.as_deref().unwrap_or(""),
            }),
            ItemMetadata::Folder(m) => serde_json::to_string(m),
        }
    }
}

#[derive(Serialize)]
struct SharedFileMetadata<'a> {
    name: &'a str,
    size: u64,
    mime: &'a str,
    key: &'a str,
    #[serde(rename = "lastModified")]
    last_modified: i64,
    hash: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_metadata_wire_order() {
        let meta = FileMetadata {
            name: "a.txt".into(),
            size: Some(3),
            mime: Some("text/plain".into()),
            key: "k".into(),
            last_modified: Some(1700000000000),
            hash: None,
        };
        assert_eq!(
            serde_json::to_string(&meta).unwrap(),
            r#"{"name":"a.txt","size":3,"mime":"text/plain","key":"k","lastModified":1700000000000}"#
        );
    }

    #[test]
    fn share_payload_always_carries_hash() {
        let meta = ItemMetadata::File(FileMetadata {
            name: "a.txt".into(),
            size: None,
            mime: None,
            key: "k".into(),
            last_modified: None,
            hash: None,
        });
        assert_eq!(
            meta.to_share_json_at(42).unwrap(),
            r#"{"name":"a.txt","size":0,"mime":"","key":"k","lastModified":42,"hash":""}"#
        );

        let hashed = ItemMetadata::File(FileMetadata {
            name: "b".into(),
            size: Some(7),
            mime: Some("text/plain".into()),
            key: "k".into(),
            last_modified: Some(1),
            hash: Some("abc".into()),
        });
        assert_eq!(
            hashed.to_share_json_at(42).unwrap(),
            r#"{"name":"b","size":7,"mime":"text/plain","key":"k","lastModified":1,"hash":"abc"}"#
        );

        let folder = ItemMetadata::Folder(FolderMetadata { name: "docs".into() });
        assert_eq!(folder.to_share_json_at(42).unwrap(), r#"{"name":"docs"}"#);
    }

    #[test]
    fn file_metadata_tolerates_missing_optionals() {
        let meta: FileMetadata = serde_json::from_str(r#"{"name":"x","key":"k"}"#).unwrap();
        assert_eq!(meta.size, None);
        assert_eq!(meta.last_modified, None);
    }

    #[test]
    fn item_kind_segments() {
        assert_eq!(ItemKind::Folder.endpoint_segment(), "dir");
        assert_eq!(ItemKind::File.endpoint_segment(), "file");
        assert_eq!(ItemKind::parse("folder"), Some(ItemKind::Folder));
        assert_eq!(ItemKind::parse("dir"), None);
    }

    #[test]
    fn folder_item_has_no_content_fields() {
        let item = Item::folder("u", "p", "docs", 5);
        assert!(item.is_folder());
        assert!(item.file_key.is_empty());
        assert_eq!(item.chunk_count, 0);
    }
}
