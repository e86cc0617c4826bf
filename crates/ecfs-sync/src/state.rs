//! Local metadata cache: directory entries plus decrypted-metadata memo tables.
//!
//! A folder's children are replaced wholesale on every sync; the remote
//! listing is an authoritative snapshot, not a diff. Memo rows are keyed by
//! the exact ciphertext they were decrypted from (`used_metadata`), so an
//! entry whose remote metadata changed simply misses and is decrypted again.
//!
//! rusqlite calls run under `spawn_blocking` behind an async mutex.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use ecfs_core::{EcfsError, EcfsResult, FileMetadata, Item, ItemKind};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;
use tracing::debug;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS items (
    uuid         TEXT PRIMARY KEY NOT NULL,
    parent       TEXT NOT NULL,
    name         TEXT NOT NULL,
    type         TEXT NOT NULL,
    mime         TEXT NOT NULL DEFAULT '',
    size         INTEGER NOT NULL DEFAULT 0,
    timestamp    INTEGER NOT NULL DEFAULT 0,
    lastModified INTEGER NOT NULL DEFAULT 0,
    key          TEXT NOT NULL DEFAULT '',
    chunks       INTEGER NOT NULL DEFAULT 0,
    region       TEXT NOT NULL DEFAULT '',
    bucket       TEXT NOT NULL DEFAULT '',
    version      INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS items_parent ON items (parent);

CREATE TABLE IF NOT EXISTS decrypted_file_metadata (
    uuid          TEXT PRIMARY KEY NOT NULL,
    name          TEXT NOT NULL,
    size          INTEGER,
    mime          TEXT,
    key           TEXT NOT NULL,
    lastModified  INTEGER,
    hash          TEXT,
    used_metadata TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS decrypted_file_metadata_used ON decrypted_file_metadata (used_metadata);

CREATE TABLE IF NOT EXISTS decrypted_folder_metadata (
    uuid          TEXT PRIMARY KEY NOT NULL,
    name          TEXT NOT NULL,
    used_metadata TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS decrypted_folder_metadata_used ON decrypted_folder_metadata (used_metadata);

CREATE TABLE IF NOT EXISTS settings (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
";

const ITEM_COLUMNS: &str =
    "uuid, parent, name, type, mime, size, timestamp, lastModified, key, chunks, region, bucket, version";

fn cache_err(e: rusqlite::Error) -> EcfsError {
    EcfsError::Cache(e.to_string())
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    let kind: String = row.get(3)?;
    let kind = ItemKind::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown item type {kind:?}").into(),
        )
    })?;
    Ok(Item {
        uuid: row.get(0)?,
        parent: row.get(1)?,
        name: row.get(2)?,
        kind,
        mime: row.get(4)?,
        size: row.get::<_, i64>(5)? as u64,
        created_at: row.get(6)?,
        modified_at: row.get(7)?,
        file_key: row.get(8)?,
        chunk_count: row.get::<_, i64>(9)? as u64,
        region: row.get(10)?,
        bucket: row.get(11)?,
        version: row.get::<_, i64>(12)? as u32,
    })
}

fn insert_item(conn: &Connection, item: &Item) -> rusqlite::Result<usize> {
    conn.execute(
        &format!("INSERT OR REPLACE INTO items ({ITEM_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"),
        params![
            item.uuid,
            item.parent,
            item.name,
            item.kind.as_str(),
            item.mime,
            item.size as i64,
            item.created_at,
            item.modified_at,
            item.file_key,
            item.chunk_count as i64,
            item.region,
            item.bucket,
            item.version as i64,
        ],
    )
}

#[derive(Clone)]
pub struct MetadataCache {
    conn: Arc<Mutex<Connection>>,
}

impl MetadataCache {
    /// Open (or create) the cache database at `db_path`.
    pub fn open(db_path: &Path) -> EcfsResult<Self> {
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(db_path).map_err(cache_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(cache_err)?;
        debug!("opened metadata cache at {}", db_path.display());
        Self::init(conn)
    }

    pub fn open_in_memory() -> EcfsResult<Self> {
        Self::init(Connection::open_in_memory().map_err(cache_err)?)
    }

    fn init(conn: Connection) -> EcfsResult<Self> {
        conn.execute_batch(SCHEMA).map_err(cache_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<F, R>(&self, f: F) -> EcfsResult<R>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn).map_err(cache_err)
        })
        .await
        .map_err(|e| EcfsError::Cache(format!("spawn_blocking failed: {e}")))?
    }

    /// Atomically replace every child of `parent` with `items`.
    pub async fn replace_children(&self, parent: &str, items: Vec<Item>) -> EcfsResult<()> {
        let parent = parent.to_string();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute("DELETE FROM items WHERE parent = ?1", params![parent])?;
            for item in &items {
                insert_item(&tx, item)?;
            }
            tx.commit()?;
            debug!(parent = %parent, removed, inserted = items.len(), "replaced children");
            Ok(())
        })
        .await
    }

    pub async fn upsert_item(&self, item: &Item) -> EcfsResult<()> {
        let item = item.clone();
        self.run(move |conn| insert_item(conn, &item).map(|_| ())).await
    }

    pub async fn get_item(&self, uuid: &str) -> EcfsResult<Option<Item>> {
        let uuid = uuid.to_string();
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM items WHERE uuid = ?1"),
                params![uuid],
                item_from_row,
            )
            .optional()
        })
        .await
    }

    /// Children of `parent`, folders first, then by name.
    pub async fn children(&self, parent: &str) -> EcfsResult<Vec<Item>> {
        let parent = parent.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ITEM_COLUMNS} FROM items WHERE parent = ?1 ORDER BY type DESC, name"
            ))?;
            let rows = stmt.query_map(params![parent], item_from_row)?;
            rows.collect()
        })
        .await
    }

    /// Every parent uuid that has at least one cached child.
    pub async fn distinct_parents(&self) -> EcfsResult<Vec<String>> {
        self.run(|conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT parent FROM items ORDER BY parent")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect()
        })
        .await
    }

    pub async fn delete_item(&self, uuid: &str) -> EcfsResult<bool> {
        let uuid = uuid.to_string();
        self.run(move |conn| {
            conn.execute("DELETE FROM items WHERE uuid = ?1", params![uuid])
                .map(|n| n > 0)
        })
        .await
    }

    /// Delete a file row, or a folder and all of its cached descendants.
    ///
    /// Walks the subtree with an explicit worklist; descendants are removed
    /// before the node itself and each row is visited once, so parent cycles
    /// terminate. Returns the number of rows deleted.
    pub async fn delete_subtree_recursive(&self, uuid: &str) -> EcfsResult<usize> {
        let root = uuid.to_string();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let mut order = Vec::new();
            let mut seen = HashSet::new();
            let mut stack = vec![root];
            while let Some(current) = stack.pop() {
                if !seen.insert(current.clone()) {
                    continue;
                }
                let kind: Option<String> = tx
                    .query_row(
                        "SELECT type FROM items WHERE uuid = ?1",
                        params![current],
                        |row| row.get(0),
                    )
                    .optional()?;
                if kind.as_deref() == Some(ItemKind::Folder.as_str()) {
                    let mut stmt = tx.prepare("SELECT uuid FROM items WHERE parent = ?1")?;
                    let kids = stmt
                        .query_map(params![current], |row| row.get::<_, String>(0))?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    stack.extend(kids);
                }
                order.push(current);
            }

            let mut deleted = 0;
            for uuid in order.iter().rev() {
                deleted += tx.execute("DELETE FROM items WHERE uuid = ?1", params![uuid])?;
            }
            tx.commit()?;
            Ok(deleted)
        })
        .await
    }

    // ── decrypted metadata memo ──

    pub async fn memo_lookup_file(&self, raw: &str) -> EcfsResult<Option<FileMetadata>> {
        let raw = raw.to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT name, size, mime, key, lastModified, hash FROM decrypted_file_metadata WHERE used_metadata = ?1",
                params![raw],
                |row| {
                    Ok(FileMetadata {
                        name: row.get(0)?,
                        size: row.get::<_, Option<i64>>(1)?.map(|s| s as u64),
                        mime: row.get(2)?,
                        key: row.get(3)?,
                        last_modified: row.get(4)?,
                        hash: row.get(5)?,
                    })
                },
            )
            .optional()
        })
        .await
    }

    pub async fn memo_store_file(&self, uuid: &str, raw: &str, meta: &FileMetadata) -> EcfsResult<()> {
        let (uuid, raw, meta) = (uuid.to_string(), raw.to_string(), meta.clone());
        self.run(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO decrypted_file_metadata (uuid, name, size, mime, key, lastModified, hash, used_metadata) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    uuid,
                    meta.name,
                    meta.size.map(|s| s as i64),
                    meta.mime,
                    meta.key,
                    meta.last_modified,
                    meta.hash,
                    raw
                ],
            )
            .map(|_| ())
        })
        .await
    }

    pub async fn memo_lookup_folder(&self, raw: &str) -> EcfsResult<Option<String>> {
        let raw = raw.to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT name FROM decrypted_folder_metadata WHERE used_metadata = ?1",
                params![raw],
                |row| row.get(0),
            )
            .optional()
        })
        .await
    }

    pub async fn memo_store_folder(&self, uuid: &str, raw: &str, name: &str) -> EcfsResult<()> {
        let (uuid, raw, name) = (uuid.to_string(), raw.to_string(), name.to_string());
        self.run(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO decrypted_folder_metadata (uuid, name, used_metadata) VALUES (?1, ?2, ?3)",
                params![uuid, name, raw],
            )
            .map(|_| ())
        })
        .await
    }

    // ── settings ──

    pub async fn get_setting(&self, key: &str) -> EcfsResult<Option<String>> {
        let key = key.to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })
        .await
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> EcfsResult<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.run(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map(|_| ())
        })
        .await
    }

    pub async fn remove_setting(&self, key: &str) -> EcfsResult<()> {
        let key = key.to_string();
        self.run(move |conn| {
            conn.execute("DELETE FROM settings WHERE key = ?1", params![key])
                .map(|_| ())
        })
        .await
    }
}
