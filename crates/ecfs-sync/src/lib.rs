//! ecfs-sync: the client engine
//!
//! - [`state`]: SQLite metadata cache and decrypted-metadata memo tables
//! - [`listing`]: reconciles remote folder listings into the cache
//! - [`engine`]: chunked, bounded-concurrency upload and download
//! - [`share`]: re-encrypts metadata for existing shares and public links
//! - [`ops`]: structural mutations tying the above together

pub mod engine;
pub mod listing;
pub mod locks;
pub mod metrics;
pub mod ops;
pub mod share;
pub mod state;
pub mod temp;

pub use engine::{DownloadOutcome, TransferEngine, UploadOutcome};
pub use listing::{convert_timestamp_to_ms, DirectorySync, SyncReport};
pub use locks::TransferLocks;
pub use metrics::TransferMetrics;
pub use ops::Drive;
pub use share::{PropagationReport, SharePropagator};
pub use state::MetadataCache;
pub use temp::TempStore;
