use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{EcfsError, EcfsResult};

/// Size of a content chunk in bytes (1 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Top-level engine configuration (loaded from ecfs.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EcfsConfig {
    pub logging: LoggingConfig,
    pub api: ApiConfig,
    pub transfer: TransferConfig,
    pub cache: CacheConfig,
    pub crypto: CryptoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// JSON API gateway
    pub gateway_url: String,
    /// Chunk upload endpoint
    pub ingest_url: String,
    /// Chunk download endpoint
    pub egress_url: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Plaintext bytes per chunk
    pub chunk_size: u64,
    /// Size of the shared worker pool for chunk I/O
    pub chunk_pool_size: usize,
    /// Whole-file downloads allowed in flight at once
    pub max_concurrent_downloads: usize,
    /// Whole-file uploads allowed in flight at once
    pub max_concurrent_uploads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// SQLite metadata cache path
    pub db_path: PathBuf,
    /// Scratch directory for encrypted/decrypted chunk files
    pub temp_dir: PathBuf,
    /// Decrypted local copies, addressed as `{files_dir}/{uuid}/{name}`
    pub files_dir: PathBuf,
    /// Temp files older than this are removed by cleanup (seconds)
    pub temp_max_age_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Metadata envelope version written by this client
    pub metadata_version: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            gateway_url: "https://gateway.filen.io".into(),
            ingest_url: "https://ingest.filen.io".into(),
            egress_url: "https://egest.filen.io".into(),
            request_timeout_secs: 3600,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_pool_size: 30,
            max_concurrent_downloads: 3,
            max_concurrent_uploads: 3,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("~/.local/share/ecfs/db_v1.sqlite3"),
            temp_dir: PathBuf::from("~/.cache/ecfs/temp"),
            files_dir: PathBuf::from("~/.local/share/ecfs/files"),
            temp_max_age_secs: 3 * 3600,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self { metadata_version: 2 }
    }
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(rest) = path.to_str().and_then(|s| s.strip_prefix("~/")) {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

impl EcfsConfig {
    /// Load a config file. A missing file yields defaults.
    pub fn load(path: &Path) -> EcfsResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: EcfsConfig = toml::from_str(&content)
            .map_err(|e| EcfsError::Config(format!("parsing config {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EcfsResult<()> {
        if self.transfer.chunk_size == 0 {
            return Err(EcfsError::Config("transfer.chunk_size must be > 0".into()));
        }
        if self.transfer.chunk_pool_size == 0 {
            return Err(EcfsError::Config(
                "transfer.chunk_pool_size must be > 0".into(),
            ));
        }
        if self.transfer.max_concurrent_downloads == 0 || self.transfer.max_concurrent_uploads == 0
        {
            return Err(EcfsError::Config(
                "transfer.max_concurrent_* must be > 0".into(),
            ));
        }
        if self.crypto.metadata_version != 2 {
            return Err(EcfsError::Config(format!(
                "crypto.metadata_version {} is not writable (only 2)",
                self.crypto.metadata_version
            )));
        }
        Ok(())
    }
}
