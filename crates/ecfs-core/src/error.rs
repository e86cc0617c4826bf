use thiserror::Error;

pub type EcfsResult<T> = Result<T, EcfsError>;

#[derive(Debug, Error)]
pub enum EcfsError {
    /// Malformed ciphertext or envelope
    #[error("format error: {0}")]
    Format(String),

    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(String),

    /// Authentication tag or padding mismatch; fatal only once every key is exhausted
    #[error("authentication failure: {0}")]
    AuthFailure(String),

    #[error("transport error at {endpoint}: {code} {message}")]
    Transport {
        endpoint: String,
        code: String,
        message: String,
    },

    #[error("state error: {0}")]
    State(String),

    /// One or more chunks failed; the whole file must be restarted
    #[error("transfer of {uuid} failed: chunk(s) {failed_indices:?} did not complete")]
    PartialTransfer {
        uuid: String,
        failed_indices: Vec<u64>,
    },

    /// Every chunk was stored but finalize failed. The chunks are not
    /// reachable as a file and nothing cleans them up.
    #[error("finalize failed for {uuid}: {chunks} uploaded chunk(s) left orphaned: {reason}")]
    OrphanedChunks {
        uuid: String,
        chunks: u64,
        reason: String,
    },

    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EcfsError {
    pub fn transport(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        EcfsError::Transport {
            endpoint: endpoint.into(),
            code: String::new(),
            message: message.into(),
        }
    }

    /// True for errors produced by a decrypt attempt with the wrong key.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, EcfsError::AuthFailure(_))
    }
}
