use ecfs_core::EcfsError;
use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("malformed ciphertext: {0}")]
    BadFormat(String),

    #[error("unsupported version: {0}")]
    UnsupportedVersion(String),

    /// Wrong key, bad GCM tag or bad CBC padding
    #[error("decryption failed: {0}")]
    AuthFailure(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("RSA error: {0}")]
    Rsa(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CryptoError> for EcfsError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::BadFormat(m) => EcfsError::Format(m),
            CryptoError::UnsupportedVersion(v) => EcfsError::UnsupportedVersion(v),
            CryptoError::AuthFailure(m) => EcfsError::AuthFailure(m),
            CryptoError::InvalidKey(m) => EcfsError::NotAuthenticated(m),
            CryptoError::Rsa(m) => EcfsError::Format(format!("rsa: {m}")),
            CryptoError::Io(e) => EcfsError::Io(e),
        }
    }
}
