//! Versioned metadata envelopes.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::transform_key;
use crate::legacy;
use crate::random::generate_random_string;
use crate::{IV_SIZE, METADATA_VERSION_TAG, TAG_SIZE};

/// Base64 of the OpenSSL `Salted__` header.
pub const LEGACY_MAGIC: &str = "U2FsdGVk";

/// A metadata blob split into its parts, before any key is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptedEnvelope {
    /// OpenSSL-salted AES-256-CBC, key/IV from EVP_BytesToKey
    Legacy { salt: [u8; 8], ciphertext: Vec<u8> },
    /// AES-256-GCM under the transformed key; `ciphertext` includes the tag
    V2 { iv: [u8; IV_SIZE], ciphertext: Vec<u8> },
}

impl EncryptedEnvelope {
    pub fn parse(blob: &str) -> CryptoResult<Self> {
        if blob.starts_with(LEGACY_MAGIC) {
            let raw = STANDARD
                .decode(blob)
                .map_err(|e| CryptoError::BadFormat(format!("legacy envelope base64: {e}")))?;
            let (salt, ciphertext) = legacy::split_salted(&raw)?;
            return Ok(EncryptedEnvelope::Legacy {
                salt,
                ciphertext: ciphertext.to_vec(),
            });
        }

        let bytes = blob.as_bytes();
        if bytes.len() < 3 {
            return Err(CryptoError::BadFormat("envelope too short".into()));
        }
        if &bytes[..3] != METADATA_VERSION_TAG.as_bytes() {
            return Err(CryptoError::UnsupportedVersion(
                String::from_utf8_lossy(&bytes[..3]).into_owned(),
            ));
        }
        if bytes.len() < 3 + IV_SIZE {
            return Err(CryptoError::BadFormat(format!(
                "v2 envelope is {} bytes, need at least {}",
                bytes.len(),
                3 + IV_SIZE
            )));
        }

        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&bytes[3..3 + IV_SIZE]);
        let ciphertext = STANDARD
            .decode(&bytes[3 + IV_SIZE..])
            .map_err(|e| CryptoError::BadFormat(format!("v2 envelope base64: {e}")))?;
        if ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::BadFormat(
                "v2 ciphertext shorter than the GCM tag".into(),
            ));
        }
        Ok(EncryptedEnvelope::V2 { iv, ciphertext })
    }

    /// Decrypt with a single master key. Auth failures are hard errors here.
    pub fn open(&self, key: &str) -> CryptoResult<Vec<u8>> {
        match self {
            EncryptedEnvelope::Legacy { salt, ciphertext } => {
                legacy::open_salted_parts(salt, ciphertext, key.as_bytes())
            }
            EncryptedEnvelope::V2 { iv, ciphertext } => {
                let derived = transform_key(key);
                let cipher = Aes256Gcm::new_from_slice(&derived[..])
                    .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
                cipher
                    .decrypt(Nonce::from_slice(iv), ciphertext.as_slice())
                    .map_err(|_| CryptoError::AuthFailure("metadata tag mismatch".into()))
            }
        }
    }
}

/// Decrypt a metadata blob with one key.
pub fn decrypt_metadata(blob: &str, key: &str) -> CryptoResult<String> {
    let plaintext = EncryptedEnvelope::parse(blob)?.open(key)?;
    String::from_utf8(plaintext)
        .map_err(|_| CryptoError::AuthFailure("decrypted metadata is not UTF-8".into()))
}

/// Encrypt metadata into a V2 envelope.
pub fn encrypt_metadata(plaintext: &str, key: &str) -> CryptoResult<String> {
    let iv = generate_random_string(IV_SIZE);
    let derived = transform_key(key);
    let cipher = Aes256Gcm::new_from_slice(&derived[..])
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let sealed = cipher
        .encrypt(Nonce::from_slice(iv.as_bytes()), plaintext.as_bytes())
        .map_err(|e| CryptoError::BadFormat(format!("metadata encryption failed: {e}")))?;

    let mut out = String::with_capacity(3 + IV_SIZE + sealed.len() * 4 / 3 + 4);
    out.push_str(METADATA_VERSION_TAG);
    out.push_str(&iv);
    out.push_str(&STANDARD.encode(sealed));
    Ok(out)
}
