//! Master keyring and trial decryption.
//!
//! The keyring is the user's append-only list of historical master keys.
//! New ciphertext is always produced under the newest key. Decryption is a
//! blind trial: nothing in an envelope says which key produced it, so every
//! key is tried, newest first, and the first plaintext that passes the
//! caller's acceptance check wins. Cost grows linearly with keyring length
//! for entries written under old keys.

use ecfs_core::{FileMetadata, FolderMetadata};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::envelope::{decrypt_metadata, encrypt_metadata};
use crate::error::{CryptoError, CryptoResult};

#[derive(Default)]
pub struct Keyring {
    keys: Vec<SecretString>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from oldest to newest.
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(|k| SecretString::from(k.into())).collect(),
        }
    }

    /// Append a key; it becomes the one used for new encryption.
    pub fn push(&mut self, key: impl Into<String>) {
        self.keys.push(SecretString::from(key.into()));
    }

    pub fn newest(&self) -> Option<&str> {
        self.keys.last().map(|k| k.expose_secret())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn newest_first(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().rev().map(|k| k.expose_secret())
    }

    /// Try each key, newest first; per-key failures are swallowed.
    fn trial<F>(&self, blob: &str, accept: F) -> Option<String>
    where
        F: Fn(&str) -> bool,
    {
        for (i, key) in self.newest_first().enumerate() {
            match decrypt_metadata(blob, key) {
                Ok(plaintext) if accept(&plaintext) => return Some(plaintext),
                Ok(_) => tracing::trace!(key_index = i, "plaintext rejected, trying older key"),
                Err(e) => tracing::trace!(key_index = i, error = %e, "trial decrypt failed"),
            }
        }
        None
    }
}

impl std::fmt::Debug for Keyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyring")
            .field("keys", &format_args!("[REDACTED; {}]", self.keys.len()))
            .finish()
    }
}

#[derive(Deserialize)]
struct NameProbe {
    #[serde(default)]
    name: String,
}

fn has_name(plaintext: &str) -> bool {
    serde_json::from_str::<NameProbe>(plaintext)
        .map(|p| !p.name.is_empty())
        .unwrap_or(false)
}

/// First plaintext that parses as JSON with a non-empty `name`, or `None`.
pub fn decrypt_with_keyring(blob: &str, keyring: &Keyring) -> Option<String> {
    keyring.trial(blob, has_name)
}

pub fn decrypt_file_metadata(blob: &str, keyring: &Keyring) -> Option<FileMetadata> {
    let plaintext = decrypt_with_keyring(blob, keyring)?;
    match serde_json::from_str::<FileMetadata>(&plaintext) {
        Ok(meta) if !meta.key.is_empty() => Some(meta),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "file metadata is not a file payload");
            None
        }
    }
}

/// Decrypt a folder name. The literal blob `default` is the root folder.
pub fn decrypt_folder_name(blob: &str, keyring: &Keyring) -> Option<String> {
    if blob == "default" {
        return Some("Default".to_string());
    }
    let plaintext = decrypt_with_keyring(blob, keyring)?;
    serde_json::from_str::<FolderMetadata>(&plaintext)
        .ok()
        .map(|m| m.name)
}

/// Recover a public link's symmetric key. Shorter than 17 chars is rejected.
pub fn decrypt_link_key(blob: &str, keyring: &Keyring) -> Option<String> {
    keyring.trial(blob, |plaintext| plaintext.chars().count() > 16)
}

/// Encrypt under the newest key.
pub fn encrypt_with_keyring(plaintext: &str, keyring: &Keyring) -> CryptoResult<String> {
    let key = keyring
        .newest()
        .ok_or_else(|| CryptoError::InvalidKey("keyring is empty".into()))?;
    encrypt_metadata(plaintext, key)
}

pub fn encrypt_file_metadata(meta: &FileMetadata, keyring: &Keyring) -> CryptoResult<String> {
    let json = serde_json::to_string(meta)
        .map_err(|e| CryptoError::BadFormat(format!("serialize file metadata: {e}")))?;
    encrypt_with_keyring(&json, keyring)
}

pub fn encrypt_folder_metadata(meta: &FolderMetadata, keyring: &Keyring) -> CryptoResult<String> {
    let json = serde_json::to_string(meta)
        .map_err(|e| CryptoError::BadFormat(format!("serialize folder metadata: {e}")))?;
    encrypt_with_keyring(&json, keyring)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn older_key_is_found() {
        let blob = encrypt_metadata(r#"{"name":"a.txt"}"#, "k1").unwrap();
        let keyring = Keyring::from_keys(["k0", "k1"]);
        assert_eq!(
            decrypt_with_keyring(&blob, &keyring).as_deref(),
            Some(r#"{"name":"a.txt"}"#)
        );

        let keyring = Keyring::from_keys(["k1", "k0", "k2"]);
        assert!(decrypt_with_keyring(&blob, &keyring).is_some());
    }

    #[test]
    fn no_matching_key() {
        let blob = encrypt_metadata(r#"{"name":"a.txt"}"#, "k9").unwrap();
        assert!(decrypt_with_keyring(&blob, &Keyring::from_keys(["k0", "k1"])).is_none());
        assert!(decrypt_with_keyring(&blob, &Keyring::new()).is_none());
    }

    #[test]
    fn empty_name_is_rejected() {
        let blob = encrypt_metadata(r#"{"name":""}"#, "k1").unwrap();
        assert!(decrypt_with_keyring(&blob, &Keyring::from_keys(["k1"])).is_none());
        let blob = encrypt_metadata("not json", "k1").unwrap();
        assert!(decrypt_with_keyring(&blob, &Keyring::from_keys(["k1"])).is_none());
    }

    #[test]
    fn encrypts_under_newest_key() {
        let mut keyring = Keyring::from_keys(["old"]);
        keyring.push("new");
        assert_eq!(keyring.newest(), Some("new"));

        let blob = encrypt_folder_metadata(&FolderMetadata { name: "docs".into() }, &keyring).unwrap();
        assert!(decrypt_metadata(&blob, "new").is_ok());
        assert!(decrypt_metadata(&blob, "old").is_err());
        assert_eq!(decrypt_folder_name(&blob, &keyring).as_deref(), Some("docs"));
    }

    #[test]
    fn empty_keyring_cannot_encrypt() {
        assert!(matches!(
            encrypt_with_keyring("x", &Keyring::new()),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn default_folder_name() {
        assert_eq!(
            decrypt_folder_name("default", &Keyring::new()).as_deref(),
            Some("Default")
        );
    }

    #[test]
    fn file_metadata_roundtrip() {
        let keyring = Keyring::from_keys(["k"]);
        let meta = FileMetadata {
            name: "report.pdf".into(),
            size: Some(1234),
            mime: Some("application/pdf".into()),
            key: "x".repeat(32),
            last_modified: Some(1_700_000_000_000),
            hash: None,
        };
        let blob = encrypt_file_metadata(&meta, &keyring).unwrap();
        assert_eq!(decrypt_file_metadata(&blob, &keyring), Some(meta));
    }

    #[test]
    fn link_key_length_check() {
        let keyring = Keyring::from_keys(["k"]);
        let short = encrypt_metadata("sixteen-chars-xx", "k").unwrap();
        assert!(decrypt_link_key(&short, &keyring).is_none());
        let long = encrypt_metadata("seventeen-chars-x", "k").unwrap();
        assert_eq!(decrypt_link_key(&long, &keyring).as_deref(), Some("seventeen-chars-x"));
    }

    #[test]
    fn debug_redacts() {
        let keyring = Keyring::from_keys(["super-secret"]);
        assert!(!format!("{keyring:?}").contains("super-secret"));
    }
}
