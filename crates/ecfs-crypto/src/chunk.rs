//! Per-chunk AES-256-GCM encryption/decryption
//!
//! Encrypted chunk format (binary):
//! ```text
//! [12 bytes: random IV][N bytes: ciphertext][16 bytes: GCM tag]
//! ```
//!
//! The key is the 32-character per-file key used as raw bytes. The upload
//! checksum is the SHA-512 hex of the whole encrypted object.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};
use crate::hash::checksum_bytes;
use crate::legacy::decrypt_legacy_chunk;
use crate::{IV_SIZE, KEY_SIZE, TAG_SIZE};

/// Result of encrypting one chunk to a scratch file.
#[derive(Debug, Clone)]
pub struct EncryptedChunk {
    pub path: PathBuf,
    /// SHA-512 hex of `IV || ciphertext || tag`
    pub checksum: String,
    pub plaintext_len: u64,
    pub encrypted_len: u64,
}

fn file_cipher(key: &str) -> CryptoResult<Aes256Gcm> {
    let bytes = key.as_bytes();
    if bytes.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKey(format!(
            "file key is {} bytes, expected {KEY_SIZE}",
            bytes.len()
        )));
    }
    Aes256Gcm::new_from_slice(bytes).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Encrypt a single chunk.
///
/// Returns: `[12-byte IV][ciphertext][16-byte tag]`
pub fn encrypt_chunk(plaintext: &[u8], key: &str) -> CryptoResult<Vec<u8>> {
    let cipher = file_cipher(key)?;

    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| CryptoError::BadFormat(format!("chunk encryption failed: {e}")))?;

    let mut out = Vec::with_capacity(IV_SIZE + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a single chunk of the given content encryption version.
pub fn decrypt_chunk(encrypted: &[u8], key: &str, version: u32) -> CryptoResult<Vec<u8>> {
    match version {
        1 => decrypt_legacy_chunk(encrypted, key),
        2 => {
            if encrypted.len() < IV_SIZE + TAG_SIZE {
                return Err(CryptoError::BadFormat(format!(
                    "encrypted chunk too short: {} bytes (minimum {})",
                    encrypted.len(),
                    IV_SIZE + TAG_SIZE
                )));
            }
            let (iv, ciphertext) = encrypted.split_at(IV_SIZE);
            file_cipher(key)?
                .decrypt(Nonce::from_slice(iv), ciphertext)
                .map_err(|_| {
                    CryptoError::AuthFailure("chunk decryption failed: wrong key or corrupted data".into())
                })
        }
        v => Err(CryptoError::UnsupportedVersion(v.to_string())),
    }
}

/// Encrypt plaintext bytes `[index * chunk_size, (index + 1) * chunk_size)`
/// of `input` into `output`.
pub fn stream_encrypt_chunk(
    input: &Path,
    output: &Path,
    chunk_size: u64,
    key: &str,
    index: u64,
) -> CryptoResult<EncryptedChunk> {
    let offset = index
        .checked_mul(chunk_size)
        .ok_or_else(|| CryptoError::BadFormat(format!("chunk offset overflow at index {index}")))?;

    let mut file = File::open(input)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut plaintext = Vec::with_capacity(chunk_size as usize);
    file.take(chunk_size).read_to_end(&mut plaintext)?;

    let encrypted = encrypt_chunk(&plaintext, key)?;
    let checksum = checksum_bytes(&encrypted);

    let mut out = File::create(output)?;
    out.write_all(&encrypted)?;
    out.sync_all()?;

    Ok(EncryptedChunk {
        path: output.to_path_buf(),
        checksum,
        plaintext_len: plaintext.len() as u64,
        encrypted_len: encrypted.len() as u64,
    })
}

/// Decrypt an encrypted chunk file into `output`, returning the plaintext length.
pub fn stream_decrypt_chunk(
    input: &Path,
    output: &Path,
    key: &str,
    version: u32,
) -> CryptoResult<u64> {
    let encrypted = std::fs::read(input)?;
    let plaintext = decrypt_chunk(&encrypted, key, version)?;

    let mut out = File::create(output)?;
    out.write_all(&plaintext)?;
    out.sync_all()?;
    Ok(plaintext.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::legacy::seal_salted;
    use crate::random::generate_random_string;

    fn file_key() -> String {
        generate_random_string(32)
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = file_key();
        let encrypted = encrypt_chunk(b"hello, encrypted world!", &key).unwrap();
        assert_eq!(encrypted.len(), IV_SIZE + 23 + TAG_SIZE);
        assert_eq!(decrypt_chunk(&encrypted, &key, 2).unwrap(), b"hello, encrypted world!");
    }

    #[test]
    fn test_decrypt_wrong_key() {
        let encrypted = encrypt_chunk(b"data", &file_key()).unwrap();
        assert!(matches!(
            decrypt_chunk(&encrypted, &file_key(), 2),
            Err(CryptoError::AuthFailure(_))
        ));
    }

    #[test]
    fn test_tampered_chunk() {
        let key = file_key();
        let mut encrypted = encrypt_chunk(b"data data data", &key).unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0x01;
        assert!(decrypt_chunk(&encrypted, &key, 2).is_err());
    }

    #[test]
    fn test_too_short_and_unknown_version() {
        let key = file_key();
        assert!(matches!(
            decrypt_chunk(&[0u8; 10], &key, 2),
            Err(CryptoError::BadFormat(_))
        ));
        assert!(matches!(
            decrypt_chunk(&[0u8; 64], &key, 3),
            Err(CryptoError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_key_must_be_32_bytes() {
        assert!(matches!(
            encrypt_chunk(b"x", "short"),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_stream_chunks_cover_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("plain.bin");
        let data: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&input, &data).unwrap();
        let key = file_key();

        let mut reassembled = Vec::new();
        for index in 0..3u64 {
            let enc_path = dir.path().join(format!("enc.{index}"));
            let chunk = stream_encrypt_chunk(&input, &enc_path, 1000, &key, index).unwrap();
            let on_disk = std::fs::read(&enc_path).unwrap();
            assert_eq!(chunk.checksum, checksum_bytes(&on_disk));
            assert_eq!(chunk.encrypted_len, on_disk.len() as u64);

            let dec_path = dir.path().join(format!("dec.{index}"));
            let n = stream_decrypt_chunk(&enc_path, &dec_path, &key, 2).unwrap();
            assert_eq!(n, chunk.plaintext_len);
            reassembled.extend(std::fs::read(&dec_path).unwrap());
        }
        assert_eq!(reassembled, data);
    }

    #[test]
    fn test_chunk_past_end_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("plain.bin");
        std::fs::write(&input, b"abc").unwrap();
        let chunk =
            stream_encrypt_chunk(&input, &dir.path().join("e"), 1000, &file_key(), 5).unwrap();
        assert_eq!(chunk.plaintext_len, 0);
    }

    #[test]
    fn test_version_one_dispatches_to_legacy() {
        let key = file_key();
        let data = seal_salted(b"legacy content", key.as_bytes(), *b"12345678");
        assert_eq!(decrypt_chunk(&data, &key, 1).unwrap(), b"legacy content");
    }
}
