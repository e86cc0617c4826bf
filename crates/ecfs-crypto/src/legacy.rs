//! Version-1 AES-256-CBC formats. Decryption only, apart from test fixtures.
//!
//! Three encodings exist for v1 chunks and must be told apart by sniffing
//! the first 16 bytes:
//! - binary OpenSSL `Salted__` + salt + ciphertext,
//! - the same, base64-encoded (starts with `U2FsdGVk`),
//! - raw CBC with the file key as AES key and its first 16 bytes as IV.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::evp_bytes_to_key;
use crate::KEY_SIZE;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

const SALTED_HEADER: &[u8] = b"Salted__";
const SALTED_PREFIX: &[u8] = b"Salted_";
const SALTED_PREFIX_B64: &str = "U2FsdGVk";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyChunkFormat {
    /// Binary `Salted__` header
    Salted,
    /// Base64 text of a salted blob
    SaltedBase64,
    /// No header: key = file key bytes, IV = key[..16]
    RawKey,
}

/// Classify a v1 chunk by its first 16 bytes.
pub fn sniff(head: &[u8]) -> LegacyChunkFormat {
    let head = &head[..head.len().min(16)];
    if head.starts_with(SALTED_PREFIX) {
        return LegacyChunkFormat::Salted;
    }
    if head.starts_with(SALTED_PREFIX_B64.as_bytes()) {
        return LegacyChunkFormat::SaltedBase64;
    }
    if STANDARD.encode(head).starts_with(SALTED_PREFIX_B64) {
        return LegacyChunkFormat::Salted;
    }
    LegacyChunkFormat::RawKey
}

/// Split `Salted__ || salt(8) || ciphertext`.
pub fn split_salted(raw: &[u8]) -> CryptoResult<([u8; 8], &[u8])> {
    if raw.len() < 16 || !raw.starts_with(SALTED_HEADER) {
        return Err(CryptoError::BadFormat(
            "missing OpenSSL salted header".into(),
        ));
    }
    let mut salt = [0u8; 8];
    salt.copy_from_slice(&raw[8..16]);
    Ok((salt, &raw[16..]))
}

pub fn open_salted_parts(salt: &[u8; 8], ciphertext: &[u8], password: &[u8]) -> CryptoResult<Vec<u8>> {
    let (key, iv) = evp_bytes_to_key(password, salt);
    cbc_decrypt(&key[..], &iv[..], ciphertext)
}

/// Decrypt a binary OpenSSL-salted blob.
pub fn open_salted(raw: &[u8], password: &[u8]) -> CryptoResult<Vec<u8>> {
    let (salt, ciphertext) = split_salted(raw)?;
    open_salted_parts(&salt, ciphertext, password)
}

/// Produce `Salted__ || salt || AES-256-CBC(plaintext)` with EVP key derivation.
///
/// Nothing writes this format any more; it exists to build v1 fixtures.
pub fn seal_salted(plaintext: &[u8], password: &[u8], salt: [u8; 8]) -> Vec<u8> {
    let (key, iv) = evp_bytes_to_key(password, &salt);
    let ciphertext = Aes256CbcEnc::new((&key[..]).into(), (&iv[..]).into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    let mut out = Vec::with_capacity(16 + ciphertext.len());
    out.extend_from_slice(SALTED_HEADER);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&ciphertext);
    out
}

/// Raw-key CBC, the header-less v1 chunk encoding.
pub fn seal_raw_key(plaintext: &[u8], key: &str) -> CryptoResult<Vec<u8>> {
    let key = raw_key(key)?;
    Ok(Aes256CbcEnc::new(key.into(), (&key[..16]).into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

/// Decrypt a whole v1 chunk body.
pub fn decrypt_legacy_chunk(data: &[u8], key: &str) -> CryptoResult<Vec<u8>> {
    if data.len() < 16 {
        return Err(CryptoError::BadFormat(format!(
            "v1 chunk is {} bytes, need at least 16",
            data.len()
        )));
    }
    match sniff(&data[..16]) {
        LegacyChunkFormat::Salted => open_salted(data, key.as_bytes()),
        LegacyChunkFormat::SaltedBase64 => {
            let text: Vec<u8> = data
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            let raw = STANDARD
                .decode(text)
                .map_err(|e| CryptoError::BadFormat(format!("v1 chunk base64: {e}")))?;
            open_salted(&raw, key.as_bytes())
        }
        LegacyChunkFormat::RawKey => {
            let key = raw_key(key)?;
            cbc_decrypt(key, &key[..16], data)
        }
    }
}

fn raw_key(key: &str) -> CryptoResult<&[u8]> {
    let bytes = key.as_bytes();
    if bytes.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKey(format!(
            "file key is {} bytes, expected {KEY_SIZE}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

fn cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(CryptoError::BadFormat(format!(
            "CBC ciphertext length {} is not a positive multiple of 16",
            ciphertext.len()
        )));
    }
    Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::AuthFailure("bad CBC padding".into()))
}
