//! Key derivation: PBKDF2 for V2 envelopes, EVP_BytesToKey for legacy blobs.

use hmac::Hmac;
use md5::{Digest, Md5};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::hash::HashAlgorithm;
use crate::KEY_SIZE;

/// V2 metadata key: PBKDF2-HMAC-SHA512 of `key` salted with itself, one
/// round, 256 bits.
pub fn transform_key(key: &str) -> Zeroizing<[u8; KEY_SIZE]> {
    let mut out = Zeroizing::new([0u8; KEY_SIZE]);
    pbkdf2::pbkdf2_hmac::<Sha512>(key.as_bytes(), key.as_bytes(), 1, &mut out[..]);
    out
}

/// Generic PBKDF2 returning a hex string of `bits / 8` bytes.
pub fn derive_key_from_password(
    password: &str,
    salt: &str,
    bits: usize,
    hash: HashAlgorithm,
    rounds: u32,
) -> CryptoResult<String> {
    if bits == 0 || bits % 8 != 0 {
        return Err(CryptoError::InvalidKey(format!(
            "bit length {bits} is not a positive multiple of 8"
        )));
    }
    if rounds == 0 {
        return Err(CryptoError::InvalidKey("PBKDF2 rounds must be > 0".into()));
    }
    let mut out = Zeroizing::new(vec![0u8; bits / 8]);
    let (p, s) = (password.as_bytes(), salt.as_bytes());
    match hash {
        HashAlgorithm::Sha1 => pbkdf2::pbkdf2::<Hmac<Sha1>>(p, s, rounds, &mut out),
        HashAlgorithm::Sha256 => pbkdf2::pbkdf2::<Hmac<Sha256>>(p, s, rounds, &mut out),
        HashAlgorithm::Sha512 => pbkdf2::pbkdf2::<Hmac<Sha512>>(p, s, rounds, &mut out),
        other => {
            return Err(CryptoError::InvalidKey(format!(
                "{other:?} is not a PBKDF2 digest"
            )))
        }
    }
    .map_err(|e| CryptoError::InvalidKey(format!("pbkdf2: {e}")))?;
    Ok(hex::encode(out.as_slice()))
}

/// OpenSSL `EVP_BytesToKey(aes-256-cbc, md5, salt, password, count = 1)`.
///
/// Returns the 32-byte key and 16-byte IV.
pub fn evp_bytes_to_key(
    password: &[u8],
    salt: &[u8],
) -> (Zeroizing<[u8; KEY_SIZE]>, Zeroizing<[u8; 16]>) {
    let mut material = Zeroizing::new(Vec::with_capacity(48));
    let mut prev: Vec<u8> = Vec::new();
    while material.len() < 48 {
        let mut hasher = Md5::new();
        hasher.update(&prev);
        hasher.update(password);
        hasher.update(salt);
        prev = hasher.finalize().to_vec();
        material.extend_from_slice(&prev);
    }

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    let mut iv = Zeroizing::new([0u8; 16]);
    key.copy_from_slice(&material[..KEY_SIZE]);
    iv.copy_from_slice(&material[KEY_SIZE..48]);
    (key, iv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_key_matches_generic_pbkdf2() {
        let generic = derive_key_from_password("k1", "k1", 256, HashAlgorithm::Sha512, 1).unwrap();
        assert_eq!(hex::encode(transform_key("k1").as_slice()), generic);
    }

    #[test]
    fn transform_key_is_deterministic() {
        assert_eq!(*transform_key("abc"), *transform_key("abc"));
        assert_ne!(*transform_key("abc"), *transform_key("abd"));
    }

    #[test]
    fn pbkdf2_sha1_rfc6070_vector() {
        let out = derive_key_from_password("password", "salt", 160, HashAlgorithm::Sha1, 1).unwrap();
        assert_eq!(out, "0c60c80f961f0e71f3a9b524af6012062fe037a6");
    }

    #[test]
    fn rejects_odd_bit_length() {
        assert!(derive_key_from_password("p", "s", 12, HashAlgorithm::Sha256, 1).is_err());
        assert!(derive_key_from_password("p", "s", 256, HashAlgorithm::Md5, 1).is_err());
    }

    #[test]
    fn evp_first_block_is_md5_of_password_and_salt() {
        let (key, iv) = evp_bytes_to_key(b"pw", b"saltsalt");
        let d1 = Md5::digest(b"pwsaltsalt");
        assert_eq!(&key[..16], d1.as_slice());
        let mut h = Md5::new();
        h.update(d1);
        h.update(b"pwsaltsalt");
        assert_eq!(&key[16..], h.finalize().as_slice());
        assert_eq!(iv.len(), 16);
    }
}
