//! RSA-OAEP (SHA-512) re-encryption of metadata for share recipients.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPublicKey};
use sha2::Sha512;

use crate::error::{CryptoError, CryptoResult};

/// Parse a base64 DER public key (SPKI, falling back to PKCS#1).
pub fn parse_public_key(public_key_b64: &str) -> CryptoResult<RsaPublicKey> {
    let der = STANDARD
        .decode(public_key_b64.trim())
        .map_err(|e| CryptoError::BadFormat(format!("public key base64: {e}")))?;
    RsaPublicKey::from_public_key_der(&der)
        .or_else(|_| RsaPublicKey::from_pkcs1_der(&der))
        .map_err(|e| CryptoError::Rsa(format!("public key DER: {e}")))
}

/// Encrypt `plaintext` for one recipient; output is base64.
pub fn encrypt_metadata_for_recipient(plaintext: &str, public_key_b64: &str) -> CryptoResult<String> {
    let key = parse_public_key(public_key_b64)?;
    let sealed = key
        .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha512>(), plaintext.as_bytes())
        .map_err(|e| CryptoError::Rsa(e.to_string()))?;
    Ok(STANDARD.encode(sealed))
}
