//! ecfs-crypto: client-side codec for the encrypted cloud file store
//!
//! Metadata envelopes:
//! ```text
//! V2      "002" || iv (12 ASCII chars) || base64(AES-256-GCM ciphertext || tag)
//!         key = PBKDF2-HMAC-SHA512(master, salt = master, 1 round, 256 bit)
//! Legacy  base64("Salted__" || salt (8) || AES-256-CBC ciphertext)
//!         key/iv = EVP_BytesToKey(MD5, 1 round)
//! ```
//!
//! Content chunks are encrypted independently:
//! ```text
//! [12 bytes: random IV][N bytes: ciphertext][16 bytes: GCM tag]
//! key = the 32-char per-file key, used as raw bytes
//! ```

pub mod chunk;
pub mod envelope;
pub mod error;
pub mod hash;
pub mod kdf;
pub mod keyring;
pub mod legacy;
pub mod random;
pub mod recipient;

pub use chunk::{
    decrypt_chunk, encrypt_chunk, stream_decrypt_chunk, stream_encrypt_chunk, EncryptedChunk,
};
pub use envelope::{decrypt_metadata, encrypt_metadata, EncryptedEnvelope};
pub use error::{CryptoError, CryptoResult};
pub use hash::{checksum_bytes, hash, name_hash, HashAlgorithm};
pub use kdf::{derive_key_from_password, transform_key};
pub use keyring::{
    decrypt_file_metadata, decrypt_folder_name, decrypt_link_key, decrypt_with_keyring,
    encrypt_file_metadata, encrypt_folder_metadata, encrypt_with_keyring, Keyring,
};
pub use random::generate_random_string;
pub use recipient::encrypt_metadata_for_recipient;

/// AES-GCM nonce size used for both envelopes and chunks
pub const IV_SIZE: usize = 12;

/// AES-GCM authentication tag size
pub const TAG_SIZE: usize = 16;

/// AES-256 key size
pub const KEY_SIZE: usize = 32;

/// Version tag of the current metadata envelope
pub const METADATA_VERSION_TAG: &str = "002";

/// Content encryption version written by this client
pub const CONTENT_VERSION: u32 = 2;
