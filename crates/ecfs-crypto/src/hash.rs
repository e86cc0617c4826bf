//! Digest helpers: request checksums, name hashes, generic hex digests.

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
    Md5,
}

fn hex_digest<D: Digest>(data: &[u8]) -> String {
    hex::encode(D::digest(data))
}

/// Lowercase hex digest of the UTF-8 bytes of `message`.
pub fn hash(message: &str, algorithm: HashAlgorithm) -> String {
    let data = message.as_bytes();
    match algorithm {
        HashAlgorithm::Sha1 => hex_digest::<Sha1>(data),
        HashAlgorithm::Sha256 => hex_digest::<Sha256>(data),
        HashAlgorithm::Sha384 => hex_digest::<Sha384>(data),
        HashAlgorithm::Sha512 => hex_digest::<Sha512>(data),
        HashAlgorithm::Md5 => hex_digest::<Md5>(data),
    }
}

/// `sha1_hex(sha512_hex(name))`, sent as `nameHashed` for server-side
/// duplicate detection. Callers pass the lowercased name.
pub fn name_hash(name: &str) -> String {
    hash(&hash(name, HashAlgorithm::Sha512), HashAlgorithm::Sha1)
}

/// SHA-512 hex over raw bytes (request bodies, encrypted chunks).
pub fn checksum_bytes(data: &[u8]) -> String {
    hex_digest::<Sha512>(data)
}
