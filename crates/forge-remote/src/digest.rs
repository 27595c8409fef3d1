//! Digest computation over serialized messages and raw bytes.

use forge_core::hashing::ContentHash;
use prost::Message;

use crate::proto::rev2::Digest;

/// Digest of raw bytes: lowercase-hex SHA-256 plus the byte length.
pub fn digest_bytes(bytes: &[u8]) -> Digest {
    Digest {
        hash: ContentHash::of(bytes).to_hex(),
        size_bytes: bytes.len() as i64,
    }
}

/// Serialize a message and digest the bytes. Returns the digest together
/// with the bytes so callers can upload without re-encoding.
pub fn digest_message<M: Message>(message: &M) -> (Digest, Vec<u8>) {
    let bytes = message.encode_to_vec();
    (digest_bytes(&bytes), bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::rev2::Directory;

    /// SHA-256 of the empty byte string; the digest of an empty Directory.
    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn empty_directory_has_the_well_known_digest() {
        let (digest, bytes) = digest_message(&Directory::default());
        assert!(bytes.is_empty());
        assert_eq!(digest.hash, EMPTY_SHA256);
        assert_eq!(digest.size_bytes, 0);
    }

    #[test]
    fn digests_are_pure_functions_of_content() {
        let first = digest_bytes(b"hello");
        let second = digest_bytes(b"hello");
        assert_eq!(first, second);
        assert_ne!(first, digest_bytes(b"hello!"));
        assert_eq!(first.size_bytes, 5);
    }
}
