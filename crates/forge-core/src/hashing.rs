//! Content hashing: CAS digests and input fingerprints are both SHA-256,
//! carried as raw bytes and rendered as lowercase hex.

use std::fmt::{Display, Formatter};
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Width of a SHA-256 hash in bytes.
pub const HASH_BYTES: usize = 32;

const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

/// A SHA-256 content hash.
///
/// This is the identity of a blob everywhere in forge: the hex form feeds
/// remote-execution digests, the raw form feeds input fingerprints.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; HASH_BYTES]);

impl ContentHash {
    /// Hash a byte slice.
    pub fn of<B: AsRef<[u8]> + ?Sized>(bytes: &B) -> Self {
        Self(Sha256::digest(bytes.as_ref()).into())
    }

    /// Hash everything a reader yields, in bounded chunks. Preferred for
    /// input files, which can be large.
    pub fn of_reader<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut chunk = [0_u8; 64 * 1024];
        loop {
            let read = reader.read(&mut chunk)?;
            if read == 0 {
                break;
            }
            hasher.update(&chunk[..read]);
        }
        Ok(Self(hasher.finalize().into()))
    }

    /// Hash a file's contents.
    pub fn of_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::of_reader(std::fs::File::open(path)?)
    }

    /// The raw hash bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_BYTES] {
        &self.0
    }

    /// Lowercase hex, 64 characters.
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(HASH_BYTES * 2);
        for byte in self.0 {
            out.push(HEX_CHARS[(byte >> 4) as usize] as char);
            out.push(HEX_CHARS[(byte & 0x0f) as usize] as char);
        }
        out
    }

    /// Parse the hex form back into a hash.
    pub fn from_hex(hex: &str) -> Result<Self, HashParseError> {
        if hex.len() != HASH_BYTES * 2 {
            return Err(HashParseError::Length(hex.len()));
        }
        let mut bytes = [0_u8; HASH_BYTES];
        for (index, pair) in hex.as_bytes().chunks_exact(2).enumerate() {
            let high = hex_value(pair[0]).ok_or(HashParseError::NotHex(pair[0] as char))?;
            let low = hex_value(pair[1]).ok_or(HashParseError::NotHex(pair[1] as char))?;
            bytes[index] = high << 4 | low;
        }
        Ok(Self(bytes))
    }
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

/// The hex form of a hash was malformed
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum HashParseError {
    #[error("expected {} hex characters, got {0}", HASH_BYTES * 2)]
    Length(usize),
    #[error("{0:?} is not a lowercase hex character")]
    NotHex(char),
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ContentHash {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_hex().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        ContentHash::from_hex(&hex).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // FIPS 180-2 test vector
    const ABC_HASH: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn matches_the_standard_test_vector() {
        assert_eq!(ContentHash::of(b"abc" as &[u8]).to_hex(), ABC_HASH);
    }

    #[test]
    fn empty_input_has_the_well_known_hash() {
        assert_eq!(
            ContentHash::of(b"" as &[u8]).to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn reader_and_slice_agree() {
        let blob: Vec<u8> = (0..100_000u32).map(|i| i as u8).collect();
        let from_slice = ContentHash::of(&blob);
        let from_reader = ContentHash::of_reader(blob.as_slice()).unwrap();
        assert_eq!(from_slice, from_reader);
    }

    #[test]
    fn file_hashing_sees_the_contents() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();
        file.flush().unwrap();
        let hash = ContentHash::of_file(file.path()).unwrap();
        assert_eq!(hash.to_hex(), ABC_HASH);
    }

    #[test]
    fn hex_round_trips() {
        let hash = ContentHash::of(b"round trip" as &[u8]);
        assert_eq!(ContentHash::from_hex(&hash.to_hex()).unwrap(), hash);
        let parsed: ContentHash = ABC_HASH.parse().unwrap();
        assert_eq!(parsed.to_hex(), ABC_HASH);
    }

    #[test]
    fn malformed_hex_is_rejected() {
        assert_eq!(
            ContentHash::from_hex("ab12"),
            Err(HashParseError::Length(4))
        );
        let uppercase = ABC_HASH.to_uppercase();
        assert!(matches!(
            ContentHash::from_hex(&uppercase),
            Err(HashParseError::NotHex(_))
        ));
    }

    #[test]
    fn serde_uses_the_hex_form() {
        let hash = ContentHash::of(b"abc" as &[u8]);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", ABC_HASH));
        let back: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
