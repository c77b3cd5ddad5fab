//! Content digests
//!
//! A [`ContentDigest`] is the 32-byte hash of a file's raw bytes and is the
//! primary key claims are stored under. Hashing always runs over the byte
//! sequence itself, never over a text rendering of it.

use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DigestError;

/// Length of a digest in bytes
pub const DIGEST_LEN: usize = 32;

/// Chunk size used when streaming a reader through the hasher
const READ_CHUNK: usize = 64 * 1024;

/// Content-addressed identifier of a file
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentDigest([u8; DIGEST_LEN]);

impl ContentDigest {
    /// Wrap raw hash bytes
    pub const fn new(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Build a digest from a byte slice of exactly [`DIGEST_LEN`] bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DigestError> {
        let array: [u8; DIGEST_LEN] =
            bytes
                .try_into()
                .map_err(|_| DigestError::InvalidLength {
                    expected: DIGEST_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(array))
    }

    /// Get the underlying bytes
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// `0x`-prefixed lowercase hex
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Short hash for log lines (first 4 bytes)
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({}..)", self.short_hex())
    }
}

impl FromStr for ContentDigest {
    type Err = DigestError;

    /// Parse hex with or without a `0x` prefix
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(trimmed).map_err(|e| DigestError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

/// Hash function collaborator
///
/// Must be deterministic; collision resistance is taken from the
/// implementation, not engineered here.
pub trait ContentHasher: Send + Sync {
    fn hash(&self, bytes: &[u8]) -> ContentDigest;
}

/// BLAKE3 hasher (32-byte output)
///
/// Only digests produced by the same function match a ledger's keys.
/// Substrate-style proof-of-existence pallets are usually keyed by
/// Blake2-256 of the file; against such a ledger, supply a Blake2-256
/// [`ContentHasher`] through `ClaimSync::with_hasher` instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct Blake3Hasher;

impl ContentHasher for Blake3Hasher {
    fn hash(&self, bytes: &[u8]) -> ContentDigest {
        ContentDigest(*blake3::hash(bytes).as_bytes())
    }
}

/// Compute the digest of a byte sequence with the default hasher
///
/// Total: the empty sequence has a digest like any other. The default is
/// [`Blake3Hasher`]; see there for ledgers keyed by another hash.
pub fn digest(bytes: &[u8]) -> ContentDigest {
    Blake3Hasher.hash(bytes)
}

/// Stream a reader through the default hasher
///
/// Produces the same digest as [`digest`] over the full contents. Read
/// failures are returned to the caller untouched.
pub fn digest_reader<R: Read>(mut reader: R) -> io::Result<ContentDigest> {
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(ContentDigest(*hasher.finalize().as_bytes()))
}
