//! Content hashes and versioned fingerprints.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Read;
use std::str::FromStr;

/// Scheme tag carried by every fingerprint string.
///
/// Changing the hashing rule requires a new tag. Remote fingerprints carrying
/// any other tag are treated as unknown, so the next publish re-uploads every
/// object once instead of comparing incompatible digests.
pub const FINGERPRINT_SCHEME: &str = "v1-sha256";

/// Read buffer used when fingerprinting streams (64 KiB).
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// A SHA-256 content hash represented as 32 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Create a new ContentHash from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Compute SHA-256 hash of data.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != 64 {
            return Err(crate::Error::InvalidHash(format!(
                "expected 64 hex chars, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex_str =
                std::str::from_utf8(chunk).map_err(|e| crate::Error::InvalidHash(e.to_string()))?;
            bytes[i] = u8::from_str_radix(hex_str, 16)
                .map_err(|e| crate::Error::InvalidHash(e.to_string()))?;
        }
        Ok(Self(bytes))
    }

    /// Encode as lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Fingerprint of a published object: SHA-256 of the exact bytes uploaded,
/// tagged with [`FINGERPRINT_SCHEME`].
///
/// String form: `v1-sha256:<64 lowercase hex chars>`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(ContentHash);

impl Fingerprint {
    /// Fingerprint an in-memory buffer.
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(ContentHash::compute(data))
    }

    /// Fingerprint a reader in fixed-size chunks, returning the fingerprint
    /// and the number of bytes read. Memory use is bounded regardless of the
    /// input size.
    pub fn of_reader<R: Read>(mut reader: R) -> std::io::Result<(Self, u64)> {
        let mut hasher = Self::hasher();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buf[..n]);
            total += n as u64;
        }
        Ok((hasher.finalize(), total))
    }

    /// Create an incremental hasher.
    pub fn hasher() -> FingerprintHasher {
        FingerprintHasher(Sha256::new())
    }

    /// Get the underlying content hash.
    pub fn content_hash(&self) -> &ContentHash {
        &self.0
    }

    /// Parse a fingerprint string, rejecting any scheme other than the
    /// current one.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let (scheme, hex) = s
            .split_once(':')
            .ok_or_else(|| crate::Error::InvalidFingerprint(format!("missing scheme tag: {s}")))?;
        if scheme != FINGERPRINT_SCHEME {
            return Err(crate::Error::UnsupportedScheme {
                found: scheme.to_string(),
                expected: FINGERPRINT_SCHEME,
            });
        }
        let hash = ContentHash::from_hex(hex)
            .map_err(|e| crate::Error::InvalidFingerprint(e.to_string()))?;
        Ok(Self(hash))
    }

    /// Parse a fingerprint recovered from a remote store.
    ///
    /// Returns `None` for malformed values and for values produced under a
    /// different scheme; callers treat both as "unknown".
    pub fn parse_remote(s: &str) -> Option<Self> {
        Self::parse(s).ok()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.0.to_hex()[..16])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", FINGERPRINT_SCHEME, self.0.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Incremental fingerprint hasher.
pub struct FingerprintHasher(Sha256);

impl FingerprintHasher {
    /// Update the hasher with data.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finalize and return the fingerprint.
    pub fn finalize(self) -> Fingerprint {
        Fingerprint(ContentHash(self.0.finalize().into()))
    }
}
