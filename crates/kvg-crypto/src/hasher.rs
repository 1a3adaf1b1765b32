use kvg_types::ContentHash;
use serde::Serialize;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag (e.g., `"kvg-object-v1"`) that is prepended
/// to every hash computation. Bump the version suffix whenever the set of hashed
/// fields changes.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for graph object content.
    pub const OBJECT: Self = Self {
        domain: "kvg-object-v1",
    };
    /// Hasher for relationship content.
    pub const RELATIONSHIP: Self = Self {
        domain: "kvg-relationship-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> ContentHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        ContentHash::from_hash(*hasher.finalize().as_bytes())
    }

    /// Hash a serializable value as canonical JSON.
    ///
    /// The value is first lowered to a `serde_json::Value`, whose maps keep
    /// keys sorted, so struct field order and map insertion order never affect
    /// the result.
    pub fn hash_json<T: Serialize>(&self, value: &T) -> Result<ContentHash, HasherError> {
        let data = canonical_json(value)?;
        Ok(self.hash(&data))
    }

    /// Verify that data produces the expected hash.
    pub fn verify(&self, data: &[u8], expected: &ContentHash) -> bool {
        self.hash(data) == *expected
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

/// Canonical JSON bytes: sorted object keys, no insignificant whitespace.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>, HasherError> {
    let value =
        serde_json::to_value(value).map_err(|e| HasherError::Serialization(e.to_string()))?;
    serde_json::to_vec(&value).map_err(|e| HasherError::Serialization(e.to_string()))
}

/// Errors from hashing operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HasherError {
    #[error("serialization error: {0}")]
    Serialization(String),
}
