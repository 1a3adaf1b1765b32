use kvg_types::CanonicalId;

/// Errors from graph store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A row for this chain position already exists, or the insert does not
    /// directly follow the chain's latest version.
    #[error("version conflict on chain {canonical_id}: version {version} is not the next version")]
    VersionConflict {
        canonical_id: CanonicalId,
        version: u32,
    },

    /// A uniqueness constraint other than the chain index was violated.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// The row to update does not exist.
    #[error("row not found: {0}")]
    MissingRow(String),

    /// Serialization or deserialization of a stored column failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A stored row could not be decoded into a record.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// The SQLite backend reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A writer panicked while holding the store lock.
    #[error("store lock poisoned")]
    LockPoisoned,
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
