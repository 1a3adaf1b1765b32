use std::fmt;

use kvg_crypto::HasherError;
use kvg_store::StoreError;
use kvg_types::{CanonicalId, TypeError};

/// The kind of record an error refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    Object,
    Relationship,
    Branch,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Object => "object",
            Self::Relationship => "relationship",
            Self::Branch => "branch",
        })
    }
}

/// Errors from graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The record is absent, or already deleted where a live head is needed.
    #[error("{kind} not found: {id}")]
    NotFound { kind: RecordKind, id: String },

    /// A natural-key or identity collision.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// The caller's expected version is not the chain's current version.
    #[error(
        "stale version for {canonical_id}: expected {expected}, current {}",
        version_or_unknown(current)
    )]
    StaleVersion {
        canonical_id: CanonicalId,
        expected: u32,
        current: Option<u32>,
    },

    /// A relationship endpoint is not a live object in scope.
    #[error("dangling endpoint: {0}")]
    DanglingEndpoint(String),

    /// The record belongs to another organization or project. The message
    /// never names the other tenant.
    #[error("{kind} {id} is not accessible in this tenant")]
    TenantMismatch { kind: RecordKind, id: String },

    /// An enumeration exceeded a hard limit and truncation was not allowed.
    #[error("limit exceeded: {what} has more than {limit} entries")]
    LimitExceeded { what: String, limit: usize },

    /// The backing store failed; the transaction was rolled back.
    #[error("transaction failure: {0}")]
    TransactionFailure(StoreError),

    /// Validation failure.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl GraphError {
    pub fn not_found(kind: RecordKind, id: impl fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Expected conditions a caller may retry after a fresh read.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StaleVersion { .. } | Self::DuplicateKey(_))
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::DuplicateKey(_) => "duplicate_key",
            Self::StaleVersion { .. } => "stale_version",
            Self::DanglingEndpoint(_) => "dangling_endpoint",
            Self::TenantMismatch { .. } => "tenant_mismatch",
            Self::LimitExceeded { .. } => "limit_exceeded",
            Self::TransactionFailure(_) => "transaction_failure",
            Self::InvalidInput(_) => "invalid_input",
        }
    }
}

fn version_or_unknown(version: &Option<u32>) -> String {
    version.map_or_else(|| "unknown".to_string(), |v| v.to_string())
}

impl From<StoreError> for GraphError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict {
                canonical_id,
                version,
            } => Self::StaleVersion {
                canonical_id,
                expected: version.saturating_sub(1),
                current: None,
            },
            StoreError::Constraint(msg) => Self::DuplicateKey(msg),
            other => Self::TransactionFailure(other),
        }
    }
}

impl From<HasherError> for GraphError {
    fn from(err: HasherError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

impl From<TypeError> for GraphError {
    fn from(err: TypeError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

/// Result alias for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;
