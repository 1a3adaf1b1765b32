use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use kvg_sdk::{GraphError, SdkError};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("missing tenant header: {0}")]
    MissingTenant(&'static str),

    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: &'static str, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("sdk error: {0}")]
    Sdk(#[from] SdkError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Graph(err) => match err {
                GraphError::NotFound { .. } | GraphError::DanglingEndpoint(_) => {
                    StatusCode::NOT_FOUND
                }
                GraphError::DuplicateKey(_) | GraphError::StaleVersion { .. } => {
                    StatusCode::CONFLICT
                }
                GraphError::TenantMismatch { .. } => StatusCode::FORBIDDEN,
                GraphError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                GraphError::LimitExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                GraphError::TransactionFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::MissingTenant(_) | Self::InvalidHeader { .. } => StatusCode::BAD_REQUEST,
            Self::Config(_) | Self::Sdk(_) | Self::Io(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Graph(err) => err.code(),
            Self::MissingTenant(_) => "missing_tenant",
            Self::InvalidHeader { .. } => "invalid_header",
            Self::Config(_) | Self::Sdk(_) | Self::Io(_) | Self::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use kvg_sdk::CanonicalId;

    #[test]
    fn graph_errors_map_to_statuses() {
        let cases = [
            (GraphError::DuplicateKey("k".into()), StatusCode::CONFLICT),
            (
                GraphError::StaleVersion {
                    canonical_id: CanonicalId::new(),
                    expected: 1,
                    current: Some(2),
                },
                StatusCode::CONFLICT,
            ),
            (GraphError::DanglingEndpoint("x".into()), StatusCode::NOT_FOUND),
            (GraphError::InvalidInput("bad".into()), StatusCode::BAD_REQUEST),
            (
                GraphError::LimitExceeded {
                    what: "objects".into(),
                    limit: 5,
                },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ServerError::from(err).status(), status);
        }
    }

    #[test]
    fn header_errors_are_bad_requests() {
        let err = ServerError::MissingTenant("x-org-id");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "missing_tenant");
    }
}
