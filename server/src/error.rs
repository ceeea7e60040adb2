//! Authorization error types.
//!
//! Every failure the engine surfaces falls into one [`ErrorKind`]. Handlers map kinds to
//! HTTP responses through [`ErrorKind::status`] instead of matching on messages.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use uuid::Uuid;

use crate::permissions::hierarchy::HierarchyError;
use crate::permissions::Permissions;

/// Boxed storage failure source.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the permission engine.
#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("Channel {0} not found")]
    ChannelNotFound(Uuid),

    #[error("Permission override not found")]
    OverrideNotFound,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Missing permission: {0:?}")]
    MissingPermission(Permissions),

    #[error("{0}")]
    Hierarchy(#[from] HierarchyError),

    #[error("Storage error: {0}")]
    Storage(#[source] BoxError),
}

/// Coarse classification of [`AuthzError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Forbidden,
    Storage,
}

impl ErrorKind {
    /// HTTP status for this kind.
    ///
    /// | kind       | status |
    /// |------------|--------|
    /// | NotFound   | 404    |
    /// | Validation | 400    |
    /// | Forbidden  | 403    |
    /// | Storage    | 500    |
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Validation => StatusCode::BAD_REQUEST,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Storage => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code used in response bodies.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::Forbidden => "forbidden",
            Self::Storage => "storage",
        }
    }
}

impl AuthzError {
    /// Wrap any storage failure.
    pub fn storage<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Storage(Box::new(err))
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ChannelNotFound(_) | Self::OverrideNotFound => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::MissingPermission(_) | Self::Hierarchy(_) => ErrorKind::Forbidden,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl From<sqlx::Error> for AuthzError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(Box::new(err))
    }
}

impl IntoResponse for AuthzError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        // Storage details stay in the logs.
        let message = match &self {
            Self::Storage(e) => {
                tracing::error!(error = %e, "Permission storage failure");
                "Storage error".to_string()
            }
            other => other.to_string(),
        };
        (
            kind.status(),
            Json(serde_json::json!({"error": kind.code(), "message": message})),
        )
            .into_response()
    }
}
