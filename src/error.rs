use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

use crate::response::ApiResponse;

pub type AppResult<T> = Result<T, AppError>;

/// Errors raised by repositories backing the durable record store.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("record already exists")]
    AlreadyExists,

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl RepoError {
    /// Maps Postgres unique violations onto `AlreadyExists`.
    pub fn from_insert(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                RepoError::AlreadyExists
            }
            _ => RepoError::Database(err),
        }
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Workflow-level error surfaced to callers.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Expired(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Validation(String),

    /// A lifecycle guard rejected the transition.
    #[error("{0}")]
    InvalidState(String),

    #[error("dependency failure: {0}")]
    Dependency(#[from] anyhow::Error),
}

impl AppError {
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
    pub fn expired(msg: impl Into<String>) -> Self {
        Self::Expired(msg.into())
    }
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Conflict(_) => StatusCode::CONFLICT,
            // Expired and missing both mean "start over" to the caller.
            AppError::NotFound(_) | AppError::Expired(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Validation(_) | AppError::InvalidState(_) => StatusCode::BAD_REQUEST,
            AppError::Dependency(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::AlreadyExists => AppError::conflict("Email already registered"),
            other => AppError::Dependency(anyhow::Error::new(other)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Dependency(e) => {
                error!(error = ?e, "dependency failure");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ApiResponse::<()>::error(status, message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_renders_like_not_found() {
        assert_eq!(
            AppError::expired("gone").status(),
            AppError::not_found("missing").status()
        );
    }

    #[test]
    fn already_exists_becomes_conflict() {
        let err: AppError = RepoError::AlreadyExists.into();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn other_repo_errors_become_dependency_failures() {
        let err: AppError = RepoError::Unavailable("down".into()).into();
        assert!(matches!(err, AppError::Dependency(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
