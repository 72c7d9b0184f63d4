use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

/// CMS 错误类型
#[derive(Error, Debug)]
pub enum CmsError {
    #[error("{0}")]
    Validation(String),

    #[error("{message}")]
    Conflict {
        field: String,
        message: String,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CmsError>;

impl CmsError {
    pub fn validation(message: impl Into<String>) -> Self {
        CmsError::Validation(message.into())
    }

    pub fn conflict(field: impl Into<String>, message: impl Into<String>) -> Self {
        CmsError::Conflict {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        CmsError::NotFound(what.into())
    }

    pub fn forbidden() -> Self {
        CmsError::Forbidden("Insufficient permissions".to_string())
    }
}

/// 判断是否为 UNIQUE 约束冲突
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

impl IntoResponse for CmsError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            CmsError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": msg }),
            ),
            CmsError::Conflict { field, message } => (
                StatusCode::CONFLICT,
                serde_json::json!({ "error": message, "field": field }),
            ),
            CmsError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": self.to_string() }),
            ),
            CmsError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({ "error": msg }),
            ),
            CmsError::Forbidden(msg) => (
                StatusCode::FORBIDDEN,
                serde_json::json!({ "error": msg }),
            ),
            CmsError::Sqlite(e) if is_unique_violation(e) => (
                StatusCode::CONFLICT,
                serde_json::json!({ "error": "Duplicate value", "field": unique_field(e) }),
            ),
            _ => {
                error!(error = %self, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": "Internal server error" }),
                )
            }
        };

        (status, axum::Json(body)).into_response()
    }
}

/// 从 "UNIQUE constraint failed: users.email" 中提取列名
fn unique_field(err: &rusqlite::Error) -> String {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(msg)) => msg
            .rsplit('.')
            .next()
            .unwrap_or("unknown")
            .trim()
            .to_string(),
        _ => "unknown".to_string(),
    }
}
