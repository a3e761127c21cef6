use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type CatalogResult<T> = Result<T, CatalogError>;

/// A single rejected input field, rendered back to the caller as-is.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("{field}: {message}")]
    Validation { field: String, message: String },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl CatalogError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn field_error(&self) -> Option<FieldError> {
        match self {
            Self::Validation { field, message } => Some(FieldError {
                field: field.clone(),
                message: message.clone(),
            }),
            _ => None,
        }
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Validation { .. } => (StatusCode::BAD_REQUEST, "VALIDATION"),
            Self::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::StoreUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE"),
        }
    }
}

impl From<sqlx::Error> for CatalogError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => Self::NotFound {
                entity: "row",
                id: String::new(),
            },
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::unique_violation(db.message())
            }
            _ => Self::StoreUnavailable(e.to_string()),
        }
    }
}

impl CatalogError {
    /// Constraint names stay in the logs.
    fn unique_violation(detail: &str) -> Self {
        tracing::warn!(detail, "unique constraint violated");
        Self::Conflict("this entry already exists or was changed concurrently, reload and retry".into())
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(e: serde_json::Error) -> Self {
        Self::StoreUnavailable(format!("corrupt stored document: {e}"))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
}

impl IntoResponse for CatalogError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let (message, field) = match &self {
            Self::Validation { field, message } => (message.clone(), Some(field.clone())),
            Self::NotFound { entity, .. } => (format!("{entity} not found"), None),
            Self::Forbidden(msg) | Self::Conflict(msg) => (msg.clone(), None),
            Self::StoreUnavailable(detail) => {
                // keep the detail in the logs, out of the response
                tracing::error!(error = %detail, "store unavailable");
                (
                    "service temporarily unavailable, please retry".to_string(),
                    None,
                )
            }
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code,
                message,
                field,
            },
        };
        (status, Json(body)).into_response()
    }
}
