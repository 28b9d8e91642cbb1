//! Unified application error model and mapping helpers.
//! Every HTTP-facing failure of the gateway is expressed as an `AppError` so that
//! the binder, the query handler and the fallback route render the same JSON shape.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::identity::{AuthError, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    UserInput { code: String, message: String },
    NotFound { code: String, message: String },
    SessionUnavailable { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::UserInput { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::SessionUnavailable { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::UserInput { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::SessionUnavailable { message, .. } => message.as_str(),
        }
    }

    pub fn user<S: Into<String>>(code: S, msg: S) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn unavailable<S: Into<String>>(code: S, msg: S) -> Self { AppError::SessionUnavailable { code: code.into(), message: msg.into() } }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::UserInput { .. } => 400,
            AppError::NotFound { .. } => 404,
            AppError::SessionUnavailable { .. } => 503,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::SessionUnavailable { code: "session_unavailable".into(), message: err.to_string() }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidArgument(_) => AppError::UserInput { code: "invalid_argument".into(), message: err.to_string() },
            AuthError::SessionUnavailable(_) => AppError::SessionUnavailable { code: "session_unavailable".into(), message: err.to_string() },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::json!({
            "status": "error",
            "error": { "code": self.code_str(), "message": self.message() },
        });
        (status, Json(body)).into_response()
    }
}
