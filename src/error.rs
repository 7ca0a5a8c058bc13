//! Unified application error model.
//! One enum shared by the identity layer, the backend adapters and the binary,
//! with helpers to classify failures coming back from the HTTP backend.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    UserInput { code: String, message: String },
    NotFound { code: String, message: String },
    Auth { code: String, message: String },
    Config { code: String, message: String },
    Io { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::UserInput { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Auth { code, .. }
            | AppError::Config { code, .. }
            | AppError::Io { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::UserInput { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Auth { message, .. }
            | AppError::Config { message, .. }
            | AppError::Io { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn user<S: Into<String>>(code: S, msg: S) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn auth<S: Into<String>>(code: S, msg: S) -> Self { AppError::Auth { code: code.into(), message: msg.into() } }
    pub fn config<S: Into<String>>(code: S, msg: S) -> Self { AppError::Config { code: code.into(), message: msg.into() } }
    pub fn io<S: Into<String>>(code: S, msg: S) -> Self { AppError::Io { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Classify a non-success backend status. `body_message` is whatever
    /// human-readable text the backend put in its error payload.
    pub fn from_http_status(status: u16, body_message: &str) -> Self {
        let msg = if body_message.is_empty() { format!("backend returned HTTP {}", status) } else { body_message.to_string() };
        match status {
            400 | 422 => AppError::UserInput { code: "bad_request".into(), message: msg },
            401 | 403 => AppError::Auth { code: "unauthorized".into(), message: msg },
            404 => AppError::NotFound { code: "not_found".into(), message: msg },
            408 | 429 | 500..=599 => AppError::Io { code: "backend_unavailable".into(), message: msg },
            _ => AppError::Internal { code: "unexpected_status".into(), message: msg },
        }
    }

    /// True for failures where asking again later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Io { .. })
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal { code: "internal_error".into(), message: err.to_string() }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return AppError::Internal { code: "decode_error".into(), message: err.to_string() };
        }
        if let Some(status) = err.status() {
            return AppError::from_http_status(status.as_u16(), &err.to_string());
        }
        // connect, timeout and body errors
        AppError::Io { code: "backend_unreachable".into(), message: err.to_string() }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal { code: "decode_error".into(), message: err.to_string() }
    }
}
