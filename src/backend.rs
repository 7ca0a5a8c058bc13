//!
//! HTTP backend adapters
//! ---------------------
//! Implementations of the two external collaborators against a hosted
//! backend-as-a-service: the GoTrue-style auth API under `/auth/v1` and the
//! PostgREST-style data API under `/rest/v1`.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Response;

use crate::config::BackendConfig;
use crate::error::{AppError, AppResult};

pub mod auth;
pub mod profiles;

pub use auth::GoTrueAuthProvider;
pub use profiles::RestProfileStore;

/// Shared reqwest client plus the project URL and anon key.
#[derive(Clone)]
pub struct BackendClient {
    config: BackendConfig,
    http: reqwest::Client,
}

impl BackendClient {
    pub fn new(config: BackendConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AppError::Config { code: "http_client".into(), message: e.to_string() })?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &BackendConfig { &self.config }

    pub fn http(&self) -> &reqwest::Client { &self.http }

    pub fn url(&self, path: &str) -> String { self.config.endpoint(path) }

    /// `apikey` plus a bearer token: the user's access token when there is
    /// one, the anon key otherwise.
    pub fn headers(&self, access_token: Option<&str>) -> AppResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("apikey", header_value(&self.config.anon_key)?);
        let bearer = format!("Bearer {}", access_token.unwrap_or(&self.config.anon_key));
        headers.insert(AUTHORIZATION, header_value(&bearer)?);
        Ok(headers)
    }
}

fn header_value(v: &str) -> AppResult<HeaderValue> {
    HeaderValue::from_str(v).map_err(|_| AppError::config("invalid_header", "credential contains characters not allowed in headers"))
}

/// Pull a readable message out of a backend error payload. Both APIs use a
/// handful of different field names depending on the endpoint.
pub(crate) fn error_message(body: &serde_json::Value) -> String {
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|k| body.get(*k).and_then(|v| v.as_str()))
        .unwrap_or("")
        .to_string()
}

/// Turn a non-success response into an `AppError`, keeping the backend's own
/// error code when it sends one.
pub(crate) async fn error_from_response(resp: Response) -> AppError {
    let status = resp.status().as_u16();
    let body: serde_json::Value = resp.json().await.unwrap_or(serde_json::Value::Null);
    let mut err = AppError::from_http_status(status, &error_message(&body));
    let backend_code = ["error_code", "code", "error"]
        .iter()
        .find_map(|k| body.get(*k).and_then(|v| v.as_str()));
    if let Some(code) = backend_code {
        match &mut err {
            AppError::UserInput { code: c, .. }
            | AppError::NotFound { code: c, .. }
            | AppError::Auth { code: c, .. }
            | AppError::Config { code: c, .. }
            | AppError::Io { code: c, .. }
            | AppError::Internal { code: c, .. } => *c = code.to_string(),
        }
    }
    err
}
