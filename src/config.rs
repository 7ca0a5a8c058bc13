//! Environment-driven configuration.
//!
//! Every setting has a default except the backend, which is only enabled when
//! both `NUTRI_BACKEND_URL` and `NUTRI_BACKEND_ANON_KEY` are present.

use std::time::Duration;

use crate::error::{AppError, AppResult};

pub const DEFAULT_LOADING_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Tuning knobs for the session bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Forces `loading = false` if nothing was processed by then.
    pub loading_timeout: Duration,
    /// Discard profile resolutions that finish after a newer event was applied.
    pub sequence_guard: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self { loading_timeout: DEFAULT_LOADING_TIMEOUT, sequence_guard: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Project root, e.g. `https://xyz.supabase.co`. Stored without a trailing slash.
    pub url: String,
    pub anon_key: String,
    pub request_timeout: Duration,
    /// Where confirmation emails send the user back to.
    pub email_redirect_to: Option<String>,
}

impl BackendConfig {
    pub fn new(url: &str, anon_key: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            request_timeout: DEFAULT_HTTP_TIMEOUT,
            email_redirect_to: None,
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.url, path.trim_start_matches('/'))
    }
}

/// Credentials the binary signs in with at startup.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginConfig {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for LoginConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginConfig").field("email", &self.email).field("password", &"<redacted>").finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppConfig {
    pub backend: Option<BackendConfig>,
    pub bridge: BridgeConfig,
    pub login: Option<LoginConfig>,
}

impl AppConfig {
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut bridge = BridgeConfig::default();
        if let Some(ms) = get("NUTRI_LOADING_TIMEOUT_MS") {
            let ms = ms.parse::<u64>().map_err(|_| {
                AppError::config("invalid_loading_timeout", "NUTRI_LOADING_TIMEOUT_MS must be a whole number of milliseconds")
            })?;
            bridge.loading_timeout = Duration::from_millis(ms);
        }
        if let Some(flag) = get("NUTRI_SEQUENCE_GUARD") {
            bridge.sequence_guard = parse_flag(&flag).ok_or_else(|| {
                AppError::config("invalid_sequence_guard", "NUTRI_SEQUENCE_GUARD must be true/false")
            })?;
        }

        let backend = match (get("NUTRI_BACKEND_URL"), get("NUTRI_BACKEND_ANON_KEY")) {
            (Some(url), Some(key)) => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(AppError::config("invalid_backend_url", "NUTRI_BACKEND_URL must be an http(s) URL"));
                }
                let mut cfg = BackendConfig::new(&url, &key);
                if let Some(ms) = get("NUTRI_HTTP_TIMEOUT_MS") {
                    let ms = ms.parse::<u64>().map_err(|_| {
                        AppError::config("invalid_http_timeout", "NUTRI_HTTP_TIMEOUT_MS must be a whole number of milliseconds")
                    })?;
                    cfg.request_timeout = Duration::from_millis(ms);
                }
                cfg.email_redirect_to = get("NUTRI_EMAIL_REDIRECT_TO");
                Some(cfg)
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(AppError::config(
                    "incomplete_backend",
                    "NUTRI_BACKEND_URL and NUTRI_BACKEND_ANON_KEY must be set together",
                ));
            }
            (None, None) => None,
        };

        // the password is taken verbatim
        let login = match (get("NUTRI_LOGIN_EMAIL"), lookup("NUTRI_LOGIN_PASSWORD").filter(|p| !p.is_empty())) {
            (Some(email), Some(password)) => Some(LoginConfig { email, password }),
            (None, None) => None,
            _ => {
                return Err(AppError::config(
                    "incomplete_login",
                    "NUTRI_LOGIN_EMAIL and NUTRI_LOGIN_PASSWORD must be set together",
                ));
            }
        };

        Ok(Self { backend, bridge, login })
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
