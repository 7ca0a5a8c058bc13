use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Free-form metadata the provider stores on the identity at sign-up.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Identity record embedded in a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: SessionMetadata,
}

/// Provider-issued session. Observed by this crate, never minted by it
/// (the in-memory provider aside).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub expires_at: Option<DateTime<Utc>>,
    pub user: AuthUser,
}

impl Session {
    pub fn user_id(&self) -> &str { &self.user.id }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|t| t <= now).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEventKind {
    /// Replay of the current state delivered right after subscribing.
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// One notification from the provider's change stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub session: Option<Session>,
}

impl AuthEvent {
    pub fn initial(session: Option<Session>) -> Self { Self { kind: AuthEventKind::InitialSession, session } }
    pub fn signed_in(session: Session) -> Self { Self { kind: AuthEventKind::SignedIn, session: Some(session) } }
    pub fn signed_out() -> Self { Self { kind: AuthEventKind::SignedOut, session: None } }
    pub fn token_refreshed(session: Session) -> Self { Self { kind: AuthEventKind::TokenRefreshed, session: Some(session) } }
}
