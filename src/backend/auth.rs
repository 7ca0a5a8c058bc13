use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::{error_from_response, BackendClient};
use crate::error::{AppError, AppResult};
use crate::identity::{
    AuthEvent, AuthProvider, AuthUser, Session, SessionSubscription, SignUpOutcome, SignUpRequest, SubscriberRegistry,
};

/// Token endpoint payload. Older servers omit `expires_at`.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self, now: DateTime<Utc>) -> Session {
        let expires_at = match (self.expires_at, self.expires_in) {
            (Some(at), _) => DateTime::from_timestamp(at, 0),
            (None, Some(secs)) => Some(now + Duration::seconds(secs)),
            (None, None) => None,
        };
        Session { access_token: self.access_token, refresh_token: self.refresh_token, expires_at, user: self.user }
    }
}

/// Auth provider backed by the `/auth/v1` API. Holds the session in memory and
/// emits change events locally, the way browser SDKs for this API do.
/// Clones share the session and the subscriber list.
#[derive(Clone)]
pub struct GoTrueAuthProvider {
    client: BackendClient,
    session: Arc<Mutex<Option<Session>>>,
    registry: Arc<SubscriberRegistry>,
}

impl GoTrueAuthProvider {
    pub fn new(client: BackendClient) -> Self {
        Self { client, session: Arc::new(Mutex::new(None)), registry: SubscriberRegistry::new() }
    }

    /// Start from a session persisted elsewhere. It is replayed to subscribers
    /// as their initial state; an expired one is refreshed (or dropped) first.
    pub fn with_session(self, session: Session) -> Self {
        *self.session.lock() = Some(session);
        self
    }

    fn replace_session(&self, session: Option<Session>, event: AuthEvent) {
        let mut current = self.session.lock();
        *current = session;
        self.registry.publish(event);
    }

    async fn token_grant(&self, grant_type: &str, body: serde_json::Value) -> AppResult<Session> {
        let url = format!("{}?grant_type={}", self.client.url("auth/v1/token"), grant_type);
        let resp = self
            .client
            .http()
            .post(url)
            .headers(self.client.headers(None)?)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        let token: TokenResponse = resp.json().await?;
        Ok(token.into_session(Utc::now()))
    }

    async fn remote_logout(&self, access_token: &str) -> AppResult<()> {
        let resp = self
            .client
            .http()
            .post(self.client.url("auth/v1/logout"))
            .headers(self.client.headers(Some(access_token))?)
            .send()
            .await?;
        // 401/404: the token is already dead server-side
        match resp.status().as_u16() {
            s if (200..300).contains(&s) || s == 401 || s == 404 => Ok(()),
            _ => Err(error_from_response(resp).await),
        }
    }
}

#[async_trait]
impl AuthProvider for GoTrueAuthProvider {
    fn subscribe(&self) -> SessionSubscription {
        let current = self.session.lock();
        if !current.as_ref().map(|s| s.is_expired_at(Utc::now())).unwrap_or(false) {
            return self.registry.subscribe(AuthEvent::initial(current.clone()));
        }
        drop(current);

        // Stale session: the replay waits until it has been refreshed or dropped.
        let (subscription, tx) = self.registry.reserve();
        let id = subscription.id();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let this = self.clone();
                rt.spawn(async move {
                    if let Err(e) = this.get_session().await {
                        warn!(error = %e, "auth.session recovery failed, replaying no session");
                    }
                    let current = this.session.lock();
                    let live = current.clone().filter(|s| !s.is_expired_at(Utc::now()));
                    this.registry.attach(id, tx, AuthEvent::initial(live));
                });
            }
            Err(_) => {
                warn!("auth.session expired and no runtime to refresh it, signing out locally");
                self.replace_session(None, AuthEvent::signed_out());
                let _current = self.session.lock();
                self.registry.attach(id, tx, AuthEvent::initial(None));
            }
        }
        subscription
    }

    async fn get_session(&self) -> AppResult<Option<Session>> {
        let Some(current) = self.session.lock().clone() else { return Ok(None) };
        if !current.is_expired_at(Utc::now()) {
            return Ok(Some(current));
        }

        let Some(refresh_token) = current.refresh_token.clone() else {
            info!(user_id = current.user_id(), "auth.session expired without refresh token");
            self.replace_session(None, AuthEvent::signed_out());
            return Ok(None);
        };

        match self.token_grant("refresh_token", json!({ "refresh_token": refresh_token })).await {
            Ok(fresh) => {
                let mut slot = self.session.lock();
                // Someone else signed in or out while we were refreshing.
                if slot.as_ref().and_then(|s| s.refresh_token.as_deref()) != Some(refresh_token.as_str()) {
                    return Ok(slot.clone());
                }
                *slot = Some(fresh.clone());
                self.registry.publish(AuthEvent::token_refreshed(fresh.clone()));
                Ok(Some(fresh))
            }
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                warn!(error = %e, "auth.refresh rejected, signing out locally");
                self.replace_session(None, AuthEvent::signed_out());
                Ok(None)
            }
        }
    }

    async fn sign_out(&self) -> AppResult<()> {
        let token = self.session.lock().as_ref().map(|s| s.access_token.clone());
        let remote = match token {
            Some(token) => self.remote_logout(&token).await,
            None => Ok(()),
        };

        // The local session goes away regardless of what the server said.
        self.replace_session(None, AuthEvent::signed_out());
        info!("auth.signed_out");
        if let Err(e) = &remote {
            warn!(error = %e, "auth.logout request failed");
        }
        remote
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AppResult<Session> {
        let session = self.token_grant("password", json!({ "email": email, "password": password })).await?;
        info!(user_id = session.user_id(), "auth.signed_in");
        self.replace_session(Some(session.clone()), AuthEvent::signed_in(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, req: &SignUpRequest) -> AppResult<SignUpOutcome> {
        let mut url = self.client.url("auth/v1/signup");
        if let Some(redirect) = &self.client.config().email_redirect_to {
            url = format!("{}?redirect_to={}", url, urlencoding::encode(redirect));
        }
        let resp = self
            .client
            .http()
            .post(url)
            .headers(self.client.headers(None)?)
            .json(&json!({ "email": req.email, "password": req.password, "data": req.metadata() }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }

        let body: serde_json::Value = resp.json().await?;
        if body.get("access_token").is_some() {
            let session = serde_json::from_value::<TokenResponse>(body)?.into_session(Utc::now());
            info!(user_id = session.user_id(), "auth.signed_up and signed in");
            self.replace_session(Some(session.clone()), AuthEvent::signed_in(session.clone()));
            return Ok(SignUpOutcome::SignedIn(session));
        }

        // Confirmation required: the body is the bare user, or `{ user }`.
        let user_id = body
            .get("id")
            .or_else(|| body.get("user").and_then(|u| u.get("id")))
            .and_then(|v| v.as_str())
            .ok_or_else(|| AppError::internal("unexpected_signup_response", "sign-up response carried neither a session nor a user"))?;
        info!(user_id, "auth.signed_up, confirmation pending");
        Ok(SignUpOutcome::ConfirmationPending { user_id: user_id.to_string() })
    }
}
