use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::session::{AuthEvent, AuthUser, Session, SessionMetadata};
use super::signup::SignUpRequest;
use crate::error::{AppError, AppResult};

/// Result of a registration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    /// The backend signed the user in right away.
    SignedIn(Session),
    /// The account exists but must be confirmed by email first.
    ConfirmationPending { user_id: String },
}

/// External authentication provider.
///
/// `subscribe` must deliver the current state first (an `InitialSession`
/// event), then every change, in order.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    fn subscribe(&self) -> SessionSubscription;
    async fn get_session(&self) -> AppResult<Option<Session>>;
    async fn sign_out(&self) -> AppResult<()>;
    async fn sign_in_with_password(&self, email: &str, password: &str) -> AppResult<Session>;
    async fn sign_up(&self, req: &SignUpRequest) -> AppResult<SignUpOutcome>;
}

/// Fan-out of provider events to live subscriptions.
#[derive(Default)]
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    senders: Mutex<HashMap<u64, mpsc::UnboundedSender<AuthEvent>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    /// Register a listener and queue `initial` as its first event.
    /// Callers hold their own session lock across this call and `publish`
    /// so a subscriber never sees a change before its replay.
    pub fn subscribe(self: &Arc<Self>, initial: AuthEvent) -> SessionSubscription {
        let (sub, tx) = self.reserve();
        self.attach(sub.id(), tx, initial);
        sub
    }

    /// Hand out a subscription that receives nothing until `attach` is
    /// called with the returned sender.
    pub fn reserve(self: &Arc<Self>) -> (SessionSubscription, mpsc::UnboundedSender<AuthEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        (SessionSubscription { id, events: rx, registry: Arc::downgrade(self) }, tx)
    }

    /// Queue `initial` on a reserved subscription and start forwarding
    /// published events to it. Same locking rule as `subscribe`.
    pub fn attach(&self, id: u64, tx: mpsc::UnboundedSender<AuthEvent>, initial: AuthEvent) {
        // subscription already dropped
        if tx.send(initial).is_err() {
            return;
        }
        self.senders.lock().insert(id, tx);
        debug!(subscription = id, "auth.subscribe");
    }

    pub fn publish(&self, event: AuthEvent) {
        let mut senders = self.senders.lock();
        senders.retain(|_, tx| tx.send(event.clone()).is_ok());
        debug!(kind = ?event.kind, listeners = senders.len(), "auth.publish");
    }

    pub fn listener_count(&self) -> usize { self.senders.lock().len() }

    fn remove(&self, id: u64) {
        if self.senders.lock().remove(&id).is_some() {
            debug!(subscription = id, "auth.unsubscribe");
        }
    }
}

/// Live subscription to a provider's change stream. Dropping it unsubscribes.
pub struct SessionSubscription {
    id: u64,
    events: mpsc::UnboundedReceiver<AuthEvent>,
    registry: Weak<SubscriberRegistry>,
}

impl SessionSubscription {
    /// Wrap a channel fed by something other than a `SubscriberRegistry`.
    /// Nothing is queued for it; the feeder owns the replay.
    pub fn detached(events: mpsc::UnboundedReceiver<AuthEvent>) -> Self {
        Self { id: u64::MAX, events, registry: Weak::new() }
    }

    pub fn id(&self) -> u64 { self.id }

    /// Next event, or `None` once the provider is gone.
    pub async fn next(&mut self) -> Option<AuthEvent> {
        self.events.recv().await
    }

    pub fn unsubscribe(self) {}
}

impl Drop for SessionSubscription {
    fn drop(&mut self) {
        if let Some(reg) = self.registry.upgrade() {
            reg.remove(self.id);
        }
    }
}

struct Account {
    password: String,
    user: AuthUser,
}

/// In-process provider: accounts live in memory and sessions never expire.
pub struct MemoryAuthProvider {
    session: Mutex<Option<Session>>,
    accounts: Mutex<HashMap<String, Account>>,
    registry: Arc<SubscriberRegistry>,
    auto_confirm: bool,
    sign_out_calls: AtomicUsize,
}

impl Default for MemoryAuthProvider {
    fn default() -> Self { Self::new() }
}

impl MemoryAuthProvider {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
            accounts: Mutex::new(HashMap::new()),
            registry: SubscriberRegistry::new(),
            auto_confirm: true,
            sign_out_calls: AtomicUsize::new(0),
        }
    }

    /// Sign-ups report `ConfirmationPending` instead of signing in.
    pub fn requiring_confirmation(mut self) -> Self {
        self.auto_confirm = false;
        self
    }

    pub fn with_account(self, email: &str, password: &str, metadata: SessionMetadata) -> Self {
        self.insert_account(email, password, metadata);
        self
    }

    fn insert_account(&self, email: &str, password: &str, metadata: SessionMetadata) -> AuthUser {
        let user = AuthUser {
            id: uuid::Uuid::new_v4().to_string(),
            email: Some(email.to_string()),
            user_metadata: metadata,
        };
        self.accounts.lock().insert(
            email.to_ascii_lowercase(),
            Account { password: password.to_string(), user: user.clone() },
        );
        user
    }

    fn issue(user: AuthUser) -> Session {
        Session {
            access_token: uuid::Uuid::new_v4().simple().to_string(),
            refresh_token: Some(uuid::Uuid::new_v4().simple().to_string()),
            expires_at: None,
            user,
        }
    }

    /// Replace the current session and notify subscribers.
    pub fn set_session(&self, session: Option<Session>) {
        let mut current = self.session.lock();
        *current = session.clone();
        let event = match session {
            Some(s) => AuthEvent::signed_in(s),
            None => AuthEvent::signed_out(),
        };
        self.registry.publish(event);
    }

    pub fn sign_out_calls(&self) -> usize { self.sign_out_calls.load(Ordering::SeqCst) }

    pub fn listener_count(&self) -> usize { self.registry.listener_count() }
}

#[async_trait]
impl AuthProvider for MemoryAuthProvider {
    fn subscribe(&self) -> SessionSubscription {
        let current = self.session.lock();
        self.registry.subscribe(AuthEvent::initial(current.clone()))
    }

    async fn get_session(&self) -> AppResult<Option<Session>> {
        Ok(self.session.lock().clone())
    }

    async fn sign_out(&self) -> AppResult<()> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        self.set_session(None);
        Ok(())
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AppResult<Session> {
        let user = {
            let accounts = self.accounts.lock();
            match accounts.get(&email.to_ascii_lowercase()) {
                Some(acc) if acc.password == password => acc.user.clone(),
                _ => return Err(AppError::auth("invalid_credentials", "Invalid login credentials")),
            }
        };
        let session = Self::issue(user);
        self.set_session(Some(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, req: &SignUpRequest) -> AppResult<SignUpOutcome> {
        if self.accounts.lock().contains_key(&req.email.to_ascii_lowercase()) {
            return Err(AppError::user("user_already_exists", "User already registered"));
        }
        let user = self.insert_account(&req.email, &req.password, req.metadata());
        if !self.auto_confirm {
            return Ok(SignUpOutcome::ConfirmationPending { user_id: user.id });
        }
        let session = Self::issue(user);
        self.set_session(Some(session.clone()));
        Ok(SignUpOutcome::SignedIn(session))
    }
}
