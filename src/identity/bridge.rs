//! Session bridge: turns the provider's change stream into `AuthState` snapshots.
//!
//! One subscription per mount. Every event gets a monotonic sequence number;
//! events with a session resolve their profile in a task of their own, events
//! without one apply immediately. With the sequence guard on, a resolution that
//! finishes after a newer event has already been applied is dropped.
//!
//! All writes go through `Shared::apply` / `Shared::expire_loading`, which take
//! the same lock as teardown, so nothing is published once `closed` is set.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::profile::ProfileStore;
use super::provider::{AuthProvider, SessionSubscription};
use super::session::Session;
use super::user::{resolve_user, User};
use crate::config::BridgeConfig;
use crate::error::AppResult;

/// Immutable snapshot handed to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthState {
    pub user: Option<User>,
    /// `true` until the first event is processed or the safety timeout fires.
    /// While set, the absence of a user means "unknown", not "signed out".
    pub loading: bool,
}

impl AuthState {
    pub fn initial() -> Self { Self { user: None, loading: true } }

    pub fn is_authenticated(&self) -> bool { self.user.is_some() }
}

/// Counters for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub events: u64,
    pub applied: u64,
    pub discarded: u64,
}

struct Inner {
    closed: bool,
    applied_seq: u64,
    timeout: Option<AbortHandle>,
    stats: BridgeStats,
}

struct Shared {
    inner: Mutex<Inner>,
    state: watch::Sender<AuthState>,
    /// Flips to `true` once on teardown so waiters can stop waiting.
    torn_down: watch::Sender<bool>,
    sequence_guard: bool,
}

impl Shared {
    fn apply(&self, seq: u64, user: Option<User>) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            debug!(seq, "bridge.apply after teardown ignored");
            return false;
        }
        if self.sequence_guard && seq < inner.applied_seq {
            inner.stats.discarded += 1;
            debug!(seq, applied_seq = inner.applied_seq, "bridge.stale resolution discarded");
            return false;
        }
        inner.applied_seq = inner.applied_seq.max(seq);
        inner.stats.applied += 1;
        if let Some(t) = inner.timeout.take() {
            t.abort();
        }
        let authenticated = user.is_some();
        self.state.send_replace(AuthState { user, loading: false });
        debug!(seq, authenticated, "bridge.state applied");
        true
    }

    fn expire_loading(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.timeout = None;
        let fired = self.state.send_if_modified(|s| {
            if s.loading {
                s.loading = false;
                true
            } else {
                false
            }
        });
        if fired {
            warn!("bridge.loading timeout elapsed before any auth event was processed");
        }
    }

    fn note_event(&self) {
        self.inner.lock().stats.events += 1;
    }

    fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        if let Some(t) = inner.timeout.take() {
            t.abort();
        }
        self.torn_down.send_replace(true);
    }
}

/// Resolve the view model for a live session. Profile errors and absence
/// both fall back to session metadata and are only logged.
pub async fn resolve_session_user(profiles: &dyn ProfileStore, session: &Session) -> User {
    let user_id = session.user_id();
    let profile = match profiles.get_profile(session).await {
        Ok(Some(p)) => Some(p),
        Ok(None) => {
            debug!(user_id, "profile.not_found, using session metadata");
            None
        }
        Err(e) => {
            warn!(user_id, error = %e, "profile.fetch failed, using session metadata");
            None
        }
    };
    let (user, provenance) = resolve_user(session, profile.as_ref());
    debug!(user_id, ?provenance, "profile.resolved");
    user
}

/// Consumer-side view of a mounted bridge. Cheap to clone.
#[derive(Clone)]
pub struct SessionHandle {
    rx: watch::Receiver<AuthState>,
    shared: Arc<Shared>,
    provider: Arc<dyn AuthProvider>,
}

impl SessionHandle {
    pub fn state(&self) -> AuthState { self.rx.borrow().clone() }

    pub fn user(&self) -> Option<User> { self.rx.borrow().user.clone() }

    pub fn is_loading(&self) -> bool { self.rx.borrow().loading }

    pub fn is_authenticated(&self) -> bool { self.rx.borrow().is_authenticated() }

    /// Stream of snapshots, newest wins.
    pub fn watch(&self) -> watch::Receiver<AuthState> { self.rx.clone() }

    /// Wait until `loading` is false and return that snapshot. Returns the
    /// last published snapshot, possibly still loading, once the bridge is
    /// torn down.
    pub async fn resolved(&self) -> AuthState {
        let mut rx = self.rx.clone();
        let mut torn_down = self.shared.torn_down.subscribe();
        tokio::select! {
            out = rx.wait_for(|s| !s.loading) => {
                if let Ok(s) = out {
                    return s.clone();
                }
            }
            _ = torn_down.wait_for(|t| *t) => {
                debug!("bridge.resolved after teardown");
            }
        }
        self.rx.borrow().clone()
    }

    pub fn stats(&self) -> BridgeStats { self.shared.inner.lock().stats }

    /// Ask the provider to end the session. Local state is left alone; the
    /// provider's sign-out event is what clears `user`.
    pub async fn logout(&self) -> AppResult<()> {
        info!("auth.logout requested");
        self.provider.sign_out().await
    }
}

/// A mounted bridge. Tear down with `shutdown`, or by dropping it.
pub struct SessionBridge {
    shared: Arc<Shared>,
    handle: SessionHandle,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SessionBridge {
    /// Subscribe to `provider` and start processing. Must run inside a Tokio runtime.
    pub fn mount(provider: Arc<dyn AuthProvider>, profiles: Arc<dyn ProfileStore>, config: BridgeConfig) -> Self {
        let (tx, rx) = watch::channel(AuthState::initial());
        let (torn_down, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner { closed: false, applied_seq: 0, timeout: None, stats: BridgeStats::default() }),
            state: tx,
            torn_down,
            sequence_guard: config.sequence_guard,
        });

        let timeout = {
            let shared = shared.clone();
            let after = config.loading_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                shared.expire_loading();
            })
        };
        shared.inner.lock().timeout = Some(timeout.abort_handle());

        let subscription = provider.subscribe();
        info!(
            subscription = subscription.id(),
            sequence_guard = config.sequence_guard,
            loading_timeout = ?config.loading_timeout,
            "bridge.mounted"
        );

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run(subscription, profiles, shared.clone(), stop_rx));

        let handle = SessionHandle { rx, shared: shared.clone(), provider };
        Self { shared, handle, shutdown: Some(stop_tx), task: Some(task) }
    }

    pub fn handle(&self) -> SessionHandle { self.handle.clone() }

    /// Unsubscribe, cancel in-flight resolutions and wait for the loop to exit.
    pub async fn shutdown(mut self) {
        self.teardown();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!("bridge.loop panicked: {}", e);
                }
            }
        }
        info!("bridge.shutdown complete");
    }

    fn teardown(&mut self) {
        self.shared.close();
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for SessionBridge {
    fn drop(&mut self) {
        self.teardown();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run(
    mut subscription: SessionSubscription,
    profiles: Arc<dyn ProfileStore>,
    shared: Arc<Shared>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut seq: u64 = 0;
    let mut stream_open = true;
    let mut inflight: JoinSet<()> = JoinSet::new();

    loop {
        if !stream_open && inflight.is_empty() {
            break;
        }
        tokio::select! {
            biased;
            _ = &mut stop => break,
            event = subscription.next(), if stream_open => {
                let Some(event) = event else {
                    debug!("bridge.provider stream closed");
                    stream_open = false;
                    continue;
                };
                seq += 1;
                shared.note_event();
                debug!(seq, kind = ?event.kind, has_session = event.session.is_some(), "bridge.event");
                match event.session {
                    None => {
                        shared.apply(seq, None);
                    }
                    Some(session) => {
                        let profiles = profiles.clone();
                        let shared = shared.clone();
                        inflight.spawn(async move {
                            let resolved = AssertUnwindSafe(resolve_session_user(&*profiles, &session))
                                .catch_unwind()
                                .await;
                            let user = match resolved {
                                Ok(u) => Some(u),
                                Err(_) => {
                                    error!(seq, user_id = session.user_id(), "bridge.resolution panicked, treating as signed out");
                                    None
                                }
                            };
                            shared.apply(seq, user);
                        });
                    }
                }
            }
            Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("bridge.resolution task failed: {}", e);
                    }
                }
            }
        }
    }

    // Dropping these unsubscribes and aborts whatever is still resolving.
    drop(subscription);
    inflight.abort_all();
    debug!(events = seq, "bridge.loop exited");
}
