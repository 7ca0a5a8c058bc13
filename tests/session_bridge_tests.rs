//! Session bridge integration tests: event processing, profile fallback,
//! loading timeout, logout, out-of-order resolutions and teardown.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};

use nutriadmin::config::BridgeConfig;
use nutriadmin::error::{AppError, AppResult};
use nutriadmin::identity::{
    generated_avatar_url, AuthEvent, AuthProvider, AuthState, AuthUser, MemoryAuthProvider, ProfileRecord,
    ProfileStore, Session, SessionBridge, SessionHandle, SessionMetadata, SessionSubscription, SignUpOutcome,
    SignUpRequest, DEFAULT_DISPLAY_NAME, DEFAULT_SPECIALTY,
};

fn session(id: &str, name: Option<&str>) -> Session {
    Session {
        access_token: format!("token-{}", id),
        refresh_token: None,
        expires_at: None,
        user: AuthUser {
            id: id.to_string(),
            email: Some(format!("{}@clinic.test", id)),
            user_metadata: SessionMetadata { name: name.map(Into::into), avatar_url: None },
        },
    }
}

/// Profile store whose lookups can be held until the test releases them.
#[derive(Default)]
struct GatedProfiles {
    rows: Mutex<HashMap<String, ProfileRecord>>,
    failing: Mutex<HashSet<String>>,
    gated: Mutex<HashMap<String, Arc<Semaphore>>>,
    calls: AtomicUsize,
}

impl GatedProfiles {
    fn insert(&self, id: &str, rec: ProfileRecord) { self.rows.lock().insert(id.into(), rec); }
    fn fail(&self, id: &str) { self.failing.lock().insert(id.into()); }
    fn gate(&self, id: &str) { self.gated.lock().insert(id.into(), Arc::new(Semaphore::new(0))); }
    fn release(&self, id: &str) {
        if let Some(s) = self.gated.lock().get(id) { s.add_permits(1); }
    }
    fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl ProfileStore for GatedProfiles {
    async fn get_profile(&self, session: &Session) -> AppResult<Option<ProfileRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gated.lock().get(session.user_id()).cloned();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await.map_err(|_| AppError::io("closed", "gate closed"))?;
        }
        if self.failing.lock().contains(session.user_id()) {
            return Err(AppError::io("unreachable", "profile store down"));
        }
        Ok(self.rows.lock().get(session.user_id()).cloned())
    }
}

/// Provider driven entirely by the test. Sign-out only records the request.
struct ScriptedProvider {
    tx: Mutex<Option<mpsc::UnboundedSender<AuthEvent>>>,
    sign_outs: AtomicUsize,
}

impl ScriptedProvider {
    fn new() -> Self { Self { tx: Mutex::new(None), sign_outs: AtomicUsize::new(0) } }
    fn emit(&self, event: AuthEvent) {
        if let Some(tx) = self.tx.lock().as_ref() { let _ = tx.send(event); }
    }
}

#[async_trait]
impl AuthProvider for ScriptedProvider {
    fn subscribe(&self) -> SessionSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.tx.lock() = Some(tx);
        SessionSubscription::detached(rx)
    }
    async fn get_session(&self) -> AppResult<Option<Session>> { Ok(None) }
    async fn sign_out(&self) -> AppResult<()> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn sign_in_with_password(&self, _email: &str, _password: &str) -> AppResult<Session> {
        Err(AppError::auth("unsupported", "scripted provider"))
    }
    async fn sign_up(&self, _req: &SignUpRequest) -> AppResult<SignUpOutcome> {
        Err(AppError::auth("unsupported", "scripted provider"))
    }
}

async fn wait_for_state<F>(handle: &SessionHandle, pred: F) -> AuthState
where
    F: Fn(&AuthState) -> bool,
{
    let mut rx = handle.watch();
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        rx.wait_for(|s| pred(s)).await.map(|s| s.clone())
    })
    .await;
    match waited {
        Ok(Ok(s)) => s,
        _ => panic!("state never matched; last = {:?}", handle.state()),
    }
}

async fn wait_until<F: Fn() -> bool>(what: &str, f: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !f() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn mount(provider: Arc<dyn AuthProvider>, profiles: Arc<dyn ProfileStore>) -> SessionBridge {
    SessionBridge::mount(provider, profiles, BridgeConfig::default())
}

#[tokio::test]
async fn no_session_resolves_to_signed_out() {
    let provider = Arc::new(MemoryAuthProvider::new());
    let bridge = mount(provider.clone(), Arc::new(GatedProfiles::default()));
    assert_eq!(provider.listener_count(), 1);

    let state = bridge.handle().resolved().await;
    assert!(!state.loading);
    assert!(!state.is_authenticated());
    assert!(state.user.is_none());
    bridge.shutdown().await;
    assert_eq!(provider.listener_count(), 0);
}

#[tokio::test]
async fn live_session_with_profile_builds_user_from_profile() {
    let provider = Arc::new(MemoryAuthProvider::new());
    provider.set_session(Some(session("u1", Some("Meta Name"))));
    let profiles = Arc::new(GatedProfiles::default());
    profiles.insert("u1", ProfileRecord {
        name: Some("Dra. Ana Costa".into()),
        avatar_url: None,
        specialty: Some("Nutrição Esportiva".into()),
    });

    let bridge = mount(provider, profiles.clone());
    let state = bridge.handle().resolved().await;
    let user = state.user.expect("authenticated");
    assert_eq!(user.id, "u1");
    assert_eq!(user.name, "Dra. Ana Costa");
    assert_eq!(user.email, "u1@clinic.test");
    assert_eq!(user.specialty, "Nutrição Esportiva");
    assert_eq!(user.avatar, generated_avatar_url("Dra. Ana Costa"));
    assert_eq!(profiles.calls(), 1);
}

#[tokio::test]
async fn failed_or_missing_profile_falls_back_to_session_metadata() {
    let provider = Arc::new(MemoryAuthProvider::new());
    let profiles = Arc::new(GatedProfiles::default());
    profiles.fail("broken");
    let bridge = mount(provider.clone(), profiles.clone());
    let handle = bridge.handle();
    handle.resolved().await;

    provider.set_session(Some(session("broken", Some("Joana Lima"))));
    let state = wait_for_state(&handle, |s| s.user.as_ref().map(|u| u.id == "broken").unwrap_or(false)).await;
    let user = state.user.unwrap();
    assert_eq!(user.name, "Joana Lima");
    assert_eq!(user.specialty, DEFAULT_SPECIALTY);
    assert_eq!(user.avatar, generated_avatar_url("Joana Lima"));

    // no profile row and no metadata name
    provider.set_session(Some(session("fresh", None)));
    let state = wait_for_state(&handle, |s| s.user.as_ref().map(|u| u.id == "fresh").unwrap_or(false)).await;
    let user = state.user.unwrap();
    assert_eq!(user.name, DEFAULT_DISPLAY_NAME);
    assert_eq!(user.specialty, DEFAULT_SPECIALTY);
    assert_eq!(user.avatar, generated_avatar_url(DEFAULT_DISPLAY_NAME));
    assert!(!state.loading);
}

#[tokio::test]
async fn authentication_tracks_last_event() {
    let provider = Arc::new(MemoryAuthProvider::new());
    let bridge = mount(provider.clone(), Arc::new(GatedProfiles::default()));
    let handle = bridge.handle();
    handle.resolved().await;

    let script: [Option<&str>; 6] = [Some("a"), None, Some("b"), Some("c"), None, Some("d")];
    for step in script {
        provider.set_session(step.map(|id| session(id, None)));
        match step {
            Some(id) => {
                wait_for_state(&handle, |s| s.user.as_ref().map(|u| u.id == id).unwrap_or(false)).await;
            }
            None => {
                wait_for_state(&handle, |s| !s.is_authenticated()).await;
            }
        }
    }
    assert!(handle.is_authenticated());
    assert_eq!(handle.user().unwrap().id, "d");

    provider.set_session(None);
    wait_for_state(&handle, |s| !s.is_authenticated()).await;
    assert!(handle.user().is_none());
    assert_eq!(handle.stats().events, 8);
}

#[tokio::test(start_paused = true)]
async fn loading_times_out_when_nothing_is_processed() {
    let provider = Arc::new(ScriptedProvider::new());
    let bridge = mount(provider.clone(), Arc::new(GatedProfiles::default()));
    let handle = bridge.handle();

    tokio::time::sleep(Duration::from_millis(9_900)).await;
    assert!(handle.is_loading());

    tokio::time::sleep(Duration::from_millis(200)).await;
    let state = handle.state();
    assert!(!state.loading);
    assert!(!state.is_authenticated());
    assert_eq!(handle.stats().events, 0);

    // a late event still lands and loading stays false
    provider.emit(AuthEvent::signed_in(session("late", Some("Late User"))));
    let state = wait_for_state(&handle, |s| s.is_authenticated()).await;
    assert!(!state.loading);
    assert_eq!(state.user.unwrap().name, "Late User");
    assert_eq!(handle.stats().applied, 1);
}

#[tokio::test(start_paused = true)]
async fn loading_times_out_when_first_profile_lookup_hangs() {
    let provider = Arc::new(MemoryAuthProvider::new());
    provider.set_session(Some(session("slow", Some("Slow"))));
    let profiles = Arc::new(GatedProfiles::default());
    profiles.gate("slow");

    let bridge = mount(provider, profiles.clone());
    let handle = bridge.handle();
    let state = handle.resolved().await;
    assert!(!state.loading);
    assert!(state.user.is_none());
    assert_eq!(profiles.calls(), 1);

    profiles.release("slow");
    let state = wait_for_state(&handle, |s| s.is_authenticated()).await;
    assert_eq!(state.user.unwrap().name, "Slow");
}

#[tokio::test]
async fn first_resolution_cancels_the_timeout() {
    let provider = Arc::new(MemoryAuthProvider::new());
    let config = BridgeConfig { loading_timeout: Duration::from_millis(50), sequence_guard: true };
    let bridge = SessionBridge::mount(provider, Arc::new(GatedProfiles::default()), config);
    let handle = bridge.handle();
    handle.resolved().await;
    let mut rx = handle.watch();
    rx.borrow_and_update();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(!rx.has_changed().unwrap());
}

#[tokio::test]
async fn logout_requests_sign_out_once_and_waits_for_the_event() {
    let provider = Arc::new(ScriptedProvider::new());
    let bridge = mount(provider.clone(), Arc::new(GatedProfiles::default()));
    let handle = bridge.handle();

    provider.emit(AuthEvent::initial(Some(session("u1", Some("Ana")))));
    wait_for_state(&handle, |s| s.is_authenticated()).await;

    handle.logout().await.unwrap();
    assert_eq!(provider.sign_outs.load(Ordering::SeqCst), 1);
    assert!(handle.is_authenticated(), "logout must not clear state on its own");
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(handle.is_authenticated());

    provider.emit(AuthEvent::signed_out());
    wait_for_state(&handle, |s| !s.is_authenticated()).await;
    assert_eq!(provider.sign_outs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn logout_through_memory_provider_signs_out() {
    let provider = Arc::new(MemoryAuthProvider::new());
    provider.set_session(Some(session("u1", None)));
    let bridge = mount(provider.clone(), Arc::new(GatedProfiles::default()));
    let handle = bridge.handle();
    assert!(handle.resolved().await.is_authenticated());

    handle.logout().await.unwrap();
    wait_for_state(&handle, |s| !s.is_authenticated()).await;
    assert_eq!(provider.sign_out_calls(), 1);
}

/// Session event A is still fetching its profile when sign-out event B lands.
/// Drives the provider and returns once A's lookup is parked and B is applied.
async fn park_a_behind_b(provider: &MemoryAuthProvider, profiles: &GatedProfiles, handle: &SessionHandle) {
    handle.resolved().await;
    profiles.gate("a");
    provider.set_session(Some(session("a", Some("Stale A"))));
    wait_until("profile lookup for A", || profiles.calls() == 1).await;

    provider.set_session(None);
    wait_until("sign-out applied", || handle.stats().applied == 2).await;
    assert!(!handle.is_authenticated());
}

#[tokio::test]
async fn stale_profile_resolution_is_discarded() {
    let provider = Arc::new(MemoryAuthProvider::new());
    let profiles = Arc::new(GatedProfiles::default());
    let bridge = mount(provider.clone(), profiles.clone());
    let handle = bridge.handle();

    park_a_behind_b(&provider, &profiles, &handle).await;
    profiles.release("a");
    wait_until("A discarded", || handle.stats().discarded == 1).await;

    assert!(handle.user().is_none());
    assert_eq!(handle.stats().applied, 2);
}

// Pins the unguarded behaviour: whichever resolution completes last wins,
// so a slow sign-in fetch resurrects a user that already signed out.
#[tokio::test]
async fn unguarded_bridge_lets_last_completion_win() {
    let provider = Arc::new(MemoryAuthProvider::new());
    let profiles = Arc::new(GatedProfiles::default());
    let config = BridgeConfig { sequence_guard: false, ..BridgeConfig::default() };
    let bridge = SessionBridge::mount(provider.clone(), profiles.clone(), config);
    let handle = bridge.handle();

    park_a_behind_b(&provider, &profiles, &handle).await;
    profiles.release("a");
    let state = wait_for_state(&handle, |s| s.is_authenticated()).await;
    assert_eq!(state.user.unwrap().id, "a");
    assert_eq!(handle.stats().discarded, 0);
}

#[tokio::test]
async fn newer_session_wins_over_slower_older_one() {
    let provider = Arc::new(MemoryAuthProvider::new());
    let profiles = Arc::new(GatedProfiles::default());
    let bridge = mount(provider.clone(), profiles.clone());
    let handle = bridge.handle();
    handle.resolved().await;

    profiles.gate("old");
    provider.set_session(Some(session("old", None)));
    wait_until("old lookup parked", || profiles.calls() == 1).await;
    provider.set_session(Some(session("new", None)));
    wait_for_state(&handle, |s| s.user.as_ref().map(|u| u.id == "new").unwrap_or(false)).await;

    profiles.release("old");
    wait_until("old discarded", || handle.stats().discarded == 1).await;
    assert_eq!(handle.user().unwrap().id, "new");
}

#[tokio::test]
async fn teardown_during_fetch_writes_nothing() {
    let provider = Arc::new(MemoryAuthProvider::new());
    provider.set_session(Some(session("u1", None)));
    let profiles = Arc::new(GatedProfiles::default());
    profiles.gate("u1");

    let bridge = mount(provider.clone(), profiles.clone());
    let handle = bridge.handle();
    wait_until("lookup started", || profiles.calls() == 1).await;

    bridge.shutdown().await;
    assert_eq!(provider.listener_count(), 0);

    profiles.release("u1");
    provider.set_session(Some(session("u2", None)));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let state = handle.state();
    assert!(state.loading);
    assert!(state.user.is_none());
    assert_eq!(handle.stats().applied, 0);
    assert_eq!(profiles.calls(), 1);
}

#[tokio::test]
async fn resolved_returns_after_teardown_while_loading() {
    let provider = Arc::new(ScriptedProvider::new());
    let config = BridgeConfig { loading_timeout: Duration::from_secs(3600), sequence_guard: true };
    let bridge = SessionBridge::mount(provider, Arc::new(GatedProfiles::default()), config);
    let handle = bridge.handle();

    // one waiter parked before teardown, one arriving after
    let early = tokio::spawn({
        let handle = handle.clone();
        async move { handle.resolved().await }
    });
    tokio::task::yield_now().await;
    bridge.shutdown().await;

    let early = tokio::time::timeout(Duration::from_secs(2), early).await.expect("early waiter released").unwrap();
    assert!(early.loading);
    let late = tokio::time::timeout(Duration::from_secs(2), handle.resolved()).await.expect("late waiter released");
    assert!(late.loading);
    assert!(late.user.is_none());
}

#[tokio::test]
async fn unbounded_loading_timeout_is_accepted() {
    let provider = Arc::new(MemoryAuthProvider::new());
    let config = BridgeConfig { loading_timeout: Duration::MAX, sequence_guard: true };
    let bridge = SessionBridge::mount(provider, Arc::new(GatedProfiles::default()), config);
    let state = tokio::time::timeout(Duration::from_secs(2), bridge.handle().resolved()).await.expect("resolved");
    assert!(!state.loading);
    bridge.shutdown().await;
}

#[tokio::test]
async fn dropping_the_bridge_unsubscribes() {
    let provider = Arc::new(MemoryAuthProvider::new());
    let bridge = mount(provider.clone(), Arc::new(GatedProfiles::default()));
    bridge.handle().resolved().await;
    drop(bridge);
    wait_until("subscription released", || provider.listener_count() == 0).await;
}
