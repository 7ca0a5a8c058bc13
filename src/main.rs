use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use nutriadmin::backend::{BackendClient, GoTrueAuthProvider, RestProfileStore};
use nutriadmin::config::AppConfig;
use nutriadmin::identity::{
    protected_route, AuthProvider, MemoryAuthProvider, MemoryProfileStore, ProfileStore, SessionBridge,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("invalid RUST_LOG filter")?;
    fmt().with_env_filter(filter).init();

    let config = AppConfig::from_env().context("reading NUTRI_* configuration")?;

    let (provider, profiles): (Arc<dyn AuthProvider>, Arc<dyn ProfileStore>) = match &config.backend {
        Some(backend) => {
            info!(target: "nutriadmin", "using backend at {}", backend.url);
            let client = BackendClient::new(backend.clone())?;
            let provider: Arc<dyn AuthProvider> = Arc::new(GoTrueAuthProvider::new(client.clone()));
            let profiles: Arc<dyn ProfileStore> = Arc::new(RestProfileStore::new(client));
            (provider, profiles)
        }
        None => {
            info!(target: "nutriadmin", "NUTRI_BACKEND_URL unset, using in-memory auth");
            let provider: Arc<dyn AuthProvider> = Arc::new(MemoryAuthProvider::new());
            let profiles: Arc<dyn ProfileStore> = Arc::new(MemoryProfileStore::new());
            (provider, profiles)
        }
    };

    let bridge = SessionBridge::mount(provider.clone(), profiles, config.bridge.clone());
    let handle = bridge.handle();

    // Log every snapshot the bridge publishes
    let mut snapshots = handle.watch();
    let printer = tokio::spawn(async move {
        loop {
            let state = snapshots.borrow_and_update().clone();
            let access = protected_route(&state);
            match serde_json::to_string(&state) {
                Ok(json) => info!(target: "nutriadmin", authenticated = state.is_authenticated(), ?access, "state {}", json),
                Err(e) => warn!("could not serialize state: {}", e),
            }
            if snapshots.changed().await.is_err() {
                break;
            }
        }
    });

    let initial = handle.resolved().await;
    info!(target: "nutriadmin", authenticated = initial.is_authenticated(), "initial auth state resolved");

    if let Some(login) = &config.login {
        if let Err(e) = provider.sign_in_with_password(&login.email, &login.password).await {
            warn!(target: "nutriadmin", "sign-in failed: {}", e);
        }
    }

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    if handle.is_authenticated() {
        if let Err(e) = handle.logout().await {
            warn!(target: "nutriadmin", "logout failed: {}", e);
        }
    }
    bridge.shutdown().await;
    printer.abort();
    Ok(())
}
