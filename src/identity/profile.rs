use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::session::Session;
use crate::error::{AppError, AppResult};

/// Row of the `profiles` table. Any column may be null.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub specialty: Option<String>,
}

/// Point lookup of the practice profile behind a session.
///
/// `Ok(None)` means "no row yet" and is not an error. The session is passed
/// whole so remote stores can authorize with its access token.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, session: &Session) -> AppResult<Option<ProfileRecord>>;
}

/// In-process store keyed by user id.
#[derive(Default)]
pub struct MemoryProfileStore {
    rows: RwLock<HashMap<String, ProfileRecord>>,
    failing: RwLock<HashSet<String>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&self, user_id: &str, record: ProfileRecord) {
        self.rows.write().insert(user_id.to_string(), record);
    }

    /// Make lookups for `user_id` fail as if the backend were unreachable.
    pub fn fail_for(&self, user_id: &str) {
        self.failing.write().insert(user_id.to_string());
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get_profile(&self, session: &Session) -> AppResult<Option<ProfileRecord>> {
        let id = session.user_id();
        if self.failing.read().contains(id) {
            return Err(AppError::io("profile_store_unavailable", "profile store is unreachable"));
        }
        Ok(self.rows.read().get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::session::AuthUser;

    fn session_for(id: &str) -> Session {
        Session {
            access_token: "t".into(),
            refresh_token: None,
            expires_at: None,
            user: AuthUser { id: id.into(), ..Default::default() },
        }
    }

    #[tokio::test]
    async fn memory_store_found_missing_and_failing() {
        let store = MemoryProfileStore::new();
        store.insert("a", ProfileRecord { name: Some("Ana".into()), ..Default::default() });
        store.fail_for("c");

        let found = store.get_profile(&session_for("a")).await.unwrap();
        assert_eq!(found.unwrap().name.as_deref(), Some("Ana"));
        assert!(store.get_profile(&session_for("b")).await.unwrap().is_none());
        let err = store.get_profile(&session_for("c")).await.unwrap_err();
        assert!(err.is_transient());
    }
}
