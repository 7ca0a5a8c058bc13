use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::StatusCode;
use tracing::debug;

use super::{error_from_response, BackendClient};
use crate::error::AppResult;
use crate::identity::{ProfileRecord, ProfileStore, Session};

/// Asks PostgREST for exactly one object; zero rows come back as 406.
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";
const PROFILE_COLUMNS: &str = "name,avatar_url,specialty";

/// `profiles` table lookup over the REST data API.
#[derive(Clone)]
pub struct RestProfileStore {
    client: BackendClient,
    table: String,
}

impl RestProfileStore {
    pub fn new(client: BackendClient) -> Self {
        Self { client, table: "profiles".to_string() }
    }

    fn lookup_url(&self, user_id: &str) -> String {
        format!(
            "{}?select={}&id=eq.{}",
            self.client.url(&format!("rest/v1/{}", self.table)),
            PROFILE_COLUMNS,
            urlencoding::encode(user_id)
        )
    }
}

#[async_trait]
impl ProfileStore for RestProfileStore {
    async fn get_profile(&self, session: &Session) -> AppResult<Option<ProfileRecord>> {
        let mut headers = self.client.headers(Some(&session.access_token))?;
        headers.insert(ACCEPT, HeaderValue::from_static(SINGLE_OBJECT));

        let resp = self
            .client
            .http()
            .get(self.lookup_url(session.user_id()))
            .headers(headers)
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => Ok(Some(resp.json::<ProfileRecord>().await?)),
            StatusCode::NOT_ACCEPTABLE => {
                debug!(user_id = session.user_id(), "profiles: no row");
                Ok(None)
            }
            _ => Err(error_from_response(resp).await),
        }
    }
}
