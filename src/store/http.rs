//! HTTP implementation of the [`RsvpStore`] capability against the league
//! web application's JSON API.

use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::model::{HeartbeatRecord, ManagedMessage, MatchId, RsvpResponse, TeamId, TeamRsvps, UserId};

use super::{
    RsvpStore,
    error::{StoreError, StoreResult},
    models::{
        ActivityDocument, AvailabilityUpdateRequest, HeartbeatRequest, LastOnlineDocument,
        MatchRsvpsDocument, MembershipDocument, MembershipRequest, ScheduledMessagesDocument,
    },
};

const DEFAULT_BASE_URL: &str = "http://webui:5000/api";
const BASE_URL_ENV: &str = "STORE_BASE_URL";

/// Runtime configuration describing how to reach the league store API.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base URL including any path prefix (no trailing slash needed).
    pub base_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl StoreConfig {
    /// Construct a configuration from an explicit base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Build a configuration from the environment, falling back to the
    /// in-cluster default.
    pub fn from_env() -> Self {
        match std::env::var(BASE_URL_ENV) {
            Ok(base_url) if !base_url.is_empty() => Self::new(base_url),
            _ => Self::new(DEFAULT_BASE_URL),
        }
    }
}

/// reqwest-backed [`RsvpStore`] implementation.
#[derive(Clone)]
pub struct HttpRsvpStore {
    client: Client,
    base_url: Arc<str>,
}

impl HttpRsvpStore {
    /// Build the HTTP client from the given configuration.
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|source| StoreError::ClientBuilder { source })?;

        Ok(Self {
            client,
            base_url: Arc::from(config.base_url.trim_end_matches('/')),
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        self.client.request(method, url)
    }

    async fn check(&self, path: &str, response: Response) -> StoreResult<Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(StoreError::RequestStatus {
                path: path.to_string(),
                status: response.status(),
            })
        }
    }

    async fn get_json<T>(&self, path: String) -> StoreResult<T>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, &path)
            .send()
            .await
            .map_err(|source| StoreError::RequestSend {
                path: path.clone(),
                source,
            })?;
        let response = self.check(&path, response).await?;
        response
            .json::<T>()
            .await
            .map_err(|source| StoreError::DecodeResponse { path, source })
    }

    async fn post_json<B, T>(&self, path: String, body: &B) -> StoreResult<T>
    where
        B: serde::Serialize,
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::POST, &path)
            .json(body)
            .send()
            .await
            .map_err(|source| StoreError::RequestSend {
                path: path.clone(),
                source,
            })?;
        let response = self.check(&path, response).await?;
        response
            .json::<T>()
            .await
            .map_err(|source| StoreError::DecodeResponse { path, source })
    }

    async fn post_no_body<B>(&self, path: String, body: &B) -> StoreResult<()>
    where
        B: serde::Serialize,
    {
        let response = self
            .request(Method::POST, &path)
            .json(body)
            .send()
            .await
            .map_err(|source| StoreError::RequestSend {
                path: path.clone(),
                source,
            })?;
        self.check(&path, response).await.map(|_| ())
    }
}

fn rfc3339(timestamp: OffsetDateTime, path: &str) -> StoreResult<String> {
    timestamp
        .format(&Rfc3339)
        .map_err(|err| StoreError::Malformed {
            path: path.to_string(),
            detail: format!("unformattable timestamp: {err}"),
        })
}

impl RsvpStore for HttpRsvpStore {
    fn match_rsvps(
        &self,
        match_id: MatchId,
        team_id: TeamId,
    ) -> BoxFuture<'static, StoreResult<TeamRsvps>> {
        let store = self.clone();
        Box::pin(async move {
            let path = format!("get_match_rsvps/{match_id}?team_id={team_id}");
            let document = store.get_json::<MatchRsvpsDocument>(path).await?;
            Ok(document.into_domain())
        })
    }

    fn record_response(
        &self,
        match_id: MatchId,
        user_id: UserId,
        response: RsvpResponse,
        responded_at: OffsetDateTime,
    ) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let body = AvailabilityUpdateRequest {
                match_id,
                discord_id: user_id.to_string(),
                response: response.as_wire(),
                responded_at,
            };
            store
                .post_no_body("update_availability_from_discord".to_string(), &body)
                .await
        })
    }

    fn last_online(&self) -> BoxFuture<'static, StoreResult<Option<OffsetDateTime>>> {
        let store = self.clone();
        Box::pin(async move {
            let document = store
                .get_json::<LastOnlineDocument>("discord_bot_last_online".to_string())
                .await?;
            Ok(document.last_online)
        })
    }

    fn write_heartbeat(&self, record: HeartbeatRecord) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let body = HeartbeatRequest {
                instance_id: record.instance_id,
                instance_type: record.instance_type,
                last_online: record.last_online,
            };
            store
                .post_no_body("discord_bot_last_online".to_string(), &body)
                .await
        })
    }

    fn matches_with_activity_since(
        &self,
        since: OffsetDateTime,
        limit_days: i64,
    ) -> BoxFuture<'static, StoreResult<Vec<MatchId>>> {
        let store = self.clone();
        Box::pin(async move {
            let since = rfc3339(since, "matches_with_rsvp_activity_since")?;
            let path = format!(
                "matches_with_rsvp_activity_since?since={}&limit_days={limit_days}",
                urlencoding::encode(&since),
            );
            let document = store.get_json::<ActivityDocument>(path).await?;
            Ok(document
                .matches
                .into_iter()
                .map(|entry| entry.match_id)
                .collect())
        })
    }

    fn is_user_on_team(
        &self,
        user_id: UserId,
        team_id: TeamId,
    ) -> BoxFuture<'static, StoreResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let body = MembershipRequest {
                discord_id: user_id.to_string(),
                team_id,
            };
            let document = store
                .post_json::<_, MembershipDocument>("is_user_on_team".to_string(), &body)
                .await?;
            Ok(document.is_team_member)
        })
    }

    fn scheduled_messages(
        &self,
        window_days: i64,
    ) -> BoxFuture<'static, StoreResult<Vec<ManagedMessage>>> {
        let store = self.clone();
        Box::pin(async move {
            let path = format!("get_scheduled_messages?window_days={window_days}");
            let document = store
                .get_json::<ScheduledMessagesDocument>(path.clone())
                .await?;
            document
                .messages
                .into_iter()
                .map(|entry| entry.into_domain(&path))
                .collect()
        })
    }
}
