//! Discord REST implementation of the [`ChatPlatform`] capability.
//!
//! Only the handful of message/reaction endpoints the sync engine needs are
//! covered; gateway events are handled elsewhere.

use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::{Client, Method, Response, StatusCode, header};
use serde::Deserialize;
use thiserror::Error;

use crate::model::UserId;

use super::{ChatPlatform, FetchedMessage, MessageRef, PlatformError, PlatformResult, ReactionMap};

const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";
const TOKEN_ENV: &str = "DISCORD_BOT_TOKEN";
const API_BASE_ENV: &str = "DISCORD_API_BASE";
/// Backoff applied when a 429 arrives without a usable Retry-After header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);
/// Page size for reaction-user listing.
const REACTION_PAGE_LIMIT: usize = 100;

/// Failures while building a [`DiscordRestClient`] from the environment.
#[derive(Debug, Error)]
pub enum DiscordConfigError {
    /// Required environment variable is missing.
    #[error("missing Discord environment variable `{var}`")]
    MissingEnvVar {
        /// Name of the missing variable.
        var: &'static str,
    },
}

/// Runtime configuration for the Discord REST client.
#[derive(Debug, Clone)]
pub struct DiscordConfig {
    /// REST API base URL, overridable for tests and proxies.
    pub base_url: String,
    /// Bot token used for authorization.
    pub token: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl DiscordConfig {
    /// Construct a configuration from an explicit token, using the public API base.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            token: token.into(),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Build a configuration by reading the expected environment variables.
    pub fn from_env() -> Result<Self, DiscordConfigError> {
        let token = std::env::var(TOKEN_ENV)
            .map_err(|_| DiscordConfigError::MissingEnvVar { var: TOKEN_ENV })?;
        let mut config = Self::new(token);
        if let Ok(base_url) = std::env::var(API_BASE_ENV)
            && !base_url.is_empty()
        {
            config.base_url = base_url;
        }
        Ok(config)
    }
}

/// REST-backed [`ChatPlatform`] implementation.
#[derive(Clone)]
pub struct DiscordRestClient {
    client: Client,
    base_url: Arc<str>,
    token: Arc<str>,
}

impl DiscordRestClient {
    /// Build the HTTP client from the given configuration.
    pub fn new(config: DiscordConfig) -> PlatformResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|source| PlatformError::Transport {
                path: "client builder".into(),
                source: Box::new(source),
            })?;

        Ok(Self {
            client,
            base_url: Arc::from(config.base_url.trim_end_matches('/')),
            token: Arc::from(config.token.as_str()),
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        self.client
            .request(method, url)
            .header(header::AUTHORIZATION, format!("Bot {}", self.token))
    }

    async fn send(&self, method: Method, path: String) -> PlatformResult<Response> {
        let response = self
            .request(method, &path)
            .send()
            .await
            .map_err(|source| PlatformError::Transport {
                path: path.clone(),
                source: Box::new(source),
            })?;
        check_status(&path, response)
    }

    async fn fetch_message_inner(&self, message: MessageRef) -> PlatformResult<FetchedMessage> {
        let path = message_path(message);
        let response = self.send(Method::GET, path.clone()).await?;
        let document = response.json::<MessageDocument>().await.map_err(|source| {
            PlatformError::DecodeResponse {
                path,
                source: Box::new(source),
            }
        })?;

        let reaction_emoji = document
            .reactions
            .into_iter()
            .filter_map(|reaction| reaction.emoji.name)
            .collect();

        Ok(FetchedMessage {
            reference: message,
            reaction_emoji,
        })
    }

    /// List every user who reacted with one emoji, following pagination.
    async fn reaction_users(&self, message: MessageRef, emoji: &str) -> PlatformResult<Vec<UserId>> {
        let mut users = Vec::new();
        let mut after: Option<UserId> = None;

        loop {
            let mut path = format!(
                "{}/reactions/{}?limit={}",
                message_path(message),
                urlencoding::encode(emoji),
                REACTION_PAGE_LIMIT,
            );
            if let Some(cursor) = after {
                path.push_str(&format!("&after={cursor}"));
            }

            let response = self.send(Method::GET, path.clone()).await?;
            let page = response.json::<Vec<UserDocument>>().await.map_err(|source| {
                PlatformError::DecodeResponse {
                    path: path.clone(),
                    source: Box::new(source),
                }
            })?;

            let page_len = page.len();
            for user in page {
                let id = user
                    .id
                    .parse::<UserId>()
                    .map_err(|source| PlatformError::DecodeResponse {
                        path: path.clone(),
                        source: Box::new(source),
                    })?;
                users.push(id);
            }

            if page_len < REACTION_PAGE_LIMIT {
                return Ok(users);
            }
            after = users.last().copied();
        }
    }

    async fn get_reactions_inner(&self, message: MessageRef) -> PlatformResult<ReactionMap> {
        let fetched = self.fetch_message_inner(message).await?;
        let mut reactions = ReactionMap::new();
        for emoji in fetched.reaction_emoji {
            let users = self.reaction_users(message, &emoji).await?;
            reactions.insert(emoji, users);
        }
        Ok(reactions)
    }

    async fn edit_message_inner(&self, message: MessageRef, content: String) -> PlatformResult<()> {
        let path = message_path(message);
        let response = self
            .request(Method::PATCH, &path)
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await
            .map_err(|source| PlatformError::Transport {
                path: path.clone(),
                source: Box::new(source),
            })?;
        check_status(&path, response).map(|_| ())
    }
}

impl ChatPlatform for DiscordRestClient {
    fn fetch_message(
        &self,
        message: MessageRef,
    ) -> BoxFuture<'static, PlatformResult<FetchedMessage>> {
        let client = self.clone();
        Box::pin(async move { client.fetch_message_inner(message).await })
    }

    fn get_reactions(&self, message: MessageRef) -> BoxFuture<'static, PlatformResult<ReactionMap>> {
        let client = self.clone();
        Box::pin(async move { client.get_reactions_inner(message).await })
    }

    fn add_reaction(
        &self,
        message: MessageRef,
        emoji: String,
    ) -> BoxFuture<'static, PlatformResult<()>> {
        let client = self.clone();
        Box::pin(async move {
            let path = format!(
                "{}/reactions/{}/@me",
                message_path(message),
                urlencoding::encode(&emoji),
            );
            client.send(Method::PUT, path).await.map(|_| ())
        })
    }

    fn remove_reaction(
        &self,
        message: MessageRef,
        emoji: String,
        user_id: UserId,
    ) -> BoxFuture<'static, PlatformResult<()>> {
        let client = self.clone();
        Box::pin(async move {
            let path = format!(
                "{}/reactions/{}/{}",
                message_path(message),
                urlencoding::encode(&emoji),
                user_id,
            );
            client.send(Method::DELETE, path).await.map(|_| ())
        })
    }

    fn edit_message(
        &self,
        message: MessageRef,
        content: String,
    ) -> BoxFuture<'static, PlatformResult<()>> {
        let client = self.clone();
        Box::pin(async move { client.edit_message_inner(message, content).await })
    }
}

fn message_path(message: MessageRef) -> String {
    format!(
        "channels/{}/messages/{}",
        message.channel_id, message.message_id
    )
}

/// Translate HTTP statuses into the platform error taxonomy.
fn check_status(path: &str, response: Response) -> PlatformResult<Response> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<f64>().ok())
            .map(Duration::from_secs_f64)
            .unwrap_or(DEFAULT_RETRY_AFTER);
        return Err(PlatformError::RateLimited { retry_after });
    }
    if status == StatusCode::NOT_FOUND {
        return Err(PlatformError::NotFound { what: path.into() });
    }
    if status == StatusCode::FORBIDDEN {
        return Err(PlatformError::Forbidden { what: path.into() });
    }
    if !status.is_success() {
        return Err(PlatformError::UnexpectedStatus {
            path: path.into(),
            status,
        });
    }

    Ok(response)
}

#[derive(Debug, Deserialize)]
struct MessageDocument {
    #[serde(default)]
    reactions: Vec<ReactionDocument>,
}

#[derive(Debug, Deserialize)]
struct ReactionDocument {
    emoji: EmojiDocument,
}

#[derive(Debug, Deserialize)]
struct EmojiDocument {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserDocument {
    id: String,
}
