//! Chat-platform capability consumed by the reconciliation engine.
//!
//! The engine only needs five narrow operations on a managed message; the
//! gateway/event side of the platform stays outside this crate. A REST-backed
//! implementation lives in [`discord`]; tests substitute their own doubles.

pub mod discord;

use std::{collections::HashMap, error::Error, time::Duration};

use futures::future::BoxFuture;
use reqwest::StatusCode;
use thiserror::Error;

use crate::model::{ChannelId, MessageId, UserId};

/// Result alias for chat-platform operations.
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Location of one message on the chat platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    /// Channel the message lives in.
    pub channel_id: ChannelId,
    /// The message itself.
    pub message_id: MessageId,
}

/// Snapshot of a fetched message: enough to confirm it exists and list which
/// emoji currently carry reactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    /// Where the message was fetched from.
    pub reference: MessageRef,
    /// Emoji that currently have at least one reaction.
    pub reaction_emoji: Vec<String>,
}

/// Current reaction state of a message: emoji mapped to the users who reacted.
pub type ReactionMap = HashMap<String, Vec<UserId>>;

/// Failures raised by chat-platform calls.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The platform asked us to back off.
    #[error("rate limited by the chat platform, retry after {retry_after:?}")]
    RateLimited {
        /// How long the platform asked us to wait.
        retry_after: Duration,
    },
    /// Message, channel, or user no longer exists.
    #[error("{what} not found")]
    NotFound {
        /// Description of the missing resource.
        what: String,
    },
    /// The worker lacks permission for the target resource.
    #[error("access to {what} forbidden")]
    Forbidden {
        /// Description of the protected resource.
        what: String,
    },
    /// The request never produced a response.
    #[error("failed to reach the chat platform at `{path}`")]
    Transport {
        /// Request path for diagnostics.
        path: String,
        /// Underlying transport failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The platform answered with a status we did not expect.
    #[error("unexpected chat platform response status {status} for `{path}`")]
    UnexpectedStatus {
        /// Request path for diagnostics.
        path: String,
        /// Status code received.
        status: StatusCode,
    },
    /// The response body could not be decoded.
    #[error("failed to decode chat platform response for `{path}`")]
    DecodeResponse {
        /// Request path for diagnostics.
        path: String,
        /// Underlying decode failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl PlatformError {
    /// Whether retrying the call may succeed. Rate limits, transport failures,
    /// and 5xx responses are transient; missing or forbidden resources are not.
    pub fn is_transient(&self) -> bool {
        match self {
            PlatformError::RateLimited { .. } | PlatformError::Transport { .. } => true,
            PlatformError::UnexpectedStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            PlatformError::NotFound { .. }
            | PlatformError::Forbidden { .. }
            | PlatformError::DecodeResponse { .. } => false,
        }
    }

    /// Explicit backoff requested by the platform, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PlatformError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Abstraction over the chat platform operations the sync engine needs.
pub trait ChatPlatform: Send + Sync {
    /// Fetch a message, confirming it still exists.
    fn fetch_message(&self, message: MessageRef)
    -> BoxFuture<'static, PlatformResult<FetchedMessage>>;

    /// Read the full reaction state of a message.
    fn get_reactions(&self, message: MessageRef) -> BoxFuture<'static, PlatformResult<ReactionMap>>;

    /// Add the worker's own reaction with the given emoji.
    fn add_reaction(
        &self,
        message: MessageRef,
        emoji: String,
    ) -> BoxFuture<'static, PlatformResult<()>>;

    /// Remove one user's reaction with the given emoji.
    fn remove_reaction(
        &self,
        message: MessageRef,
        emoji: String,
        user_id: UserId,
    ) -> BoxFuture<'static, PlatformResult<()>>;

    /// Replace the message content with a regenerated summary.
    fn edit_message(
        &self,
        message: MessageRef,
        content: String,
    ) -> BoxFuture<'static, PlatformResult<()>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_server_errors_are_transient() {
        let rate_limited = PlatformError::RateLimited {
            retry_after: Duration::from_secs(2),
        };
        assert!(rate_limited.is_transient());
        assert_eq!(rate_limited.retry_after(), Some(Duration::from_secs(2)));

        let server_error = PlatformError::UnexpectedStatus {
            path: "channels/1/messages/2".into(),
            status: StatusCode::BAD_GATEWAY,
        };
        assert!(server_error.is_transient());
    }

    #[test]
    fn missing_and_forbidden_are_terminal() {
        let not_found = PlatformError::NotFound {
            what: "message 2".into(),
        };
        assert!(!not_found.is_transient());
        assert_eq!(not_found.retry_after(), None);

        let forbidden = PlatformError::Forbidden {
            what: "channel 1".into(),
        };
        assert!(!forbidden.is_transient());
    }
}
