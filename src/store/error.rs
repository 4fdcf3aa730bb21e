//! Error types shared by the source-of-truth store client.

use reqwest::StatusCode;
use thiserror::Error;

/// Convenient result alias returning [`StoreError`] failures.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failures that can occur while talking to the league store API.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build store client")]
    ClientBuilder {
        /// Underlying builder failure.
        #[source]
        source: reqwest::Error,
    },
    /// A request to a store endpoint could not be sent.
    #[error("failed to send store request to `{path}`")]
    RequestSend {
        /// Request path for diagnostics.
        path: String,
        /// Underlying transport failure.
        #[source]
        source: reqwest::Error,
    },
    /// The store returned an unexpected status code.
    #[error("unexpected store response status {status} for `{path}`")]
    RequestStatus {
        /// Request path for diagnostics.
        path: String,
        /// Status code received.
        status: StatusCode,
    },
    /// Response payload could not be parsed into JSON.
    #[error("failed to decode store response for `{path}`")]
    DecodeResponse {
        /// Request path for diagnostics.
        path: String,
        /// Underlying decode failure.
        #[source]
        source: reqwest::Error,
    },
    /// The payload parsed but did not have the expected shape.
    #[error("malformed store payload for `{path}`: {detail}")]
    Malformed {
        /// Request path for diagnostics.
        path: String,
        /// What was wrong with the payload.
        detail: String,
    },
}

impl StoreError {
    /// Whether retrying the call may succeed. Transport failures and
    /// 5xx/429 responses are transient; malformed payloads are not and are
    /// treated as "no data from that source" by callers.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::RequestSend { .. } => true,
            StoreError::RequestStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            StoreError::ClientBuilder { .. }
            | StoreError::DecodeResponse { .. }
            | StoreError::Malformed { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient_malformed_is_not() {
        let unavailable = StoreError::RequestStatus {
            path: "get_match_rsvps/7".into(),
            status: StatusCode::SERVICE_UNAVAILABLE,
        };
        assert!(unavailable.is_transient());

        let conflict = StoreError::RequestStatus {
            path: "get_match_rsvps/7".into(),
            status: StatusCode::UNPROCESSABLE_ENTITY,
        };
        assert!(!conflict.is_transient());

        let malformed = StoreError::Malformed {
            path: "get_match_rsvps/7".into(),
            detail: "missing buckets".into(),
        };
        assert!(!malformed.is_transient());
    }
}
