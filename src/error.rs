//! Error types for catalog fetching, mock resolution and request interception.

use std::time::Duration;
use thiserror::Error;

/// Failure to retrieve a collection from the catalog service.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unauthorized: check the catalog access key")]
    Unauthorized,

    #[error("catalog service returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("failed to decode collection: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("request to catalog service failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("collection load timed out after {0:?}")]
    Timeout(Duration),
}

/// Unexpected fault while matching a request path against enabled mocks.
///
/// Never escapes [`MockRegistry::resolve`](crate::registry::MockRegistry::resolve);
/// it is reported through [`MockDecision::NoMock`](crate::registry::MockDecision::NoMock).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("mock matching failed: {0}")]
    Internal(String),
}

/// Failure to apply a resolved mock to an outgoing request.
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("invalid mock url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid value for header {name}: {source}")]
    InvalidHeader {
        name: &'static str,
        #[source]
        source: reqwest::header::InvalidHeaderValue,
    },
}

/// Failure raised by the interception contract for a single request.
#[derive(Debug, Error)]
pub enum InterceptError {
    /// No mock was selected while mocking is enforced.
    #[error("mocking enforced, but no mock selected for {url}")]
    MockingEnforced { url: String },

    /// A mock was selected but could not be applied while mocking is enforced.
    #[error("mocking enforced, but failed to set mock {mock_id} for {url}: {source}")]
    MockRewriteFailed {
        url: String,
        mock_id: String,
        #[source]
        source: RewriteError,
    },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl InterceptError {
    /// Whether the request was blocked before reaching the network.
    pub fn is_mocking_enforced(&self) -> bool {
        matches!(
            self,
            InterceptError::MockingEnforced { .. } | InterceptError::MockRewriteFailed { .. }
        )
    }
}
