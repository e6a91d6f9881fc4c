//! Collection retrieval from the remote catalog service.

use crate::catalog::{Collection, CollectionResponse};
use crate::config::CatalogConfig;
use crate::error::FetchError;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::debug;

/// Header carrying the catalog access key.
pub const ACCESS_KEY_HEADER: &str = "X-API-Key";

/// Source of collections for the mock registry.
#[async_trait]
pub trait CollectionSource: Send + Sync {
    /// Fetch the collection with the given id.
    async fn fetch(&self, collection_id: &str) -> Result<Collection, FetchError>;

    /// Replace the access key used by subsequent fetches.
    fn update_access_key(&self, new_key: &str);
}

/// HTTP client for the catalog service.
///
/// Performs no retries; callers observe the failure and decide.
pub struct CollectionFetcher {
    client: reqwest::Client,
    base_url: String,
    access_key: watch::Sender<String>,
}

impl CollectionFetcher {
    /// Create a fetcher from catalog settings.
    pub fn new(config: &CatalogConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Create a fetcher around an existing `reqwest::Client`.
    pub fn with_client(client: reqwest::Client, config: &CatalogConfig) -> Self {
        let (access_key, _) = watch::channel(config.access_key.clone());
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_key,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, collection_id: &str) -> String {
        format!("{}/collections/{}", self.base_url, collection_id)
    }
}

#[async_trait]
impl CollectionSource for CollectionFetcher {
    async fn fetch(&self, collection_id: &str) -> Result<Collection, FetchError> {
        let url = self.collection_url(collection_id);
        let access_key = self.access_key.borrow().clone();

        debug!(url = %url, "Fetching collection");
        let response = self
            .client
            .get(&url)
            .header(ACCESS_KEY_HEADER, access_key)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(FetchError::Unauthorized);
        }

        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(FetchError::Remote {
                status: status.as_u16(),
                message: remote_error_message(status, &body),
            });
        }

        let decoded: CollectionResponse = serde_json::from_slice(&body)?;
        debug!(
            collection = %decoded.collection.info.name,
            items = decoded.collection.items.len(),
            "Fetched collection"
        );
        Ok(decoded.collection)
    }

    fn update_access_key(&self, new_key: &str) {
        self.access_key.send_replace(new_key.to_string());
        debug!("Catalog access key updated");
    }
}

/// Error body shape used by the catalog service.
#[derive(Deserialize)]
struct RemoteErrorBody {
    error: RemoteErrorDetail,
}

#[derive(Deserialize)]
struct RemoteErrorDetail {
    message: String,
}

/// Prefer the service's own error message, falling back to the status reason.
fn remote_error_message(status: StatusCode, body: &[u8]) -> String {
    serde_json::from_slice::<RemoteErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| status.canonical_reason().unwrap_or("unknown error").to_string())
}
