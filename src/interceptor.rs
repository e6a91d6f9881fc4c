//! Interception contract between HTTP clients and the mock registry.
//!
//! Before a request is dispatched, [`MockInterceptor::intercept`] resolves
//! its path and either redirects it to the mock server, lets it through
//! untouched, or blocks it when mocking is enforced.

use crate::config::MockState;
use crate::error::{InterceptError, RewriteError};
use crate::registry::{MockDecision, MockRegistry};
use reqwest::header::{HeaderName, HeaderValue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Header telling the mock server which saved mock to answer with.
pub const MOCK_RESPONSE_ID_HEADER: &str = "x-mock-response-id";

/// Header telling the mock server how long to delay its response (ms).
pub const MOCK_RESPONSE_DELAY_HEADER: &str = "x-mock-response-delay";

/// Where and how to redirect a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockTarget {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
}

/// An outgoing request that can be redirected to a mock server.
pub trait OutgoingRequest {
    /// Encoded path of the request URL.
    fn encoded_path(&self) -> &str;

    /// Full request URL, used in diagnostics.
    fn url_string(&self) -> String;

    /// Point the request at `target`, keeping method and body.
    ///
    /// Must either apply the whole target or leave the request untouched.
    fn redirect(&mut self, target: &MockTarget) -> Result<(), RewriteError>;
}

impl OutgoingRequest for reqwest::Request {
    fn encoded_path(&self) -> &str {
        self.url().path()
    }

    fn url_string(&self) -> String {
        self.url().to_string()
    }

    fn redirect(&mut self, target: &MockTarget) -> Result<(), RewriteError> {
        let url = reqwest::Url::parse(&target.url).map_err(|source| RewriteError::InvalidUrl {
            url: target.url.clone(),
            source,
        })?;

        let headers = target
            .headers
            .iter()
            .map(|&(name, ref value)| {
                HeaderValue::from_str(value)
                    .map(|value| (HeaderName::from_static(name), value))
                    .map_err(|source| RewriteError::InvalidHeader { name, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        *self.url_mut() = url;
        for (name, value) in headers {
            self.headers_mut().insert(name, value);
        }
        Ok(())
    }
}

/// What happened to an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
    /// Redirected to the mock server
    Mocked { mock_id: String, mock_url: String },
    /// Left unmodified
    PassThrough,
}

/// Applies registry decisions to outgoing requests.
pub struct MockInterceptor {
    registry: Arc<MockRegistry>,
    /// Total requests intercepted.
    requests_total: AtomicU64,
    /// Requests redirected to a mock.
    requests_mocked: AtomicU64,
    /// Requests passed through unmodified.
    requests_passed: AtomicU64,
    /// Requests blocked because mocking is enforced.
    requests_blocked: AtomicU64,
}

impl MockInterceptor {
    pub fn new(registry: Arc<MockRegistry>) -> Self {
        Self {
            registry,
            requests_total: AtomicU64::new(0),
            requests_mocked: AtomicU64::new(0),
            requests_passed: AtomicU64::new(0),
            requests_blocked: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<MockRegistry> {
        &self.registry
    }

    /// Get total requests intercepted.
    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Get total requests redirected to a mock.
    pub fn total_mocked(&self) -> u64 {
        self.requests_mocked.load(Ordering::Relaxed)
    }

    /// Get total requests passed through.
    pub fn total_passed(&self) -> u64 {
        self.requests_passed.load(Ordering::Relaxed)
    }

    /// Get total requests blocked.
    pub fn total_blocked(&self) -> u64 {
        self.requests_blocked.load(Ordering::Relaxed)
    }

    /// Run the interception contract on `request`.
    ///
    /// Returns [`InterceptError::MockingEnforced`] (or
    /// [`InterceptError::MockRewriteFailed`]) when the request must not be
    /// sent; the caller must not dispatch it in that case.
    pub fn intercept<R>(&self, request: &mut R) -> Result<Interception, InterceptError>
    where
        R: OutgoingRequest + ?Sized,
    {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        let settings = self.registry.settings();
        let log_settings = &self.registry.config().settings;
        let decision = self.registry.resolve_with(&settings, request.encoded_path());

        let (mock_id, mock_url) = match decision {
            MockDecision::Matched { mock_id, mock_url } => (mock_id, mock_url),
            MockDecision::NoMock { error } => {
                if let Some(e) = error {
                    warn!(url = %request.url_string(), error = %e, "Mock resolution failed");
                }
                if settings.mock_state == MockState::MocksOnly {
                    self.requests_blocked.fetch_add(1, Ordering::Relaxed);
                    let url = request.url_string();
                    warn!(url = %url, "Mocking enforced, blocking request with no mock");
                    return Err(InterceptError::MockingEnforced { url });
                }
                if log_settings.log_unmatched {
                    info!(url = %request.url_string(), "No enabled mock, passing through");
                }
                self.requests_passed.fetch_add(1, Ordering::Relaxed);
                return Ok(Interception::PassThrough);
            }
        };

        let mut headers = vec![(MOCK_RESPONSE_ID_HEADER, mock_id.clone())];
        if settings.response_delay_ms > 0 {
            debug!(delay_ms = settings.response_delay_ms, "Adding mock response delay");
            headers.push((MOCK_RESPONSE_DELAY_HEADER, settings.response_delay_ms.to_string()));
        }
        let target = MockTarget {
            url: mock_url.clone(),
            headers,
        };

        let original_url = request.url_string();
        match request.redirect(&target) {
            Ok(()) => {
                self.requests_mocked.fetch_add(1, Ordering::Relaxed);
                if log_settings.log_matches {
                    info!(
                        mock_id = %mock_id,
                        from = %original_url,
                        to = %mock_url,
                        "Request redirected to mock"
                    );
                }
                Ok(Interception::Mocked { mock_id, mock_url })
            }
            Err(source) => {
                warn!(mock_id = %mock_id, url = %original_url, error = %source, "Failed to apply mock");
                if settings.mock_state == MockState::MocksOnly {
                    self.requests_blocked.fetch_add(1, Ordering::Relaxed);
                    return Err(InterceptError::MockRewriteFailed {
                        url: original_url,
                        mock_id,
                        source,
                    });
                }
                self.requests_passed.fetch_add(1, Ordering::Relaxed);
                Ok(Interception::PassThrough)
            }
        }
    }
}

/// `reqwest::Client` that runs every request through a [`MockInterceptor`].
pub struct MockingClient {
    client: reqwest::Client,
    interceptor: MockInterceptor,
}

impl MockingClient {
    pub fn new(client: reqwest::Client, registry: Arc<MockRegistry>) -> Self {
        Self {
            client,
            interceptor: MockInterceptor::new(registry),
        }
    }

    /// Underlying client, for building requests.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn interceptor(&self) -> &MockInterceptor {
        &self.interceptor
    }

    /// Intercept, then send `request`.
    pub async fn execute(
        &self,
        mut request: reqwest::Request,
    ) -> Result<reqwest::Response, InterceptError> {
        self.interceptor.intercept(&mut request)?;
        Ok(self.client.execute(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support::saved_mock;
    use crate::catalog::{ApiName, Collection, SavedMock};
    use crate::config::MockSwitchConfig;
    use crate::error::FetchError;
    use crate::fetcher::CollectionSource;
    use async_trait::async_trait;
    use httpmock::MockServer;
    use std::collections::BTreeMap;

    struct NoSource;

    #[async_trait]
    impl CollectionSource for NoSource {
        async fn fetch(&self, _collection_id: &str) -> Result<Collection, FetchError> {
            Err(FetchError::Unauthorized)
        }

        fn update_access_key(&self, _new_key: &str) {}
    }

    /// Request stand-in whose redirect can be made to fail.
    struct FakeRequest {
        url: String,
        path: String,
        headers: Vec<(&'static str, String)>,
        fail_redirect: bool,
    }

    impl FakeRequest {
        fn new(url: &str, path: &str) -> Self {
            Self {
                url: url.to_string(),
                path: path.to_string(),
                headers: Vec::new(),
                fail_redirect: false,
            }
        }
    }

    impl OutgoingRequest for FakeRequest {
        fn encoded_path(&self) -> &str {
            &self.path
        }

        fn url_string(&self) -> String {
            self.url.clone()
        }

        fn redirect(&mut self, target: &MockTarget) -> Result<(), RewriteError> {
            if self.fail_redirect {
                return Err(RewriteError::InvalidUrl {
                    url: target.url.clone(),
                    source: url::ParseError::EmptyHost,
                });
            }
            self.url = target.url.clone();
            self.headers = target.headers.clone();
            Ok(())
        }
    }

    fn registry(mock_server: &str) -> Arc<MockRegistry> {
        let config = MockSwitchConfig::new("abc", "key", mock_server);
        let registry = MockRegistry::new(config, Arc::new(NoSource));
        registry.enable_mock("Get Dashboard", saved_mock("m1", "api/dashboard", Some("qa")));
        Arc::new(registry)
    }

    fn failing_matcher<'a>(
        _enabled: &'a BTreeMap<ApiName, SavedMock>,
        _request_path: &str,
    ) -> Option<(&'a ApiName, &'a SavedMock)> {
        panic!("matcher fault")
    }

    fn faulty_registry(mock_state: MockState) -> Arc<MockRegistry> {
        let config = MockSwitchConfig::new("abc", "key", "https://mock.example.test");
        let registry = MockRegistry::new(config, Arc::new(NoSource)).with_matcher(failing_matcher);
        registry.enable_mock("Get Dashboard", saved_mock("m1", "api/dashboard", Some("qa")));
        registry.set_mock_state(mock_state);
        Arc::new(registry)
    }

    #[test]
    fn test_matching_fault_passes_through() {
        let interceptor = MockInterceptor::new(faulty_registry(MockState::Enabled));
        let mut request = FakeRequest::new("https://api.example.test/api/dashboard", "/api/dashboard");

        assert_eq!(interceptor.intercept(&mut request).unwrap(), Interception::PassThrough);
        assert_eq!(request.url, "https://api.example.test/api/dashboard");
        assert!(request.headers.is_empty());
        assert_eq!(interceptor.total_passed(), 1);
        assert_eq!(interceptor.total_blocked(), 0);
    }

    #[test]
    fn test_matching_fault_blocks_when_mocks_only() {
        let interceptor = MockInterceptor::new(faulty_registry(MockState::MocksOnly));
        let mut request = FakeRequest::new("https://api.example.test/api/dashboard", "/api/dashboard");

        let err = interceptor.intercept(&mut request).unwrap_err();

        assert!(err.is_mocking_enforced());
        assert_eq!(request.url, "https://api.example.test/api/dashboard");
        assert_eq!(interceptor.total_blocked(), 1);
        assert_eq!(interceptor.total_passed(), 0);
    }

    #[test]
    fn test_matched_request_is_redirected() {
        let interceptor = MockInterceptor::new(registry("https://mock.example.test"));
        let mut request = FakeRequest::new("https://api.example.test/api/dashboard", "/api/dashboard");

        let outcome = interceptor.intercept(&mut request).unwrap();

        assert_eq!(
            outcome,
            Interception::Mocked {
                mock_id: "m1".to_string(),
                mock_url: "https://mock.example.test/api/dashboard?group=qa".to_string(),
            }
        );
        assert_eq!(request.url, "https://mock.example.test/api/dashboard?group=qa");
        assert_eq!(request.headers, vec![(MOCK_RESPONSE_ID_HEADER, "m1".to_string())]);
        assert_eq!(interceptor.total_mocked(), 1);
    }

    #[test]
    fn test_delay_header_added() {
        let registry = registry("https://mock.example.test");
        registry.set_response_delay_ms(1500);
        let interceptor = MockInterceptor::new(registry);
        let mut request = FakeRequest::new("https://api.example.test/api/dashboard", "/api/dashboard");

        interceptor.intercept(&mut request).unwrap();

        assert!(request
            .headers
            .contains(&(MOCK_RESPONSE_DELAY_HEADER, "1500".to_string())));
    }

    #[test]
    fn test_unmatched_passes_through() {
        let interceptor = MockInterceptor::new(registry("https://mock.example.test"));
        let mut request = FakeRequest::new("https://api.example.test/api/other", "/api/other");

        assert_eq!(interceptor.intercept(&mut request).unwrap(), Interception::PassThrough);
        assert_eq!(request.url, "https://api.example.test/api/other");
        assert!(request.headers.is_empty());
        assert_eq!(interceptor.total_passed(), 1);
    }

    #[test]
    fn test_mocks_only_blocks_unmatched() {
        let registry = registry("https://mock.example.test");
        registry.set_mock_state(MockState::MocksOnly);
        let interceptor = MockInterceptor::new(registry);
        let mut request = FakeRequest::new("https://api.example.test/api/other", "/api/other");

        let err = interceptor.intercept(&mut request).unwrap_err();

        assert!(matches!(err, InterceptError::MockingEnforced { ref url } if url == "https://api.example.test/api/other"));
        assert_eq!(interceptor.total_blocked(), 1);
    }

    #[test]
    fn test_disabled_passes_through_even_with_mock() {
        let registry = registry("https://mock.example.test");
        registry.set_mock_state(MockState::Disabled);
        let interceptor = MockInterceptor::new(registry);
        let mut request = FakeRequest::new("https://api.example.test/api/dashboard", "/api/dashboard");

        assert_eq!(interceptor.intercept(&mut request).unwrap(), Interception::PassThrough);
        assert_eq!(request.url, "https://api.example.test/api/dashboard");
    }

    #[test]
    fn test_disabled_mock_passes_through() {
        let registry = registry("https://mock.example.test");
        registry.disable_mock("Get Dashboard");
        let interceptor = MockInterceptor::new(registry);
        let mut request = FakeRequest::new("https://api.example.test/api/dashboard", "/api/dashboard");

        assert_eq!(interceptor.intercept(&mut request).unwrap(), Interception::PassThrough);
        assert_eq!(request.url, "https://api.example.test/api/dashboard");
    }

    #[test]
    fn test_rewrite_failure_passes_through() {
        let interceptor = MockInterceptor::new(registry("https://mock.example.test"));
        let mut request = FakeRequest::new("https://api.example.test/api/dashboard", "/api/dashboard");
        request.fail_redirect = true;

        assert_eq!(interceptor.intercept(&mut request).unwrap(), Interception::PassThrough);
        assert_eq!(request.url, "https://api.example.test/api/dashboard");
    }

    #[test]
    fn test_rewrite_failure_blocks_when_enforced() {
        let registry = registry("https://mock.example.test");
        registry.set_mock_state(MockState::MocksOnly);
        let interceptor = MockInterceptor::new(registry);
        let mut request = FakeRequest::new("https://api.example.test/api/dashboard", "/api/dashboard");
        request.fail_redirect = true;

        let err = interceptor.intercept(&mut request).unwrap_err();
        assert!(matches!(err, InterceptError::MockRewriteFailed { ref mock_id, .. } if mock_id == "m1"));
        assert!(err.is_mocking_enforced());
    }

    #[test]
    fn test_reqwest_redirect_keeps_method_and_body() {
        let interceptor = MockInterceptor::new(registry("https://mock.example.test"));
        let mut request = reqwest::Client::new()
            .post("https://api.example.test/api/dashboard")
            .body("payload")
            .build()
            .unwrap();

        interceptor.intercept(&mut request).unwrap();

        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().as_str(), "https://mock.example.test/api/dashboard?group=qa");
        assert_eq!(request.headers()[MOCK_RESPONSE_ID_HEADER], "m1");
        assert_eq!(
            request.body().and_then(|b| b.as_bytes()),
            Some(&b"payload"[..])
        );
    }

    #[test]
    fn test_reqwest_invalid_mock_url_leaves_request_untouched() {
        // Relative base makes the built mock url unparseable
        let interceptor = MockInterceptor::new(registry("mock-server"));
        let mut request = reqwest::Client::new()
            .get("https://api.example.test/api/dashboard")
            .build()
            .unwrap();

        assert_eq!(interceptor.intercept(&mut request).unwrap(), Interception::PassThrough);
        assert_eq!(request.url().as_str(), "https://api.example.test/api/dashboard");
        assert!(request.headers().get(MOCK_RESPONSE_ID_HEADER).is_none());
    }

    #[tokio::test]
    async fn test_mocking_client_sends_to_mock_server() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.path("/api/dashboard")
                .query_param("group", "qa")
                .header(MOCK_RESPONSE_ID_HEADER, "m1")
                .header(MOCK_RESPONSE_DELAY_HEADER, "250");
            then.status(200).body("mocked");
        });

        let registry = registry(&server.base_url());
        registry.set_response_delay_ms(250);
        let client = MockingClient::new(reqwest::Client::new(), registry);

        let request = client
            .client()
            .get("http://api.invalid/api/dashboard")
            .build()
            .unwrap();
        let response = client.execute(request).await.unwrap();

        assert_eq!(response.text().await.unwrap(), "mocked");
        mock.assert();
    }

    #[tokio::test]
    async fn test_mocking_client_blocks_before_dispatch() {
        let server = MockServer::start_async().await;
        let upstream = server.mock(|when, then| {
            when.path("/api/other");
            then.status(200);
        });

        let registry = registry("https://mock.example.test");
        registry.set_mock_state(MockState::MocksOnly);
        let client = MockingClient::new(reqwest::Client::new(), registry);

        let request = client
            .client()
            .get(format!("{}/api/other", server.base_url()))
            .build()
            .unwrap();
        let err = client.execute(request).await.unwrap_err();

        assert!(err.is_mocking_enforced());
        upstream.assert_hits(0);
    }
}
