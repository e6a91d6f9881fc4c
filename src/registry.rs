//! Mock registry: catalog state, enablement state and path resolution.
//!
//! All observable state lives in two `tokio::sync::watch` channels. Every
//! mutation publishes a complete new value, so subscribers and concurrent
//! resolvers only ever see a whole previous or whole next snapshot.

use crate::catalog::{self, ApiName, Collection, MockedApi, SavedMock};
use crate::config::{MockState, MockSwitchConfig};
use crate::error::{FetchError, ResolveError};
use crate::fetcher::{CollectionFetcher, CollectionSource};
use crate::rewriter::build_mock_url;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Load state of the collection.
#[derive(Debug, Clone)]
pub enum LoadState {
    Loading,
    Success,
    Error(Arc<FetchError>),
}

impl LoadState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LoadState::Loading)
    }
}

/// Catalog side of the registry state.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    pub load_state: LoadState,
    pub collection: Option<Arc<Collection>>,
    pub available_groups: Arc<BTreeSet<String>>,
    pub mocked_apis: Arc<Vec<MockedApi>>,
}

impl Default for CatalogSnapshot {
    fn default() -> Self {
        Self {
            load_state: LoadState::Loading,
            collection: None,
            available_groups: Arc::default(),
            mocked_apis: Arc::default(),
        }
    }
}

/// Mocking side of the registry state, read as one consistent snapshot.
#[derive(Debug, Clone, Default)]
pub struct MockSettings {
    /// Selected mock per API, iterated in API name order
    pub enabled_mocks: Arc<BTreeMap<ApiName, SavedMock>>,
    pub mock_state: MockState,
    pub response_delay_ms: u64,
}

/// Outcome of resolving a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockDecision {
    /// No mock applies; `error` is set when matching itself failed
    NoMock { error: Option<ResolveError> },
    /// The request should be redirected to `mock_url`
    Matched { mock_id: String, mock_url: String },
}

impl MockDecision {
    pub fn no_mock() -> Self {
        MockDecision::NoMock { error: None }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, MockDecision::Matched { .. })
    }
}

/// Finds the enabled mock serving a request path.
pub(crate) type Matcher = for<'a> fn(
    &'a BTreeMap<ApiName, SavedMock>,
    &str,
) -> Option<(&'a ApiName, &'a SavedMock)>;

/// Owner of the mock catalog and of which mocks are enabled.
pub struct MockRegistry {
    config: MockSwitchConfig,
    source: Arc<dyn CollectionSource>,
    catalog: watch::Sender<CatalogSnapshot>,
    settings: watch::Sender<MockSettings>,
    /// Load state of the most recently completed load
    last_terminal: watch::Sender<LoadState>,
    loads_in_flight: AtomicUsize,
    matcher: Matcher,
}

impl MockRegistry {
    /// Create a registry backed by the catalog service described in `config`.
    pub fn from_config(config: MockSwitchConfig) -> Result<Self, FetchError> {
        let fetcher = CollectionFetcher::new(&config.catalog)?;
        Ok(Self::new(config, Arc::new(fetcher)))
    }

    /// Create a registry backed by an arbitrary collection source.
    pub fn new(config: MockSwitchConfig, source: Arc<dyn CollectionSource>) -> Self {
        let (catalog, _) = watch::channel(CatalogSnapshot::default());
        let (settings, _) = watch::channel(MockSettings {
            enabled_mocks: Arc::default(),
            mock_state: config.settings.mock_state,
            response_delay_ms: config.settings.response_delay_ms,
        });

        info!(
            collection_id = %config.catalog.collection_id,
            mock_server = %config.mock_server_url,
            mock_state = %config.settings.mock_state,
            "Mock registry initialized"
        );

        Self {
            config,
            source,
            catalog,
            settings,
            last_terminal: watch::channel(LoadState::Loading).0,
            loads_in_flight: AtomicUsize::new(0),
            matcher: find_enabled_mock,
        }
    }

    /// Replace the path matcher.
    #[cfg(test)]
    pub(crate) fn with_matcher(mut self, matcher: Matcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn config(&self) -> &MockSwitchConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Subscribe to catalog changes (load state, collection, groups).
    pub fn subscribe_catalog(&self) -> watch::Receiver<CatalogSnapshot> {
        self.catalog.subscribe()
    }

    /// Subscribe to enablement and policy changes.
    pub fn subscribe_settings(&self) -> watch::Receiver<MockSettings> {
        self.settings.subscribe()
    }

    pub fn catalog(&self) -> CatalogSnapshot {
        self.catalog.borrow().clone()
    }

    pub fn settings(&self) -> MockSettings {
        self.settings.borrow().clone()
    }

    pub fn load_state(&self) -> LoadState {
        self.catalog.borrow().load_state.clone()
    }

    pub fn collection(&self) -> Option<Arc<Collection>> {
        self.catalog.borrow().collection.clone()
    }

    pub fn available_groups(&self) -> Arc<BTreeSet<String>> {
        self.catalog.borrow().available_groups.clone()
    }

    pub fn mocked_apis(&self) -> Arc<Vec<MockedApi>> {
        self.catalog.borrow().mocked_apis.clone()
    }

    pub fn enabled_mocks(&self) -> Arc<BTreeMap<ApiName, SavedMock>> {
        self.settings.borrow().enabled_mocks.clone()
    }

    pub fn mock_state(&self) -> MockState {
        self.settings.borrow().mock_state
    }

    pub fn response_delay_ms(&self) -> u64 {
        self.settings.borrow().response_delay_ms
    }

    // ------------------------------------------------------------------
    // Collection loading
    // ------------------------------------------------------------------

    /// Reload the collection named in the configuration.
    pub async fn request_collection_update(&self) -> LoadState {
        let collection_id = self.config.catalog.collection_id.clone();
        self.load_collection(&collection_id).await
    }

    /// Fetch a collection and publish it, returning the terminal load state.
    ///
    /// On failure the previous collection is kept. If the returned future is
    /// dropped before completion, the load state reverts to its last terminal
    /// value.
    pub async fn load_collection(&self, collection_id: &str) -> LoadState {
        let mut guard = LoadGuard::start(self);
        self.catalog
            .send_modify(|snapshot| snapshot.load_state = LoadState::Loading);

        let state = match self.source.fetch(collection_id).await {
            Ok(collection) => {
                let available_groups = catalog::all_group_names(&collection);
                let mocked_apis = catalog::mocked_apis(&collection);
                info!(
                    collection = %collection.info.name,
                    groups = available_groups.len(),
                    apis = mocked_apis.len(),
                    "Collection loaded"
                );
                self.catalog.send_replace(CatalogSnapshot {
                    load_state: LoadState::Success,
                    collection: Some(Arc::new(collection)),
                    available_groups: Arc::new(available_groups),
                    mocked_apis: Arc::new(mocked_apis),
                });
                LoadState::Success
            }
            Err(e) => {
                warn!(collection_id = %collection_id, error = %e, "Failed to load collection");
                let state = LoadState::Error(Arc::new(e));
                self.catalog
                    .send_modify(|snapshot| snapshot.load_state = state.clone());
                state
            }
        };

        self.last_terminal.send_replace(state.clone());
        guard.complete();
        state
    }

    /// [`load_collection`](Self::load_collection) bounded by a caller-side timeout.
    ///
    /// A timed-out load leaves the load state at its last terminal value.
    pub async fn load_collection_with_timeout(
        &self,
        collection_id: &str,
        timeout: Duration,
    ) -> Result<LoadState, FetchError> {
        match tokio::time::timeout(timeout, self.load_collection(collection_id)).await {
            Ok(state) => Ok(state),
            Err(_) => {
                warn!(collection_id = %collection_id, ?timeout, "Collection load timed out");
                Err(FetchError::Timeout(timeout))
            }
        }
    }

    /// Rotate the catalog access key used by the next load.
    pub fn update_access_key(&self, new_key: &str) {
        self.source.update_access_key(new_key);
    }

    // ------------------------------------------------------------------
    // Enablement
    // ------------------------------------------------------------------

    /// Select `mock` for `api_name`, replacing any previous selection.
    pub fn enable_mock(&self, api_name: &str, mock: SavedMock) {
        debug!(api = %api_name, mock_id = %mock.id, "Enabling mock");
        self.update_enabled(|mocks| {
            mocks.insert(api_name.to_string(), mock);
        });
    }

    /// Remove the selection for `api_name`, if any.
    pub fn disable_mock(&self, api_name: &str) {
        debug!(api = %api_name, "Disabling mock");
        self.update_enabled(|mocks| {
            mocks.remove(api_name);
        });
    }

    pub fn clear_all_mocks(&self) {
        debug!("Clearing all mocks");
        self.settings
            .send_modify(|settings| settings.enabled_mocks = Arc::default());
    }

    /// Replace all selections with the mocks tagged with `group_name`.
    ///
    /// APIs without a mock in the group are left disabled. The result is
    /// published as a single update.
    pub fn enable_group(&self, group_name: &str) {
        let enabled: BTreeMap<ApiName, SavedMock> = match self.collection() {
            Some(collection) => catalog::apis_with_mocks(&collection.items)
                .into_iter()
                .filter_map(|api| {
                    api.mock_for_group(group_name)
                        .map(|mock| (api.name().to_string(), mock.clone()))
                })
                .collect(),
            None => BTreeMap::new(),
        };

        info!(group = %group_name, mocks = enabled.len(), "Enabling mock group");
        self.settings
            .send_modify(|settings| settings.enabled_mocks = Arc::new(enabled));
    }

    pub fn set_mock_state(&self, mock_state: MockState) {
        info!(mock_state = %mock_state, "Mock state changed");
        self.settings
            .send_modify(|settings| settings.mock_state = mock_state);
    }

    pub fn set_response_delay_ms(&self, delay_ms: u64) {
        debug!(delay_ms, "Mock response delay changed");
        self.settings
            .send_modify(|settings| settings.response_delay_ms = delay_ms);
    }

    fn update_enabled(&self, f: impl FnOnce(&mut BTreeMap<ApiName, SavedMock>)) {
        self.settings.send_modify(|settings| {
            let mut mocks = (*settings.enabled_mocks).clone();
            f(&mut mocks);
            settings.enabled_mocks = Arc::new(mocks);
        });
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    /// Decide whether `request_path` should be served by a mock.
    pub fn resolve(&self, request_path: &str) -> MockDecision {
        self.resolve_with(&self.settings(), request_path)
    }

    /// Resolve against an already captured settings snapshot.
    ///
    /// Enabled mocks are scanned in API name order and the first one whose
    /// path is a case-insensitive substring of `request_path` wins.
    pub fn resolve_with(&self, settings: &MockSettings, request_path: &str) -> MockDecision {
        if settings.mock_state == MockState::Disabled {
            return MockDecision::no_mock();
        }

        let matcher = self.matcher;
        let found = panic::catch_unwind(AssertUnwindSafe(|| {
            matcher(&settings.enabled_mocks, request_path)
        }));

        match found {
            Ok(Some((api_name, mock))) => {
                debug!(api = %api_name, mock_id = %mock.id, path = %request_path, "Found enabled mock");
                MockDecision::Matched {
                    mock_id: mock.id.clone(),
                    mock_url: build_mock_url(&self.config.mock_server_url, mock),
                }
            }
            Ok(None) => MockDecision::no_mock(),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(path = %request_path, error = %message, "Mock matching failed");
                MockDecision::NoMock {
                    error: Some(ResolveError::Internal(message)),
                }
            }
        }
    }
}

fn find_enabled_mock<'a>(
    enabled: &'a BTreeMap<ApiName, SavedMock>,
    request_path: &str,
) -> Option<(&'a ApiName, &'a SavedMock)> {
    let request_path = request_path.to_lowercase();
    enabled
        .iter()
        .find(|(_, mock)| request_path.contains(&mock.full_path().to_lowercase()))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Restores the last terminal load state when a load is abandoned mid-flight.
struct LoadGuard<'a> {
    registry: &'a MockRegistry,
    completed: bool,
}

impl<'a> LoadGuard<'a> {
    fn start(registry: &'a MockRegistry) -> Self {
        registry.loads_in_flight.fetch_add(1, Ordering::SeqCst);
        Self {
            registry,
            completed: false,
        }
    }

    fn complete(&mut self) {
        self.completed = true;
    }
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        let remaining = self.registry.loads_in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        if self.completed || remaining > 0 {
            return;
        }
        let previous = self.registry.last_terminal.borrow().clone();
        self.registry.catalog.send_if_modified(|snapshot| {
            if snapshot.load_state.is_terminal() || !previous.is_terminal() {
                return false;
            }
            debug!("Collection load abandoned, restoring previous load state");
            snapshot.load_state = previous;
            true
        });
    }
}
