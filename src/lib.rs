//! Mockswitch
//!
//! Redirects outgoing HTTP requests to a mock server based on a mock catalog
//! (a Postman-style collection) fetched at runtime. Useful for QA builds,
//! demos and development against APIs that are not ready yet.
//!
//! # Features
//!
//! - **Catalog Loading**: Fetch a collection of folders, APIs and saved mocks
//! - **Per-API Selection**: Enable one saved mock per API by its catalog name
//! - **Groups**: Enable every mock tagged `?group=<name>` in one call
//! - **Enforcement**: Block requests that have no mock when mocking is enforced
//! - **Latency Simulation**: Ask the mock server to delay its responses
//!
//! # Example Configuration
//!
//! ```yaml
//! catalog:
//!   access_key: PMAK-xxxxxxxx
//!   collection_id: 8183416-3899cbb7-90f4-425d-98ef-639e77da615f
//! mock_server_url: https://9f676ae9.mock.pstmn.io
//! settings:
//!   mock_state: enabled
//!   response_delay_ms: 0
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod interceptor;
pub mod registry;
pub mod rewriter;

pub use config::{MockState, MockSwitchConfig};
pub use interceptor::{MockInterceptor, MockingClient};
pub use registry::{MockDecision, MockRegistry};
