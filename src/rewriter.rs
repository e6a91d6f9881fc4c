//! Mock server URL construction.

use crate::catalog::SavedMock;

/// Build the mock server URL for a saved mock.
///
/// The path and query of the mock's original request are appended to
/// `mock_server_base` verbatim; segments are already encoded as captured in
/// the catalog. A query parameter without a value is written as a bare
/// `key`, never `key=null`.
pub fn build_mock_url(mock_server_base: &str, mock: &SavedMock) -> String {
    let url = &mock.original_request.url;
    let mut out = String::with_capacity(mock_server_base.len() + url.raw.len() + 1);
    out.push_str(mock_server_base);
    out.push('/');
    out.push_str(&url.full_path());
    if !url.query.is_empty() {
        out.push('?');
        out.push_str(&url.query_string());
    }
    out
}
