//! Typed model of a fetched mock collection.
//!
//! The catalog service returns a Postman-style collection: a tree of folders
//! and APIs, where every API carries the responses ("saved mocks") recorded
//! for it. Items are classified into [`Item::Folder`] or [`Item::Api`] once,
//! during decoding, so the rest of the crate never re-derives the shape.

use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use std::collections::BTreeSet;

/// Logical, human-assigned name of an API in the catalog.
///
/// Not necessarily related to the URL path of the API.
pub type ApiName = String;

/// Query parameter used to tag saved mocks with a group.
pub const GROUP_QUERY_KEY: &str = "group";

/// Envelope returned by `GET /collections/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionResponse {
    pub collection: Collection,
}

/// Root of a fetched catalog.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Collection {
    pub info: Info,

    /// Top-level items, in catalog order
    #[serde(rename = "item", default)]
    pub items: Vec<Item>,
}

/// Collection metadata.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Info {
    pub name: String,

    /// Last modification time as reported by the catalog service
    #[serde(rename = "updatedAt", default)]
    pub updated_at: String,
}

impl Info {
    /// Parse `updatedAt` as an RFC 3339 timestamp.
    pub fn updated_at(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(&self.updated_at).ok()
    }
}

/// A node in the collection tree.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "WireItem")]
pub enum Item {
    /// A folder of nested items
    Folder {
        name: String,
        id: String,
        children: Vec<Item>,
    },
    /// A mockable API with its recorded responses
    Api {
        name: String,
        id: String,
        saved_mocks: Vec<SavedMock>,
    },
}

/// Item as it appears on the wire; the kind is implied by which list is present.
#[derive(Deserialize)]
struct WireItem {
    name: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    item: Option<Vec<Item>>,
    #[serde(default)]
    response: Option<Vec<SavedMock>>,
}

impl From<WireItem> for Item {
    fn from(wire: WireItem) -> Self {
        let WireItem {
            name,
            id,
            item,
            response,
        } = wire;
        match (item, response) {
            (Some(children), None) => Item::Folder { name, id, children },
            (None, Some(saved_mocks)) => Item::Api {
                name,
                id,
                saved_mocks,
            },
            // Both or neither: tolerated as an API without mocks
            _ => Item::Api {
                name,
                id,
                saved_mocks: Vec::new(),
            },
        }
    }
}

impl Item {
    pub fn name(&self) -> &str {
        match self {
            Item::Folder { name, .. } | Item::Api { name, .. } => name,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Item::Folder { id, .. } | Item::Api { id, .. } => id,
        }
    }

    /// Child items; empty for APIs.
    pub fn children(&self) -> &[Item] {
        match self {
            Item::Folder { children, .. } => children,
            Item::Api { .. } => &[],
        }
    }

    /// Saved mocks; empty for folders.
    pub fn saved_mocks(&self) -> &[SavedMock] {
        match self {
            Item::Folder { .. } => &[],
            Item::Api { saved_mocks, .. } => saved_mocks,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Item::Folder { .. })
    }

    /// First saved mock (catalog order) tagged with the given group.
    pub fn mock_for_group(&self, group_name: &str) -> Option<&SavedMock> {
        self.saved_mocks()
            .iter()
            .find(|mock| mock.group() == Some(group_name))
    }
}

/// One recorded response variant for an API.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SavedMock {
    pub id: String,
    pub name: String,
    #[serde(rename = "originalRequest")]
    pub original_request: OriginalRequest,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub uid: Option<String>,
}

impl SavedMock {
    /// Path of the original request, segments joined with `/`.
    pub fn full_path(&self) -> String {
        self.original_request.url.full_path()
    }

    /// Group this mock belongs to, if tagged.
    pub fn group(&self) -> Option<&str> {
        self.original_request.url.query_value(GROUP_QUERY_KEY)
    }
}

/// The request a saved mock was recorded for.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OriginalRequest {
    pub method: String,
    pub url: RequestUrl,
}

/// Decomposed URL of an original request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RequestUrl {
    #[serde(default)]
    pub raw: String,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub host: Vec<String>,
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default)]
    pub query: Vec<QueryParam>,
}

impl RequestUrl {
    pub fn full_path(&self) -> String {
        self.path.join("/")
    }

    /// Query parameters joined as `key=value` pairs with `&`.
    ///
    /// Parameters without a value are emitted as a bare key.
    pub fn query_string(&self) -> String {
        self.query
            .iter()
            .map(QueryParam::to_pair)
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn full_path_and_query_string(&self) -> String {
        if self.query.is_empty() {
            self.full_path()
        } else {
            format!("{}?{}", self.full_path(), self.query_string())
        }
    }

    /// Value of the first query parameter with the given key.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|param| param.key == key)
            .and_then(|param| param.value.as_deref())
    }
}

/// A single query parameter of an original request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryParam {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl QueryParam {
    fn to_pair(&self) -> String {
        match &self.value {
            Some(value) => format!("{}={}", self.key, value),
            None => self.key.clone(),
        }
    }
}

/// An API that has at least one saved mock, with the path of its first mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockedApi {
    pub name: ApiName,
    pub full_path: Option<String>,
}

/// Depth-first pre-order traversal of every item; folders precede their contents.
pub fn flatten(items: &[Item]) -> Vec<&Item> {
    let mut out = Vec::new();
    for item in items {
        out.push(item);
        out.extend(flatten(item.children()));
    }
    out
}

/// Every item with at least one saved mock, in catalog order.
pub fn apis_with_mocks(items: &[Item]) -> Vec<&Item> {
    flatten(items)
        .into_iter()
        .filter(|item| !item.saved_mocks().is_empty())
        .collect()
}

/// Every group name used by any saved mock in the collection.
pub fn all_group_names(collection: &Collection) -> BTreeSet<String> {
    apis_with_mocks(&collection.items)
        .into_iter()
        .flat_map(|api| api.saved_mocks())
        .filter_map(|mock| mock.group().map(str::to_string))
        .collect()
}

/// APIs with mocks, paired with the path of their first mock.
pub fn mocked_apis(collection: &Collection) -> Vec<MockedApi> {
    apis_with_mocks(&collection.items)
        .into_iter()
        .map(|api| MockedApi {
            name: api.name().to_string(),
            full_path: api.saved_mocks().first().map(SavedMock::full_path),
        })
        .collect()
}
