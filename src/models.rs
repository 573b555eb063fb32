//! Core data models shared by the client, coordinator and adapter

use crate::error::PurgeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Sentinel id returned when purging is administratively disabled
pub const DISABLED_ID: &str = "disabled";

/// Sentinel id returned when an empty item list was submitted
pub const EMPTY_ID: &str = "empty";

/// One `{code, message}` entry of the provider's `errors` array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// Response envelope returned by every provider endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub errors: Vec<ApiErrorDetail>,
}

/// JSON body of a `purge_cache` request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PurgeBody {
    PurgeEverything(bool),
    Files(Vec<String>),
    Tags(Vec<String>),
    Prefixes(Vec<String>),
}

impl PurgeBody {
    /// Number of items carried by this request
    pub fn len(&self) -> usize {
        match self {
            PurgeBody::PurgeEverything(_) => 0,
            PurgeBody::Files(items) | PurgeBody::Tags(items) | PurgeBody::Prefixes(items) => {
                items.len()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> PurgeKind {
        match self {
            PurgeBody::PurgeEverything(_) => PurgeKind::Everything,
            PurgeBody::Files(_) => PurgeKind::Urls,
            PurgeBody::Tags(_) => PurgeKind::Tags,
            PurgeBody::Prefixes(_) => PurgeKind::Prefixes,
        }
    }
}

/// Category of a purge operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PurgeKind {
    Everything,
    Urls,
    Tags,
    Prefixes,
}

impl PurgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurgeKind::Everything => "everything",
            PurgeKind::Urls => "urls",
            PurgeKind::Tags => "tags",
            PurgeKind::Prefixes => "prefixes",
        }
    }
}

impl fmt::Display for PurgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful result of one provider call
#[derive(Debug, Clone, PartialEq)]
pub struct PurgeOutcome {
    /// Provider-assigned identifier, or one of the sentinels
    pub id: Option<String>,
    /// Token status reported by `verify_token` (e.g. "active")
    pub status: Option<String>,
    /// Raw `result` object
    pub result: Value,
}

impl PurgeOutcome {
    /// Outcome returned without a network call while purging is disabled
    pub fn disabled() -> Self {
        Self::sentinel(DISABLED_ID)
    }

    /// Outcome returned without a network call for an empty item list
    pub fn empty() -> Self {
        Self::sentinel(EMPTY_ID)
    }

    fn sentinel(id: &str) -> Self {
        PurgeOutcome {
            id: Some(id.to_string()),
            status: None,
            result: serde_json::json!({ "id": id }),
        }
    }

    /// Extract the outcome from a decoded `success: true` envelope
    pub fn from_result(result: Value) -> Self {
        let id = result.get("id").and_then(Value::as_str).map(str::to_string);
        let status = result
            .get("status")
            .and_then(Value::as_str)
            .map(str::to_string);
        PurgeOutcome { id, status, result }
    }

    pub fn is_disabled(&self) -> bool {
        self.id.as_deref() == Some(DISABLED_ID)
    }

    pub fn is_empty(&self) -> bool {
        self.id.as_deref() == Some(EMPTY_ID)
    }
}

/// Aggregate result of a batched dispatch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PurgeReport {
    /// One outcome per batch, in dispatch order
    pub outcomes: Vec<PurgeOutcome>,
    /// Total number of items sent across all batches
    pub item_count: usize,
}

impl PurgeReport {
    pub fn batch_count(&self) -> usize {
        self.outcomes.len()
    }
}

/// A detached dispatch that failed after its trigger already returned
#[derive(Debug, Clone)]
pub struct BackgroundFailure {
    pub kind: PurgeKind,
    pub item_count: usize,
    pub error: PurgeError,
}

/// Insertion-ordered set of URLs awaiting purge
#[derive(Debug, Default, Clone)]
pub struct PendingSet {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a URL, returning false if it was already pending
    pub fn insert(&mut self, url: String) -> bool {
        if self.seen.contains(&url) {
            return false;
        }
        self.seen.insert(url.clone());
        self.order.push(url);
        true
    }

    /// Merge several URLs, returning how many were new
    pub fn extend<I>(&mut self, urls: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut added = 0;
        for url in urls {
            if self.insert(url) {
                added += 1;
            }
        }
        added
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.seen.contains(url)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.order
    }

    /// Consume the set, yielding URLs in first-seen order
    pub fn into_vec(self) -> Vec<String> {
        self.order
    }
}

impl FromIterator<String> for PendingSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut set = PendingSet::new();
        set.extend(iter);
        set
    }
}

/// Entity type identifier -> URL paths invalidated whenever that type changes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyMap(BTreeMap<String, Vec<String>>);

impl DependencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the dependent paths for a type, replacing any previous entry
    pub fn insert<S, I>(&mut self, entity_type: S, paths: I)
    where
        S: Into<String>,
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.0
            .insert(entity_type.into(), paths.into_iter().map(Into::into).collect());
    }

    /// Paths registered for a type, empty when the type is unknown
    pub fn paths_for(&self, entity_type: &str) -> &[String] {
        self.0.get(entity_type).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Dependent paths for a type expanded into full URLs
    pub fn expand(&self, entity_type: &str, site_url: &str) -> Vec<String> {
        self.paths_for(entity_type)
            .iter()
            .map(|path| build_full_url(site_url, path))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, Vec<String>)> for DependencyMap {
    fn from_iter<I: IntoIterator<Item = (S, Vec<String>)>>(iter: I) -> Self {
        DependencyMap(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Join a path onto the site URL
///
/// A trailing `/` on the site URL is dropped; an empty site URL leaves the
/// path untouched.
pub fn build_full_url(site_url: &str, path: &str) -> String {
    let site_url = site_url.trim_end_matches('/');
    if site_url.is_empty() {
        return path.to_string();
    }
    format!("{}{}", site_url, path)
}

/// Split items into consecutive chunks of at most `batch_size`
///
/// A zero batch size is treated as one.
pub fn into_batches(items: &[String], batch_size: usize) -> Vec<Vec<String>> {
    items
        .chunks(batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}
