//! Request and response types shared by the pipeline and the documentation backend.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of resource a request reads; selects cache TTL and parameter defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    /// Framework documentation, examples and framework info.
    Documentation,
    /// Framework and documentation search results.
    Search,
    /// Framework listings and other catalogue endpoints.
    Listing,
}

impl ResourceClass {
    /// Stable label used in fingerprints, store keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::Documentation => "documentation",
            ResourceClass::Search => "search",
            ResourceClass::Listing => "listing",
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A documentation read as the backend sees it.
///
/// Parameters are kept as given; [`Fingerprinter`](crate::fingerprint::Fingerprinter)
/// owns normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocRequest {
    pub class: ResourceClass,
    /// Resource path, e.g. `react/hooks` or `frameworks/42`.
    pub path: String,
    #[serde(default)]
    pub params: Vec<(String, String)>,
}

impl DocRequest {
    pub fn new(class: ResourceClass, path: impl Into<String>) -> Self {
        Self { class, path: path.into(), params: Vec::new() }
    }

    /// Append a query parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Path recorded by the abuse detector's sequence tracking.
    pub fn tracking_path(&self) -> String {
        format!("/{}/{}", self.class.as_str(), self.path.trim().trim_matches('/'))
    }
}

/// Backend answer, cached verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocResponse {
    pub body: serde_json::Value,
}

impl DocResponse {
    pub fn new(body: serde_json::Value) -> Self {
        Self { body }
    }
}
