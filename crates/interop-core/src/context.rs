//! Context payloads.
//!
//! A context is a typed JSON object such as
//! `{"type": "fdc3.instrument", "id": {"ticker": "AAPL"}, "name": "Apple"}`.
//! Fields beyond `type`, `id` and `name` are carried through untouched.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Filter value that matches every context type.
pub const ANY_TYPE: &str = "*";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    #[serde(rename = "type")]
    pub context_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub id: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Context {
    pub fn new(context_type: impl Into<String>) -> Self {
        Self {
            context_type: context_type.into(),
            id: BTreeMap::new(),
            name: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Shorthand for an `fdc3.instrument` context keyed by ticker.
    pub fn instrument(ticker: impl Into<String>) -> Self {
        Self::new("fdc3.instrument").with_id("ticker", ticker)
    }

    pub fn with_id(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.id.insert(key.into(), value.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether this context passes a type filter (`None` and `"*"` match everything).
    pub fn matches_type(&self, filter: Option<&str>) -> bool {
        type_matches(filter, &self.context_type)
    }
}

/// Exact-match type filter with `"*"` as wildcard.
pub fn type_matches(filter: Option<&str>, context_type: &str) -> bool {
    match filter {
        None | Some(ANY_TYPE) => true,
        Some(f) => f == context_type,
    }
}
