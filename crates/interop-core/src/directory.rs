//! Application directory.
//!
//! The directory declares which applications exist and which intents they
//! can handle. The hub only reads it.

use crate::context::type_matches;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A static intent capability declared by an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentRecord {
    /// Intent name, e.g. `ViewChart`.
    pub name: String,
    /// Context type this intent accepts; `"*"` accepts any.
    pub context_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_type: Option<String>,
}

impl IntentRecord {
    pub fn new(name: impl Into<String>, context_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context_type: context_type.into(),
            result_type: None,
        }
    }

    pub fn matches(&self, intent: &str, context_type: &str) -> bool {
        self.name == intent && type_matches(Some(&self.context_type), context_type)
    }
}

/// Directory entry for one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetadata {
    pub app_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub intents: Vec<IntentRecord>,
}

impl AppMetadata {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            title: None,
            description: None,
            intents: Vec::new(),
        }
    }

    pub fn with_intent(mut self, intent: IntentRecord) -> Self {
        self.intents.push(intent);
        self
    }

    /// Whether the app declares `intent` for `context_type`.
    pub fn handles(&self, intent: &str, context_type: &str) -> bool {
        self.intents.iter().any(|r| r.matches(intent, context_type))
    }

    /// Whether the app declares `intent` for any context type.
    pub fn declares(&self, intent: &str) -> bool {
        self.intents.iter().any(|r| r.name == intent)
    }
}

/// Read-only source of application metadata.
pub trait AppDirectory: Send + Sync {
    fn get(&self, app_id: &str) -> Option<AppMetadata>;
    fn apps(&self) -> Vec<AppMetadata>;
}

/// A directory fixed at construction time.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    apps: BTreeMap<String, AppMetadata>,
}

impl StaticDirectory {
    pub fn new(apps: impl IntoIterator<Item = AppMetadata>) -> Self {
        Self {
            apps: apps.into_iter().map(|a| (a.app_id.clone(), a)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}

impl AppDirectory for StaticDirectory {
    fn get(&self, app_id: &str) -> Option<AppMetadata> {
        self.apps.get(app_id).cloned()
    }

    fn apps(&self) -> Vec<AppMetadata> {
        self.apps.values().cloned().collect()
    }
}
