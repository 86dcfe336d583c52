//! Intent request lifecycle and results.

use crate::directory::AppMetadata;
use crate::error::WireError;
use crate::ids::{InstanceId, RequestId};
use serde::{Deserialize, Serialize};

/// Lifecycle of a raised intent.
///
/// `AwaitingResolution -> AwaitingResult -> Fulfilled | Rejected | TimedOut`.
/// A request may also go straight from `AwaitingResolution` to `Rejected` or
/// `TimedOut`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    AwaitingResolution,
    AwaitingResult,
    Fulfilled,
    Rejected,
    TimedOut,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Fulfilled | RequestState::Rejected | RequestState::TimedOut
        )
    }
}

/// What a target reports back after handling an intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IntentOutcome {
    Fulfilled {
        #[serde(default)]
        result: Option<serde_json::Value>,
    },
    Rejected {
        reason: String,
    },
}

/// The terminal result pushed to the raising instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IntentResult {
    Fulfilled {
        #[serde(default)]
        result: Option<serde_json::Value>,
    },
    Rejected {
        error: WireError,
    },
}

/// An instance that could handle a raised intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub instance_id: InstanceId,
    pub app_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Immediate answer to `raise_intent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "resolution", rename_all = "snake_case")]
pub enum IntentResolution {
    /// Exactly one candidate; the intent has been delivered to it.
    Dispatched {
        request_id: RequestId,
        target: Candidate,
    },
    /// Several candidates; the caller must pick one with `resolve_intent_target`.
    NeedsResolution {
        request_id: RequestId,
        candidates: Vec<Candidate>,
    },
}

impl IntentResolution {
    pub fn request_id(&self) -> RequestId {
        match self {
            IntentResolution::Dispatched { request_id, .. }
            | IntentResolution::NeedsResolution { request_id, .. } => *request_id,
        }
    }
}

/// Apps able to handle one intent, for `find_intent` queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppIntent {
    pub intent: String,
    /// Running instances that declare the intent.
    pub instances: Vec<Candidate>,
    /// Directory apps that declare the intent, running or not.
    pub apps: Vec<AppMetadata>,
}
