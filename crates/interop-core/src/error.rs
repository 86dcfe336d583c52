//! Hub errors and their wire form.

use crate::ids::{ChannelId, InstanceId, ListenerId, RequestId};
use crate::intent::RequestState;
use serde::{Deserialize, Serialize};

/// Stable error codes sent to applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotConnected,
    DuplicateChannel,
    UnknownChannel,
    ChannelFull,
    UnknownHandle,
    NoCapableApp,
    NoIntentListener,
    InvalidTarget,
    InvalidRequestState,
    UnknownRequest,
    IntentTimeout,
    SourceDisconnected,
    TargetRejected,
    Protocol,
    ShuttingDown,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("instance {0} is not connected")]
    NotConnected(InstanceId),
    #[error("channel {0} already exists")]
    DuplicateChannel(ChannelId),
    #[error("channel {0} does not exist")]
    UnknownChannel(ChannelId),
    #[error("private channel {0} already has two members")]
    ChannelFull(ChannelId),
    #[error("listener {0} is not registered")]
    UnknownHandle(ListenerId),
    #[error("no connected app handles {intent} for {context_type}")]
    NoCapableApp {
        intent: String,
        context_type: String,
    },
    #[error("instance {instance} has no listener for intent {intent}")]
    NoIntentListener { instance: InstanceId, intent: String },
    #[error("instance {0} is not a valid target for this request")]
    InvalidTarget(InstanceId),
    #[error("request {request} is {state:?}")]
    InvalidRequestState {
        request: RequestId,
        state: RequestState,
    },
    #[error("request {0} is unknown")]
    UnknownRequest(RequestId),
    #[error("request {0} timed out")]
    IntentTimeout(RequestId),
    #[error("source of request {0} disconnected")]
    SourceDisconnected(RequestId),
    #[error("target rejected the intent: {0}")]
    TargetRejected(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("hub is shutting down")]
    ShuttingDown,
}

impl HubError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HubError::NotConnected(_) => ErrorKind::NotConnected,
            HubError::DuplicateChannel(_) => ErrorKind::DuplicateChannel,
            HubError::UnknownChannel(_) => ErrorKind::UnknownChannel,
            HubError::ChannelFull(_) => ErrorKind::ChannelFull,
            HubError::UnknownHandle(_) => ErrorKind::UnknownHandle,
            HubError::NoCapableApp { .. } => ErrorKind::NoCapableApp,
            HubError::NoIntentListener { .. } => ErrorKind::NoIntentListener,
            HubError::InvalidTarget(_) => ErrorKind::InvalidTarget,
            HubError::InvalidRequestState { .. } => ErrorKind::InvalidRequestState,
            HubError::UnknownRequest(_) => ErrorKind::UnknownRequest,
            HubError::IntentTimeout(_) => ErrorKind::IntentTimeout,
            HubError::SourceDisconnected(_) => ErrorKind::SourceDisconnected,
            HubError::TargetRejected(_) => ErrorKind::TargetRejected,
            HubError::Protocol(_) => ErrorKind::Protocol,
            HubError::ShuttingDown => ErrorKind::ShuttingDown,
        }
    }
}

/// Error as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct WireError {
    pub code: ErrorKind,
    pub message: String,
}

impl From<&HubError> for WireError {
    fn from(err: &HubError) -> Self {
        Self {
            code: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<HubError> for WireError {
    fn from(err: HubError) -> Self {
        Self::from(&err)
    }
}
