//! Channel descriptors shared between hub and clients.

use crate::context::Context;
use crate::ids::ChannelId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Hub-defined channels, including "global".
    System,
    /// Channels created by applications by name.
    App,
    /// Two-party channels with generated ids.
    Private,
}

/// Which channel a context listener follows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "scope", content = "channel_id", rename_all = "snake_case")]
pub enum ChannelScope {
    /// Whatever non-private channel the owner is currently joined to.
    #[default]
    Current,
    /// One named channel, regardless of the owner's current channel.
    Specific(ChannelId),
}

/// Snapshot of a channel for queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub channel_id: ChannelId,
    pub kind: ChannelKind,
    pub members: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_context: Option<Context>,
}
