//! Core types for the desktop interop hub.
//!
//! This crate provides the protocol primitives shared by the hub and its
//! clients: identifiers, context payloads, directory metadata, error codes and
//! the wire envelopes. Nothing here touches the network or a runtime.

mod channel;
mod context;
mod directory;
mod error;
mod ids;
mod intent;
mod message;

pub use channel::{ChannelInfo, ChannelKind, ChannelScope};
pub use context::{ANY_TYPE, Context, type_matches};
pub use directory::{AppDirectory, AppMetadata, IntentRecord, StaticDirectory};
pub use error::{ErrorKind, HubError, WireError};
pub use ids::{ChannelId, GLOBAL_CHANNEL, InstanceId, ListenerId, RequestId};
pub use intent::{AppIntent, Candidate, IntentOutcome, IntentResolution, IntentResult, RequestState};
pub use message::{ClientMessage, ClientRequest, ResponseBody, ServerMessage};

/// Connection lifecycle state of an application instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Handshake completed; the instance may use the hub.
    Connected,
    /// Cleanup in progress.
    Disconnecting,
    /// Gone; all listeners purged.
    Disconnected,
}
