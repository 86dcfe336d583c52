//! Protocol messages.
//!
//! Every request from an application carries a `req_id` chosen by the client;
//! the hub answers with a `response` or `error` echoing it. Deliveries and
//! intent results are pushed without a `req_id`.

use crate::channel::{ChannelInfo, ChannelScope};
use crate::context::Context;
use crate::directory::AppMetadata;
use crate::error::WireError;
use crate::ids::{ChannelId, InstanceId, ListenerId, RequestId};
use crate::intent::{AppIntent, IntentOutcome, IntentResolution, IntentResult};
use serde::{Deserialize, Serialize};

/// A request sent from an application to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub req_id: u64,
    #[serde(flatten)]
    pub request: ClientRequest,
}

impl ClientMessage {
    pub fn new(req_id: u64, request: ClientRequest) -> Self {
        Self { req_id, request }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Handshake; must be the first message on a connection.
    Connect {
        app_id: String,
        #[serde(default)]
        metadata: Option<AppMetadata>,
    },
    Heartbeat,
    JoinChannel {
        channel_id: ChannelId,
    },
    LeaveChannel,
    CreateAppChannel {
        channel_id: ChannelId,
    },
    CreatePrivateChannel,
    GetCurrentChannel,
    ListChannels,
    GetCurrentContext {
        #[serde(default)]
        channel_id: Option<ChannelId>,
        #[serde(default)]
        context_type: Option<String>,
    },
    Broadcast {
        context: Context,
        #[serde(default)]
        channel_id: Option<ChannelId>,
    },
    AddContextListener {
        #[serde(default)]
        scope: ChannelScope,
        #[serde(default)]
        context_type: Option<String>,
    },
    AddIntentListener {
        intent: String,
    },
    RemoveListener {
        listener_id: ListenerId,
    },
    RaiseIntent {
        intent: String,
        context: Context,
        #[serde(default)]
        target_app_id: Option<String>,
    },
    ResolveIntentTarget {
        request_id: RequestId,
        instance_id: InstanceId,
    },
    RespondToIntent {
        request_id: RequestId,
        outcome: IntentOutcome,
    },
    FindIntent {
        intent: String,
        #[serde(default)]
        context_type: Option<String>,
    },
    FindIntentsByContext {
        context_type: String,
    },
    Disconnect,
}

/// Successful answer to a [`ClientRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseBody {
    Connected {
        instance_id: InstanceId,
        channel_id: Option<ChannelId>,
    },
    Ack,
    Listener {
        listener_id: ListenerId,
    },
    Channel {
        channel: Option<ChannelInfo>,
    },
    Channels {
        channels: Vec<ChannelInfo>,
    },
    CurrentContext {
        context: Option<Context>,
    },
    IntentRaised(IntentResolution),
    AppIntents {
        intents: Vec<AppIntent>,
    },
}

/// Messages sent from the hub to an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Response {
        req_id: u64,
        body: ResponseBody,
    },
    /// Failure of a request; `req_id` is absent when the frame could not be parsed.
    Error {
        req_id: Option<u64>,
        error: WireError,
    },
    ContextDelivery {
        listener_id: ListenerId,
        channel_id: ChannelId,
        context: Context,
    },
    IntentDelivery {
        listener_id: ListenerId,
        intent: String,
        context: Context,
        request_id: RequestId,
        source: InstanceId,
    },
    IntentResult {
        request_id: RequestId,
        result: IntentResult,
    },
    /// A dispatched intent was withdrawn before the target answered.
    IntentCancelled {
        request_id: RequestId,
        error: WireError,
    },
    /// A private channel this instance belonged to was torn down.
    ChannelClosed {
        channel_id: ChannelId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_fields_sit_beside_req_id() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "broadcast",
            "req_id": 7,
            "context": { "type": "fdc3.instrument", "id": { "ticker": "AAPL" } }
        }))
        .unwrap();
        assert_eq!(msg.req_id, 7);
        match msg.request {
            ClientRequest::Broadcast {
                context,
                channel_id,
            } => {
                assert_eq!(context, Context::instrument("AAPL"));
                assert!(channel_id.is_none());
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn unit_requests_need_only_type() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"heartbeat","req_id":1}"#).unwrap();
        assert_eq!(msg.request, ClientRequest::Heartbeat);

        let listener: ClientMessage =
            serde_json::from_str(r#"{"type":"add_context_listener","req_id":2}"#).unwrap();
        assert_eq!(
            listener.request,
            ClientRequest::AddContextListener {
                scope: ChannelScope::Current,
                context_type: None
            }
        );
    }

    #[test]
    fn response_serializes_with_kind() {
        let msg = ServerMessage::Response {
            req_id: 3,
            body: ResponseBody::Ack,
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "type": "response", "req_id": 3, "body": { "kind": "ack" } })
        );
    }
}
