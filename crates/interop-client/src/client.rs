//! Connection to a hub.

use crate::error::ClientError;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use interop_core::{
    AppIntent, AppMetadata, ChannelId, ChannelInfo, ChannelScope, ClientMessage, ClientRequest,
    Context, InstanceId, IntentOutcome, IntentResolution, ListenerId, RequestId, ResponseBody,
    ServerMessage, WireError,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Stream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type Reply = Result<ResponseBody, WireError>;
/// Waiters by `req_id`; `None` once the reader has seen the socket close.
type Pending = Arc<Mutex<Option<HashMap<u64, oneshot::Sender<Reply>>>>>;

/// Pushed messages: deliveries, intent results, cancellations.
pub type Events = mpsc::UnboundedReceiver<ServerMessage>;

struct Inner {
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Pending,
    next_req: AtomicU64,
}

/// A connected application instance.
///
/// Cloning shares the connection. Requests may be issued concurrently;
/// each waits for its own response.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
    instance_id: InstanceId,
    channel_id: Option<ChannelId>,
}

impl Client {
    /// Open a connection and perform the `connect` handshake.
    pub async fn connect(
        url: &str,
        app_id: &str,
        metadata: Option<AppMetadata>,
    ) -> Result<(Self, Events), ClientError> {
        let (ws, _) = tokio_tungstenite::connect_async(url).await?;
        let (mut sink, mut stream) = ws.split();

        let hello = ClientMessage::new(
            0,
            ClientRequest::Connect {
                app_id: app_id.to_string(),
                metadata,
            },
        );
        sink.send(Message::Text(serde_json::to_string(&hello)?.into()))
            .await?;

        let (instance_id, channel_id) = loop {
            let msg = stream.next().await.ok_or(ClientError::Closed)??;
            let Message::Text(text) = msg else {
                continue;
            };
            match serde_json::from_str::<ServerMessage>(&text)? {
                ServerMessage::Response {
                    body:
                        ResponseBody::Connected {
                            instance_id,
                            channel_id,
                        },
                    ..
                } => break (instance_id, channel_id),
                ServerMessage::Error { error, .. } => return Err(ClientError::Hub(error)),
                other => {
                    return Err(ClientError::UnexpectedResponse(format!("{other:?}")));
                }
            }
        };

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    tracing::debug!("send failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let pending: Pending = Arc::new(Mutex::new(Some(HashMap::new())));
        let (events_tx, events) = mpsc::unbounded_channel();
        tokio::spawn(read_loop(stream, pending.clone(), events_tx));

        tracing::debug!(%instance_id, app = app_id, "connected to hub");
        let client = Self {
            inner: Arc::new(Inner {
                outgoing,
                pending,
                next_req: AtomicU64::new(1),
            }),
            instance_id,
            channel_id,
        };
        Ok((client, events))
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// The channel joined at connect time.
    pub fn initial_channel(&self) -> Option<&ChannelId> {
        self.channel_id.as_ref()
    }

    /// Send one request and wait for its response.
    pub async fn request(&self, request: ClientRequest) -> Result<ResponseBody, ClientError> {
        let req_id = self.inner.next_req.fetch_add(1, Ordering::Relaxed);
        let text = serde_json::to_string(&ClientMessage::new(req_id, request))?;

        let (tx, rx) = oneshot::channel();
        match self.inner.pending.lock().await.as_mut() {
            Some(waiting) => waiting.insert(req_id, tx),
            None => return Err(ClientError::Closed),
        };
        if self.inner.outgoing.send(Message::Text(text.into())).is_err() {
            if let Some(waiting) = self.inner.pending.lock().await.as_mut() {
                waiting.remove(&req_id);
            }
            return Err(ClientError::Closed);
        }

        match rx.await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(e)) => Err(ClientError::Hub(e)),
            Err(_) => Err(ClientError::Closed),
        }
    }

    /// Send heartbeats every `every` until the connection closes.
    pub fn keep_alive(&self, every: Duration) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match client.heartbeat().await {
                    Ok(()) => {}
                    Err(ClientError::Closed) => break,
                    Err(e) => {
                        tracing::warn!("heartbeat failed: {}", e);
                        break;
                    }
                }
            }
        })
    }

    pub async fn heartbeat(&self) -> Result<(), ClientError> {
        self.ack(ClientRequest::Heartbeat).await
    }

    pub async fn join_channel(&self, channel_id: impl Into<ChannelId>) -> Result<(), ClientError> {
        self.ack(ClientRequest::JoinChannel {
            channel_id: channel_id.into(),
        })
        .await
    }

    pub async fn leave_channel(&self) -> Result<(), ClientError> {
        self.ack(ClientRequest::LeaveChannel).await
    }

    pub async fn create_app_channel(
        &self,
        channel_id: impl Into<ChannelId>,
    ) -> Result<(), ClientError> {
        self.ack(ClientRequest::CreateAppChannel {
            channel_id: channel_id.into(),
        })
        .await
    }

    /// Create a private channel and join it. Hand the id to the peer.
    pub async fn create_private_channel(&self) -> Result<ChannelInfo, ClientError> {
        match self.request(ClientRequest::CreatePrivateChannel).await? {
            ResponseBody::Channel {
                channel: Some(channel),
            } => Ok(channel),
            other => Err(unexpected(other)),
        }
    }

    pub async fn current_channel(&self) -> Result<Option<ChannelInfo>, ClientError> {
        match self.request(ClientRequest::GetCurrentChannel).await? {
            ResponseBody::Channel { channel } => Ok(channel),
            other => Err(unexpected(other)),
        }
    }

    pub async fn list_channels(&self) -> Result<Vec<ChannelInfo>, ClientError> {
        match self.request(ClientRequest::ListChannels).await? {
            ResponseBody::Channels { channels } => Ok(channels),
            other => Err(unexpected(other)),
        }
    }

    pub async fn current_context(
        &self,
        channel_id: Option<ChannelId>,
        context_type: Option<&str>,
    ) -> Result<Option<Context>, ClientError> {
        let request = ClientRequest::GetCurrentContext {
            channel_id,
            context_type: context_type.map(str::to_string),
        };
        match self.request(request).await? {
            ResponseBody::CurrentContext { context } => Ok(context),
            other => Err(unexpected(other)),
        }
    }

    /// Broadcast on the current channel.
    pub async fn broadcast(&self, context: Context) -> Result<(), ClientError> {
        self.ack(ClientRequest::Broadcast {
            context,
            channel_id: None,
        })
        .await
    }

    pub async fn broadcast_on(
        &self,
        channel_id: impl Into<ChannelId>,
        context: Context,
    ) -> Result<(), ClientError> {
        self.ack(ClientRequest::Broadcast {
            context,
            channel_id: Some(channel_id.into()),
        })
        .await
    }

    pub async fn add_context_listener(
        &self,
        scope: ChannelScope,
        context_type: Option<&str>,
    ) -> Result<ListenerId, ClientError> {
        self.listener(ClientRequest::AddContextListener {
            scope,
            context_type: context_type.map(str::to_string),
        })
        .await
    }

    pub async fn add_intent_listener(&self, intent: &str) -> Result<ListenerId, ClientError> {
        self.listener(ClientRequest::AddIntentListener {
            intent: intent.to_string(),
        })
        .await
    }

    pub async fn remove_listener(&self, listener_id: ListenerId) -> Result<(), ClientError> {
        self.ack(ClientRequest::RemoveListener { listener_id }).await
    }

    pub async fn raise_intent(
        &self,
        intent: &str,
        context: Context,
        target_app_id: Option<&str>,
    ) -> Result<IntentResolution, ClientError> {
        let request = ClientRequest::RaiseIntent {
            intent: intent.to_string(),
            context,
            target_app_id: target_app_id.map(str::to_string),
        };
        match self.request(request).await? {
            ResponseBody::IntentRaised(resolution) => Ok(resolution),
            other => Err(unexpected(other)),
        }
    }

    pub async fn resolve_intent_target(
        &self,
        request_id: RequestId,
        instance_id: InstanceId,
    ) -> Result<(), ClientError> {
        self.ack(ClientRequest::ResolveIntentTarget {
            request_id,
            instance_id,
        })
        .await
    }

    pub async fn respond_to_intent(
        &self,
        request_id: RequestId,
        outcome: IntentOutcome,
    ) -> Result<(), ClientError> {
        self.ack(ClientRequest::RespondToIntent {
            request_id,
            outcome,
        })
        .await
    }

    pub async fn find_intent(
        &self,
        intent: &str,
        context_type: Option<&str>,
    ) -> Result<AppIntent, ClientError> {
        let request = ClientRequest::FindIntent {
            intent: intent.to_string(),
            context_type: context_type.map(str::to_string),
        };
        match self.request(request).await? {
            ResponseBody::AppIntents { mut intents } if intents.len() == 1 => {
                Ok(intents.remove(0))
            }
            other => Err(unexpected(other)),
        }
    }

    pub async fn find_intents_by_context(
        &self,
        context_type: &str,
    ) -> Result<Vec<AppIntent>, ClientError> {
        let request = ClientRequest::FindIntentsByContext {
            context_type: context_type.to_string(),
        };
        match self.request(request).await? {
            ResponseBody::AppIntents { intents } => Ok(intents),
            other => Err(unexpected(other)),
        }
    }

    /// Leave the hub. The socket closes once the hub acknowledges.
    pub async fn disconnect(self) -> Result<(), ClientError> {
        self.ack(ClientRequest::Disconnect).await
    }

    async fn ack(&self, request: ClientRequest) -> Result<(), ClientError> {
        match self.request(request).await? {
            ResponseBody::Ack => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn listener(&self, request: ClientRequest) -> Result<ListenerId, ClientError> {
        match self.request(request).await? {
            ResponseBody::Listener { listener_id } => Ok(listener_id),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(body: ResponseBody) -> ClientError {
    ClientError::UnexpectedResponse(format!("{body:?}"))
}

async fn read_loop(
    mut stream: Stream,
    pending: Pending,
    events: mpsc::UnboundedSender<ServerMessage>,
) {
    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!("websocket error: {}", e);
                break;
            }
        };

        let message: ServerMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("invalid message from hub: {}", e);
                continue;
            }
        };

        let (req_id, reply) = match message {
            ServerMessage::Response { req_id, body } => (req_id, Ok(body)),
            ServerMessage::Error {
                req_id: Some(req_id),
                error,
            } => (req_id, Err(error)),
            ServerMessage::Error { req_id: None, error } => {
                tracing::warn!("hub rejected a frame: {}", error);
                continue;
            }
            push => {
                let _ = events.send(push);
                continue;
            }
        };

        let waiter = pending
            .lock()
            .await
            .as_mut()
            .and_then(|waiting| waiting.remove(&req_id));
        match waiter {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => tracing::debug!(req_id, "response for unknown request"),
        }
    }

    // Wake every waiter with `Closed` and refuse new ones.
    pending.lock().await.take();
}
