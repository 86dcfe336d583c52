//! WebSocket front end.
//!
//! One task per connection. The first request must be `connect`; after that
//! the socket is tied to the returned instance and every frame is a request
//! executed against the hub. Pushes arrive through the instance's outbox and
//! are interleaved with responses on the same socket.

use crate::connection::Inbox;
use crate::hub::Hub;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use interop_core::{
    ClientMessage, ClientRequest, HubError, InstanceId, ResponseBody, ServerMessage, WireError,
};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

type Sink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Accept connections until the hub is shut down.
pub async fn serve(listener: TcpListener, hub: Hub) -> anyhow::Result<()> {
    tracing::info!("listening on ws://{}", listener.local_addr()?);

    loop {
        let (stream, addr) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("accept failed: {}", e);
                    continue;
                }
            },
            _ = hub.closed() => break,
        };

        let hub = hub.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, addr, hub).await {
                tracing::warn!("connection error from {}: {}", addr, e);
            }
        });
    }

    tracing::info!("server stopped");
    Ok(())
}

async fn handle_connection(stream: TcpStream, addr: SocketAddr, hub: Hub) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut stream) = ws.split();

    tracing::debug!("new connection from {}", addr);

    // Wait for connect
    let (req_id, app_id, metadata) = loop {
        let Some(msg) = stream.next().await else {
            tracing::debug!("{} closed before connecting", addr);
            return Ok(());
        };
        let text = match msg? {
            Message::Text(text) => text,
            Message::Close(_) => return Ok(()),
            _ => continue,
        };
        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage {
                req_id,
                request: ClientRequest::Connect { app_id, metadata },
            }) => break (req_id, app_id, metadata),
            Ok(other) => {
                let err = HubError::Protocol("connect must be the first request".into());
                send(&mut sink, &error(Some(other.req_id), &err)).await?;
            }
            Err(e) => {
                send(&mut sink, &error(None, &HubError::Protocol(e.to_string()))).await?;
            }
        }
    };

    let (outbox, mut outbox_rx) = hub.outbox();
    let instance = match hub.connect(&app_id, metadata, outbox).await {
        Ok((instance_id, channel_id)) => {
            let body = ResponseBody::Connected {
                instance_id,
                channel_id: Some(channel_id),
            };
            send(&mut sink, &ServerMessage::Response { req_id, body }).await?;
            instance_id
        }
        Err(e) => {
            send(&mut sink, &error(Some(req_id), &e)).await?;
            let _ = sink.close().await;
            return Ok(());
        }
    };

    let result = run_session(instance, &hub, &mut sink, &mut stream, &mut outbox_rx).await;

    hub.disconnect(instance).await;
    let _ = sink.close().await;
    tracing::debug!("connection closed: {}", addr);
    result
}

async fn run_session(
    instance: InstanceId,
    hub: &Hub,
    sink: &mut Sink,
    stream: &mut SplitStream<WebSocketStream<TcpStream>>,
    outbox_rx: &mut Inbox,
) -> anyhow::Result<()> {
    let closed = hub.closed();
    tokio::pin!(closed);

    loop {
        tokio::select! {
            // Request from the application
            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        tracing::debug!(%instance, "websocket error: {}", e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => {
                        let (reply, done) = dispatch(instance, hub, &text).await;
                        send(sink, &reply).await?;
                        if done {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }

            // Push for this instance
            pushed = outbox_rx.recv() => {
                match pushed {
                    Some(message) => send(sink, &message).await?,
                    None => break,
                }
            }

            _ = &mut closed => break,
        }
    }

    Ok(())
}

/// Execute one frame. The flag is set once the session should end.
async fn dispatch(instance: InstanceId, hub: &Hub, text: &str) -> (ServerMessage, bool) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(%instance, "invalid request: {}", e);
            return (error(None, &HubError::Protocol(e.to_string())), false);
        }
    };

    let req_id = message.req_id;
    let done = matches!(message.request, ClientRequest::Disconnect);
    let reply = match hub.handle(instance, message.request).await {
        Ok(body) => ServerMessage::Response { req_id, body },
        Err(e) => {
            tracing::debug!(%instance, req_id, "request failed: {}", e);
            error(Some(req_id), &e)
        }
    };
    (reply, done)
}

fn error(req_id: Option<u64>, err: &HubError) -> ServerMessage {
    ServerMessage::Error {
        req_id,
        error: WireError::from(err),
    }
}

async fn send(sink: &mut Sink, message: &ServerMessage) -> anyhow::Result<()> {
    sink.send(Message::Text(serde_json::to_string(message)?.into()))
        .await?;
    Ok(())
}
