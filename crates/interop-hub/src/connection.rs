//! Connected application instances.

use chrono::{DateTime, Utc};
use interop_core::{AppMetadata, ConnectionState, HubError, InstanceId, ServerMessage};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Sending half of one instance's push queues.
///
/// Context deliveries go through a bounded queue and are dropped when it is
/// full. Intent traffic and channel notices carry the only copy of a state
/// change, so they use a separate queue that never drops.
#[derive(Debug, Clone)]
pub struct Outbox {
    deliveries: mpsc::Sender<ServerMessage>,
    notices: mpsc::UnboundedSender<ServerMessage>,
}

/// Receiving half of an [`Outbox`]. Notices are handed out first.
#[derive(Debug)]
pub struct Inbox {
    deliveries: mpsc::Receiver<ServerMessage>,
    notices: mpsc::UnboundedReceiver<ServerMessage>,
}

/// A queue pair holding at most `capacity` undelivered contexts.
pub fn outbox(capacity: usize) -> (Outbox, Inbox) {
    let (deliveries, deliveries_rx) = mpsc::channel(capacity.max(1));
    let (notices, notices_rx) = mpsc::unbounded_channel();
    (
        Outbox {
            deliveries,
            notices,
        },
        Inbox {
            deliveries: deliveries_rx,
            notices: notices_rx,
        },
    )
}

impl Inbox {
    /// Next push; `None` once the instance is gone and both queues are drained.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        tokio::select! {
            biased;
            Some(message) = self.notices.recv() => Some(message),
            message = self.deliveries.recv() => match message {
                Some(message) => Some(message),
                None => self.notices.recv().await,
            },
        }
    }

    pub fn try_recv(&mut self) -> Option<ServerMessage> {
        self.notices
            .try_recv()
            .ok()
            .or_else(|| self.deliveries.try_recv().ok())
    }
}

fn is_notice(message: &ServerMessage) -> bool {
    !matches!(message, ServerMessage::ContextDelivery { .. })
}

pub struct AppInstance {
    pub instance_id: InstanceId,
    pub app_id: String,
    pub metadata: AppMetadata,
    pub connected_at: DateTime<Utc>,
    pub state: ConnectionState,
    outbox: Outbox,
}

impl AppInstance {
    /// Queue a push without waiting. Returns whether it was queued.
    ///
    /// A context delivery that finds the delivery queue full is dropped;
    /// everything else is always queued while the receiver lives.
    pub fn push(&self, message: ServerMessage) -> bool {
        if is_notice(&message) {
            return match self.outbox.notices.send(message) {
                Ok(()) => true,
                Err(_) => {
                    tracing::debug!(instance = %self.instance_id, "outbox closed");
                    false
                }
            };
        }

        match self.outbox.deliveries.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    instance = %self.instance_id,
                    app = %self.app_id,
                    "outbox full, dropping context delivery"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(instance = %self.instance_id, "outbox closed");
                false
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

#[derive(Default)]
pub struct ConnectionManager {
    instances: HashMap<InstanceId, AppInstance>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new instance in the `Connected` state.
    pub fn connect(&mut self, metadata: AppMetadata, outbox: Outbox) -> InstanceId {
        let instance_id = InstanceId::new();
        self.instances.insert(
            instance_id,
            AppInstance {
                instance_id,
                app_id: metadata.app_id.clone(),
                metadata,
                connected_at: Utc::now(),
                state: ConnectionState::Connected,
                outbox,
            },
        );
        instance_id
    }

    /// The instance, provided it is still connected.
    pub fn connected(&self, id: &InstanceId) -> Result<&AppInstance, HubError> {
        self.instances
            .get(id)
            .filter(|instance| instance.is_connected())
            .ok_or(HubError::NotConnected(*id))
    }

    pub fn get(&self, id: &InstanceId) -> Option<&AppInstance> {
        self.instances.get(id)
    }

    /// Push to an instance if it is still connected; silently skips otherwise.
    pub fn push(&self, id: &InstanceId, message: ServerMessage) -> bool {
        match self.instances.get(id) {
            Some(instance) if instance.is_connected() => instance.push(message),
            _ => false,
        }
    }

    /// Flag the instance as being torn down. Returns false if it was not connected.
    pub fn begin_disconnect(&mut self, id: &InstanceId) -> bool {
        match self.instances.get_mut(id) {
            Some(instance) if instance.is_connected() => {
                instance.state = ConnectionState::Disconnecting;
                true
            }
            _ => false,
        }
    }

    /// Drop the instance record once cleanup has finished.
    pub fn finish_disconnect(&mut self, id: &InstanceId) -> Option<AppInstance> {
        let mut instance = self.instances.remove(id)?;
        instance.state = ConnectionState::Disconnected;
        Some(instance)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AppInstance> {
        self.instances.values().filter(|i| i.is_connected())
    }

    pub fn ids(&self) -> Vec<InstanceId> {
        self.iter().map(|i| i.instance_id).collect()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interop_core::{ChannelId, Context, IntentResult, ListenerId, RequestId, WireError};

    fn delivery(ticker: &str) -> ServerMessage {
        ServerMessage::ContextDelivery {
            listener_id: ListenerId::new(),
            channel_id: ChannelId::global(),
            context: Context::instrument(ticker),
        }
    }

    fn closed_notice() -> ServerMessage {
        ServerMessage::ChannelClosed {
            channel_id: ChannelId::new("private:x"),
        }
    }

    #[test]
    fn connect_then_disconnect() {
        let mut conns = ConnectionManager::new();
        let (tx, _rx) = outbox(4);
        let id = conns.connect(AppMetadata::new("chart"), tx);

        assert_eq!(conns.connected(&id).unwrap().app_id, "chart");
        assert!(conns.begin_disconnect(&id));
        assert_eq!(conns.connected(&id).err(), Some(HubError::NotConnected(id)));
        assert!(!conns.begin_disconnect(&id));

        let gone = conns.finish_disconnect(&id).unwrap();
        assert_eq!(gone.state, ConnectionState::Disconnected);
        assert!(conns.finish_disconnect(&id).is_none());
        assert!(conns.is_empty());
    }

    #[test]
    fn push_drops_deliveries_when_full() {
        let mut conns = ConnectionManager::new();
        let (tx, mut rx) = outbox(1);
        let id = conns.connect(AppMetadata::new("news"), tx);

        assert!(conns.push(&id, delivery("AAPL")));
        assert!(!conns.push(&id, delivery("MSFT")));
        assert!(matches!(
            rx.try_recv(),
            Some(ServerMessage::ContextDelivery { context, .. }) if context.id["ticker"] == "AAPL"
        ));
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn intent_results_survive_a_full_delivery_queue() {
        let mut conns = ConnectionManager::new();
        let (tx, mut rx) = outbox(1);
        let id = conns.connect(AppMetadata::new("blotter"), tx);
        let request_id = RequestId::new();
        let result = ServerMessage::IntentResult {
            request_id,
            result: IntentResult::Rejected {
                error: WireError::from(HubError::IntentTimeout(request_id)),
            },
        };

        assert!(conns.push(&id, delivery("AAPL")));
        assert!(!conns.push(&id, delivery("MSFT")));
        assert!(conns.push(&id, result.clone()));
        assert!(conns.push(&id, closed_notice()));

        assert_eq!(rx.try_recv(), Some(result));
        assert_eq!(rx.try_recv(), Some(closed_notice()));
        assert!(matches!(
            rx.try_recv(),
            Some(ServerMessage::ContextDelivery { .. })
        ));
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn recv_ends_after_both_queues_drain() {
        let (tx, mut rx) = outbox(4);
        tx.deliveries.try_send(delivery("AAPL")).unwrap();
        tx.notices.send(closed_notice()).unwrap();
        drop(tx);

        assert_eq!(rx.recv().await, Some(closed_notice()));
        assert!(matches!(
            rx.recv().await,
            Some(ServerMessage::ContextDelivery { .. })
        ));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn push_to_closed_outbox_is_not_fatal() {
        let mut conns = ConnectionManager::new();
        let (tx, rx) = outbox(1);
        let id = conns.connect(AppMetadata::new("news"), tx);
        drop(rx);
        assert!(!conns.push(&id, closed_notice()));
        assert!(!conns.push(&id, delivery("AAPL")));
        assert!(!conns.push(&InstanceId::new(), closed_notice()));
    }
}
