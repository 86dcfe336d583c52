//! The hub service.
//!
//! [`Hub`] is a cheap, cloneable handle onto one hub instance. State sits
//! behind a single `RwLock`: queries take the read side, everything that
//! mutates takes the write side. A background task feeds elapsed deadlines
//! back into the state.

use crate::config::HubConfig;
use crate::connection::{self, Inbox, Outbox};
use crate::state::HubState;
use crate::timer::Fired;
use interop_core::{
    AppDirectory, AppMetadata, ChannelId, ClientRequest, HubError, InstanceId, ResponseBody,
};
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc, watch};

type SharedState = Arc<RwLock<HubState>>;

#[derive(Clone)]
pub struct Hub {
    state: SharedState,
    outbox_capacity: usize,
    stopped: Arc<watch::Sender<bool>>,
}

impl Hub {
    /// Build a hub and spawn its timer task. Must run inside a tokio runtime.
    pub fn start(config: HubConfig, directory: Arc<dyn AppDirectory>) -> Self {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let outbox_capacity = config.outbox_capacity.max(1);
        let state = Arc::new(RwLock::new(HubState::new(config, directory, timer_tx)));
        let (stopped, _) = watch::channel(false);

        tokio::spawn(run_timers(state.clone(), timer_rx, stopped.subscribe()));
        tracing::info!("hub started");

        Self {
            state,
            outbox_capacity,
            stopped: Arc::new(stopped),
        }
    }

    /// A fresh push queue for one connection.
    pub fn outbox(&self) -> (Outbox, Inbox) {
        connection::outbox(self.outbox_capacity)
    }

    pub async fn connect(
        &self,
        app_id: &str,
        metadata: Option<AppMetadata>,
        outbox: Outbox,
    ) -> Result<(InstanceId, ChannelId), HubError> {
        self.state.write().await.connect(app_id, metadata, outbox)
    }

    /// Idempotent; returns whether the instance was still connected.
    pub async fn disconnect(&self, instance: InstanceId) -> bool {
        self.state.write().await.disconnect(instance)
    }

    /// Execute one request on behalf of a connected instance.
    pub async fn handle(
        &self,
        instance: InstanceId,
        request: ClientRequest,
    ) -> Result<ResponseBody, HubError> {
        match request {
            ClientRequest::Connect { .. } => {
                Err(HubError::Protocol("connection already established".into()))
            }
            ClientRequest::Heartbeat => {
                self.state.write().await.heartbeat(instance)?;
                Ok(ResponseBody::Ack)
            }
            ClientRequest::JoinChannel { channel_id } => {
                self.state
                    .write()
                    .await
                    .join_channel(instance, &channel_id)?;
                Ok(ResponseBody::Ack)
            }
            ClientRequest::LeaveChannel => {
                self.state.write().await.leave_channel(instance)?;
                Ok(ResponseBody::Ack)
            }
            ClientRequest::CreateAppChannel { channel_id } => {
                self.state
                    .write()
                    .await
                    .create_app_channel(instance, channel_id)?;
                Ok(ResponseBody::Ack)
            }
            ClientRequest::CreatePrivateChannel => {
                let mut state = self.state.write().await;
                let channel_id = state.create_private_channel(instance)?;
                let channel = state.channels.get(&channel_id).map(|c| c.info());
                Ok(ResponseBody::Channel { channel })
            }
            ClientRequest::GetCurrentChannel => {
                let channel = self.state.read().await.current_channel(instance)?;
                Ok(ResponseBody::Channel { channel })
            }
            ClientRequest::ListChannels => {
                let state = self.state.read().await;
                state.connections.connected(&instance)?;
                Ok(ResponseBody::Channels {
                    channels: state.list_channels(),
                })
            }
            ClientRequest::GetCurrentContext {
                channel_id,
                context_type,
            } => {
                let context = self.state.read().await.current_context(
                    instance,
                    channel_id.as_ref(),
                    context_type.as_deref(),
                )?;
                Ok(ResponseBody::CurrentContext { context })
            }
            ClientRequest::Broadcast {
                context,
                channel_id,
            } => {
                self.state
                    .write()
                    .await
                    .broadcast(instance, context, channel_id)?;
                Ok(ResponseBody::Ack)
            }
            ClientRequest::AddContextListener {
                scope,
                context_type,
            } => {
                let listener_id = self
                    .state
                    .write()
                    .await
                    .add_context_listener(instance, scope, context_type)?;
                Ok(ResponseBody::Listener { listener_id })
            }
            ClientRequest::AddIntentListener { intent } => {
                let listener_id = self
                    .state
                    .write()
                    .await
                    .add_intent_listener(instance, &intent)?;
                Ok(ResponseBody::Listener { listener_id })
            }
            ClientRequest::RemoveListener { listener_id } => {
                self.state
                    .write()
                    .await
                    .remove_listener(instance, &listener_id)?;
                Ok(ResponseBody::Ack)
            }
            ClientRequest::RaiseIntent {
                intent,
                context,
                target_app_id,
            } => {
                let resolution = self.state.write().await.raise_intent(
                    instance,
                    &intent,
                    context,
                    target_app_id.as_deref(),
                )?;
                Ok(ResponseBody::IntentRaised(resolution))
            }
            ClientRequest::ResolveIntentTarget {
                request_id,
                instance_id,
            } => {
                self.state
                    .write()
                    .await
                    .resolve_intent_target(instance, request_id, instance_id)?;
                Ok(ResponseBody::Ack)
            }
            ClientRequest::RespondToIntent {
                request_id,
                outcome,
            } => {
                self.state
                    .write()
                    .await
                    .respond_to_intent(instance, request_id, outcome)?;
                Ok(ResponseBody::Ack)
            }
            ClientRequest::FindIntent {
                intent,
                context_type,
            } => {
                let state = self.state.read().await;
                state.connections.connected(&instance)?;
                let found = state.find_intent(&intent, context_type.as_deref())?;
                Ok(ResponseBody::AppIntents {
                    intents: vec![found],
                })
            }
            ClientRequest::FindIntentsByContext { context_type } => {
                let state = self.state.read().await;
                state.connections.connected(&instance)?;
                Ok(ResponseBody::AppIntents {
                    intents: state.find_intents_by_context(&context_type),
                })
            }
            ClientRequest::Disconnect => {
                self.disconnect(instance).await;
                Ok(ResponseBody::Ack)
            }
        }
    }

    /// Stop accepting connections, disconnect everyone and stop timers.
    pub async fn shutdown(&self) {
        self.state.write().await.shutdown();
        self.stopped.send_replace(true);
        tracing::info!("hub stopped");
    }

    /// Resolves once [`shutdown`](Self::shutdown) has run.
    pub async fn closed(&self) {
        let mut rx = self.stopped.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    pub async fn instance_count(&self) -> usize {
        self.state.read().await.instance_count()
    }

    pub async fn pending_intents(&self) -> usize {
        self.state.read().await.pending_count()
    }
}

async fn run_timers(
    state: SharedState,
    mut fired_rx: mpsc::UnboundedReceiver<Fired>,
    mut stopped: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            Some(fired) = fired_rx.recv() => state.write().await.on_timer(fired),
            // Only ever flips to true; an error means every handle is gone.
            _ = stopped.changed() => break,
        }
    }
    tracing::debug!("timer task finished");
}
