//! Hub state and the connection, channel and listener operations.
//!
//! `HubState` is the single owner of every registry. All mutations go through
//! `&mut self`, so whoever holds it (the [`Hub`](crate::Hub) behind its lock)
//! serialises them. Nothing here awaits: pushes to applications are queued
//! with `try_send` and timers are spawned, never waited on.
//!
//! Routing lives in `router.rs` and intent handling in `resolver.rs`.

use crate::channel::{Channel, ChannelRegistry};
use crate::config::HubConfig;
use crate::connection::{ConnectionManager, Outbox};
use crate::listener::{ListenerKind, ListenerTable};
use crate::resolver::IntentTable;
use crate::timer::{Fired, TimerKey, Timers};
use interop_core::{
    AppDirectory, AppMetadata, ChannelId, ChannelInfo, ChannelKind, ChannelScope, Context,
    HubError, InstanceId, ListenerId, ServerMessage,
};
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct HubState {
    pub(crate) config: HubConfig,
    pub(crate) directory: Arc<dyn AppDirectory>,
    pub(crate) channels: ChannelRegistry,
    pub(crate) connections: ConnectionManager,
    pub(crate) listeners: ListenerTable,
    pub(crate) intents: IntentTable,
    pub(crate) timers: Timers,
    accepting: bool,
}

impl HubState {
    pub fn new(
        config: HubConfig,
        directory: Arc<dyn AppDirectory>,
        timer_tx: mpsc::UnboundedSender<Fired>,
    ) -> Self {
        let channels = ChannelRegistry::new(config.user_channels.iter().map(ChannelId::new));
        let intents = IntentTable::new(config.retained_requests);
        Self {
            config,
            directory,
            channels,
            connections: ConnectionManager::new(),
            listeners: ListenerTable::new(),
            intents,
            timers: Timers::new(timer_tx),
            accepting: true,
        }
    }

    /// Register an application instance and join it to "global".
    ///
    /// Directory metadata for `app_id` takes precedence over what the
    /// application supplies about itself.
    pub fn connect(
        &mut self,
        app_id: &str,
        metadata: Option<AppMetadata>,
        outbox: Outbox,
    ) -> Result<(InstanceId, ChannelId), HubError> {
        if !self.accepting {
            return Err(HubError::ShuttingDown);
        }

        let metadata = match self.directory.get(app_id) {
            Some(entry) => entry,
            None => {
                let mut supplied = metadata.unwrap_or_else(|| AppMetadata::new(app_id));
                supplied.app_id = app_id.to_string();
                supplied
            }
        };

        let instance = self.connections.connect(metadata, outbox);
        let global = ChannelId::global();
        self.channels.join(instance, &global)?;
        self.timers.schedule(
            TimerKey::Heartbeat(instance),
            self.config.heartbeat_timeout(),
        );

        tracing::info!(%instance, app = app_id, "instance connected");
        Ok((instance, global))
    }

    pub fn heartbeat(&mut self, instance: InstanceId) -> Result<(), HubError> {
        self.connections.connected(&instance)?;
        self.timers.schedule(
            TimerKey::Heartbeat(instance),
            self.config.heartbeat_timeout(),
        );
        Ok(())
    }

    /// Tear an instance down. Returns false if it was already gone.
    pub fn disconnect(&mut self, instance: InstanceId) -> bool {
        if !self.connections.begin_disconnect(&instance) {
            tracing::debug!(%instance, "disconnect of unknown or departed instance");
            return false;
        }

        self.timers.cancel(TimerKey::Heartbeat(instance));
        let purged = self.listeners.purge_owner(&instance);

        for torn in self.channels.remove_instance(instance) {
            tracing::debug!(channel = %torn.channel_id, "private channel closed");
            for survivor in torn.survivors {
                self.connections.push(
                    &survivor,
                    ServerMessage::ChannelClosed {
                        channel_id: torn.channel_id.clone(),
                    },
                );
            }
        }

        self.fail_requests_of(instance);

        if let Some(gone) = self.connections.finish_disconnect(&instance) {
            tracing::info!(
                %instance,
                app = %gone.app_id,
                listeners = purged,
                "instance disconnected"
            );
        }
        true
    }

    pub fn join_channel(
        &mut self,
        instance: InstanceId,
        channel_id: &ChannelId,
    ) -> Result<(), HubError> {
        self.connections.connected(&instance)?;
        let joined = self.channels.join(instance, channel_id)?;
        tracing::debug!(
            %instance,
            channel = %channel_id,
            previous = ?joined.previous,
            "joined channel"
        );

        if let Some(context) = joined.current_context {
            self.replay_on_join(instance, channel_id, &context);
        }
        Ok(())
    }

    pub fn leave_channel(&mut self, instance: InstanceId) -> Result<Option<ChannelId>, HubError> {
        self.connections.connected(&instance)?;
        Ok(self.channels.leave(instance))
    }

    pub fn create_app_channel(
        &mut self,
        instance: InstanceId,
        channel_id: ChannelId,
    ) -> Result<(), HubError> {
        self.connections.connected(&instance)?;
        if channel_id.is_private() {
            return Err(HubError::Protocol(format!(
                "channel id {channel_id} uses the reserved private: prefix"
            )));
        }
        self.channels.create(channel_id.clone(), ChannelKind::App)?;
        tracing::debug!(%instance, channel = %channel_id, "app channel created");
        Ok(())
    }

    pub fn create_private_channel(&mut self, instance: InstanceId) -> Result<ChannelId, HubError> {
        self.connections.connected(&instance)?;
        Ok(self.channels.create_private(instance))
    }

    pub fn current_channel(&self, instance: InstanceId) -> Result<Option<ChannelInfo>, HubError> {
        self.connections.connected(&instance)?;
        Ok(self
            .channels
            .current_channel(&instance)
            .and_then(|id| self.channels.get(id))
            .map(|channel| channel.info()))
    }

    pub fn list_channels(&self) -> Vec<ChannelInfo> {
        self.channels.list()
    }

    /// Last context on `channel_id` (or the caller's current channel).
    pub fn current_context(
        &self,
        instance: InstanceId,
        channel_id: Option<&ChannelId>,
        context_type: Option<&str>,
    ) -> Result<Option<Context>, HubError> {
        self.connections.connected(&instance)?;
        let Some(channel_id) = channel_id.or_else(|| self.channels.current_channel(&instance))
        else {
            return Ok(None);
        };
        let channel = self.visible_channel(instance, channel_id)?;
        Ok(channel
            .current_context()
            .filter(|ctx| ctx.matches_type(context_type))
            .map(|ctx| ctx.as_ref().clone()))
    }

    pub fn add_context_listener(
        &mut self,
        instance: InstanceId,
        scope: ChannelScope,
        context_type: Option<String>,
    ) -> Result<ListenerId, HubError> {
        self.connections.connected(&instance)?;
        if let ChannelScope::Specific(channel_id) = &scope {
            self.visible_channel(instance, channel_id)?;
        }
        let id = self.listeners.add_context(instance, scope, context_type);
        self.replay_to_listener(&id);
        Ok(id)
    }

    pub fn add_intent_listener(
        &mut self,
        instance: InstanceId,
        intent: &str,
    ) -> Result<ListenerId, HubError> {
        self.connections.connected(&instance)?;
        let id = self.listeners.add_intent(instance, intent);
        tracing::debug!(%instance, intent, "intent listener added");
        Ok(id)
    }

    /// Remove a listener owned by `instance`. Handles owned by someone else
    /// are reported as unknown.
    pub fn remove_listener(
        &mut self,
        instance: InstanceId,
        listener_id: &ListenerId,
    ) -> Result<(), HubError> {
        self.connections.connected(&instance)?;
        match self.listeners.get(listener_id) {
            Some(listener) if listener.owner == instance => {
                let removed = self.listeners.remove(listener_id)?;
                if let ListenerKind::Intent { intent } = removed.kind {
                    tracing::debug!(%instance, %intent, "intent listener removed");
                }
                Ok(())
            }
            _ => Err(HubError::UnknownHandle(*listener_id)),
        }
    }

    /// Act on an elapsed deadline, unless it was cancelled or re-armed.
    pub fn on_timer(&mut self, fired: Fired) {
        match self.timers.fire(fired) {
            Some(TimerKey::Heartbeat(instance)) => {
                tracing::warn!(%instance, "heartbeat timeout");
                self.disconnect(instance);
            }
            Some(TimerKey::Intent(request_id)) => self.expire_request(request_id),
            None => {}
        }
    }

    /// Stop accepting connections and disconnect everyone.
    pub fn shutdown(&mut self) {
        self.accepting = false;
        let instances = self.connections.ids();
        tracing::info!(instances = instances.len(), "draining hub");
        for instance in instances {
            self.disconnect(instance);
        }
        self.timers.cancel_all();
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    pub fn instance_count(&self) -> usize {
        self.connections.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Channels that `instance` may read: everything except other people's
    /// private channels.
    fn visible_channel(
        &self,
        instance: InstanceId,
        channel_id: &ChannelId,
    ) -> Result<&Channel, HubError> {
        self.channels
            .get(channel_id)
            .filter(|c| c.kind() != ChannelKind::Private || c.has_member(&instance))
            .ok_or_else(|| HubError::UnknownChannel(channel_id.clone()))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    pub use crate::connection::{Inbox, outbox};
    use interop_core::StaticDirectory;

    pub fn state_with(
        config: HubConfig,
        apps: Vec<AppMetadata>,
    ) -> (HubState, mpsc::UnboundedReceiver<Fired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let directory = Arc::new(StaticDirectory::new(apps));
        (HubState::new(config, directory, tx), rx)
    }

    pub fn state() -> (HubState, mpsc::UnboundedReceiver<Fired>) {
        state_with(
            HubConfig {
                user_channels: vec!["red".into(), "blue".into()],
                ..HubConfig::default()
            },
            Vec::new(),
        )
    }

    pub fn connect(
        state: &mut HubState,
        app_id: &str,
    ) -> (InstanceId, Inbox) {
        let (tx, rx) = outbox(64);
        let (id, _) = state.connect(app_id, None, tx).unwrap();
        (id, rx)
    }

    pub fn drain(rx: &mut Inbox) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Some(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    pub fn delivered_contexts(rx: &mut Inbox) -> Vec<Context> {
        drain(rx)
            .into_iter()
            .filter_map(|msg| match msg {
                ServerMessage::ContextDelivery { context, .. } => Some(context),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use interop_core::{ErrorKind, IntentRecord};
    use std::time::Duration;

    #[tokio::test]
    async fn connect_joins_global() {
        let (mut state, _timers) = state();
        let (id, _rx) = connect(&mut state, "blotter");

        let channel = state.current_channel(id).unwrap().unwrap();
        assert_eq!(channel.channel_id, ChannelId::global());
        assert_eq!(state.instance_count(), 1);
    }

    #[tokio::test]
    async fn directory_metadata_wins_over_supplied() {
        let chart = AppMetadata::new("chart")
            .with_intent(IntentRecord::new("ViewChart", "fdc3.instrument"));
        let (mut state, _timers) = state_with(HubConfig::default(), vec![chart.clone()]);
        let (tx, _rx) = outbox(4);

        let supplied = AppMetadata::new("chart");
        let (id, _) = state.connect("chart", Some(supplied), tx).unwrap();
        assert_eq!(state.connections.get(&id).unwrap().metadata, chart);
    }

    #[tokio::test]
    async fn supplied_metadata_takes_the_connecting_app_id() {
        let (mut state, _timers) = state();
        let (tx, _rx) = outbox(4);
        let (id, _) = state
            .connect("news", Some(AppMetadata::new("spoofed")), tx)
            .unwrap();
        assert_eq!(state.connections.get(&id).unwrap().metadata.app_id, "news");
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (mut state, _timers) = state();
        let (id, _rx) = connect(&mut state, "blotter");
        state.add_context_listener(id, ChannelScope::Current, None).unwrap();
        state.add_intent_listener(id, "ViewChart").unwrap();

        assert!(state.disconnect(id));
        assert!(!state.disconnect(id));
        assert_eq!(state.listener_count(), 0);
        assert_eq!(state.heartbeat(id), Err(HubError::NotConnected(id)));
        assert!(!state.timers.is_armed(TimerKey::Heartbeat(id)));
    }

    #[tokio::test(start_paused = true)]
    async fn missed_heartbeat_disconnects() {
        let (mut state, mut fired_rx) = state_with(
            HubConfig {
                heartbeat_timeout_ms: 1_000,
                ..HubConfig::default()
            },
            Vec::new(),
        );
        let (quiet, _q) = connect(&mut state, "quiet");
        let (chatty, _c) = connect(&mut state, "chatty");

        tokio::time::sleep(Duration::from_millis(600)).await;
        state.heartbeat(chatty).unwrap();

        let fired = fired_rx.recv().await.unwrap();
        state.on_timer(fired);

        assert!(state.connections.connected(&quiet).is_err());
        assert!(state.connections.connected(&chatty).is_ok());
    }

    #[tokio::test]
    async fn private_channel_teardown_notifies_survivor() {
        let (mut state, _timers) = state();
        let (a, _rx_a) = connect(&mut state, "a");
        let (b, mut rx_b) = connect(&mut state, "b");

        let private = state.create_private_channel(a).unwrap();
        state.join_channel(b, &private).unwrap();
        state.disconnect(a);

        assert!(drain(&mut rx_b).contains(&ServerMessage::ChannelClosed {
            channel_id: private.clone()
        }));
        assert_eq!(
            state.join_channel(b, &private),
            Err(HubError::UnknownChannel(private))
        );
    }

    #[tokio::test]
    async fn remove_listener_rejects_unknown_and_foreign_handles() {
        let (mut state, _timers) = state();
        let (a, _rx_a) = connect(&mut state, "a");
        let (b, _rx_b) = connect(&mut state, "b");
        let handle = state.add_intent_listener(a, "ViewChart").unwrap();

        assert_eq!(
            state.remove_listener(b, &handle),
            Err(HubError::UnknownHandle(handle))
        );
        assert_eq!(state.remove_listener(a, &handle), Ok(()));
        assert_eq!(
            state.remove_listener(a, &handle),
            Err(HubError::UnknownHandle(handle))
        );
    }

    #[tokio::test]
    async fn listener_on_foreign_private_channel_is_refused() {
        let (mut state, _timers) = state();
        let (a, _rx_a) = connect(&mut state, "a");
        let (c, _rx_c) = connect(&mut state, "c");
        let private = state.create_private_channel(a).unwrap();

        assert_eq!(
            state.add_context_listener(c, ChannelScope::Specific(private.clone()), None),
            Err(HubError::UnknownChannel(private))
        );
    }

    #[tokio::test]
    async fn app_channels_cannot_use_private_ids() {
        let (mut state, _timers) = state();
        let (a, _rx_a) = connect(&mut state, "a");
        let (c, _rx_c) = connect(&mut state, "c");
        let existing = state.create_private_channel(a).unwrap();
        let unused = ChannelId::private();

        let taken = state.create_app_channel(c, existing.clone()).unwrap_err();
        let free = state.create_app_channel(c, unused.clone()).unwrap_err();
        assert_eq!(taken.kind(), ErrorKind::Protocol);
        assert_eq!(free.kind(), ErrorKind::Protocol);
        assert_eq!(
            taken.to_string().replace(existing.as_str(), ""),
            free.to_string().replace(unused.as_str(), "")
        );
        assert_eq!(
            state.join_channel(c, &unused),
            Err(HubError::UnknownChannel(unused))
        );
    }

    #[tokio::test]
    async fn shutdown_refuses_new_connections() {
        let (mut state, _timers) = state();
        let (a, _rx_a) = connect(&mut state, "a");
        state.shutdown();

        assert!(!state.is_accepting());
        assert!(state.connections.connected(&a).is_err());
        assert!(state.timers.is_empty());
        let (tx, _rx) = outbox(1);
        assert_eq!(state.connect("late", None, tx), Err(HubError::ShuttingDown));
    }
}
