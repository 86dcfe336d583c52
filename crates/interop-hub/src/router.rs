//! Context routing.
//!
//! A broadcast sets the channel's current context and queues a delivery for
//! every context listener following that channel, the broadcaster's own
//! included. Deliveries are queued in broadcast order on each owner's outbox,
//! which keeps per-channel order without waiting for anyone.

use crate::listener::{Listener, ListenerKind};
use crate::state::HubState;
use interop_core::{
    ChannelId, ChannelKind, ChannelScope, Context, HubError, InstanceId, ListenerId, ServerMessage,
};
use std::sync::Arc;

impl HubState {
    /// Broadcast on `channel_id`, or on the source's current channel.
    ///
    /// Returns the number of deliveries queued. With no current channel the
    /// broadcast is dropped.
    pub fn broadcast(
        &mut self,
        source: InstanceId,
        context: Context,
        channel_id: Option<ChannelId>,
    ) -> Result<usize, HubError> {
        self.connections.connected(&source)?;

        let channel_id = match channel_id {
            Some(id) => {
                let channel = self
                    .channels
                    .get(&id)
                    .ok_or_else(|| HubError::UnknownChannel(id.clone()))?;
                if channel.kind() == ChannelKind::Private && !channel.has_member(&source) {
                    return Err(HubError::UnknownChannel(id));
                }
                id
            }
            None => match self.channels.current_channel(&source) {
                Some(id) => id.clone(),
                None => {
                    tracing::debug!(%source, "broadcast with no current channel dropped");
                    return Ok(0);
                }
            },
        };

        let context = Arc::new(context);
        self.channels.set_context(&channel_id, context.clone())?;
        let delivered = self.deliver_on_channel(&channel_id, &context);

        tracing::debug!(
            %source,
            channel = %channel_id,
            context_type = %context.context_type,
            delivered,
            "broadcast"
        );
        Ok(delivered)
    }

    fn deliver_on_channel(&self, channel_id: &ChannelId, context: &Arc<Context>) -> usize {
        self.listeners
            .context_listeners()
            .into_iter()
            .filter(|l| l.accepts_type(&context.context_type) && self.listens_on(l, channel_id))
            .filter(|l| self.push_context(l, channel_id, context))
            .count()
    }

    /// Replay a channel's context to an instance that just joined it.
    ///
    /// Listeners scoped to a specific non-private channel already follow it
    /// and are skipped.
    pub(crate) fn replay_on_join(
        &self,
        instance: InstanceId,
        channel_id: &ChannelId,
        context: &Arc<Context>,
    ) {
        let private = self
            .channels
            .get(channel_id)
            .is_some_and(|c| c.kind() == ChannelKind::Private);

        for listener in self.listeners.context_listeners_of(&instance) {
            let follows_join = match &listener.kind {
                ListenerKind::Context {
                    scope: ChannelScope::Current,
                    ..
                } => !private,
                ListenerKind::Context {
                    scope: ChannelScope::Specific(id),
                    ..
                } => private && id == channel_id,
                ListenerKind::Intent { .. } => false,
            };
            if follows_join && listener.accepts_type(&context.context_type) {
                self.push_context(listener, channel_id, context);
            }
        }
    }

    /// Replay the current context of a new listener's channel to it.
    pub(crate) fn replay_to_listener(&self, listener_id: &ListenerId) {
        let Some(listener) = self.listeners.get(listener_id) else {
            return;
        };
        let channel_id = match &listener.kind {
            ListenerKind::Context {
                scope: ChannelScope::Current,
                ..
            } => self.channels.current_channel(&listener.owner),
            ListenerKind::Context {
                scope: ChannelScope::Specific(id),
                ..
            } => Some(id),
            ListenerKind::Intent { .. } => None,
        };
        let Some(channel) = channel_id.and_then(|id| self.channels.get(id)) else {
            return;
        };
        if let Some(context) = channel.current_context()
            && listener.accepts_type(&context.context_type)
            && self.listens_on(listener, channel.id())
        {
            self.push_context(listener, channel.id(), context);
        }
    }

    /// Whether `listener` follows `channel_id` right now.
    fn listens_on(&self, listener: &Listener, channel_id: &ChannelId) -> bool {
        match &listener.kind {
            ListenerKind::Context {
                scope: ChannelScope::Current,
                ..
            } => self.channels.current_channel(&listener.owner) == Some(channel_id),
            ListenerKind::Context {
                scope: ChannelScope::Specific(id),
                ..
            } => {
                id == channel_id
                    && self.channels.get(channel_id).is_some_and(|c| {
                        c.kind() != ChannelKind::Private || c.has_member(&listener.owner)
                    })
            }
            ListenerKind::Intent { .. } => false,
        }
    }

    fn push_context(&self, listener: &Listener, channel_id: &ChannelId, context: &Context) -> bool {
        self.connections.push(
            &listener.owner,
            ServerMessage::ContextDelivery {
                listener_id: listener.id,
                channel_id: channel_id.clone(),
                context: context.clone(),
            },
        )
    }
}
