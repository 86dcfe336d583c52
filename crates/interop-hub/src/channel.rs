//! Channel registry.
//!
//! Owns every channel, its members and its current context. An instance is a
//! member of at most one non-private channel at a time; private channels hold
//! at most two members and are removed when either of them goes away.

use interop_core::{ChannelId, ChannelInfo, ChannelKind, Context, HubError, InstanceId};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

pub struct Channel {
    id: ChannelId,
    kind: ChannelKind,
    current_context: Option<Arc<Context>>,
    members: BTreeSet<InstanceId>,
}

impl Channel {
    fn new(id: ChannelId, kind: ChannelKind) -> Self {
        Self {
            id,
            kind,
            current_context: None,
            members: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn current_context(&self) -> Option<&Arc<Context>> {
        self.current_context.as_ref()
    }

    pub fn members(&self) -> impl Iterator<Item = &InstanceId> {
        self.members.iter()
    }

    pub fn has_member(&self, instance: &InstanceId) -> bool {
        self.members.contains(instance)
    }

    pub fn info(&self) -> ChannelInfo {
        ChannelInfo {
            channel_id: self.id.clone(),
            kind: self.kind,
            members: self.members.len(),
            current_context: self.current_context.as_deref().cloned(),
        }
    }
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq)]
pub struct Joined {
    /// Non-private channel the instance left to join this one.
    pub previous: Option<ChannelId>,
    pub current_context: Option<Arc<Context>>,
}

/// A private channel removed because one side went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TornDown {
    pub channel_id: ChannelId,
    pub survivors: Vec<InstanceId>,
}

pub struct ChannelRegistry {
    channels: HashMap<ChannelId, Channel>,
    /// Non-private membership per instance.
    current: HashMap<InstanceId, ChannelId>,
}

impl ChannelRegistry {
    /// Create a registry holding "global" plus the given system channels.
    pub fn new(system_channels: impl IntoIterator<Item = ChannelId>) -> Self {
        let mut channels = HashMap::new();
        let global = ChannelId::global();
        channels.insert(global.clone(), Channel::new(global, ChannelKind::System));
        for id in system_channels {
            channels
                .entry(id.clone())
                .or_insert_with(|| Channel::new(id, ChannelKind::System));
        }
        Self {
            channels,
            current: HashMap::new(),
        }
    }

    pub fn create(&mut self, id: ChannelId, kind: ChannelKind) -> Result<(), HubError> {
        if self.channels.contains_key(&id) {
            return Err(HubError::DuplicateChannel(id));
        }
        self.channels.insert(id.clone(), Channel::new(id, kind));
        Ok(())
    }

    /// Create a private channel with `owner` as its first member.
    pub fn create_private(&mut self, owner: InstanceId) -> ChannelId {
        let id = ChannelId::private();
        let mut channel = Channel::new(id.clone(), ChannelKind::Private);
        channel.members.insert(owner);
        self.channels.insert(id.clone(), channel);
        id
    }

    pub fn join(&mut self, instance: InstanceId, id: &ChannelId) -> Result<Joined, HubError> {
        let channel = self
            .channels
            .get(id)
            .ok_or_else(|| HubError::UnknownChannel(id.clone()))?;

        if channel.kind == ChannelKind::Private {
            if !channel.has_member(&instance) && channel.members.len() >= 2 {
                return Err(HubError::ChannelFull(id.clone()));
            }
            let channel = self.channel_mut(id)?;
            channel.members.insert(instance);
            return Ok(Joined {
                previous: None,
                current_context: channel.current_context.clone(),
            });
        }

        let already_joined = self.current.get(&instance) == Some(id);
        let previous = if already_joined {
            None
        } else {
            self.leave(instance)
        };
        let channel = self.channel_mut(id)?;
        channel.members.insert(instance);
        let current_context = channel.current_context.clone();
        self.current.insert(instance, id.clone());

        Ok(Joined {
            previous,
            current_context,
        })
    }

    /// Leave the current non-private channel; channel state is kept.
    pub fn leave(&mut self, instance: InstanceId) -> Option<ChannelId> {
        let id = self.current.remove(&instance)?;
        if let Some(channel) = self.channels.get_mut(&id) {
            channel.members.remove(&instance);
        }
        Some(id)
    }

    pub fn current_channel(&self, instance: &InstanceId) -> Option<&ChannelId> {
        self.current.get(instance)
    }

    /// Replace the channel's current context, returning the previous one.
    pub fn set_context(
        &mut self,
        id: &ChannelId,
        context: Arc<Context>,
    ) -> Result<Option<Arc<Context>>, HubError> {
        let channel = self.channel_mut(id)?;
        Ok(channel.current_context.replace(context))
    }

    pub fn get(&self, id: &ChannelId) -> Option<&Channel> {
        self.channels.get(id)
    }

    pub fn is_member(&self, instance: &InstanceId, id: &ChannelId) -> bool {
        self.channels
            .get(id)
            .is_some_and(|channel| channel.has_member(instance))
    }

    /// Non-private channels, sorted by id.
    pub fn list(&self) -> Vec<ChannelInfo> {
        let mut channels: Vec<_> = self
            .channels
            .values()
            .filter(|c| c.kind != ChannelKind::Private)
            .map(Channel::info)
            .collect();
        channels.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        channels
    }

    /// Drop every membership of `instance`, tearing down its private channels.
    pub fn remove_instance(&mut self, instance: InstanceId) -> Vec<TornDown> {
        self.leave(instance);

        let private: Vec<ChannelId> = self
            .channels
            .values()
            .filter(|c| c.kind == ChannelKind::Private && c.has_member(&instance))
            .map(|c| c.id.clone())
            .collect();

        private
            .into_iter()
            .filter_map(|id| self.channels.remove(&id))
            .map(|channel| TornDown {
                survivors: channel
                    .members
                    .into_iter()
                    .filter(|member| *member != instance)
                    .collect(),
                channel_id: channel.id,
            })
            .collect()
    }

    fn channel_mut(&mut self, id: &ChannelId) -> Result<&mut Channel, HubError> {
        self.channels
            .get_mut(id)
            .ok_or_else(|| HubError::UnknownChannel(id.clone()))
    }
}
