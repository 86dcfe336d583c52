//! Listener subscription table.
//!
//! Mutated only by add/remove and by the purge that runs when an owner
//! disconnects. Routing reads it.

use interop_core::{ChannelScope, HubError, InstanceId, ListenerId, type_matches};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerKind {
    Context {
        scope: ChannelScope,
        context_type: Option<String>,
    },
    Intent {
        intent: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    pub id: ListenerId,
    pub owner: InstanceId,
    pub kind: ListenerKind,
    /// Registration order.
    seq: u64,
}

impl Listener {
    pub fn accepts_type(&self, context_type: &str) -> bool {
        match &self.kind {
            ListenerKind::Context {
                context_type: filter,
                ..
            } => type_matches(filter.as_deref(), context_type),
            ListenerKind::Intent { .. } => false,
        }
    }
}

#[derive(Default)]
pub struct ListenerTable {
    listeners: HashMap<ListenerId, Listener>,
    next_seq: u64,
}

impl ListenerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_context(
        &mut self,
        owner: InstanceId,
        scope: ChannelScope,
        context_type: Option<String>,
    ) -> ListenerId {
        self.insert(owner, ListenerKind::Context { scope, context_type })
    }

    pub fn add_intent(&mut self, owner: InstanceId, intent: impl Into<String>) -> ListenerId {
        self.insert(
            owner,
            ListenerKind::Intent {
                intent: intent.into(),
            },
        )
    }

    /// Remove a listener. Unknown handles are an error, never a silent success.
    pub fn remove(&mut self, id: &ListenerId) -> Result<Listener, HubError> {
        self.listeners
            .remove(id)
            .ok_or(HubError::UnknownHandle(*id))
    }

    /// Drop every listener owned by `owner`; returns how many went.
    pub fn purge_owner(&mut self, owner: &InstanceId) -> usize {
        let before = self.listeners.len();
        self.listeners.retain(|_, l| l.owner != *owner);
        before - self.listeners.len()
    }

    pub fn get(&self, id: &ListenerId) -> Option<&Listener> {
        self.listeners.get(id)
    }

    /// Context listeners in registration order.
    pub fn context_listeners(&self) -> Vec<&Listener> {
        let mut found: Vec<_> = self
            .listeners
            .values()
            .filter(|l| matches!(l.kind, ListenerKind::Context { .. }))
            .collect();
        found.sort_by_key(|l| l.seq);
        found
    }

    /// Context listeners of one owner in registration order.
    pub fn context_listeners_of(&self, owner: &InstanceId) -> Vec<&Listener> {
        self.context_listeners()
            .into_iter()
            .filter(|l| l.owner == *owner)
            .collect()
    }

    /// Earliest-registered listener of `owner` for `intent`.
    pub fn intent_listener(&self, owner: &InstanceId, intent: &str) -> Option<&Listener> {
        self.listeners
            .values()
            .filter(|l| l.owner == *owner)
            .filter(|l| matches!(&l.kind, ListenerKind::Intent { intent: i } if i == intent))
            .min_by_key(|l| l.seq)
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    fn insert(&mut self, owner: InstanceId, kind: ListenerKind) -> ListenerId {
        let id = ListenerId::new();
        self.next_seq += 1;
        self.listeners.insert(
            id,
            Listener {
                id,
                owner,
                kind,
                seq: self.next_seq,
            },
        );
        id
    }
}
