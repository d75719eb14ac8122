//! Channels
//!
//! A channel is an independent actor that owns the membership set of one
//! named group. Join, leave and broadcast requests for the group are queued
//! on the channel's command queue and applied strictly in arrival order.
//!
//! Channels are created through [`Hub::create_channel`](crate::hub::Hub::create_channel)
//! and live for the rest of the process.

mod actor;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::client::{ClientHandle, ClientId};
use crate::hub::HubConfig;
use crate::protocol::ChannelRef;

use actor::{ChannelActor, ChannelCommand};

/// Process-unique channel identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(Uuid);

impl ChannelId {
    /// Generate a new random ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Name of the private channel shared by two clients
///
/// Both IDs are ordered before concatenation so either participant derives
/// the same name.
pub fn private_channel_name(a: ClientId, b: ClientId) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{}{}", first, second)
}

/// Address of a running channel actor
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    id: ChannelId,
    name: Arc<str>,
    private: bool,
    commands: mpsc::Sender<ChannelCommand>,
}

impl ChannelHandle {
    /// Create a channel and start its actor loop
    pub(crate) fn spawn(name: impl Into<Arc<str>>, private: bool, config: &HubConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_command_capacity.max(1));

        let handle = Self {
            id: ChannelId::new(),
            name: name.into(),
            private,
            commands: tx,
        };

        let actor = ChannelActor::new(handle.to_ref(), rx, config.fanout_timeout);
        tokio::spawn(actor.run());

        handle
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_private(&self) -> bool {
        self.private
    }

    /// Wire identity of this channel
    pub fn to_ref(&self) -> ChannelRef {
        ChannelRef {
            id: self.id,
            name: self.name.to_string(),
            private: self.private,
        }
    }

    /// Announce the client to current members, then add it
    pub async fn subscribe(&self, client: ClientHandle) {
        self.send(ChannelCommand::Subscribe(client)).await;
    }

    /// Remove the client and announce the departure to remaining members
    pub async fn unsubscribe(&self, client: ClientId) {
        self.send(ChannelCommand::Unsubscribe(client)).await;
    }

    /// Fan an encoded frame out to every current member
    pub async fn broadcast(&self, frame: Bytes) {
        self.send(ChannelCommand::Broadcast(frame)).await;
    }

    /// Snapshot of the current membership
    pub async fn members(&self) -> Vec<ClientId> {
        let (tx, rx) = oneshot::channel();
        self.send(ChannelCommand::Members(tx)).await;
        rx.await.unwrap_or_default()
    }

    async fn send(&self, command: ChannelCommand) {
        if self.commands.send(command).await.is_err() {
            tracing::warn!(channel = %self.name, "Channel actor stopped, command dropped");
        }
    }
}

impl PartialEq for ChannelHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ChannelHandle {}
