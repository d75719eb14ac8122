//! Hub: the root actor
//!
//! The hub is the single authority for who is connected and which channels
//! exist. It runs as one task that exclusively owns both registries; the
//! rest of the crate talks to it through the cloneable [`Hub`] handle.
//!
//! # Architecture
//!
//! ```text
//!                 Hub (handle, cloned into every session)
//!                      │ mpsc<HubCommand>
//!                      ▼
//!           ┌─────────────────────────┐
//!           │ HubActor                │
//!           │  clients:  id → handle  │──── presence fan-out ───► client queues
//!           │  channels: [handle]     │
//!           └───────────┬─────────────┘
//!                       │ create_channel (find-or-create)
//!         ┌─────────────┼─────────────┐
//!         ▼             ▼             ▼
//!    ChannelActor  ChannelActor  ChannelActor ──── channel fan-out ──► member queues
//! ```
//!
//! Lookups are answered over `oneshot` replies, so nothing outside the actor
//! ever touches the registries. If the actor has stopped, lookups report
//! "not found" and mutations are dropped with a warning.

pub mod config;

mod actor;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::channel::{ChannelHandle, ChannelId};
use crate::client::{ClientHandle, ClientId};
use crate::stats::HubStats;

use actor::{HubActor, HubCommand};

pub use config::HubConfig;

/// Handle to the hub actor
#[derive(Debug, Clone)]
pub struct Hub {
    commands: mpsc::Sender<HubCommand>,
}

impl Hub {
    /// Start the hub actor
    ///
    /// The actor runs until the last handle is dropped.
    pub fn spawn(config: HubConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        tokio::spawn(HubActor::new(rx, config).run());
        Self { commands: tx }
    }

    /// Register a client and exchange presence with everyone online
    pub async fn subscribe(&self, client: ClientHandle) {
        self.send(HubCommand::Subscribe(client)).await;
    }

    /// Deregister a client; no-op if it is not registered
    pub async fn unsubscribe(&self, client_id: ClientId) {
        self.send(HubCommand::Unsubscribe(client_id)).await;
    }

    /// Fan an encoded frame out to every registered client
    pub async fn broadcast(&self, frame: Bytes) {
        self.send(HubCommand::Broadcast(frame)).await;
    }

    /// Look a channel up by name alone
    ///
    /// If a public and a private channel share the name, the public one is
    /// returned. Use [`Hub::find_channel`] to pick the visibility.
    pub async fn find_channel_by_name(&self, name: &str) -> Option<ChannelHandle> {
        let name = name.to_string();
        self.request(|reply| HubCommand::FindChannelByName { name, reply })
            .await
            .flatten()
    }

    /// Look a channel up by name among channels of one visibility
    pub async fn find_channel(&self, name: &str, private: bool) -> Option<ChannelHandle> {
        let name = name.to_string();
        self.request(|reply| HubCommand::FindChannel {
            name,
            private,
            reply,
        })
        .await
        .flatten()
    }

    pub async fn find_channel_by_id(&self, id: ChannelId) -> Option<ChannelHandle> {
        self.request(|reply| HubCommand::FindChannelById { id, reply })
            .await
            .flatten()
    }

    pub async fn find_client_by_id(&self, id: ClientId) -> Option<ClientHandle> {
        self.request(|reply| HubCommand::FindClientById { id, reply })
            .await
            .flatten()
    }

    /// Return the channel of the given visibility called `name`, creating it
    /// if it does not exist yet
    ///
    /// Returns `None` only if the hub has stopped.
    pub async fn create_channel(&self, name: &str, private: bool) -> Option<ChannelHandle> {
        let name = name.to_string();
        self.request(|reply| HubCommand::CreateChannel {
            name,
            private,
            reply,
        })
        .await
    }

    /// Registry sizes
    pub async fn stats(&self) -> HubStats {
        self.request(HubCommand::Stats).await.unwrap_or_default()
    }

    async fn send(&self, command: HubCommand) {
        if self.commands.send(command).await.is_err() {
            tracing::warn!("Hub actor stopped, command dropped");
        }
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> HubCommand) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        self.send(command(tx)).await;
        rx.await.ok()
    }
}
