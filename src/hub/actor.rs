//! Hub actor loop
//!
//! The hub actor is the only code that reads or writes the client and channel
//! registries. Every operation arrives as a [`HubCommand`] and is applied in
//! arrival order.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::channel::{ChannelHandle, ChannelId};
use crate::client::{ClientHandle, ClientId};
use crate::fanout::{deliver, fan_out, Delivery};
use crate::protocol::{Action, Message};
use crate::stats::HubStats;

use super::config::HubConfig;

/// Inputs of the hub actor
#[derive(Debug)]
pub(crate) enum HubCommand {
    Subscribe(ClientHandle),
    Unsubscribe(ClientId),
    Broadcast(Bytes),
    FindChannelByName {
        name: String,
        reply: oneshot::Sender<Option<ChannelHandle>>,
    },
    FindChannel {
        name: String,
        private: bool,
        reply: oneshot::Sender<Option<ChannelHandle>>,
    },
    FindChannelById {
        id: ChannelId,
        reply: oneshot::Sender<Option<ChannelHandle>>,
    },
    FindClientById {
        id: ClientId,
        reply: oneshot::Sender<Option<ClientHandle>>,
    },
    CreateChannel {
        name: String,
        private: bool,
        reply: oneshot::Sender<ChannelHandle>,
    },
    Stats(oneshot::Sender<HubStats>),
}

/// Owns the global registries
pub(crate) struct HubActor {
    clients: HashMap<ClientId, ClientHandle>,
    channels: Vec<ChannelHandle>,
    commands: mpsc::Receiver<HubCommand>,
    config: HubConfig,
}

impl HubActor {
    pub(crate) fn new(commands: mpsc::Receiver<HubCommand>, config: HubConfig) -> Self {
        Self {
            clients: HashMap::new(),
            channels: Vec::new(),
            commands,
            config,
        }
    }

    /// Process commands until every hub handle is gone
    pub(crate) async fn run(mut self) {
        tracing::debug!("Hub actor started");

        while let Some(command) = self.commands.recv().await {
            self.handle(command).await;
        }

        tracing::debug!(
            clients = self.clients.len(),
            channels = self.channels.len(),
            "Hub actor stopped"
        );
    }

    async fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Subscribe(client) => self.subscribe(client).await,
            HubCommand::Unsubscribe(client_id) => self.unsubscribe(client_id).await,
            HubCommand::Broadcast(frame) => self.broadcast(&frame).await,
            HubCommand::FindChannelByName { name, reply } => {
                let _ = reply.send(self.find_channel_by_name(&name).cloned());
            }
            HubCommand::FindChannel {
                name,
                private,
                reply,
            } => {
                let _ = reply.send(self.find_channel(&name, private).cloned());
            }
            HubCommand::FindChannelById { id, reply } => {
                let found = self.channels.iter().find(|c| c.id() == id).cloned();
                let _ = reply.send(found);
            }
            HubCommand::FindClientById { id, reply } => {
                let _ = reply.send(self.clients.get(&id).cloned());
            }
            HubCommand::CreateChannel {
                name,
                private,
                reply,
            } => {
                let _ = reply.send(self.create_channel(name, private));
            }
            HubCommand::Stats(reply) => {
                let _ = reply.send(HubStats {
                    clients: self.clients.len(),
                    channels: self.channels.len(),
                    private_channels: self.channels.iter().filter(|c| c.is_private()).count(),
                });
            }
        }
    }

    /// Announce the newcomer to everyone online, replay everyone online to
    /// the newcomer, then register it.
    async fn subscribe(&mut self, client: ClientHandle) {
        if self.clients.contains_key(&client.id()) {
            tracing::debug!(client_id = %client.id(), "Client already subscribed");
            return;
        }

        let arrival = Message::presence(Action::MemberAdded, client.to_ref());
        self.broadcast(&arrival.encode()).await;

        for existing in self.clients.values() {
            let presence = Message::presence(Action::MemberAdded, existing.to_ref());
            if deliver(&client, presence.encode(), self.config.fanout_timeout).await
                == Delivery::Closed
            {
                break;
            }
        }

        self.clients.insert(client.id(), client.clone());

        tracing::info!(
            client_id = %client.id(),
            name = client.name().unwrap_or_default(),
            clients = self.clients.len(),
            "Client subscribed"
        );
    }

    /// Idempotent: an unknown client produces no presence event.
    async fn unsubscribe(&mut self, client_id: ClientId) {
        let Some(client) = self.clients.remove(&client_id) else {
            return;
        };

        tracing::info!(
            client_id = %client_id,
            clients = self.clients.len(),
            "Client unsubscribed"
        );

        let departure = Message::presence(Action::MemberRemoved, client.to_ref());
        self.broadcast(&departure.encode()).await;
    }

    async fn broadcast(&self, frame: &Bytes) {
        let report = fan_out(self.clients.values(), frame, self.config.fanout_timeout).await;

        if report.timed_out > 0 {
            tracing::warn!(
                timed_out = report.timed_out,
                delivered = report.queued,
                "Hub fan-out skipped stalled clients"
            );
        }
    }

    /// A public channel wins when both visibilities use the name.
    fn find_channel_by_name(&self, name: &str) -> Option<&ChannelHandle> {
        self.find_channel(name, false)
            .or_else(|| self.find_channel(name, true))
    }

    fn find_channel(&self, name: &str, private: bool) -> Option<&ChannelHandle> {
        self.channels
            .iter()
            .find(|c| c.is_private() == private && c.name() == name)
    }

    /// Find-or-create in one step, so concurrent joiners always share a
    /// single channel. Names are unique per visibility: a public channel
    /// never shadows a private one of the same name, or the reverse.
    fn create_channel(&mut self, name: String, private: bool) -> ChannelHandle {
        if let Some(existing) = self.find_channel(&name, private) {
            return existing.clone();
        }

        let channel = ChannelHandle::spawn(name, private, &self.config);
        self.channels.push(channel.clone());

        tracing::info!(
            channel = %channel.name(),
            channel_id = %channel.id(),
            private = private,
            channels = self.channels.len(),
            "Channel created"
        );

        channel
    }
}
