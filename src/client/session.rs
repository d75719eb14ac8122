//! Per-client dispatch
//!
//! A [`ClientSession`] is owned by the connection's reader task. It holds the
//! client's own membership set and turns each decoded request into commands
//! on the hub and channel actors. Only this task ever mutates the membership
//! set; requests from other clients arrive as [`ClientSignal`]s.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::channel::{private_channel_name, ChannelHandle, ChannelId};
use crate::hub::Hub;
use crate::protocol::constants::CALLBACK_LIMIT;
use crate::protocol::{Action, ClientRef, Message};
use crate::server::HubHandler;
use crate::stats::SessionStats;

use super::{ClientHandle, ClientId, ClientSignal};

/// Dispatch state of one connected client
pub struct ClientSession<H: HubHandler> {
    client: ClientHandle,
    hub: Hub,
    handler: Arc<H>,
    channels: HashMap<ChannelId, ChannelHandle>,
    callbacks: Arc<Semaphore>,
    shutdown: CancellationToken,
    stats: SessionStats,
    connected_at: Instant,
    disconnected: bool,
}

impl<H: HubHandler> ClientSession<H> {
    pub fn new(client: ClientHandle, hub: Hub, handler: Arc<H>) -> Self {
        Self {
            client,
            hub,
            handler,
            channels: HashMap::new(),
            callbacks: Arc::new(Semaphore::new(CALLBACK_LIMIT)),
            shutdown: CancellationToken::new(),
            stats: SessionStats::new(),
            connected_at: Instant::now(),
            disconnected: false,
        }
    }

    pub fn client(&self) -> &ClientHandle {
        &self.client
    }

    pub fn id(&self) -> ClientId {
        self.client.id()
    }

    /// Token cancelled when the session disconnects
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Whether the client is in the given channel
    pub fn is_member(&self, channel_id: ChannelId) -> bool {
        self.channels.contains_key(&channel_id)
    }

    /// Channels the client is currently in
    pub fn channels(&self) -> impl Iterator<Item = &ChannelHandle> {
        self.channels.values()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    pub fn stats(&self) -> SessionStats {
        let mut stats = self.stats.clone();
        stats.duration = self.connected_at.elapsed();
        stats
    }

    /// Count an inbound frame of any type
    pub(crate) fn record_frame(&mut self) {
        self.stats.frames_received += 1;
    }

    /// Register the client with the hub
    pub async fn connect(&mut self) {
        self.hub.subscribe(self.client.clone()).await;

        let handler = Arc::clone(&self.handler);
        let client = self.client.to_ref();
        tokio::spawn(async move {
            handler.on_connect(&client).await;
        });
    }

    /// Decode and dispatch one inbound frame
    ///
    /// A frame that does not decode is dropped; the connection stays open.
    pub async fn handle_frame(&mut self, frame: &[u8]) {
        match Message::decode(frame) {
            Ok(message) => self.dispatch(message).await,
            Err(e) => {
                self.stats.decode_errors += 1;
                tracing::warn!(
                    client_id = %self.client.id(),
                    error = %e,
                    len = frame.len(),
                    "Dropping undecodable frame"
                );
                self.notify(Action::ChannelUnexpectedError).await;
            }
        }
    }

    /// Act on one decoded request
    pub async fn dispatch(&mut self, message: Message) {
        let action = message.action;
        self.stats.actions_dispatched += 1;

        let accepted = match action {
            Action::SendMessage => self.send_message(message).await,
            Action::JoinChannel => self.join_channel(&message.name).await,
            Action::LeaveChannel => self.leave_channel(&message.name).await,
            Action::JoinChannelPrivate => self.join_channel_private(&message.data).await,
            other => {
                tracing::debug!(
                    client_id = %self.client.id(),
                    action = %other,
                    "Ignoring unsupported action"
                );
                self.stats.rejected_requests += 1;
                return;
            }
        };

        if !accepted {
            self.stats.rejected_requests += 1;
        }
        self.notify(action).await;
    }

    /// Apply a request made by another client
    pub async fn handle_signal(&mut self, signal: ClientSignal) {
        match signal {
            ClientSignal::JoinPrivate { channel, initiator } => {
                if !channel.is_private() {
                    return;
                }
                tracing::debug!(
                    client_id = %self.client.id(),
                    initiator = %initiator.id,
                    channel = %channel.name(),
                    "Accepting private channel"
                );
                self.join(channel, Some(initiator)).await;
            }
        }
    }

    /// Leave the hub and every channel, then stop both connection duties
    ///
    /// Safe to call more than once.
    pub async fn disconnect(&mut self) {
        if self.disconnected {
            return;
        }
        self.disconnected = true;

        self.hub.unsubscribe(self.client.id()).await;
        for (_, channel) in self.channels.drain() {
            channel.unsubscribe(self.client.id()).await;
        }
        self.shutdown.cancel();

        let handler = Arc::clone(&self.handler);
        let client = self.client.to_ref();
        tokio::spawn(async move {
            handler.on_disconnect(&client).await;
        });

        let stats = self.stats();
        tracing::debug!(
            client_id = %self.client.id(),
            frames = stats.frames_received,
            dispatched = stats.actions_dispatched,
            rejected = stats.rejected_requests,
            decode_errors = stats.decode_errors,
            duration_secs = stats.duration.as_secs(),
            "Client disconnected"
        );
    }

    /// Broadcast to a private channel the client belongs to.
    async fn send_message(&mut self, message: Message) -> bool {
        let Some(channel) = self.hub.find_channel(&message.name, true).await else {
            self.rejected("send to unknown private channel", &message.name);
            return false;
        };
        if !self.is_member(channel.id()) {
            self.rejected("send to channel without membership", &message.name);
            return false;
        }

        let outgoing = Message::new(Action::SendMessage)
            .with_name(channel.name())
            .with_data(message.data)
            .with_target(channel.to_ref())
            .with_sender(self.client.to_ref())
            .stamped();

        channel.broadcast(outgoing.encode()).await;

        let handler = Arc::clone(&self.handler);
        self.spawn_callback(async move {
            handler.persist(&outgoing).await;
        })
        .await;

        true
    }

    async fn join_channel(&mut self, name: &str) -> bool {
        if name.is_empty() {
            self.rejected("join without a channel name", name);
            return false;
        }

        let Some(channel) = self.hub.create_channel(name, false).await else {
            return false;
        };

        self.join(channel, None).await
    }

    /// Leave a channel the client is in, or else the public channel of
    /// that name.
    async fn leave_channel(&mut self, name: &str) -> bool {
        let own = self
            .channels
            .values()
            .filter(|c| c.name() == name)
            .min_by_key(|c| c.is_private())
            .cloned();
        let channel = match own {
            Some(channel) => channel,
            None => match self.hub.find_channel(name, false).await {
                Some(channel) => channel,
                None => {
                    self.rejected("leave of unknown channel", name);
                    return false;
                }
            },
        };

        self.channels.remove(&channel.id());
        channel.unsubscribe(self.client.id()).await;

        let confirmation = Message::new(Action::LeaveChannel)
            .with_name(channel.name())
            .with_target(channel.to_ref())
            .stamped();
        self.client.send(confirmation.encode()).await;

        tracing::debug!(
            client_id = %self.client.id(),
            channel = %channel.name(),
            "Left channel"
        );
        true
    }

    /// Open (or reopen) the private channel shared with the client named in
    /// `data`. The counterpart is asked to join through its control queue
    /// first; the requester only joins once that request is queued, so
    /// either both end up in the channel or neither does.
    async fn join_channel_private(&mut self, data: &str) -> bool {
        let Ok(counterpart_id) = data.parse::<ClientId>() else {
            self.rejected("private join with malformed client id", data);
            return false;
        };
        if counterpart_id == self.client.id() {
            self.rejected("private join with oneself", data);
            return false;
        }
        let Some(counterpart) = self.hub.find_client_by_id(counterpart_id).await else {
            self.rejected("private join with unknown client", data);
            return false;
        };

        let name = private_channel_name(self.client.id(), counterpart_id);
        let Some(channel) = self.hub.create_channel(&name, true).await else {
            return false;
        };

        let signalled = counterpart.signal(ClientSignal::JoinPrivate {
            channel: channel.clone(),
            initiator: self.client.to_ref(),
        });
        if !signalled {
            self.rejected("private join with unreachable client", data);
            return false;
        }

        self.join(channel, Some(counterpart.to_ref())).await;
        true
    }

    /// Shared join path: record the channel, subscribe, acknowledge.
    ///
    /// `peer` is the other participant of a private channel and becomes the
    /// sender of the acknowledgement.
    async fn join(&mut self, channel: ChannelHandle, peer: Option<ClientRef>) -> bool {
        if self.is_member(channel.id()) {
            tracing::debug!(
                client_id = %self.client.id(),
                channel = %channel.name(),
                "Already a member"
            );
            return false;
        }

        self.channels.insert(channel.id(), channel.clone());
        channel.subscribe(self.client.clone()).await;

        let mut confirmation = Message::new(Action::ChannelJoined)
            .with_name(channel.name())
            .with_target(channel.to_ref());
        if let Some(peer) = peer {
            confirmation = confirmation.with_sender(peer);
        }
        self.client.send(confirmation.stamped().encode()).await;

        tracing::debug!(
            client_id = %self.client.id(),
            channel = %channel.name(),
            private = channel.is_private(),
            "Joined channel"
        );
        true
    }

    async fn notify(&self, action: Action) {
        let handler = Arc::clone(&self.handler);
        let client = self.client.to_ref();
        self.spawn_callback(async move {
            handler.on_action(&client, action).await;
        })
        .await;
    }

    /// Run a handler callback off the reader task
    ///
    /// At most `CALLBACK_LIMIT` run at once per client; past that the reader
    /// waits for one to finish, which slows only this client's requests.
    async fn spawn_callback<F>(&self, callback: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(permit) = Arc::clone(&self.callbacks).acquire_owned().await else {
            return;
        };
        tokio::spawn(async move {
            callback.await;
            drop(permit);
        });
    }

    fn rejected(&self, reason: &'static str, subject: &str) {
        tracing::debug!(
            client_id = %self.client.id(),
            reason = reason,
            subject = subject,
            "Rejected request"
        );
    }
}
