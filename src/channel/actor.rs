//! Channel actor loop

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::client::{ClientHandle, ClientId};
use crate::fanout::fan_out;
use crate::protocol::{Action, ChannelRef, Message};

/// Inputs of a channel actor
#[derive(Debug)]
pub(crate) enum ChannelCommand {
    Subscribe(ClientHandle),
    Unsubscribe(ClientId),
    Broadcast(Bytes),
    Members(oneshot::Sender<Vec<ClientId>>),
}

/// Owns the authoritative membership set of one channel
pub(crate) struct ChannelActor {
    channel: ChannelRef,
    members: HashMap<ClientId, ClientHandle>,
    commands: mpsc::Receiver<ChannelCommand>,
    fanout_timeout: Option<Duration>,
}

impl ChannelActor {
    pub(crate) fn new(
        channel: ChannelRef,
        commands: mpsc::Receiver<ChannelCommand>,
        fanout_timeout: Option<Duration>,
    ) -> Self {
        Self {
            channel,
            members: HashMap::new(),
            commands,
            fanout_timeout,
        }
    }

    /// Process commands until every handle is gone
    pub(crate) async fn run(mut self) {
        tracing::debug!(
            channel = %self.channel.name,
            private = self.channel.private,
            "Channel actor started"
        );

        while let Some(command) = self.commands.recv().await {
            match command {
                ChannelCommand::Subscribe(client) => self.subscribe(client).await,
                ChannelCommand::Unsubscribe(client_id) => self.unsubscribe(client_id).await,
                ChannelCommand::Broadcast(frame) => self.broadcast(&frame).await,
                ChannelCommand::Members(reply) => {
                    let _ = reply.send(self.members.keys().copied().collect());
                }
            }
        }

        tracing::debug!(channel = %self.channel.name, "Channel actor stopped");
    }

    /// Announce to the existing members first, then record the newcomer.
    /// The joining client never receives its own announcement.
    async fn subscribe(&mut self, client: ClientHandle) {
        if self.members.contains_key(&client.id()) {
            tracing::debug!(
                channel = %self.channel.name,
                client_id = %client.id(),
                "Client already a member"
            );
            return;
        }

        let announcement = self.membership_event(Action::MemberAdded, &client);
        self.broadcast(&announcement.encode()).await;

        tracing::debug!(
            channel = %self.channel.name,
            client_id = %client.id(),
            members = self.members.len() + 1,
            "Member added"
        );
        self.members.insert(client.id(), client);
    }

    /// Remove first, then tell the remaining members.
    async fn unsubscribe(&mut self, client_id: ClientId) {
        let Some(client) = self.members.remove(&client_id) else {
            return;
        };

        tracing::debug!(
            channel = %self.channel.name,
            client_id = %client_id,
            members = self.members.len(),
            "Member removed"
        );

        let notice = self.membership_event(Action::MemberRemoved, &client);
        self.broadcast(&notice.encode()).await;
    }

    async fn broadcast(&self, frame: &Bytes) {
        let report = fan_out(self.members.values(), frame, self.fanout_timeout).await;

        if report.timed_out > 0 {
            tracing::warn!(
                channel = %self.channel.name,
                timed_out = report.timed_out,
                delivered = report.queued,
                "Fan-out skipped stalled members"
            );
        }
    }

    /// Presence event scoped to this channel.
    ///
    /// Private channels leave the participant out of the payload.
    fn membership_event(&self, action: Action, client: &ClientHandle) -> Message {
        let message = Message::new(action)
            .with_name(self.channel.name.clone())
            .with_target(self.channel.clone());

        let message = if self.channel.private {
            message
        } else {
            message
                .with_event(format!("{}:{}", action, client.id()))
                .with_sender(client.to_ref())
        };

        message.stamped()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::ChannelHandle;
    use super::*;
    use crate::client::ClientQueues;
    use crate::hub::HubConfig;
    use crate::testing::{assert_no_message, next_message};

    fn client(name: &str) -> (ClientHandle, ClientQueues) {
        ClientHandle::new(Some(name.to_string()), 8, 1)
    }

    #[tokio::test]
    async fn test_join_announced_to_previous_members_only() {
        let channel = ChannelHandle::spawn("general", false, &HubConfig::default());
        let (alice, mut alice_q) = client("alice");
        let (bob, mut bob_q) = client("bob");

        channel.subscribe(alice.clone()).await;
        channel.subscribe(bob.clone()).await;
        assert_eq!(channel.members().await.len(), 2);

        let joined = next_message(&mut alice_q.outbound).await;
        assert_eq!(joined.action, Action::MemberAdded);
        assert_eq!(joined.event, format!("member_added:{}", bob.id()));
        assert_eq!(joined.name, "general");
        assert_eq!(joined.sender.unwrap().id, bob.id());
        assert_eq!(joined.target.unwrap().id, channel.id());

        // Nobody hears their own join
        assert_no_message(&mut alice_q.outbound);
        assert_no_message(&mut bob_q.outbound);
    }

    #[tokio::test]
    async fn test_private_announcement_hides_participant() {
        let channel = ChannelHandle::spawn("pair", true, &HubConfig::default());
        let (alice, mut alice_q) = client("alice");
        let (bob, _bob_q) = client("bob");

        channel.subscribe(alice).await;
        channel.subscribe(bob).await;
        channel.members().await;

        let joined = next_message(&mut alice_q.outbound).await;
        assert_eq!(joined.action, Action::MemberAdded);
        assert_eq!(joined.event, "member_added");
        assert!(joined.sender.is_none());
        assert!(joined.target.unwrap().private);
    }

    #[tokio::test]
    async fn test_duplicate_subscribe_is_ignored() {
        let channel = ChannelHandle::spawn("general", false, &HubConfig::default());
        let (alice, mut alice_q) = client("alice");
        let (bob, _bob_q) = client("bob");

        channel.subscribe(alice).await;
        channel.subscribe(bob.clone()).await;
        channel.subscribe(bob).await;

        assert_eq!(channel.members().await.len(), 2);
        next_message(&mut alice_q.outbound).await;
        assert_no_message(&mut alice_q.outbound);
    }

    #[tokio::test]
    async fn test_leave_notifies_remaining_members() {
        let channel = ChannelHandle::spawn("general", false, &HubConfig::default());
        let (alice, mut alice_q) = client("alice");
        let (bob, mut bob_q) = client("bob");

        channel.subscribe(alice.clone()).await;
        channel.subscribe(bob.clone()).await;
        next_message(&mut alice_q.outbound).await; // bob's join

        channel.unsubscribe(bob.id()).await;
        assert_eq!(channel.members().await, vec![alice.id()]);

        let left = next_message(&mut alice_q.outbound).await;
        assert_eq!(left.action, Action::MemberRemoved);
        assert_eq!(left.event, format!("member_removed:{}", bob.id()));
        assert_no_message(&mut bob_q.outbound);

        // Leaving twice is a no-op
        channel.unsubscribe(bob.id()).await;
        channel.members().await;
        assert_no_message(&mut alice_q.outbound);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_member() {
        let channel = ChannelHandle::spawn("pair", true, &HubConfig::default());
        let (alice, mut alice_q) = client("alice");
        let (bob, mut bob_q) = client("bob");

        channel.subscribe(alice).await;
        channel.subscribe(bob).await;
        next_message(&mut alice_q.outbound).await;

        let frame = Message::new(Action::SendMessage).with_data("hi").encode();
        channel.broadcast(frame).await;
        channel.members().await;

        assert_eq!(next_message(&mut alice_q.outbound).await.data, "hi");
        assert_eq!(next_message(&mut bob_q.outbound).await.data, "hi");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_member_does_not_starve_channel() {
        let config = HubConfig::default().fanout_timeout(Some(Duration::from_millis(100)));
        let channel = ChannelHandle::spawn("pair", true, &config);
        let (stalled, _stalled_q) = ClientHandle::new(None, 1, 1);
        let (bob, mut bob_q) = client("bob");

        channel.subscribe(stalled.clone()).await;
        channel.subscribe(bob).await; // fills the stalled queue with the join notice
        channel.members().await;

        for i in 0..3 {
            let frame = Message::new(Action::SendMessage).with_data(i.to_string()).encode();
            channel.broadcast(frame).await;
        }
        channel.members().await;

        for i in 0..3 {
            assert_eq!(next_message(&mut bob_q.outbound).await.data, i.to_string());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_fanout_blocks_channel() {
        let config = HubConfig::default().fanout_timeout(None);
        let channel = ChannelHandle::spawn("pair", true, &config);
        let (stalled, _stalled_q) = ClientHandle::new(None, 1, 1);
        let (bob, _bob_q) = client("bob");

        channel.subscribe(stalled).await;
        channel.subscribe(bob).await;
        channel
            .broadcast(Message::new(Action::SendMessage).encode())
            .await;

        // The actor is stuck delivering to the stalled member
        let members = tokio::time::timeout(Duration::from_secs(60), channel.members()).await;
        tokio_test::assert_err!(members);
    }
}
