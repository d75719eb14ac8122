//! Wire message envelope
//!
//! Every frame exchanged between a client and the hub is a JSON object with
//! the shape of [`Message`]. The same envelope is used in both directions:
//! clients send requests (`join_channel`, `send_message`, ...) and the hub
//! and channels answer with events (`member_added`, `channel_joined`, ...).

use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::channel::ChannelId;
use crate::client::ClientId;
use crate::error::{Error, Result};

/// Action carried by a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Send data to a private channel
    SendMessage,
    /// Join (or create) a public channel by name
    JoinChannel,
    /// Leave a channel by name
    LeaveChannel,
    /// Open a private channel with another client
    JoinChannelPrivate,
    /// Presence: a client arrived (hub-wide or in a channel)
    MemberAdded,
    /// Presence: a client left (hub-wide or from a channel)
    MemberRemoved,
    /// Point-to-point join acknowledgement
    ChannelJoined,
    /// A frame from the client could not be decoded
    ChannelUnexpectedError,
    /// Any action this hub does not understand
    #[serde(other)]
    Unknown,
}

impl Action {
    /// Wire name of the action
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::SendMessage => "send_message",
            Action::JoinChannel => "join_channel",
            Action::LeaveChannel => "leave_channel",
            Action::JoinChannelPrivate => "join_channel_private",
            Action::MemberAdded => "member_added",
            Action::MemberRemoved => "member_removed",
            Action::ChannelJoined => "channel_joined",
            Action::ChannelUnexpectedError => "channel_unexpected_error",
            Action::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a channel as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRef {
    pub id: ChannelId,
    pub name: String,
    pub private: bool,
}

/// Identity of a client as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRef {
    pub id: ClientId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// The message envelope
///
/// Immutable once encoded. `timestamp` is always set by the component that
/// emits the message, never trusted from the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// What the message asks for or announces
    pub action: Action,

    /// Echo of the action, or a derived sub-event such as `member_added:<id>`
    #[serde(default)]
    pub event: String,

    /// Channel name
    #[serde(default)]
    pub name: String,

    /// Opaque payload
    #[serde(default)]
    pub data: String,

    /// Channel the message concerns
    #[serde(default, deserialize_with = "lenient")]
    pub target: Option<ChannelRef>,

    /// Client the message originates from or announces
    #[serde(default, deserialize_with = "lenient")]
    pub sender: Option<ClientRef>,

    /// Unix seconds, set by the emitter
    #[serde(default, deserialize_with = "lenient")]
    pub timestamp: i64,
}

impl Message {
    /// Create a message whose event echoes the action
    pub fn new(action: Action) -> Self {
        Self {
            action,
            event: action.as_str().to_string(),
            name: String::new(),
            data: String::new(),
            target: None,
            sender: None,
            timestamp: 0,
        }
    }

    /// Hub-wide presence event announcing `client`
    pub fn presence(action: Action, client: ClientRef) -> Self {
        Self::new(action).with_sender(client).stamped()
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = event.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }

    pub fn with_target(mut self, target: ChannelRef) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_sender(mut self, sender: ClientRef) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Set the timestamp to the current time
    pub fn stamped(mut self) -> Self {
        self.timestamp = unix_timestamp();
        self
    }

    /// Encode to a JSON frame
    ///
    /// Encoding failures are logged and degrade to an empty payload.
    pub fn encode(&self) -> Bytes {
        match serde_json::to_vec(self) {
            Ok(json) => Bytes::from(json),
            Err(e) => {
                tracing::error!(action = %self.action, error = %e, "Failed to encode message");
                Bytes::new()
            }
        }
    }

    /// Decode a JSON frame
    pub fn decode(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(Error::Decode)
    }
}

/// Decode a field the hub always overwrites; a malformed value becomes the
/// default instead of failing the whole frame.
fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Current time in unix seconds
pub fn unix_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_wire_names() {
        let json = serde_json::to_string(&Action::JoinChannelPrivate).unwrap();
        assert_eq!(json, "\"join_channel_private\"");

        let action: Action = serde_json::from_str("\"channel_unexpected_error\"").unwrap();
        assert_eq!(action, Action::ChannelUnexpectedError);
        assert_eq!(action.to_string(), "channel_unexpected_error");
    }

    #[test]
    fn test_unknown_action_decodes() {
        let message = Message::decode(br#"{"action":"dance","name":"general"}"#).unwrap();
        assert_eq!(message.action, Action::Unknown);
        assert_eq!(message.name, "general");
    }

    #[test]
    fn test_decode_minimal_request() {
        let message = Message::decode(br#"{"action":"join_channel","name":"general"}"#).unwrap();

        assert_eq!(message.action, Action::JoinChannel);
        assert_eq!(message.name, "general");
        assert!(message.event.is_empty());
        assert!(message.data.is_empty());
        assert!(message.target.is_none());
        assert!(message.sender.is_none());
        assert_eq!(message.timestamp, 0);
    }

    #[test]
    fn test_decode_tolerates_bad_server_fields() {
        let frame = br#"{"action":"send_message","name":"room","data":"hi",
            "timestamp":1.5,"target":{"id":"x"},"sender":"me"}"#;
        let message = Message::decode(frame).unwrap();

        assert_eq!(message.action, Action::SendMessage);
        assert_eq!(message.name, "room");
        assert_eq!(message.data, "hi");
        assert_eq!(message.timestamp, 0);
        assert!(message.target.is_none());
        assert!(message.sender.is_none());

        let message = Message::decode(br#"{"action":"join_channel","sender":null}"#).unwrap();
        assert!(message.sender.is_none());
    }

    #[test]
    fn test_decode_rejects_malformed_frames() {
        assert!(matches!(Message::decode(b"not json"), Err(Error::Decode(_))));
        // action is mandatory
        assert!(Message::decode(br#"{"name":"general"}"#).is_err());
    }

    #[test]
    fn test_encode_carries_refs() {
        let client = ClientRef {
            id: ClientId::new(),
            name: Some("alice".into()),
        };
        let channel = ChannelRef {
            id: ChannelId::new(),
            name: "general".into(),
            private: false,
        };
        let message = Message::new(Action::ChannelJoined)
            .with_name("general")
            .with_target(channel.clone())
            .with_sender(client.clone())
            .stamped();

        let value: serde_json::Value = serde_json::from_slice(&message.encode()).unwrap();
        assert_eq!(value["action"], "channel_joined");
        assert_eq!(value["event"], "channel_joined");
        assert_eq!(value["target"]["name"], "general");
        assert_eq!(value["target"]["private"], false);
        assert_eq!(value["target"]["id"], channel.id.to_string());
        assert_eq!(value["sender"]["id"], client.id.to_string());
        assert_eq!(value["sender"]["name"], "alice");
        assert!(value["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_presence_omits_missing_name() {
        let client = ClientRef {
            id: ClientId::new(),
            name: None,
        };
        let message = Message::presence(Action::MemberAdded, client);

        let value: serde_json::Value = serde_json::from_slice(&message.encode()).unwrap();
        assert_eq!(value["event"], "member_added");
        assert!(value["sender"].get("name").is_none());
        assert!(value["target"].is_null());
    }
}
