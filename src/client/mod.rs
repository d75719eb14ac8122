//! Client endpoints
//!
//! A client is one live WebSocket connection. It is split into:
//!
//! - [`ClientHandle`]: the cheap, cloneable address other actors use to reach
//!   the client (its outbound frame queue and its control queue)
//! - [`ClientSession`]: dispatch logic and the client's own membership set,
//!   owned by the reader task
//! - [`Connection`]: the reader and writer duties bridging the socket to the
//!   session and the outbound queue
//!
//! ```text
//!   socket ──► reader ──► ClientSession::dispatch ──► Hub / Channel queues
//!                                                          │
//!   socket ◄── writer ◄── outbound queue (bounded) ◄───────┘ fan-out
//! ```

pub mod connection;
pub mod session;

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::channel::ChannelHandle;
use crate::protocol::ClientRef;

pub use connection::Connection;
pub use session::ClientSession;

/// Process-unique client identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Generate a new random ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ClientId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Requests one client makes of another client's session
#[derive(Debug)]
pub enum ClientSignal {
    /// Join a private channel opened by `initiator`
    JoinPrivate {
        channel: ChannelHandle,
        initiator: ClientRef,
    },
}

/// Receiving ends of a client's queues, owned by its connection
#[derive(Debug)]
pub struct ClientQueues {
    /// Encoded frames waiting to be written
    pub outbound: mpsc::Receiver<Bytes>,
    /// Signals from other clients
    pub control: mpsc::Receiver<ClientSignal>,
}

/// Address of a connected client
///
/// Equality is by ID. Holding a handle never keeps the connection alive: once
/// the writer has stopped, every enqueue fails.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ClientId,
    name: Option<String>,
    outbound: mpsc::Sender<Bytes>,
    control: mpsc::Sender<ClientSignal>,
}

impl ClientHandle {
    /// Create a client with a fresh ID and its bounded queues
    pub fn new(
        name: Option<String>,
        send_capacity: usize,
        control_capacity: usize,
    ) -> (Self, ClientQueues) {
        let (outbound_tx, outbound_rx) = mpsc::channel(send_capacity.max(1));
        let (control_tx, control_rx) = mpsc::channel(control_capacity.max(1));

        let handle = Self {
            id: ClientId::new(),
            name,
            outbound: outbound_tx,
            control: control_tx,
        };
        let queues = ClientQueues {
            outbound: outbound_rx,
            control: control_rx,
        };

        (handle, queues)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Wire identity of this client
    pub fn to_ref(&self) -> ClientRef {
        ClientRef {
            id: self.id,
            name: self.name.clone(),
        }
    }

    /// Enqueue a frame, waiting for room in the queue
    ///
    /// Returns `false` if the client's writer has stopped.
    pub async fn send(&self, frame: Bytes) -> bool {
        self.outbound.send(frame).await.is_ok()
    }

    pub(crate) fn outbound(&self) -> &mpsc::Sender<Bytes> {
        &self.outbound
    }

    /// Deliver a signal without waiting
    ///
    /// Returns `false` if the control queue is full or closed.
    pub(crate) fn signal(&self, signal: ClientSignal) -> bool {
        match self.control.try_send(signal) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(client_id = %self.id, error = %e, "Dropped client signal");
                false
            }
        }
    }

    /// Whether the outbound queue is permanently closed
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

impl PartialEq for ClientHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ClientHandle {}
