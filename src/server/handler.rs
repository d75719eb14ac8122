//! Extension points
//!
//! [`HubHandler`] is how the surrounding application plugs into the hub:
//! access control during the handshake, notification after each dispatched
//! action, and persistence of channel messages. Every method has a default,
//! so a handler only implements what it needs.
//!
//! Notification and persistence calls are spawned on their own task. They
//! never delay delivery and their failures stay inside the handler.

use std::future::Future;
use std::net::SocketAddr;

use tokio_tungstenite::tungstenite::handshake::server::Request;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;

use crate::protocol::{Action, ClientRef, Message};

/// Verdict on an incoming connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    /// Let the connection in
    Accept,
    /// Refuse the upgrade with the given reason
    Reject(String),
}

/// What is known about a connection before it is accepted
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Request path
    pub path: String,

    /// Display name from the `name` query parameter
    pub name: Option<String>,

    /// Token from the `bearer` query parameter or the `Authorization` header
    pub bearer_token: Option<String>,
}

impl ConnectRequest {
    /// Create an empty request for a peer
    pub fn new(peer_addr: SocketAddr) -> Self {
        Self {
            peer_addr,
            path: "/".to_string(),
            name: None,
            bearer_token: None,
        }
    }

    /// Extract the request details from the HTTP upgrade request
    pub fn from_http(peer_addr: SocketAddr, request: &Request) -> Self {
        let mut connect = Self::new(peer_addr);
        connect.path = request.uri().path().to_string();

        if let Some(query) = request.uri().query() {
            for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
                if value.is_empty() {
                    continue;
                }
                match key.as_ref() {
                    "name" => connect.name = Some(value.into_owned()),
                    "bearer" => connect.bearer_token = Some(value.into_owned()),
                    _ => {}
                }
            }
        }

        if connect.bearer_token.is_none() {
            connect.bearer_token = request
                .headers()
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty());
        }

        connect
    }
}

/// Hooks the hub calls on the surrounding application
pub trait HubHandler: Send + Sync + 'static {
    /// Decide whether to accept a connection
    ///
    /// Runs inside the WebSocket handshake; on reject no hub state is touched.
    fn authenticate(&self, _request: &ConnectRequest) -> AuthResult {
        AuthResult::Accept
    }

    /// A client completed its handshake and joined the hub
    fn on_connect(&self, _client: &ClientRef) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// A client's request was dispatched (or could not be decoded)
    fn on_action(&self, _client: &ClientRef, _action: Action) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// A message was broadcast to a channel
    fn persist(&self, _message: &Message) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// A client disconnected and was removed from the hub and its channels
    fn on_disconnect(&self, _client: &ClientRef) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Handler that accepts everyone and ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHandler;

impl HubHandler for DefaultHandler {}
