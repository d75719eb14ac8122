//! Actor-based WebSocket message hub
//!
//! Clients connect over WebSocket, appear in a global presence registry and
//! meet in named channels. Public channels carry membership events; private
//! channels pair two clients and carry their messages.
//!
//! Every piece of shared state has exactly one owner task:
//!
//! - the [`Hub`] actor owns the client and channel registries
//! - each channel actor owns its membership set
//! - each client's reader owns its [`ClientSession`] (membership set and dispatch)
//! - each client's writer drains its bounded outbound queue
//!
//! Nothing is locked; actors only talk through bounded queues.
//!
//! # Example
//!
//! ```no_run
//! use ws_hub::{HubServer, ServerConfig, StandardHandler};
//!
//! #[tokio::main]
//! async fn main() -> ws_hub::Result<()> {
//!     let config = ServerConfig::with_addr("127.0.0.1:8080".parse().unwrap());
//!     let handler = StandardHandler::new().with_auth_token("s3cret");
//!
//!     HubServer::new(config, handler).run().await
//! }
//! ```

pub mod channel;
pub mod client;
pub mod error;
pub mod fanout;
pub mod hub;
pub mod protocol;
pub mod server;
pub mod stats;
pub mod webhook;

#[cfg(test)]
mod testing;

pub use channel::{ChannelHandle, ChannelId};
pub use client::{ClientHandle, ClientId, ClientSession, Connection};
pub use error::{Error, Result};
pub use hub::{Hub, HubConfig};
pub use protocol::{Action, ChannelRef, ClientRef, Message};
pub use server::{AuthResult, ConnectRequest, DefaultHandler, HubHandler, HubServer, ServerConfig};
pub use webhook::{StandardHandler, WebhookNotifier};
