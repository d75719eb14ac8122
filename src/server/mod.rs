//! Server
//!
//! Accepts TCP connections, upgrades them to WebSocket and hands each client
//! to its own [`Connection`](crate::client::Connection).

pub mod config;
pub mod handler;
pub mod listener;

pub use config::ServerConfig;
pub use handler::{AuthResult, ConnectRequest, DefaultHandler, HubHandler};
pub use listener::HubServer;
