//! Wire protocol
//!
//! JSON message envelope and the protocol-level constants shared by the hub,
//! channels and client connections.

pub mod constants;
pub mod message;

pub use message::{Action, ChannelRef, ClientRef, Message};
