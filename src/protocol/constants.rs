//! Protocol constants
//!
//! Default capacities and timings for the hub. All of them can be overridden
//! through [`ServerConfig`](crate::server::ServerConfig) and
//! [`HubConfig`](crate::hub::HubConfig).

use std::time::Duration;

/// Capacity of each client's outbound frame queue
pub const SEND_QUEUE_CAPACITY: usize = 256;

/// Capacity of each client's control queue (cross-client requests)
pub const CONTROL_QUEUE_CAPACITY: usize = 16;

/// Capacity of the hub actor's command queue
pub const HUB_COMMAND_CAPACITY: usize = 64;

/// Capacity of each channel actor's command queue
pub const CHANNEL_COMMAND_CAPACITY: usize = 64;

/// Handler callbacks one client may have in flight before its reader waits
pub const CALLBACK_LIMIT: usize = 32;

/// Max time allowed for a single write to the peer
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Max time between two inbound frames before the peer is considered dead
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Ping interval, 9/10 of the pong wait
pub const PING_PERIOD: Duration = Duration::from_secs(54);

/// Max time to complete the WebSocket handshake
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on a single per-recipient enqueue during fan-out
pub const FANOUT_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum inbound message size in bytes
pub const MAX_MESSAGE_SIZE: usize = 10_000;

/// Separator between messages coalesced into one outbound frame
pub const FRAME_SEPARATOR: u8 = b'\n';

/// Default listen port
pub const DEFAULT_PORT: u16 = 8080;

/// Derive a ping period that is strictly shorter than `pong_wait`
pub fn ping_period_for(pong_wait: Duration) -> Duration {
    pong_wait * 9 / 10
}
