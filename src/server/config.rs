//! Server configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::protocol::constants::*;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Handshake timeout (the WebSocket upgrade must complete within this time)
    pub handshake_timeout: Duration,

    /// Capacity of each client's outbound queue
    pub send_queue_capacity: usize,

    /// Capacity of each client's control queue
    pub control_queue_capacity: usize,

    /// Max time allowed for one write to the peer
    pub write_wait: Duration,

    /// Max silence from the peer before it is considered dead
    pub pong_wait: Duration,

    /// Ping interval; always shorter than `pong_wait`
    pub ping_period: Duration,

    /// Largest inbound message accepted, in bytes
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_connections: 0, // Unlimited
            tcp_nodelay: true,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            send_queue_capacity: SEND_QUEUE_CAPACITY,
            control_queue_capacity: CONTROL_QUEUE_CAPACITY,
            write_wait: WRITE_WAIT,
            pong_wait: PONG_WAIT,
            ping_period: PING_PERIOD,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the outbound queue capacity (at least 1)
    pub fn send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = capacity.max(1);
        self
    }

    /// Set the write timeout
    pub fn write_wait(mut self, timeout: Duration) -> Self {
        self.write_wait = timeout;
        self
    }

    /// Set the read deadline; the ping period follows at 9/10 of it
    pub fn pong_wait(mut self, timeout: Duration) -> Self {
        self.pong_wait = timeout;
        self.ping_period = ping_period_for(timeout);
        self
    }

    /// Set the ping period, capped below the read deadline
    pub fn ping_period(mut self, period: Duration) -> Self {
        self.ping_period = if period < self.pong_wait {
            period
        } else {
            ping_period_for(self.pong_wait)
        };
        self
    }

    /// Set the inbound message size limit
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }
}
