//! Hub configuration

use std::time::Duration;

use crate::protocol::constants::{CHANNEL_COMMAND_CAPACITY, FANOUT_TIMEOUT, HUB_COMMAND_CAPACITY};

/// Configuration for the hub and the channels it creates
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the hub command queue
    pub command_capacity: usize,

    /// Capacity of each channel's command queue
    pub channel_command_capacity: usize,

    /// Bound on each per-recipient enqueue during fan-out (None = wait forever)
    pub fanout_timeout: Option<Duration>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_capacity: HUB_COMMAND_CAPACITY,
            channel_command_capacity: CHANNEL_COMMAND_CAPACITY,
            fanout_timeout: Some(FANOUT_TIMEOUT),
        }
    }
}

impl HubConfig {
    /// Set the hub command queue capacity
    pub fn command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity.max(1);
        self
    }

    /// Set the channel command queue capacity
    pub fn channel_command_capacity(mut self, capacity: usize) -> Self {
        self.channel_command_capacity = capacity.max(1);
        self
    }

    /// Set the fan-out timeout
    pub fn fanout_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fanout_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();

        assert_eq!(config.command_capacity, HUB_COMMAND_CAPACITY);
        assert_eq!(config.channel_command_capacity, CHANNEL_COMMAND_CAPACITY);
        assert_eq!(config.fanout_timeout, Some(FANOUT_TIMEOUT));
    }

    #[test]
    fn test_builder_chaining() {
        let config = HubConfig::default()
            .command_capacity(0)
            .channel_command_capacity(8)
            .fanout_timeout(None);

        assert_eq!(config.command_capacity, 1);
        assert_eq!(config.channel_command_capacity, 8);
        assert!(config.fanout_timeout.is_none());
    }
}
