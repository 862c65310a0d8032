use std::time::Duration;

use crate::utils::error::{HubError, Result};

/// Runtime tuning shared by the hub and every client it creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Time allowed to write one batch of frames to the peer.
    pub write_wait: Duration,
    /// Time allowed between two pongs before the peer is considered gone.
    pub pong_wait: Duration,
    /// Idle interval after which a ping is sent. Must be less than `pong_wait`.
    pub ping_period: Duration,
    /// Largest inbound message accepted at the transport boundary.
    pub max_message_size: usize,
    /// Outbound queue capacity per client.
    pub send_buffer_size: usize,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            write_wait: Duration::from_secs(10),
            pong_wait: Duration::from_secs(60),
            ping_period: Duration::from_secs(54),
            max_message_size: 512 * 1024,
            send_buffer_size: 256,
            read_buffer_size: 1024,
            write_buffer_size: 1024,
        }
    }
}

impl HubConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ping_period >= self.pong_wait {
            return Err(HubError::InvalidConfig(format!(
                "ping_period ({:?}) must be less than pong_wait ({:?})",
                self.ping_period, self.pong_wait
            )));
        }
        if self.ping_period.is_zero() {
            return Err(HubError::InvalidConfig(
                "ping_period must be greater than zero".to_string(),
            ));
        }
        if self.write_wait.is_zero() {
            return Err(HubError::InvalidConfig(
                "write_wait must be greater than zero".to_string(),
            ));
        }
        if self.send_buffer_size == 0 {
            return Err(HubError::InvalidConfig(
                "send_buffer_size must be at least 1".to_string(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(HubError::InvalidConfig(
                "max_message_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
