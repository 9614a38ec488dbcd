//! Relay timing and size limits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Limits applied to every session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Time allowed to write a message to the peer.
    pub write_timeout_secs: u64,
    /// Time without an inbound message before the session is closed.
    pub read_timeout_secs: u64,
    /// Time to wait after sending a close frame before releasing the channel.
    pub close_grace_period_secs: u64,
    /// Maximum raw message size accepted from the peer, in bytes.
    pub max_message_size: usize,
    /// Bytes of process output buffered before the process is throttled.
    pub output_queue_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            write_timeout_secs: 10,
            read_timeout_secs: 5 * 60,
            close_grace_period_secs: 10,
            max_message_size: 8192,
            output_queue_capacity: exec_bridge_core::chan_writer::DEFAULT_CAPACITY,
        }
    }
}

impl RelayConfig {
    #[must_use]
    pub const fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    #[must_use]
    pub const fn close_grace_period(&self) -> Duration {
        Duration::from_secs(self.close_grace_period_secs)
    }
}
