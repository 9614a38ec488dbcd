//! Session error taxonomy.
//!
//! Every variant is terminal for its session and is reported to the
//! client as the reason of a single close frame.

use exec_bridge_core::{ExecutorError, PipeError, TargetError};
use thiserror::Error;

use crate::protocol::DecodeError;

/// Bridge error.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("{0}")]
    ChannelIo(String),
    #[error("Disconnected due to inactivity")]
    InactivityTimeout,
    #[error("write timed out")]
    WriteTimeout,
    #[error("message too large: {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Pipe(#[from] PipeError),
    #[error(transparent)]
    Target(#[from] TargetError),
    #[error("{0}")]
    ExecutorAttach(String),
    #[error("{0}")]
    ExecutorStream(String),
    #[error("channel already closed")]
    ChannelClosed,
}

impl From<ExecutorError> for BridgeError {
    fn from(err: ExecutorError) -> Self {
        if err.is_attach() {
            Self::ExecutorAttach(err.to_string())
        } else {
            Self::ExecutorStream(err.to_string())
        }
    }
}

impl BridgeError {
    /// Wrap a transport error from the underlying channel.
    pub fn channel(err: impl std::fmt::Display) -> Self {
        Self::ChannelIo(err.to_string())
    }
}
