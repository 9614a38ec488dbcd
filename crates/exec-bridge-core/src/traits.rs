//! Core traits for remote execution.

use async_trait::async_trait;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};

use crate::Target;

/// Command launched in the target when none is configured.
pub const DEFAULT_SHELL_COMMAND: &[&str] = &["/bin/sh", "-i"];

/// Terminal dimensions.
///
/// Part of the executor contract; sessions never send resizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

/// Streams bound to a remote process for the lifetime of one attachment.
pub struct StreamOptions {
    /// Source of the remote process stdin.
    pub stdin: Box<dyn AsyncRead + Send + Unpin>,
    /// Sink for the remote process stdout.
    pub stdout: Box<dyn AsyncWrite + Send + Unpin>,
    /// Sink for the remote process stderr.
    pub stderr: Box<dyn AsyncWrite + Send + Unpin>,
    /// Resize events, if the executor should drive a terminal.
    pub terminal_size: Option<mpsc::Receiver<TerminalSize>>,
}

/// Executor error.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Target not found, permission denied or transport setup failure.
    #[error("{0}")]
    Attach(String),
    /// Remote process exited abnormally or the transport failed mid-session.
    #[error("{0}")]
    Stream(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecutorError {
    /// Whether the failure happened before the remote process was attached.
    #[must_use]
    pub const fn is_attach(&self) -> bool {
        matches!(self, Self::Attach(_))
    }
}

/// A prepared attachment to a remote process.
#[async_trait]
pub trait RemoteStream: Send {
    /// Attach the given streams and relay until the remote process ends.
    async fn stream(self: Box<Self>, options: StreamOptions) -> Result<(), ExecutorError>;
}

/// Trait for executors that can attach to a remote process.
///
/// Constructed once at startup and shared by every session.
#[async_trait]
pub trait SessionExecutor: Send + Sync {
    /// Prepare an attachment running `command` inside `target`.
    async fn prepare(
        &self,
        target: &Target,
        command: &[String],
    ) -> Result<Box<dyn RemoteStream>, ExecutorError>;
}
