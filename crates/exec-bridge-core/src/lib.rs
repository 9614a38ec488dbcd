//! Core abstractions for bridging a message channel to a remote process.
//!
//! This crate provides the fundamental building blocks:
//! - `ByteChannelWriter` - Process output sink republished as a byte sequence
//! - `PipeAdapter` - Push-to-pull adapter feeding process stdin
//! - `Target` - Which remote process a session attaches to
//! - Executor traits

pub mod chan_writer;
pub mod pipe;
pub mod target;
pub mod traits;

pub use chan_writer::{ByteChannelWriter, ByteStream, ClosedSinkError, byte_channel};
pub use pipe::{PipeAdapter, PipeError, PipeReader};
pub use target::{Target, TargetError};
pub use traits::{
    DEFAULT_SHELL_COMMAND, ExecutorError, RemoteStream, SessionExecutor, StreamOptions,
    TerminalSize,
};
