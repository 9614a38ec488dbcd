//! Executors that attach byte streams to processes running in a pod.
//!
//! Provides:
//! - `KubectlExecutor` - Attach through `kubectl exec`
//! - Command building utilities
//! - Executable resolution

pub mod command;
pub mod kubectl;
pub mod resolve;

pub use command::{CommandBuildError, CommandBuilder, CommandParts};
pub use kubectl::{KubectlExecutor, ProcessStream};
pub use resolve::resolve_executable_path;
