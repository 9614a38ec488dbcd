//! Executor that attaches through `kubectl exec`.

use std::{
    io,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use exec_bridge_core::{ExecutorError, RemoteStream, SessionExecutor, StreamOptions, Target};
use tokio::{
    io::{AsyncWriteExt, copy},
    process::Command,
    task::JoinHandle,
};

use crate::command::{CommandBuildError, CommandBuilder, CommandParts};

/// Attaches to pod processes by running `kubectl exec -i`.
///
/// Credentials come from the kubeconfig file given at construction.
#[derive(Debug, Clone)]
pub struct KubectlExecutor {
    kubectl: String,
    kubeconfig: PathBuf,
    request_timeout: Option<Duration>,
}

impl KubectlExecutor {
    /// Create an executor using the given kubectl binary and kubeconfig.
    #[must_use]
    pub fn new(kubectl: impl Into<String>, kubeconfig: impl Into<PathBuf>) -> Self {
        Self {
            kubectl: kubectl.into(),
            kubeconfig: kubeconfig.into(),
            request_timeout: None,
        }
    }

    /// Bound how long kubectl waits for the API server.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Path of the kubeconfig file.
    #[must_use]
    pub fn kubeconfig(&self) -> &Path {
        &self.kubeconfig
    }

    fn command_for(
        &self,
        target: &Target,
        command: &[String],
    ) -> Result<CommandParts, CommandBuildError> {
        CommandBuilder::new(self.kubectl.as_str())
            .params(["--kubeconfig".to_string(), self.kubeconfig.display().to_string()])
            .opt_param(
                "--request-timeout",
                self.request_timeout.map(|t| format!("{}s", t.as_secs())),
            )
            .params(["exec", "-i", "-n", target.namespace.as_str(), target.pod.as_str()])
            .opt_param("-c", target.container.as_deref())
            .params(["--"])
            .params(command.iter().cloned())
            .build()
    }
}

#[async_trait]
impl SessionExecutor for KubectlExecutor {
    async fn prepare(
        &self,
        target: &Target,
        command: &[String],
    ) -> Result<Box<dyn RemoteStream>, ExecutorError> {
        if command.is_empty() {
            return Err(ExecutorError::Attach("no command to execute".to_string()));
        }
        match tokio::fs::metadata(&self.kubeconfig).await {
            Ok(meta) if meta.is_file() => {}
            _ => {
                return Err(ExecutorError::Attach(format!(
                    "kubeconfig not found: {}",
                    self.kubeconfig.display()
                )));
            }
        }

        let (program, args) = self
            .command_for(target, command)
            .map_err(|e| ExecutorError::Attach(e.to_string()))?
            .into_resolved()
            .await
            .map_err(|e| ExecutorError::Attach(e.to_string()))?;

        tracing::debug!(program = %program.display(), ?args, %target, "Prepared exec command");
        Ok(Box::new(ProcessStream::new(program, args)))
    }
}

/// A local process whose stdio is relayed to the session streams.
#[derive(Debug, Clone)]
pub struct ProcessStream {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessStream {
    /// Create a stream that will spawn `program` with `args`.
    #[must_use]
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Kills the process group unless it was reaped, and stops the stdin pump.
struct GroupGuard {
    child: AsyncGroupChild,
    pump: Option<JoinHandle<io::Result<u64>>>,
    reaped: bool,
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if !self.reaped {
            if let Err(e) = self.child.start_kill() {
                tracing::debug!("Failed to kill process group: {e}");
            }
        }
    }
}

#[async_trait]
impl RemoteStream for ProcessStream {
    async fn stream(self: Box<Self>, options: StreamOptions) -> Result<(), ExecutorError> {
        let StreamOptions {
            mut stdin,
            mut stdout,
            mut stderr,
            terminal_size: _,
        } = options;

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .group_spawn()
            .map_err(|e| {
                ExecutorError::Attach(format!("failed to start {}: {e}", self.program.display()))
            })?;
        let mut guard = GroupGuard {
            child,
            pump: None,
            reaped: false,
        };

        let inner = guard.child.inner();
        let (Some(mut child_in), Some(mut child_out), Some(mut child_err)) =
            (inner.stdin.take(), inner.stdout.take(), inner.stderr.take())
        else {
            return Err(ExecutorError::Attach("process stdio not captured".to_string()));
        };

        guard.pump = Some(tokio::spawn(async move {
            let copied = copy(&mut stdin, &mut child_in).await;
            if let Err(e) = child_in.shutdown().await {
                tracing::debug!("Failed to close process stdin: {e}");
            }
            copied
        }));

        let relayed = tokio::try_join!(
            copy(&mut child_out, &mut stdout),
            copy(&mut child_err, &mut stderr),
        );
        if let Some(pump) = guard.pump.take() {
            pump.abort();
        }
        let (out_bytes, err_bytes) =
            relayed.map_err(|e| ExecutorError::Stream(format!("output relay failed: {e}")))?;
        stdout.flush().await?;
        stderr.flush().await?;

        let status = guard.child.wait().await?;
        guard.reaped = true;
        tracing::debug!(out_bytes, err_bytes, %status, "Process exited");

        if status.success() {
            Ok(())
        } else {
            Err(ExecutorError::Stream(status.code().map_or_else(
                || "command terminated by signal".to_string(),
                |code| format!("command terminated with exit code {code}"),
            )))
        }
    }
}
