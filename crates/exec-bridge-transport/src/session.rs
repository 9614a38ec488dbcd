//! Per-connection session orchestration.

use std::fmt::Display;

use axum::extract::ws::Message;
use exec_bridge_core::{PipeAdapter, SessionExecutor, StreamOptions, Target, byte_channel};
use futures::{Sink, Stream};
use tokio::sync::oneshot;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    channel::ChannelGuard,
    config::RelayConfig,
    error::BridgeError,
    relay::{run_inbound, run_outbound},
};

/// Session identifier.
pub type SessionId = Uuid;

/// How a session ended.
#[derive(Debug)]
pub struct SessionOutcome {
    pub id: SessionId,
    /// Failure of the executor, if any.
    pub executor_error: Option<BridgeError>,
    /// Error that stopped the inbound relay, if any.
    pub inbound_error: Option<BridgeError>,
    /// Error that stopped the outbound relay, if any.
    pub outbound_error: Option<BridgeError>,
}

impl SessionOutcome {
    /// Whether the remote process ran to completion without any error.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.executor_error.is_none() && self.inbound_error.is_none() && self.outbound_error.is_none()
    }
}

/// Bridge one duplex channel to a process running in `target`.
///
/// Returns once the process attachment has ended and both relays have
/// finished with the channel.
pub async fn run_session<Tx, Rx, E>(
    sink: Tx,
    incoming: Rx,
    target: Target,
    executor: &dyn SessionExecutor,
    command: &[String],
    config: &RelayConfig,
) -> SessionOutcome
where
    Tx: Sink<Message> + Unpin + Send + 'static,
    Tx::Error: Display,
    Rx: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    let id = Uuid::new_v4();
    let span = tracing::info_span!("session", %id, %target);
    drive(id, sink, incoming, &target, executor, command, config)
        .instrument(span)
        .await
}

async fn drive<Tx, Rx, E>(
    id: SessionId,
    sink: Tx,
    incoming: Rx,
    target: &Target,
    executor: &dyn SessionExecutor,
    command: &[String],
    config: &RelayConfig,
) -> SessionOutcome
where
    Tx: Sink<Message> + Unpin + Send + 'static,
    Tx::Error: Display,
    Rx: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    let channel = ChannelGuard::new(sink, config);
    let mut outcome = SessionOutcome {
        id,
        executor_error: None,
        inbound_error: None,
        outbound_error: None,
    };

    let remote = match executor.prepare(target, command).await {
        Ok(remote) => remote,
        Err(e) => {
            let err = BridgeError::from(e);
            tracing::warn!(%err, "Attach failed");
            channel.close_with_error(&err).await;
            outcome.executor_error = Some(err);
            return outcome;
        }
    };
    tracing::info!(?command, "Session attached");

    let (mut writer, output) = byte_channel(config.output_queue_capacity);
    let (pipe, reader) = PipeAdapter::new();

    let (finish, finished) = oneshot::channel();
    let outbound =
        tokio::spawn(run_outbound(output, channel.clone(), finished).in_current_span());
    let mut inbound = {
        let channel = channel.clone();
        let config = config.clone();
        tokio::spawn(
            async move { run_inbound(incoming, pipe, channel, &config).await }.in_current_span(),
        )
    };

    let options = StreamOptions {
        stdin: Box::new(reader),
        stdout: Box::new(writer.clone()),
        stderr: Box::new(writer.clone()),
        terminal_size: None,
    };

    // The inbound relay ending means the client is gone; the attachment
    // is dropped with it.
    let mut inbound_joined = None;
    let streamed = tokio::select! {
        result = remote.stream(options) => Some(result),
        joined = &mut inbound => {
            inbound_joined = Some(joined);
            None
        }
    };

    // The outbound relay closes only after the queued output is flushed.
    let close_reason = match streamed {
        Some(Ok(())) => {
            tracing::info!("Remote process finished");
            None
        }
        Some(Err(e)) => {
            let err = BridgeError::from(e);
            tracing::warn!(%err, "Remote stream failed");
            let reason = err.to_string();
            outcome.executor_error = Some(err);
            Some(reason)
        }
        None => {
            tracing::info!("Client disconnected, detaching");
            None
        }
    };
    if finish.send(close_reason).is_err() {
        tracing::debug!("Outbound relay already stopped");
    }

    writer.close();
    outcome.outbound_error = match outbound.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("Outbound relay task failed: {e}");
            None
        }
    };

    let joined = match inbound_joined {
        Some(joined) => joined,
        None => {
            inbound.abort();
            inbound.await
        }
    };
    outcome.inbound_error = match joined {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => None,
        Err(e) => {
            tracing::error!("Inbound relay task failed: {e}");
            None
        }
    };

    tracing::info!(clean = outcome.is_clean(), "Session ended");
    outcome
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use async_trait::async_trait;
    use axum::extract::ws::close_code;
    use exec_bridge_core::{ExecutorError, RemoteStream};
    use futures::{StreamExt, channel::mpsc};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::protocol::decode_frame;

    #[derive(Clone)]
    enum Behavior {
        AttachFails(&'static str),
        StreamFails(&'static str),
        StderrThenFail(&'static [u8], &'static str),
        Output(&'static [u8]),
        CaptureStdin(usize, Arc<Mutex<Vec<u8>>>),
        Hang,
    }

    struct FakeExecutor(Behavior);

    struct FakeStream(Behavior);

    #[async_trait]
    impl SessionExecutor for FakeExecutor {
        async fn prepare(
            &self,
            _target: &Target,
            _command: &[String],
        ) -> Result<Box<dyn RemoteStream>, ExecutorError> {
            match &self.0 {
                Behavior::AttachFails(msg) => Err(ExecutorError::Attach((*msg).to_string())),
                other => Ok(Box::new(FakeStream(other.clone()))),
            }
        }
    }

    #[async_trait]
    impl RemoteStream for FakeStream {
        async fn stream(self: Box<Self>, mut options: StreamOptions) -> Result<(), ExecutorError> {
            match self.0 {
                Behavior::StreamFails(msg) => Err(ExecutorError::Stream(msg.to_string())),
                Behavior::StderrThenFail(bytes, msg) => {
                    options.stderr.write_all(bytes).await?;
                    Err(ExecutorError::Stream(msg.to_string()))
                }
                Behavior::Output(bytes) => {
                    options.stdout.write_all(bytes).await?;
                    Ok(())
                }
                Behavior::CaptureStdin(len, sink) => {
                    let mut buf = vec![0u8; len];
                    options.stdin.read_exact(&mut buf).await?;
                    sink.lock().unwrap().extend_from_slice(&buf);
                    Ok(())
                }
                Behavior::Hang => std::future::pending().await,
                Behavior::AttachFails(_) => unreachable!(),
            }
        }
    }

    struct Client {
        tx: mpsc::UnboundedSender<Result<Message, io::Error>>,
        rx: mpsc::UnboundedReceiver<Message>,
    }

    async fn start(behavior: Behavior) -> (Client, tokio::task::JoinHandle<SessionOutcome>) {
        let (client_tx, incoming) = mpsc::unbounded();
        let (sink, client_rx) = mpsc::unbounded::<Message>();
        let target = Target::new("default", "shell-0", None).unwrap();
        let handle = tokio::spawn(async move {
            let executor = FakeExecutor(behavior);
            let command = vec!["/bin/sh".to_string(), "-i".to_string()];
            run_session(sink, incoming, target, &executor, &command, &RelayConfig::default()).await
        });
        (
            Client {
                tx: client_tx,
                rx: client_rx,
            },
            handle,
        )
    }

    fn split_frames(sent: &[Message]) -> (Vec<String>, Vec<(u16, String)>) {
        let mut data = Vec::new();
        let mut closes = Vec::new();
        for msg in sent {
            match msg {
                Message::Text(t) => data.push(t.as_str().to_owned()),
                Message::Close(Some(f)) => closes.push((f.code, f.reason.as_str().to_owned())),
                _ => {}
            }
        }
        (data, closes)
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_input_reaches_stdin() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let (client, handle) = start(Behavior::CaptureStdin(3, Arc::clone(&captured))).await;

        client
            .tx
            .unbounded_send(Ok(Message::Text("0bHMK".to_owned().into())))
            .unwrap();

        let outcome = handle.await.unwrap();
        assert!(outcome.executor_error.is_none());
        assert_eq!(*captured.lock().unwrap(), [0x6c, 0x73, 0x0a]);

        let sent: Vec<Message> = client.rx.collect().await;
        let (data, closes) = split_frames(&sent);
        assert!(data.is_empty());
        assert_eq!(closes, [(close_code::NORMAL, String::new())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_output_reaches_client() {
        let (client, handle) = start(Behavior::Output(b"hello")).await;
        let outcome = handle.await.unwrap();
        assert!(outcome.is_clean());

        let sent: Vec<Message> = client.rx.collect().await;
        let (data, closes) = split_frames(&sent);
        assert_eq!(data, ["1aA==", "1ZQ==", "1bA==", "1bA==", "1bw=="]);

        let decoded: Vec<u8> = data
            .iter()
            .flat_map(|f| decode_frame(f.as_bytes()).unwrap())
            .collect();
        assert_eq!(decoded, b"hello");
        assert_eq!(closes, [(close_code::NORMAL, String::new())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactivity_ends_session() {
        let (client, handle) = start(Behavior::Hang).await;
        let start = tokio::time::Instant::now();

        let outcome = handle.await.unwrap();
        let config = RelayConfig::default();
        assert!(start.elapsed() <= config.read_timeout() + config.close_grace_period() + Duration::from_secs(1));
        assert!(matches!(outcome.inbound_error, Some(BridgeError::InactivityTimeout)));

        let sent: Vec<Message> = client.rx.collect().await;
        let (data, closes) = split_frames(&sent);
        assert!(data.is_empty());
        assert_eq!(
            closes,
            [(close_code::UNSUPPORTED, "Disconnected due to inactivity".to_owned())]
        );
        drop(client.tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_failure_sends_single_close() {
        let (client, handle) = start(Behavior::AttachFails("pods \"ghost\" not found")).await;

        let outcome = handle.await.unwrap();
        assert!(matches!(outcome.executor_error, Some(BridgeError::ExecutorAttach(_))));

        let sent: Vec<Message> = client.rx.collect().await;
        let (data, closes) = split_frames(&sent);
        assert!(data.is_empty());
        assert_eq!(
            closes,
            [(close_code::UNSUPPORTED, "pods \"ghost\" not found".to_owned())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_failure_sends_single_close() {
        let (client, handle) = start(Behavior::StreamFails("command terminated with exit code 1")).await;

        let outcome = handle.await.unwrap();
        assert!(matches!(outcome.executor_error, Some(BridgeError::ExecutorStream(_))));
        assert!(outcome.outbound_error.is_none());

        let sent: Vec<Message> = client.rx.collect().await;
        let (data, closes) = split_frames(&sent);
        assert!(data.is_empty());
        assert_eq!(
            closes,
            [(
                close_code::UNSUPPORTED,
                "command terminated with exit code 1".to_owned()
            )]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_before_failure_is_delivered() {
        let (client, handle) = start(Behavior::StderrThenFail(
            b"sh: foo: not found\n",
            "command terminated with exit code 127",
        ))
        .await;

        let outcome = handle.await.unwrap();
        assert!(matches!(outcome.executor_error, Some(BridgeError::ExecutorStream(_))));
        assert!(outcome.outbound_error.is_none());

        let sent: Vec<Message> = client.rx.collect().await;
        let (data, closes) = split_frames(&sent);
        let decoded: Vec<u8> = data
            .iter()
            .flat_map(|f| decode_frame(f.as_bytes()).unwrap())
            .collect();
        assert_eq!(decoded, b"sh: foo: not found\n");
        assert_eq!(
            closes,
            [(
                close_code::UNSUPPORTED,
                "command terminated with exit code 127".to_owned()
            )]
        );
        assert!(matches!(sent.last(), Some(Message::Close(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_close_detaches_process() {
        let (client, handle) = start(Behavior::Hang).await;
        client.tx.unbounded_send(Ok(Message::Close(None))).unwrap();

        let outcome = handle.await.unwrap();
        assert!(outcome.inbound_error.is_none());
        assert!(outcome.executor_error.is_none());

        let sent: Vec<Message> = client.rx.collect().await;
        assert!(split_frames(&sent).1.is_empty());
    }
}
