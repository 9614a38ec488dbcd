//! Serialized write access to the outbound half of the duplex channel.
//!
//! Both relays write through one `ChannelGuard`. Writes carry a deadline,
//! and only the first close request is honored: it sends one close frame,
//! waits out the grace period, then releases the sink.

use std::{fmt::Display, sync::Arc, time::Duration};

use axum::extract::ws::{CloseFrame, Message, close_code};
use futures::{Sink, SinkExt};
use tokio::{sync::Mutex, time::timeout};

use crate::{config::RelayConfig, error::BridgeError};

/// Close reasons must fit a control frame (125 bytes minus the code).
pub const MAX_CLOSE_REASON: usize = 123;

struct State<S> {
    sink: S,
    closed: bool,
}

/// Shared handle to the channel's outbound half.
pub struct ChannelGuard<S> {
    state: Arc<Mutex<State<S>>>,
    write_timeout: Duration,
    grace_period: Duration,
}

impl<S> Clone for ChannelGuard<S> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            write_timeout: self.write_timeout,
            grace_period: self.grace_period,
        }
    }
}

impl<S> ChannelGuard<S>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display,
{
    /// Wrap a sink using the deadlines from `config`.
    #[must_use]
    pub fn new(sink: S, config: &RelayConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                sink,
                closed: false,
            })),
            write_timeout: config.write_timeout(),
            grace_period: config.close_grace_period(),
        }
    }

    /// Send a text message under the write deadline.
    ///
    /// # Errors
    /// Returns error if the channel was closed, the write failed or the
    /// deadline passed.
    pub async fn send_text(&self, text: String) -> Result<(), BridgeError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(BridgeError::ChannelClosed);
        }
        match timeout(self.write_timeout, state.sink.send(Message::Text(text.into()))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(BridgeError::channel(e)),
            Err(_) => Err(BridgeError::WriteTimeout),
        }
    }

    /// Close the channel with `code` and `reason`.
    ///
    /// Returns `false` without doing anything if the channel was already
    /// closed.
    pub async fn close(&self, code: u16, reason: &str) -> bool {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return false;
            }
            state.closed = true;

            let frame = CloseFrame {
                code,
                reason: truncate_reason(reason).to_owned().into(),
            };
            match timeout(self.write_timeout, state.sink.send(Message::Close(Some(frame)))).await {
                Ok(Ok(())) => tracing::debug!(code, reason, "Sent close frame"),
                Ok(Err(e)) => tracing::debug!("Failed to send close frame: {e}"),
                Err(_) => tracing::debug!("Timed out sending close frame"),
            }
        }

        tokio::time::sleep(self.grace_period).await;

        let mut state = self.state.lock().await;
        match timeout(self.write_timeout, state.sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("Failed to release channel: {e}"),
            Err(_) => tracing::debug!("Timed out releasing channel"),
        }
        true
    }

    /// Close with "unsupported data" and the error description.
    pub async fn close_with_error(&self, err: &BridgeError) -> bool {
        self.close(close_code::UNSUPPORTED, &err.to_string()).await
    }

    /// Close with "normal closure" and an empty reason.
    pub async fn close_normal(&self) -> bool {
        self.close(close_code::NORMAL, "").await
    }

    /// Record that the peer closed the channel, so no close frame is sent.
    pub async fn mark_closed(&self) {
        self.state.lock().await.closed = true;
    }

    /// Whether a close was sent or the peer closed first.
    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}

fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}
