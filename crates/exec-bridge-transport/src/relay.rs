//! Relays between the duplex channel and the session's byte adapters.

use std::fmt::Display;

use axum::extract::ws::{Message, close_code};
use exec_bridge_core::{ByteStream, PipeAdapter};
use futures::{Sink, Stream, StreamExt};
use tokio::{
    sync::oneshot,
    time::{Instant, timeout_at},
};

use crate::{
    channel::ChannelGuard,
    config::RelayConfig,
    error::BridgeError,
    protocol::{decode_frame, encode_data},
};

/// Forward client frames into the pipe until the channel ends or fails.
///
/// The pipe is closed on exit so the process stdin sees EOF. On error the
/// channel is closed with the error description. Returns the error that
/// ended the relay, or `None` if the client went away on its own.
pub async fn run_inbound<R, E, S>(
    mut incoming: R,
    mut pipe: PipeAdapter,
    channel: ChannelGuard<S>,
    config: &RelayConfig,
) -> Option<BridgeError>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
    S: Sink<Message> + Unpin + Send,
    S::Error: Display,
{
    let reason = forward_frames(&mut incoming, &pipe, config).await;
    pipe.close();

    match &reason {
        Some(err) => {
            tracing::info!(%err, "Inbound relay stopped");
            channel.close_with_error(err).await;
        }
        None => {
            tracing::debug!("Client closed the channel");
            channel.mark_closed().await;
        }
    }
    reason
}

async fn forward_frames<R, E>(
    incoming: &mut R,
    pipe: &PipeAdapter,
    config: &RelayConfig,
) -> Option<BridgeError>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let deadline = Instant::now() + config.read_timeout();

        // Control frames do not count as activity.
        let data = loop {
            let msg = match timeout_at(deadline, incoming.next()).await {
                Err(_) => return Some(BridgeError::InactivityTimeout),
                Ok(None) => return None,
                Ok(Some(Err(e))) => return Some(BridgeError::channel(e)),
                Ok(Some(Ok(msg))) => msg,
            };
            match msg {
                Message::Text(_) | Message::Binary(_) => break msg.into_data(),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "Received close frame");
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        };

        if data.len() > config.max_message_size {
            return Some(BridgeError::FrameTooLarge {
                size: data.len(),
                limit: config.max_message_size,
            });
        }

        let decoded = match decode_frame(&data) {
            Ok(decoded) => decoded,
            Err(e) => return Some(e.into()),
        };
        if let Err(e) = pipe.receive(&decoded).await {
            return Some(e.into());
        }
    }
}

/// Send process output to the client, one byte per frame.
///
/// Every queued byte is sent before the channel is closed. Once the output
/// ends, `finish` decides the close: `Some(reason)` closes with "unsupported
/// data" and that reason, `None` (or a dropped sender) with a normal
/// closure. On a write failure the channel is closed with the error and the
/// output stream is dropped, which fails any further process writes.
pub async fn run_outbound<S>(
    mut output: ByteStream,
    channel: ChannelGuard<S>,
    finish: oneshot::Receiver<Option<String>>,
) -> Option<BridgeError>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display,
{
    let mut frames: u64 = 0;
    while let Some(byte) = output.next().await {
        if let Err(err) = channel.send_text(encode_data(&[byte])).await {
            if !matches!(err, BridgeError::ChannelClosed) {
                tracing::warn!(%err, frames, "Outbound relay failed");
                channel.close_with_error(&err).await;
            }
            return Some(err);
        }
        frames += 1;
    }

    tracing::debug!(frames, "Output finished");
    match finish.await {
        Ok(Some(reason)) => channel.close(close_code::UNSUPPORTED, &reason).await,
        Ok(None) | Err(_) => channel.close_normal().await,
    };
    None
}
