//! Byte channel that republishes process output one byte at a time.

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use futures::Stream;
use tokio::{io::AsyncWrite, sync::mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::PollSender;

/// Default queue capacity in bytes.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Write to a byte channel whose every handle has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("write to closed byte channel")]
pub struct ClosedSinkError;

/// Create a bounded byte channel.
///
/// Writers block once `capacity` bytes are queued, so a slow consumer
/// throttles the producer instead of growing the queue.
#[must_use]
pub fn byte_channel(capacity: usize) -> (ByteChannelWriter, ByteStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ByteChannelWriter {
            sender: PollSender::new(tx),
        },
        ByteStream {
            inner: ReceiverStream::new(rx),
        },
    )
}

/// Producer side of a byte channel.
///
/// Cloning yields another handle into the same FIFO, so stdout and stderr
/// can share one ordered output sequence.
#[derive(Clone)]
pub struct ByteChannelWriter {
    sender: PollSender<u8>,
}

impl ByteChannelWriter {
    /// Enqueue every byte of `bytes`, waiting for capacity as needed.
    ///
    /// # Errors
    /// Returns error if this handle was closed or the consumer is gone.
    pub async fn write_bytes(&mut self, bytes: &[u8]) -> Result<usize, ClosedSinkError> {
        if bytes.is_empty() {
            return Ok(0);
        }
        let tx = self.sender.get_ref().cloned().ok_or(ClosedSinkError)?;
        for &byte in bytes {
            tx.send(byte).await.map_err(|_| ClosedSinkError)?;
        }
        Ok(bytes.len())
    }

    /// Stop producing through this handle. Idempotent.
    ///
    /// The consumer sequence ends once every handle is closed or dropped
    /// and the queued bytes have been drained.
    pub fn close(&mut self) {
        self.sender.close();
    }

    /// Whether this handle can no longer write.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, ClosedSinkError)
}

impl AsyncWrite for ByteChannelWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let mut written = 0;
        for &byte in buf {
            match this.sender.poll_reserve(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(_)) if written == 0 => return Poll::Ready(Err(closed_error())),
                Poll::Pending if written == 0 => return Poll::Pending,
                Poll::Ready(Err(_)) | Poll::Pending => break,
            }
            if this.sender.send_item(byte).is_err() {
                if written == 0 {
                    return Poll::Ready(Err(closed_error()));
                }
                break;
            }
            written += 1;
        }
        Poll::Ready(Ok(written))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().close();
        Poll::Ready(Ok(()))
    }
}

/// Consumer side of a byte channel.
///
/// A lazy, finite sequence: it yields queued bytes in order and ends after
/// all writers are closed. It cannot be restarted.
pub struct ByteStream {
    inner: ReceiverStream<u8>,
}

impl Stream for ByteStream {
    type Item = u8;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<u8>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
