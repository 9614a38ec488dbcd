//! Push-to-pull pipe feeding the remote process stdin.
//!
//! Chunks arriving from the message channel are handed to the reader one at
//! a time. `receive` only returns once the reader has consumed the whole
//! chunk, which throttles the sender to the pace of the remote process.

use std::{
    io,
    pin::Pin,
    task::{Context, Poll, ready},
};

use bytes::{Buf, Bytes};
use tokio::{
    io::{AsyncRead, ReadBuf},
    sync::{mpsc, oneshot},
};

/// Pipe error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PipeError {
    #[error("pipe closed")]
    Closed,
    #[error("pipe reader went away")]
    ReaderGone,
}

struct Chunk {
    data: Bytes,
    consumed: oneshot::Sender<()>,
}

/// Writer side of the pipe, driven by the inbound relay.
pub struct PipeAdapter {
    tx: Option<mpsc::Sender<Chunk>>,
}

impl PipeAdapter {
    /// Create a connected adapter and reader.
    #[must_use]
    pub fn new() -> (Self, PipeReader) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx: Some(tx) }, PipeReader { rx, current: None })
    }

    /// Hand a chunk to the reader and wait until all of it was read.
    ///
    /// # Errors
    /// Returns error if the pipe was closed or the reader dropped before
    /// consuming the chunk.
    pub async fn receive(&self, data: &[u8]) -> Result<usize, PipeError> {
        if data.is_empty() {
            return Ok(0);
        }
        let tx = self.tx.as_ref().ok_or(PipeError::Closed)?;

        let (consumed_tx, consumed_rx) = oneshot::channel();
        let chunk = Chunk {
            data: Bytes::copy_from_slice(data),
            consumed: consumed_tx,
        };
        tx.send(chunk).await.map_err(|_| PipeError::ReaderGone)?;
        consumed_rx.await.map_err(|_| PipeError::ReaderGone)?;

        Ok(data.len())
    }

    /// Signal end of input. Idempotent.
    ///
    /// The reader sees EOF once any in-flight chunk is drained.
    pub fn close(&mut self) {
        self.tx = None;
    }

    /// Whether `close` has been called.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.tx.is_none()
    }
}

/// Reader side of the pipe, handed to the executor as stdin.
pub struct PipeReader {
    rx: mpsc::Receiver<Chunk>,
    current: Option<Chunk>,
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            if let Some(chunk) = this.current.as_mut() {
                let n = chunk.data.len().min(buf.remaining());
                buf.put_slice(&chunk.data[..n]);
                chunk.data.advance(n);

                if !chunk.data.has_remaining() {
                    if let Some(done) = this.current.take() {
                        let _ = done.consumed.send(());
                    }
                }
                return Poll::Ready(Ok(()));
            }

            match ready!(this.rx.poll_recv(cx)) {
                Some(chunk) => this.current = Some(chunk),
                // EOF
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn test_receive_then_read() {
        let (pipe, mut reader) = PipeAdapter::new();
        let push = tokio::spawn(async move { pipe.receive(b"ls\n").await });

        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x6c, 0x73, 0x0a]);
        assert_eq!(push.await.unwrap(), Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_waits_for_full_consumption() {
        let (pipe, mut reader) = PipeAdapter::new();
        let push = tokio::spawn(async move { pipe.receive(b"abcd").await });

        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abc");

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!push.is_finished());

        let mut rest = [0u8; 3];
        let n = reader.read(&mut rest).await.unwrap();
        assert_eq!(&rest[..n], b"d");
        assert_eq!(push.await.unwrap(), Ok(4));
    }

    #[tokio::test]
    async fn test_close_yields_eof() {
        let (mut pipe, mut reader) = PipeAdapter::new();
        pipe.close();
        pipe.close();
        assert!(pipe.is_closed());
        assert_eq!(pipe.receive(b"late").await, Err(PipeError::Closed));

        let mut out = Vec::new();
        assert_eq!(reader.read_to_end(&mut out).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_chunk_is_noop() {
        let (pipe, _reader) = PipeAdapter::new();
        assert_eq!(pipe.receive(&[]).await, Ok(0));
    }

    #[tokio::test]
    async fn test_reader_gone() {
        let (pipe, reader) = PipeAdapter::new();
        drop(reader);
        assert_eq!(pipe.receive(b"x").await, Err(PipeError::ReaderGone));
    }

    #[tokio::test]
    async fn test_chunks_arrive_in_order() {
        let (mut pipe, mut reader) = PipeAdapter::new();
        let push = tokio::spawn(async move {
            for chunk in [&b"echo "[..], b"hi", b"\n"] {
                pipe.receive(chunk).await.unwrap();
            }
            pipe.close();
        });

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"echo hi\n");
        push.await.unwrap();
    }
}
