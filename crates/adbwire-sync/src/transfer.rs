use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SyncError};

/// Handle to a running push.
///
/// `progress()` reports bytes acknowledged to the wire, one update per
/// completed `DATA` frame. The push is finished once the device's final
/// `OKAY` has been read.
#[derive(Debug)]
pub struct PushTransfer {
    task: JoinHandle<Result<u64>>,
    progress: watch::Receiver<u64>,
    cancel: CancellationToken,
}

impl PushTransfer {
    pub(crate) fn new(
        task: JoinHandle<Result<u64>>,
        progress: watch::Receiver<u64>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task,
            progress,
            cancel,
        }
    }

    /// Bytes written so far.
    pub fn bytes_transferred(&self) -> u64 {
        *self.progress.borrow()
    }

    /// A receiver that changes after every `DATA` frame.
    pub fn progress(&self) -> watch::Receiver<u64> {
        self.progress.clone()
    }

    /// Ask the transfer to stop before its next chunk.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The token fired by [`PushTransfer::cancel`].
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the device to acknowledge the push. Returns the byte count.
    pub async fn wait(self) -> Result<u64> {
        self.task.await?
    }
}

/// A running pull, readable as a byte stream.
///
/// Bytes arrive as the device sends `DATA` frames. A protocol failure is
/// reported in-band: the read that would otherwise see end of stream
/// returns the error instead.
#[derive(Debug)]
pub struct PullTransfer {
    stream: DuplexStream,
    task: Option<JoinHandle<Result<u64>>>,
    progress: watch::Receiver<u64>,
    cancel: CancellationToken,
}

impl PullTransfer {
    pub(crate) fn new(
        stream: DuplexStream,
        task: JoinHandle<Result<u64>>,
        progress: watch::Receiver<u64>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stream,
            task: Some(task),
            progress,
            cancel,
        }
    }

    /// Bytes received from the device so far.
    pub fn bytes_transferred(&self) -> u64 {
        *self.progress.borrow()
    }

    /// A receiver that changes after every `DATA` frame.
    pub fn progress(&self) -> watch::Receiver<u64> {
        self.progress.clone()
    }

    /// Ask the transfer to stop before its next chunk.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The token fired by [`PullTransfer::cancel`].
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Collect the whole file in memory.
    pub async fn read_all(mut self) -> Result<Bytes> {
        let mut data = Vec::new();
        self.stream.read_to_end(&mut data).await?;
        self.finish().await?;
        Ok(Bytes::from(data))
    }

    /// Relay the whole file into `sink`. Returns the byte count.
    pub async fn copy_to<W>(mut self, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        tokio::io::copy(&mut self.stream, sink).await?;
        self.finish().await
    }

    async fn finish(&mut self) -> Result<u64> {
        match self.task.take() {
            Some(task) => task.await?,
            None => Ok(*self.progress.borrow()),
        }
    }
}

impl AsyncRead for PullTransfer {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.stream).poll_read(cx, buf))?;
        if buf.filled().len() > before {
            return Poll::Ready(Ok(()));
        }

        // End of the relay: surface the task outcome.
        if let Some(task) = this.task.as_mut() {
            let outcome = ready!(Pin::new(task).poll(cx));
            this.task = None;
            match outcome {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => return Poll::Ready(Err(io::Error::other(err))),
                Err(err) => {
                    return Poll::Ready(Err(io::Error::other(SyncError::from(err))));
                }
            }
        }
        Poll::Ready(Ok(()))
    }
}
