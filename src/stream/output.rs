//! Write side of a connection: an ordered queue of framed JSON documents.
//!
//! Every message is serialized and framed when it is enqueued, then handed to
//! a single pump task that owns the writer. The pump performs one write at a
//! time in submission order, so two messages can never interleave on the
//! wire. A failed write is fatal to the stream: the failing message receives
//! the I/O error and everything still queued behind it fails with
//! [`Error::Closed`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::stream::framing::encode_frame;
use crate::stream::WIRE_TARGET;

/// One framed message waiting for the pump.
struct QueuedWrite {
    frame: Vec<u8>,
    done: oneshot::Sender<Result<()>>,
}

/// Resolves once the message it belongs to has been written and flushed,
/// or with the error that prevented it.
#[must_use = "a write completion does nothing unless awaited"]
pub struct WriteCompletion {
    rx: oneshot::Receiver<Result<()>>,
}

impl Future for WriteCompletion {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // The pump went away without answering
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Closed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// FIFO message writer with exactly one physical write in flight.
pub struct OutputStream {
    queue: Mutex<Option<mpsc::UnboundedSender<QueuedWrite>>>,
    echo_wire: bool,
    runtime: Handle,
}

impl OutputStream {
    /// Wrap a writable stream, spawning the pump on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime context.
    pub fn new<W>(writer: W, config: &Config) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_runtime(Handle::current(), writer, config)
    }

    /// Wrap a writable stream, spawning the pump on `runtime`.
    pub fn with_runtime<W>(runtime: Handle, writer: W, config: &Config) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        runtime.spawn(pump(writer, rx));

        Self {
            queue: Mutex::new(Some(tx)),
            echo_wire: config.echo_wire,
            runtime,
        }
    }

    /// Serialize, frame and queue a message.
    ///
    /// Validation happens synchronously: anything other than a JSON object or
    /// array is rejected with `Error::InvalidArgument` and nothing is queued.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidArgument` for scalar documents
    /// - `Error::Closed` if the stream was closed or the pump has failed
    pub fn enqueue(&self, message: &serde_json::Value) -> Result<WriteCompletion> {
        if !(message.is_object() || message.is_array()) {
            return Err(Error::InvalidArgument(
                "message must be a JSON object or array".to_string(),
            ));
        }

        let body = serde_json::to_vec(message)?;

        if self.echo_wire {
            info!(target: WIRE_TARGET, ">>> {}", String::from_utf8_lossy(&body));
        }

        let (done, rx) = oneshot::channel();
        let item = QueuedWrite {
            frame: encode_frame(&body),
            done,
        };

        let queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        match queue.as_ref() {
            Some(tx) => tx.send(item).map_err(|_| Error::Closed)?,
            None => return Err(Error::Closed),
        }

        Ok(WriteCompletion { rx })
    }

    /// Queue a message and wait until it has been written.
    pub async fn write_message(&self, message: &serde_json::Value) -> Result<()> {
        self.enqueue(message)?.await
    }

    /// Blocking variant of [`write_message`](OutputStream::write_message).
    ///
    /// Blocks the calling thread on the runtime the pump runs on. Must not be
    /// called from inside an async context, and only makes progress when that
    /// runtime has worker threads of its own.
    pub fn write_message_blocking(&self, message: &serde_json::Value) -> Result<()> {
        self.runtime.block_on(self.write_message(message))
    }

    /// Stop accepting messages.
    ///
    /// Messages already queued are still written; the writer is shut down
    /// once the queue drains.
    pub fn close(&self) {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.take().is_some() {
            debug!("Output stream closed");
        }
    }

    /// Returns true once the stream no longer accepts messages.
    pub fn is_closed(&self) -> bool {
        let queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        match queue.as_ref() {
            Some(tx) => tx.is_closed(),
            None => true,
        }
    }
}

/// Write one frame and flush it.
async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Drain the queue one frame at a time until every sender is gone.
async fn pump<W>(mut writer: W, mut queue: mpsc::UnboundedReceiver<QueuedWrite>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(item) = queue.recv().await {
        if let Err(err) = write_frame(&mut writer, &item.frame).await {
            error!("Failed to write message: {}", err);
            let _ = item.done.send(Err(err));

            // The stream is unusable, fail everything behind the broken write
            queue.close();
            let mut failed = 0usize;
            while let Some(rest) = queue.recv().await {
                let _ = rest.done.send(Err(Error::Closed));
                failed += 1;
            }
            if failed > 0 {
                debug!("Failed {} queued messages after write error", failed);
            }
            return;
        }

        let _ = item.done.send(Ok(()));
    }

    if let Err(err) = writer.shutdown().await {
        debug!("Error shutting down writer: {}", err);
    }
}
