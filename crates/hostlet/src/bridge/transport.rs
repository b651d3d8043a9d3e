//! Outbound path to the controller.
//!
//! Every producer (dispatcher, component workers, guest threads, stream
//! jobs) holds a cloned [`Outbound`] and queues [`Message`]s on an unbounded
//! channel. A single writer task drains the channel into a shared
//! `FramedWrite`, so frames never interleave on the pipe. Queueing never
//! blocks, which makes the handle usable from plain OS threads.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedWrite;

use super::codec::{Frame, FrameCodec, FrameError};
use super::protocol::Message;

/// Shared writer. Locked once per frame.
pub type FrameWriter<W> = Arc<tokio::sync::Mutex<FramedWrite<W, FrameCodec>>>;

enum Outgoing {
    Message(Message),
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle for queueing messages to the controller.
#[derive(Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl Outbound {
    pub fn channel() -> (Self, OutboundReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, OutboundReceiver { rx })
    }

    pub fn send(&self, message: Message) -> io::Result<()> {
        tracing::trace!(code = %message.code(), "Queueing outbound message");
        self.tx
            .send(Outgoing::Message(message))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "outbound channel closed"))
    }

    /// Wait until everything queued before this call has been written.
    pub async fn flush(&self) -> io::Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Outgoing::Flush(done_tx))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "outbound channel closed"))?;
        done_rx
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "writer stopped before flush"))
    }
}

/// Receiving end of the outbound channel.
pub struct OutboundReceiver {
    rx: mpsc::UnboundedReceiver<Outgoing>,
}

impl OutboundReceiver {
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            match self.rx.recv().await? {
                Outgoing::Message(message) => return Some(message),
                Outgoing::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
    }

    /// Non-blocking receive for synchronous consumers.
    pub fn try_recv(&mut self) -> Option<Message> {
        loop {
            match self.rx.try_recv().ok()? {
                Outgoing::Message(message) => return Some(message),
                Outgoing::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
    }

    /// Blocking receive with a deadline, for consumers on OS threads.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<Message> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(message) = self.try_recv() {
                return Some(message);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

/// Spawn the task that writes queued messages to the controller.
///
/// Ends when every [`Outbound`] is dropped or the pipe fails. A message
/// that cannot be encoded is logged and skipped.
pub fn spawn_writer<W>(writer: FrameWriter<W>, mut rx: OutboundReceiver) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(item) = rx.rx.recv().await {
            let mut w = writer.lock().await;
            match item {
                Outgoing::Message(message) => {
                    let code = message.code();
                    match w.send(message.encode()).await {
                        Ok(()) => {}
                        Err(FrameError::Io(e)) => {
                            tracing::error!(%code, error = %e, "Failed to write outbound frame");
                            break;
                        }
                        // Nothing reached the pipe; later frames are unaffected.
                        Err(e) => tracing::warn!(%code, error = %e, "Dropping unencodable frame"),
                    }
                }
                Outgoing::Flush(done) => {
                    if let Err(e) = SinkExt::<Frame>::flush(&mut *w).await {
                        tracing::warn!(error = %e, "Failed to flush outbound frames");
                    }
                    let _ = done.send(());
                }
            }
        }
        tracing::debug!("Outbound writer finished");
    })
}
