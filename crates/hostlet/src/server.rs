//! Transport loop: read one frame at a time, dispatch, and shut down on
//! request or when the controller goes away.

use std::io;
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bridge::codec::{FrameCodec, FrameError};
use crate::bridge::protocol::Command;
use crate::bridge::transport::{Outbound, spawn_writer};
use crate::config::BridgeConfig;
use crate::dispatch::{Dispatcher, Flow};
use crate::guest::{ConsoleSurface, GuestLoader};
use crate::services::HostServices;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The inbound stream can no longer be trusted to carry frame boundaries.
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Why the server stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerExit {
    ShutdownRequested,
    ControllerClosed,
}

/// Serve the controller protocol until shutdown, EOF or a framing error.
pub async fn run_server<R, W>(
    reader: R,
    writer: W,
    loader: Arc<dyn GuestLoader>,
    config: BridgeConfig,
    console: Option<Arc<dyn ConsoleSurface>>,
) -> Result<ServerExit, ServerError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut frames = FramedRead::new(
        reader,
        FrameCodec::with_limits(config.max_frame_len, config.max_fields),
    );
    let writer = Arc::new(tokio::sync::Mutex::new(FramedWrite::new(
        writer,
        FrameCodec::new(),
    )));
    let (outbound, rx) = Outbound::channel();
    let writer_task = spawn_writer(writer, rx);

    let shutdown_timeout = config.shutdown_timeout();
    let dispatcher = Dispatcher::new(HostServices::new(outbound.clone(), loader, config), console);
    tracing::info!("Bridge ready");

    let exit = loop {
        let frame = match frames.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                tracing::error!(error = %e, "Framing error, giving up on controller stream");
                dispatcher.destroy_all();
                let _ = outbound.flush().await;
                return Err(e.into());
            }
            None => {
                tracing::info!("Controller closed the stream");
                break ServerExit::ControllerClosed;
            }
        };

        let command = match Command::decode(frame) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring undecodable command");
                continue;
            }
        };

        match dispatcher.dispatch(command) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Shutdown) => {
                tracing::info!("Shutdown requested");
                break ServerExit::ShutdownRequested;
            }
            Err(e) => tracing::warn!(error = %e, "Command failed"),
        }
    };

    shutdown(&dispatcher, shutdown_timeout).await;
    outbound.flush().await?;
    // Abandoned workers may still hold outbound handles, so the writer task
    // is left to end on its own.
    drop(writer_task);
    Ok(exit)
}

async fn shutdown(dispatcher: &Dispatcher, timeout: std::time::Duration) {
    let components = dispatcher.destroy_all();
    let services = dispatcher.services();
    // Guest threads blocked on stream reads must wake up to finish destroy.
    services.streams.disconnect_all();
    let abandoned = services.supervisor.join_all(timeout).await;
    tracing::info!(components, abandoned, "Shutdown complete");
}
