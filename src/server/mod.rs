//! Server: one listener paired with one handler
//!
//! A stream listener feeds a TCP handler, one task per accepted connection.
//! A packet listener hands its device to a TUN handler for the lifetime of
//! the server.

use crate::handler::{Handler, HandlerError, HandlerState, TcpHandler, TunHandler};
use crate::listener::{Listener, ListenerError, PacketListener, StreamListener};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Listener error: {0}")]
    Listener(#[from] ListenerError),

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("{listener} listener cannot be served by a {handler} handler")]
    Mismatch {
        listener: &'static str,
        handler: &'static str,
    },

    #[error("server is already serving")]
    AlreadyServing,
}

/// A listener and the handler that consumes it
pub struct Server {
    listener: Mutex<Option<Listener>>,
    handler: Handler,
    addr: String,
    closed: CancellationToken,
}

impl Server {
    pub fn new(listener: Listener, handler: Handler) -> Self {
        let addr = listener.addr();
        Self {
            listener: Mutex::new(Some(listener)),
            handler,
            addr,
            closed: CancellationToken::new(),
        }
    }

    /// Bound address or interface name
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Run until `cancel` fires or the server is closed. The listener is
    /// released when this returns.
    ///
    /// # Panics
    ///
    /// Panics if the handler was never initialized.
    pub async fn serve(&self, cancel: CancellationToken) -> Result<(), ServerError> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(ServerError::AlreadyServing)?;

        // Either token stops the server
        let stop = cancel.child_token();
        let closed = self.closed.clone();
        let relay = stop.clone();
        let watcher = tokio::spawn(async move {
            tokio::select! {
                _ = closed.cancelled() => relay.cancel(),
                _ = relay.cancelled() => {}
            }
        });

        let span = info_span!("server", addr = %self.addr);
        let result = match (listener, &self.handler) {
            (Listener::Stream(listener), Handler::Tcp(handler)) => {
                serve_stream(listener, handler.clone(), stop.clone())
                    .instrument(span)
                    .await
            }
            (Listener::Packet(listener), Handler::Tun(handler)) => {
                serve_packets(listener, handler.clone(), stop.clone())
                    .instrument(span)
                    .await
            }
            (listener, handler) => Err(ServerError::Mismatch {
                listener: match listener {
                    Listener::Stream(_) => "stream",
                    Listener::Packet(_) => "packet",
                },
                handler: handler.name(),
            }),
        };

        stop.cancel();
        watcher.await.ok();
        result
    }

    /// Stop accepting and release the listener. Safe to call more than once
    /// and on a server that never started.
    pub fn close(&self) -> Result<(), ServerError> {
        self.closed.cancel();
        if let Some(listener) = self.listener.lock().unwrap_or_else(|e| e.into_inner()).take() {
            listener.close();
        }
        Ok(())
    }
}

/// Close a server that may not exist
pub fn close_server(server: Option<&Server>) -> Result<(), ServerError> {
    match server {
        Some(server) => server.close(),
        None => Ok(()),
    }
}

async fn serve_stream(
    listener: StreamListener,
    handler: TcpHandler,
    stop: CancellationToken,
) -> Result<(), ServerError> {
    handler.assert_initialized();
    handler.set_state(HandlerState::Running);
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = stop.cancelled() => break,

            Some(_) = connections.join_next(), if !connections.is_empty() => {}

            accepted = listener.accept() => {
                let incoming = match accepted {
                    Ok(incoming) => incoming,
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };

                let peer = incoming.peer();
                let handler = handler.clone();
                let cancel = stop.child_token();
                debug!("Accepted connection from {}", peer);

                connections.spawn(
                    async move {
                        let conn = match incoming.establish().await {
                            Ok(conn) => conn,
                            Err(e) => {
                                warn!("Handshake with {} failed: {}", peer, e);
                                return;
                            }
                        };
                        if let Err(e) = handler.handle(conn, peer, cancel).await {
                            warn!("Connection from {} ended: {}", peer, e);
                        }
                    }
                    .instrument(info_span!("conn", %peer)),
                );
            }
        }
    }

    listener.close();
    drop(listener);
    stop.cancel();
    while connections.join_next().await.is_some() {}

    handler.set_state(HandlerState::Stopped);
    info!("Server stopped");
    Ok(())
}

async fn serve_packets(
    listener: PacketListener,
    handler: TunHandler,
    stop: CancellationToken,
) -> Result<(), ServerError> {
    let device = listener.device().clone();
    handler.serve(device, stop).await?;
    info!("Server stopped");
    Ok(())
}
