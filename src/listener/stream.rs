//! TCP listener with optional server-side TLS

use super::ListenerError;
use crate::transport::BoxedStream;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Bound TCP socket producing accepted connections until closed
pub struct StreamListener {
    inner: TcpListener,
    acceptor: Option<TlsAcceptor>,
    local_addr: SocketAddr,
    closed: CancellationToken,
}

impl StreamListener {
    pub async fn bind(
        addr: &str,
        tls: Option<Arc<rustls::ServerConfig>>,
    ) -> Result<Self, ListenerError> {
        let inner = TcpListener::bind(addr).await?;
        let local_addr = inner.local_addr()?;
        let acceptor = tls.map(TlsAcceptor::from);

        info!(
            "Listening on {} ({})",
            local_addr,
            if acceptor.is_some() { "tls" } else { "plaintext" }
        );

        Ok(Self {
            inner,
            acceptor,
            local_addr,
            closed: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_tls(&self) -> bool {
        self.acceptor.is_some()
    }

    /// Wait for the next connection, or `Closed` once [`close`](Self::close) is called
    pub async fn accept(&self) -> Result<Incoming, ListenerError> {
        tokio::select! {
            biased;

            _ = self.closed.cancelled() => Err(ListenerError::Closed),

            accepted = self.inner.accept() => {
                let (stream, peer) = accepted?;
                stream.set_nodelay(true).ok();
                Ok(Incoming {
                    stream,
                    peer,
                    acceptor: self.acceptor.clone(),
                })
            }
        }
    }

    pub fn close(&self) {
        self.closed.cancel();
    }
}

/// An accepted connection whose TLS handshake (if any) has not run yet.
///
/// The handshake runs on the connection's own task so a slow client cannot
/// stall the accept loop.
pub struct Incoming {
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: Option<TlsAcceptor>,
}

impl Incoming {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub async fn establish(self) -> Result<BoxedStream, ListenerError> {
        match self.acceptor {
            Some(acceptor) => {
                let tls_stream = acceptor
                    .accept(self.stream)
                    .await
                    .map_err(ListenerError::Tls)?;
                Ok(Box::new(tls_stream))
            }
            None => Ok(Box::new(self.stream)),
        }
    }
}
