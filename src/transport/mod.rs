//! Transporters: produce the raw connection to a chain hop
//!
//! Provides pluggable transport backends:
//! - TCP (plain stream socket)
//! - TLS 1.2/1.3 over TCP

mod tcp;
mod tls;

pub use tcp::TcpTransporter;
pub use tls::TlsTransporter;

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Dial errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Timeout dialing {0}")]
    Timeout(String),
}

/// Any bidirectional byte stream a transporter can hand out
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Owned, type-erased stream
pub type BoxedStream = Box<dyn AsyncStream>;

/// Strategy that dials the raw connection to an address
#[async_trait]
pub trait Transporter: Send + Sync {
    /// Open a raw connection to `addr` (`host:port`)
    async fn dial(&self, addr: &str) -> Result<BoxedStream, TransportError>;
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Connection timeout (TCP connect and TLS handshake each)
    pub connect_timeout: Duration,
    /// Disable Nagle's algorithm on dialed sockets
    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            nodelay: true,
        }
    }
}
