//! Plain TCP transporter

use super::{BoxedStream, TransportConfig, TransportError, Transporter};
use async_trait::async_trait;
use tokio::net::TcpStream;

/// Dials plain TCP connections
#[derive(Debug, Clone, Default)]
pub struct TcpTransporter {
    config: TransportConfig,
}

impl TcpTransporter {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    /// Connect and apply socket options; shared with the TLS transporter
    pub(crate) async fn connect(
        config: &TransportConfig,
        addr: &str,
    ) -> Result<TcpStream, TransportError> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout(addr.to_string()))??;

        if config.nodelay {
            stream.set_nodelay(true).ok();
        }

        Ok(stream)
    }
}

#[async_trait]
impl Transporter for TcpTransporter {
    async fn dial(&self, addr: &str) -> Result<BoxedStream, TransportError> {
        let stream = Self::connect(&self.config, addr).await?;
        Ok(Box::new(stream))
    }
}
