//! TLS transporter
//!
//! Wraps a TCP connection in a rustls client session. Server certificates
//! are verified against the Mozilla roots from `webpki-roots`, optionally
//! extended with a private CA bundle for in-cluster gateways.

use super::tcp::TcpTransporter;
use super::{BoxedStream, TransportConfig, TransportError, Transporter};
use crate::node::NodeSpec;
use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsConnector;

/// Dials TCP and performs a TLS client handshake
#[derive(Clone)]
pub struct TlsTransporter {
    config: TransportConfig,
    tls_config: Arc<ClientConfig>,
    /// Server name override; defaults to the host of the dialed address
    sni: Option<String>,
}

impl TlsTransporter {
    pub fn new(config: TransportConfig, tls_config: Arc<ClientConfig>, sni: Option<String>) -> Self {
        Self {
            config,
            tls_config,
            sni,
        }
    }

    /// Build from a hop node's `sni` and `ca` options
    pub fn from_node(node: &NodeSpec) -> Result<Self, TransportError> {
        let ca = match node.get("ca") {
            "" => None,
            path => Some(Path::new(path)),
        };
        let tls_config = build_client_config(ca)?;
        let sni = match node.get("sni") {
            "" => None,
            sni => Some(sni.to_string()),
        };

        Ok(Self::new(TransportConfig::default(), Arc::new(tls_config), sni))
    }

    fn server_name(&self, addr: &str) -> Result<ServerName<'static>, TransportError> {
        let name = match &self.sni {
            Some(sni) => sni.clone(),
            None => {
                let host = addr.rsplit_once(':').map(|(h, _)| h).unwrap_or(addr);
                host.trim_start_matches('[').trim_end_matches(']').to_string()
            }
        };

        ServerName::try_from(name)
            .map_err(|e| TransportError::InvalidAddress(format!("invalid SNI for {}: {}", addr, e)))
    }
}

#[async_trait]
impl Transporter for TlsTransporter {
    async fn dial(&self, addr: &str) -> Result<BoxedStream, TransportError> {
        let server_name = self.server_name(addr)?;
        let tcp_stream = TcpTransporter::connect(&self.config, addr).await?;

        let connector = TlsConnector::from(self.tls_config.clone());
        let tls_stream = tokio::time::timeout(
            self.config.connect_timeout,
            connector.connect(server_name, tcp_stream),
        )
        .await
        .map_err(|_| TransportError::Timeout(addr.to_string()))?
        .map_err(|e| TransportError::Tls(e.to_string()))?;

        Ok(Box::new(tls_stream))
    }
}

/// Client config trusting the web PKI roots plus an optional PEM bundle
pub fn build_client_config(extra_ca: Option<&Path>) -> Result<ClientConfig, TransportError> {
    let mut root_store = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    if let Some(path) = extra_ca {
        let mut file = std::io::BufReader::new(std::fs::File::open(path)?);
        for cert in rustls_pemfile::certs(&mut file) {
            root_store
                .add(cert?)
                .map_err(|e| TransportError::Tls(format!("bad CA in {}: {}", path.display(), e)))?;
        }
    }

    Ok(ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth())
}
