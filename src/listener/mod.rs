//! Listeners: sources of incoming work for a server
//!
//! A stream listener yields one connection per accept; a packet listener is
//! a single long-lived packet source/sink (the TUN interface).

mod packet;
mod stream;

pub use packet::{PacketDevice, PacketListener};
pub use stream::{Incoming, StreamListener};

use crate::node::Transport;
use crate::tun::TunError;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Listener errors
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The listener was closed; no more connections will arrive
    #[error("listener closed")]
    Closed,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("device error: {0}")]
    Device(#[from] TunError),

    #[error("TLS handshake failed: {0}")]
    Tls(io::Error),
}

/// Which stream listeners get wrapped in TLS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TlsPolicy {
    /// Every stream listener serves TLS, whatever its declared transport
    Required,
    /// Only endpoints declared as `tls` serve TLS
    #[default]
    PerEndpoint,
}

impl TlsPolicy {
    /// Server TLS config to apply to a stream listener with `transport`
    pub fn select(
        &self,
        transport: Transport,
        tls: Option<&Arc<rustls::ServerConfig>>,
    ) -> Result<Option<Arc<rustls::ServerConfig>>, ListenerError> {
        let wanted = match self {
            TlsPolicy::Required => true,
            TlsPolicy::PerEndpoint => transport == Transport::Tls,
        };
        if !wanted {
            return Ok(None);
        }

        tls.cloned().map(Some).ok_or_else(|| {
            ListenerError::Configuration(format!(
                "{} listener requires TLS but no server certificate is configured",
                transport
            ))
        })
    }
}

/// Either kind of listener
pub enum Listener {
    Stream(StreamListener),
    Packet(PacketListener),
}

impl Listener {
    /// Bound address or interface name, for logs
    pub fn addr(&self) -> String {
        match self {
            Listener::Stream(l) => l.local_addr().to_string(),
            Listener::Packet(l) => l.device().name().to_string(),
        }
    }

    /// Unblock pending accepts. Packet listeners stop when their handler does.
    pub fn close(&self) {
        if let Listener::Stream(l) = self {
            l.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_server_config() -> Arc<rustls::ServerConfig> {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let key = rustls::pki_types::PrivateKeyDer::Pkcs8(cert.key_pair.serialize_der().into());
        Arc::new(
            rustls::ServerConfig::builder()
                .with_no_client_auth()
                .with_single_cert(vec![cert.cert.der().clone()], key)
                .unwrap(),
        )
    }

    #[test]
    fn test_required_policy_wraps_everything() {
        let tls = dummy_server_config();
        let policy = TlsPolicy::Required;
        assert!(policy.select(Transport::Tcp, Some(&tls)).unwrap().is_some());
        assert!(policy.select(Transport::Tls, Some(&tls)).unwrap().is_some());
    }

    #[test]
    fn test_required_policy_without_config_fails() {
        assert!(matches!(
            TlsPolicy::Required.select(Transport::Tcp, None),
            Err(ListenerError::Configuration(_))
        ));
    }

    #[test]
    fn test_per_endpoint_policy_allows_plaintext() {
        let policy = TlsPolicy::PerEndpoint;
        assert!(policy.select(Transport::Tcp, None).unwrap().is_none());
        assert!(matches!(
            policy.select(Transport::Tls, None),
            Err(ListenerError::Configuration(_))
        ));
    }
}
