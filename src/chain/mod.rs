//! Forwarding chain
//!
//! A chain is either empty (direct mode: dial the target itself) or holds
//! one forwarding hop reached through that hop's transporter and connector.
//! Dial and handshake failures are retried sequentially; failures after a
//! session exists belong to the handler that owns it.

use crate::connector::{
    Connector, ConnectorError, Network, PacketSession, Session, StreamConnector, TunnelConnector,
};
use crate::node::{NodeError, NodeSpec, Transport};
use crate::transport::{BoxedStream, TcpTransporter, TlsTransporter, TransportError, Transporter};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// One failed dial attempt
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("dial failed: {0}")]
    Dial(#[from] TransportError),

    #[error("handshake failed: {0}")]
    Handshake(#[from] ConnectorError),
}

/// Chain errors
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("chain exhausted after {attempts} attempt(s) to {target}: {last}")]
    Exhausted {
        target: String,
        attempts: usize,
        #[source]
        last: AttemptError,
    },

    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("unsupported hop: {0}")]
    UnsupportedHop(String),

    #[error("expected a {expected} session, got {actual}")]
    UnexpectedSession { expected: Network, actual: Network },
}

/// The strategies used to reach one node
#[derive(Clone)]
pub struct Client {
    pub connector: Arc<dyn Connector>,
    pub transporter: Arc<dyn Transporter>,
}

impl Client {
    pub fn new(connector: Arc<dyn Connector>, transporter: Arc<dyn Transporter>) -> Self {
        Self {
            connector,
            transporter,
        }
    }

    /// Plain TCP, no negotiation
    pub fn direct() -> Self {
        Self::new(Arc::new(StreamConnector), Arc::new(TcpTransporter::default()))
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("connector", &self.connector.name())
            .finish_non_exhaustive()
    }
}

/// A forwarding hop and the client that reaches it
#[derive(Debug, Clone)]
pub struct Hop {
    pub node: NodeSpec,
    pub client: Client,
}

/// Ordered forwarding path with a retry budget
#[derive(Debug)]
pub struct Chain {
    hop: Option<Hop>,
    retries: usize,
    direct: Client,
}

impl Chain {
    pub fn new(retries: usize, hop: Option<Hop>) -> Self {
        Self {
            hop,
            retries,
            direct: Client::direct(),
        }
    }

    /// Chain with no hop
    pub fn direct(retries: usize) -> Self {
        Self::new(retries, None)
    }

    /// Chain through `node`, using the tunnel connector over the node's transport
    pub fn from_node(node: NodeSpec, retries: usize) -> Result<Self, ChainError> {
        let transporter: Arc<dyn Transporter> = match node.transport {
            Transport::Tcp => Arc::new(TcpTransporter::default()),
            Transport::Tls => Arc::new(TlsTransporter::from_node(&node)?),
            Transport::Tun => {
                return Err(ChainError::UnsupportedHop(format!(
                    "{} cannot forward over a tun transport",
                    node
                )))
            }
        };

        let client = Client::new(Arc::new(TunnelConnector), transporter);
        Ok(Self::new(retries, Some(Hop { node, client })))
    }

    /// Build from an optional `-F` descriptor. An absent or empty node is direct mode.
    pub fn parse(chain_node: Option<&str>, retries: usize) -> Result<Self, ChainError> {
        match NodeSpec::parse(chain_node.unwrap_or_default()) {
            Ok(node) => Self::from_node(node, retries),
            Err(NodeError::EmptyNode) => {
                debug!("No forwarding hop configured, dialing directly");
                Ok(Self::direct(retries))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_direct(&self) -> bool {
        self.hop.is_none()
    }

    pub fn hop(&self) -> Option<&Hop> {
        self.hop.as_ref()
    }

    pub fn retries(&self) -> usize {
        self.retries
    }

    /// Dial `target` through the chain, retrying up to the budget
    pub async fn dial(&self, network: Network, target: &str) -> Result<Session, ChainError> {
        let attempts = self.retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.dial_once(network, target).await {
                Ok(session) => return Ok(session),
                Err(e) if attempt < attempts => {
                    warn!("Dial {} attempt {}/{} failed: {}", target, attempt, attempts, e);
                }
                Err(e) => {
                    return Err(ChainError::Exhausted {
                        target: target.to_string(),
                        attempts,
                        last: e,
                    })
                }
            }
        }
    }

    /// Dial a byte-stream session
    pub async fn dial_stream(&self, target: &str) -> Result<BoxedStream, ChainError> {
        match self.dial(Network::Stream, target).await? {
            Session::Stream(conn) => Ok(conn),
            other => Err(ChainError::UnexpectedSession {
                expected: Network::Stream,
                actual: other.network(),
            }),
        }
    }

    /// Dial a packet session
    pub async fn dial_packets(&self, target: &str) -> Result<PacketSession, ChainError> {
        match self.dial(Network::Datagram, target).await? {
            Session::Packet(session) => Ok(session),
            other => Err(ChainError::UnexpectedSession {
                expected: Network::Datagram,
                actual: other.network(),
            }),
        }
    }

    async fn dial_once(&self, network: Network, target: &str) -> Result<Session, AttemptError> {
        let (client, addr) = match &self.hop {
            Some(hop) => (&hop.client, hop.node.addr.as_str()),
            None => (&self.direct, target),
        };

        let conn = client.transporter.dial(addr).await?;
        let session = client.connector.connect(conn, network, target).await?;
        debug!("Dialed {} {} via {}", network, target, addr);
        Ok(session)
    }
}
