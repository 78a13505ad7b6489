//! Router: builds one server per serve node and runs them together

use crate::chain::{Chain, ChainError};
use crate::handler::{Handler, HandlerOptions, TcpHandler, TunHandler};
use crate::listener::{Listener, ListenerError, PacketListener, StreamListener, TlsPolicy};
use crate::node::{parse_routes, NodeError, NodeSpec, Protocol, Route, Transport};
use crate::server::{close_server, Server, ServerError};
use crate::tun::{TunConfig, DEFAULT_MTU};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Default chain retry budget
pub const DEFAULT_RETRIES: usize = 5;

/// Router errors
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Listener error for {node}: {source}")]
    Listener {
        node: String,
        #[source]
        source: ListenerError,
    },

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Which endpoints to serve and where to forward
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Serve node descriptors (`-L`)
    pub serve_nodes: Vec<String>,
    /// Forwarding hop descriptor (`-F`); empty or absent means direct
    pub chain_node: Option<String>,
    pub retries: usize,
    pub tls_policy: TlsPolicy,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            serve_nodes: Vec::new(),
            chain_node: None,
            retries: DEFAULT_RETRIES,
            tls_policy: TlsPolicy::default(),
        }
    }
}

/// One serve node and the server built for it
#[derive(Clone)]
pub struct RouterEntry {
    pub node: Arc<NodeSpec>,
    pub server: Option<Arc<Server>>,
}

impl RouterEntry {
    pub async fn serve(&self, cancel: CancellationToken) -> Result<(), ServerError> {
        let Some(server) = &self.server else {
            return Ok(());
        };
        debug!("{} on {}", self.node.protocol, server.addr());
        server.serve(cancel).await
    }

    /// Close the server if there is one
    pub fn close(&self) -> Result<(), ServerError> {
        close_server(self.server.as_deref())
    }
}

/// Build a router entry for every serve node. Any failure aborts the whole
/// batch; entries built so far are dropped and release their sockets.
pub async fn gen_routers(
    config: &RouterConfig,
    tls: Option<Arc<rustls::ServerConfig>>,
) -> Result<Vec<RouterEntry>, RouterError> {
    let chain = Arc::new(Chain::parse(config.chain_node.as_deref(), config.retries)?);
    let mut entries = Vec::with_capacity(config.serve_nodes.len());

    for spec in &config.serve_nodes {
        let node = Arc::new(NodeSpec::parse(spec)?);
        let routes = node_routes(&node);

        let listener = build_listener(&node, &routes, config.tls_policy, tls.as_ref())
            .await
            .map_err(|source| RouterError::Listener {
                node: node.to_string(),
                source,
            })?;

        let mut handler = match node.protocol {
            Protocol::Tun => Handler::Tun(TunHandler::new()),
            Protocol::Tcp => Handler::Tcp(TcpHandler::new()),
        };
        handler.init(HandlerOptions::new(chain.clone(), node.clone()).with_routes(routes));

        info!("Prepared {} handler for {}", handler.name(), node);
        entries.push(RouterEntry {
            node,
            server: Some(Arc::new(Server::new(listener, handler))),
        });
    }

    Ok(entries)
}

fn node_gateway(node: &NodeSpec) -> Option<IpAddr> {
    node.get("gw").parse().ok()
}

fn node_routes(node: &NodeSpec) -> Vec<Route> {
    parse_routes(node.get("route"), node_gateway(node))
}

async fn build_listener(
    node: &NodeSpec,
    routes: &[Route],
    policy: TlsPolicy,
    tls: Option<&Arc<rustls::ServerConfig>>,
) -> Result<Listener, ListenerError> {
    match node.transport {
        Transport::Tcp | Transport::Tls => {
            let tls = policy.select(node.transport, tls)?;
            let listener = StreamListener::bind(&node.bind_addr(), tls).await?;
            Ok(Listener::Stream(listener))
        }
        Transport::Tun => {
            let config = tun_config(node, routes)?;
            Ok(Listener::Packet(PacketListener::open(&config).await?))
        }
    }
}

fn tun_config(node: &NodeSpec, routes: &[Route]) -> Result<TunConfig, ListenerError> {
    let addr = match node.get("net") {
        "" => None,
        net => Some(net.parse::<IpNet>().map_err(|e| {
            ListenerError::Configuration(format!("invalid net `{}`: {}", net, e))
        })?),
    };

    let mtu = match node.get_int("mtu") {
        None => DEFAULT_MTU,
        Some(mtu) => u16::try_from(mtu)
            .ok()
            .filter(|&m| m >= 576)
            .ok_or_else(|| ListenerError::Configuration(format!("invalid mtu {}", mtu)))?,
    };

    Ok(TunConfig {
        name: node.get("name").to_string(),
        addr,
        mtu,
        routes: routes.to_vec(),
        gateway: node_gateway(node),
    })
}

/// Every entry built from one configuration
pub struct Router {
    entries: Vec<RouterEntry>,
}

impl Router {
    pub fn new(entries: Vec<RouterEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[RouterEntry] {
        &self.entries
    }

    /// Serve every entry concurrently until all have finished. A failing
    /// server is logged and does not stop the others; the first failure is
    /// returned once everything is done.
    pub async fn serve_all(&self, cancel: CancellationToken) -> Result<(), RouterError> {
        let mut tasks = JoinSet::new();
        for entry in &self.entries {
            let entry = entry.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let result = entry.serve(cancel).await;
                (entry.node, result)
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok((_, Ok(()))) => continue,
                Ok((node, Err(e))) => {
                    error!("Server for {} failed: {}", node, e);
                    RouterError::from(e)
                }
                Err(e) => {
                    error!("Server task failed: {}", e);
                    RouterError::from(e)
                }
            };
            first_error.get_or_insert(failure);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Close every entry
    pub fn close_all(&self) {
        for entry in &self.entries {
            if let Err(e) = entry.close() {
                error!("Closing {} failed: {}", entry.node, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(serve_nodes: &[&str], chain_node: Option<&str>) -> RouterConfig {
        RouterConfig {
            serve_nodes: serve_nodes.iter().map(|s| s.to_string()).collect(),
            chain_node: chain_node.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_gen_routers_builds_entries() {
        let cfg = config(&["tcp://127.0.0.1:0", "tcp://127.0.0.1:0?target=127.0.0.1:80"], None);
        let entries = gen_routers(&cfg, None).await.unwrap();

        assert_eq!(entries.len(), 2);
        for entry in &entries {
            let server = entry.server.as_ref().unwrap();
            assert!(matches!(server.handler(), Handler::Tcp(_)));
        }
        assert_eq!(entries[1].node.get("target"), "127.0.0.1:80");
    }

    #[tokio::test]
    async fn test_gen_routers_fails_fast() {
        let cfg = config(&["tcp://127.0.0.1:0", "bogus://nowhere"], None);
        assert!(matches!(
            gen_routers(&cfg, None).await,
            Err(RouterError::Node(NodeError::InvalidSpecification { .. }))
        ));

        let cfg = config(&["tcp://127.0.0.1:0"], Some("tcp://not-a-host-port"));
        assert!(matches!(gen_routers(&cfg, None).await, Err(RouterError::Chain(_))));
    }

    #[tokio::test]
    async fn test_tls_endpoint_without_certificate() {
        let cfg = config(&["tcp+tls://127.0.0.1:0"], None);
        assert!(matches!(
            gen_routers(&cfg, None).await,
            Err(RouterError::Listener {
                source: ListenerError::Configuration(_),
                ..
            })
        ));
    }

    #[test]
    fn test_tun_config_from_node() {
        let node = NodeSpec::parse(
            "tun://:8421/10.233.0.1:8421?net=223.254.0.100/16&mtu=1350&name=hop0&route=10.0.0.0/8&gw=223.254.0.1",
        )
        .unwrap();
        let routes = node_routes(&node);
        let config = tun_config(&node, &routes).unwrap();

        assert_eq!(config.name, "hop0");
        assert_eq!(config.mtu, 1350);
        assert_eq!(config.addr, Some("223.254.0.100/16".parse().unwrap()));
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].gateway, Some("223.254.0.1".parse().unwrap()));
    }

    #[test]
    fn test_tun_config_rejects_bad_values() {
        let node = NodeSpec::parse("tun://?net=not-a-cidr").unwrap();
        assert!(tun_config(&node, &[]).is_err());

        let node = NodeSpec::parse("tun://?mtu=70000").unwrap();
        assert!(tun_config(&node, &[]).is_err());
    }

    #[tokio::test]
    async fn test_empty_entry_is_nil_safe() {
        let entry = RouterEntry {
            node: Arc::new(NodeSpec::parse("tcp://:0").unwrap()),
            server: None,
        };
        entry.close().unwrap();
        entry.serve(CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_serve_all_until_cancelled() {
        let cfg = config(&["tcp://127.0.0.1:0", "tcp://127.0.0.1:0"], None);
        let router = Arc::new(Router::new(gen_routers(&cfg, None).await.unwrap()));
        let cancel = CancellationToken::new();

        let task = {
            let router = router.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { router.serve_all(cancel).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}
