//! # hopchain
//!
//! A proxy tunnel engine that accepts traffic on local endpoints and relays it
//! to a target, either directly or through a forwarding hop.
//!
//! ## Features
//!
//! - **TCP relay** with a static target or a target announced by an upstream chain
//! - **TUN forwarding** of routed IP packets over one framed stream session
//! - **TLS** on listeners and on the hop connection
//! - **Retrying chain** with a fixed attempt budget
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                      Router                          │
//! │        (serve nodes -> servers, one chain)          │
//! ├─────────────────────────────────────────────────────┤
//! │                 Server  =  Listener + Handler        │
//! │      (TCP accept loop / TUN device, TCP / TUN)       │
//! ├─────────────────────────────────────────────────────┤
//! │                       Chain                          │
//! │          (hop selection, retries, sessions)          │
//! ├─────────────────────────────────────────────────────┤
//! │                     Connector                        │
//! │     (stream pass-through, tunnel preamble, frames)   │
//! ├─────────────────────────────────────────────────────┤
//! │                     Transport                        │
//! │                    (TCP, TLS)                        │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod chain;
pub mod config;
pub mod connector;
pub mod handler;
pub mod listener;
pub mod node;
pub mod router;
pub mod server;
pub mod transport;
pub mod tun;

pub use chain::Chain;
pub use config::Config;
pub use node::NodeSpec;
pub use router::{gen_routers, Router, RouterConfig, RouterEntry};
pub use server::Server;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Node error: {0}")]
    Node(#[from] node::NodeError),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("Connector error: {0}")]
    Connector(#[from] connector::ConnectorError),

    #[error("Chain error: {0}")]
    Chain(#[from] chain::ChainError),

    #[error("Handler error: {0}")]
    Handler(#[from] handler::HandlerError),

    #[error("Listener error: {0}")]
    Listener(#[from] listener::ListenerError),

    #[error("Server error: {0}")]
    Server(#[from] server::ServerError),

    #[error("Router error: {0}")]
    Router(#[from] router::RouterError),

    #[error("Configuration error: {0}")]
    Config(String),
}
