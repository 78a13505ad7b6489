//! Handlers: move traffic from a listener through the chain
//!
//! Both variants share one lifecycle:
//!
//! ```text
//! Uninitialized --init--> Initialized --serve--> Running --> Stopped | Failed
//! ```
//!
//! Serving an uninitialized handler is a programming error and panics.

mod tcp;
mod tun;

pub use tcp::TcpHandler;
pub use tun::TunHandler;

use crate::chain::{Chain, ChainError};
use crate::connector::FrameError;
use crate::node::{NodeSpec, Route};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// How long an inbound peer has to send its target preamble
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Handler errors. All of them end one connection or session, never the server.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("session lost and re-dial failed: {0}")]
    SessionLost(#[source] ChainError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("Timeout waiting for peer handshake")]
    Timeout,
}

/// Handler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
    Failed,
}

/// Data a handler is bound to at init time
#[derive(Debug, Clone)]
pub struct HandlerOptions {
    pub chain: Arc<Chain>,
    pub node: Arc<NodeSpec>,
    pub routes: Arc<[Route]>,
}

impl HandlerOptions {
    pub fn new(chain: Arc<Chain>, node: Arc<NodeSpec>) -> Self {
        Self {
            chain,
            node,
            routes: Arc::from(Vec::new()),
        }
    }

    pub fn with_routes(mut self, routes: Vec<Route>) -> Self {
        self.routes = Arc::from(routes);
        self
    }
}

/// Shared lifecycle bookkeeping
#[derive(Debug, Clone)]
struct Lifecycle {
    options: Option<Arc<HandlerOptions>>,
    state: Arc<Mutex<HandlerState>>,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            options: None,
            state: Arc::new(Mutex::new(HandlerState::Uninitialized)),
        }
    }

    fn init(&mut self, options: HandlerOptions) {
        self.options = Some(Arc::new(options));
        self.set(HandlerState::Initialized);
    }

    /// Bound options; panics when `init` was never called
    fn options(&self) -> Arc<HandlerOptions> {
        match &self.options {
            Some(options) => options.clone(),
            None => panic!("handler served before init"),
        }
    }

    fn get(&self) -> HandlerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set(&self, state: HandlerState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

/// The two handler variants
#[derive(Debug, Clone)]
pub enum Handler {
    Tcp(TcpHandler),
    Tun(TunHandler),
}

impl Handler {
    pub fn init(&mut self, options: HandlerOptions) {
        match self {
            Handler::Tcp(h) => h.init(options),
            Handler::Tun(h) => h.init(options),
        }
    }

    pub fn state(&self) -> HandlerState {
        match self {
            Handler::Tcp(h) => h.state(),
            Handler::Tun(h) => h.state(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Handler::Tcp(_) => "tcp",
            Handler::Tun(_) => "tun",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_transitions_state() {
        let mut handler = Handler::Tcp(TcpHandler::new());
        assert_eq!(handler.state(), HandlerState::Uninitialized);

        let node = Arc::new(NodeSpec::parse("tcp://:0").unwrap());
        handler.init(HandlerOptions::new(Arc::new(Chain::direct(0)), node));
        assert_eq!(handler.state(), HandlerState::Initialized);
    }

    #[test]
    #[should_panic(expected = "handler served before init")]
    fn test_options_before_init_panics() {
        Lifecycle::new().options();
    }
}
