//! TUN packet forwarding handler

use super::{HandlerError, HandlerOptions, HandlerState, Lifecycle};
use crate::connector::{FrameError, PacketSession, MAX_PACKET_SIZE};
use crate::listener::PacketDevice;
use crate::node::{find_route, Route};
use crate::tun::destination_ip;
use bytes::Bytes;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Forwards packets read from the interface through one chain session and
/// writes the packets coming back into the interface.
///
/// The session is dialed when the first routable packet arrives and reused
/// for every packet after it. A failed session is re-dialed once; if that
/// fails too the handler stops with [`HandlerError::SessionLost`].
#[derive(Debug, Clone)]
pub struct TunHandler {
    lifecycle: Lifecycle,
}

impl TunHandler {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn init(&mut self, options: HandlerOptions) {
        self.lifecycle.init(options);
    }

    pub fn state(&self) -> HandlerState {
        self.lifecycle.get()
    }

    /// Forward packets until `cancel` fires or the session is lost for good.
    ///
    /// # Panics
    ///
    /// Panics if the handler was never initialized.
    pub async fn serve(
        &self,
        device: Arc<dyn PacketDevice>,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        let options = self.lifecycle.options();
        self.lifecycle.set(HandlerState::Running);

        let result = match forward_target(&options) {
            Ok(target) => {
                info!("Forwarding {} packets to {}", device.name(), target);
                Forwarder::new(&options, device, target).run(cancel).await
            }
            Err(e) => Err(e),
        };

        self.lifecycle.set(match result {
            Ok(()) => HandlerState::Stopped,
            Err(_) => HandlerState::Failed,
        });
        result
    }
}

impl Default for TunHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Where the far end of the packet session lives: the node's remote, or the
/// hop itself when only a chain is given
fn forward_target(options: &HandlerOptions) -> Result<String, HandlerError> {
    if let Some(remote) = &options.node.remote {
        return Ok(remote.clone());
    }
    match options.chain.hop() {
        Some(hop) => Ok(hop.node.addr.clone()),
        None => Err(HandlerError::Configuration(format!(
            "{} has no remote and no forwarding hop",
            options.node
        ))),
    }
}

/// Should a packet leave through the session? An empty table forwards everything.
fn routable(routes: &[Route], packet: &[u8]) -> bool {
    if routes.is_empty() {
        return true;
    }
    match destination_ip(packet) {
        Some(dst) => match find_route(routes, dst) {
            Some(_) => true,
            None => {
                trace!("No route for {}, dropping packet", dst);
                false
            }
        },
        None => {
            trace!("Dropping non-IP packet ({} bytes)", packet.len());
            false
        }
    }
}

struct Forwarder<'a> {
    options: &'a HandlerOptions,
    device: Arc<dyn PacketDevice>,
    target: String,
    session: Option<PacketSession>,
}

impl<'a> Forwarder<'a> {
    fn new(options: &'a HandlerOptions, device: Arc<dyn PacketDevice>, target: String) -> Self {
        Self {
            options,
            device,
            target,
            session: None,
        }
    }

    async fn run(mut self, cancel: CancellationToken) -> Result<(), HandlerError> {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        let device = self.device.clone();

        let result = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Forwarding on {} cancelled", device.name());
                    break Ok(());
                }

                read = device.recv(&mut buf) => {
                    let n = match read {
                        Ok(n) => n,
                        Err(e) => break Err(e.into()),
                    };
                    if n == 0 || !routable(&self.options.routes, &buf[..n]) {
                        continue;
                    }
                    if let Err(e) = self.outbound(&buf[..n]).await {
                        break Err(e);
                    }
                }

                inbound = next_packet(&mut self.session) => {
                    let failure = match inbound {
                        Ok(Some(packet)) => match device.send(&packet).await {
                            Ok(()) => continue,
                            Err(e) => break Err(e.into()),
                        },
                        Ok(None) => FrameError::Io(std::io::ErrorKind::UnexpectedEof.into()),
                        Err(e) => e,
                    };
                    warn!("Session to {} failed: {}", self.target, failure);
                    if let Err(e) = self.redial().await {
                        break Err(e);
                    }
                }
            }
        };

        if let Some(session) = self.session.take() {
            session.close().await;
        }
        result
    }

    /// Send one packet, dialing the session on first use and re-dialing
    /// once if the send fails
    async fn outbound(&mut self, packet: &[u8]) -> Result<(), HandlerError> {
        if self.session.is_none() {
            self.session = Some(self.options.chain.dial_packets(&self.target).await?);
            debug!("Packet session to {} established", self.target);
        }

        if let Some(session) = self.session.as_mut() {
            match session.send_packet(packet).await {
                Ok(()) => return Ok(()),
                Err(e) => warn!("Session to {} failed: {}", self.target, e),
            }
        }

        self.redial().await?;
        match self.session.as_mut() {
            Some(session) => session
                .send_packet(packet)
                .await
                .map_err(HandlerError::from),
            None => Ok(()),
        }
    }

    async fn redial(&mut self) -> Result<(), HandlerError> {
        if let Some(old) = self.session.take() {
            old.close().await;
        }
        let session = self
            .options
            .chain
            .dial_packets(&self.target)
            .await
            .map_err(HandlerError::SessionLost)?;
        info!("Packet session to {} re-established", self.target);
        self.session = Some(session);
        Ok(())
    }
}

/// Next packet from the session; pending forever while there is none
async fn next_packet(session: &mut Option<PacketSession>) -> Result<Option<Bytes>, FrameError> {
    match session {
        Some(session) => session.recv_packet().await,
        None => std::future::pending().await,
    }
}
