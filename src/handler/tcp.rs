//! TCP relay handler

use super::{HandlerError, HandlerOptions, HandlerState, Lifecycle, HANDSHAKE_TIMEOUT};
use crate::connector::{FrameError, Network, PacketSession, Preamble, MAX_PACKET_SIZE};
use crate::transport::BoxedStream;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Relays each accepted connection to a target through the chain.
///
/// The target is the node's `target` option when set; otherwise the peer
/// announces it with a tunnel preamble and this node acts as a hop. A hop
/// relays stream sessions as bytes and datagram sessions packet by packet,
/// onward through its own chain or as UDP when it has no hop of its own.
#[derive(Debug, Clone)]
pub struct TcpHandler {
    lifecycle: Lifecycle,
}

impl TcpHandler {
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

    pub(crate) fn set_state(&self, state: HandlerState) {
        self.lifecycle.set(state);
    }

    /// Panics unless `init` has been called
    pub(crate) fn assert_initialized(&self) {
        self.lifecycle.options();
    }

    /// Relay one connection until either side closes or `cancel` fires.
    ///
    /// # Panics
    ///
    /// Panics if the handler was never initialized.
    pub async fn handle(
        &self,
        mut conn: BoxedStream,
        peer: SocketAddr,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        let options = self.lifecycle.options();
        let (network, target) = resolve_target(&options, &mut conn).await?;
        debug!("{} -> {} ({})", peer, target, network);

        match network {
            Network::Stream => relay_stream(&options, conn, peer, &target, cancel).await,
            Network::Datagram if options.chain.is_direct() => {
                relay_udp(conn, peer, &target, cancel).await
            }
            Network::Datagram => relay_packets(&options, conn, peer, &target, cancel).await,
        }
    }
}

impl Default for TcpHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Static targets are always streams; announced targets carry their network
async fn resolve_target(
    options: &Arc<HandlerOptions>,
    conn: &mut BoxedStream,
) -> Result<(Network, String), HandlerError> {
    let configured = options.node.get("target");
    if !configured.is_empty() {
        return Ok((Network::Stream, configured.to_string()));
    }

    let preamble = tokio::time::timeout(HANDSHAKE_TIMEOUT, Preamble::read(conn))
        .await
        .map_err(|_| HandlerError::Timeout)??;
    debug!("Peer requested {} {}", preamble.network, preamble.target);
    Ok((preamble.network, preamble.target))
}

async fn relay_stream(
    options: &HandlerOptions,
    mut conn: BoxedStream,
    peer: SocketAddr,
    target: &str,
    cancel: CancellationToken,
) -> Result<(), HandlerError> {
    let mut upstream = options.chain.dial_stream(target).await?;

    let copied = tokio::select! {
        copied = tokio::io::copy_bidirectional(&mut conn, &mut upstream) => Some(copied),
        _ = cancel.cancelled() => None,
    };

    conn.shutdown().await.ok();
    upstream.shutdown().await.ok();

    match copied {
        Some(copied) => {
            let (sent, received) = copied?;
            info!(
                "{} -> {} closed ({} bytes up, {} bytes down)",
                peer, target, sent, received
            );
        }
        None => debug!("Relay {} -> {} cancelled", peer, target),
    }
    Ok(())
}

/// Unpack a packet session into UDP datagrams to `target` and back
async fn relay_udp(
    conn: BoxedStream,
    peer: SocketAddr,
    target: &str,
    cancel: CancellationToken,
) -> Result<(), HandlerError> {
    let remote = tokio::net::lookup_host(target)
        .await?
        .next()
        .ok_or_else(|| HandlerError::Configuration(format!("{} did not resolve", target)))?;
    let local: SocketAddr = match remote {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(remote).await?;

    let (mut reader, mut writer) = PacketSession::new(conn).into_split();
    let mut buf = vec![0u8; MAX_PACKET_SIZE];
    let (mut sent, mut received) = (0usize, 0usize);

    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("UDP relay {} -> {} cancelled", peer, remote);
                break Ok(());
            }

            packet = reader.recv_packet() => match packet {
                Ok(Some(packet)) => {
                    if let Err(e) = socket.send(&packet).await {
                        break Err(e.into());
                    }
                    sent += 1;
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(HandlerError::from(e)),
            },

            datagram = socket.recv(&mut buf) => match datagram {
                Ok(0) => {}
                Ok(n) => {
                    if let Err(e) = writer.send_packet(&buf[..n]).await {
                        break Err(e.into());
                    }
                    received += 1;
                }
                // ICMP unreachable from an earlier send; the target may come back
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    debug!("{} refused a datagram", remote);
                }
                Err(e) => break Err(e.into()),
            },
        }
    };

    writer.shutdown().await.ok();
    info!(
        "{} -> udp {} closed ({} packets up, {} packets down)",
        peer, remote, sent, received
    );
    result
}

/// Carry a packet session onward through this node's own chain
async fn relay_packets(
    options: &HandlerOptions,
    conn: BoxedStream,
    peer: SocketAddr,
    target: &str,
    cancel: CancellationToken,
) -> Result<(), HandlerError> {
    let upstream = options.chain.dial_packets(target).await?;
    let (mut down_reader, mut down_writer) = PacketSession::new(conn).into_split();
    let (mut up_reader, mut up_writer) = upstream.into_split();

    let result: Result<(), FrameError> = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),

            packet = down_reader.recv_packet() => match packet {
                Ok(Some(packet)) => {
                    if let Err(e) = up_writer.send_packet(&packet).await {
                        break Err(e);
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            },

            packet = up_reader.recv_packet() => match packet {
                Ok(Some(packet)) => {
                    if let Err(e) = down_writer.send_packet(&packet).await {
                        break Err(e);
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            },
        }
    };

    down_writer.shutdown().await.ok();
    up_writer.shutdown().await.ok();
    debug!("Packet relay {} -> {} closed", peer, target);
    result.map_err(HandlerError::from)
}
