//! Connectors: negotiate a logical session on top of a raw connection
//!
//! - [`StreamConnector`] passes the raw stream straight through
//! - [`TunnelConnector`] announces the target to the hop first, then carries
//!   either a byte stream or length-prefixed packets

mod frame;
mod packet;
mod stream;
mod tunnel;

pub use frame::{
    decode_packet, encode_packet, FrameError, Preamble, FRAME_HEADER_SIZE, MAX_PACKET_SIZE,
};
pub use packet::{PacketReader, PacketSession, PacketWriter};
pub use stream::StreamConnector;
pub use tunnel::TunnelConnector;

use crate::transport::BoxedStream;
use async_trait::async_trait;
use std::fmt;
use std::io;
use thiserror::Error;

/// Handshake errors
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
}

/// What kind of traffic a session carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Network {
    /// Ordered byte stream (TCP relay)
    Stream = 0x01,
    /// Whole packets framed inside the stream (TUN forwarding)
    Datagram = 0x02,
}

impl TryFrom<u8> for Network {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Network::Stream),
            0x02 => Ok(Network::Datagram),
            _ => Err(FrameError::InvalidNetwork(value)),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Stream => f.write_str("stream"),
            Network::Datagram => f.write_str("datagram"),
        }
    }
}

/// A connection produced by a successful chain dial
pub enum Session {
    Stream(BoxedStream),
    Packet(PacketSession),
}

impl Session {
    pub fn network(&self) -> Network {
        match self {
            Session::Stream(_) => Network::Stream,
            Session::Packet(_) => Network::Datagram,
        }
    }

    /// Wrap a raw connection in the session shape `network` asks for
    pub(crate) fn from_conn(conn: BoxedStream, network: Network) -> Self {
        match network {
            Network::Stream => Session::Stream(conn),
            Network::Datagram => Session::Packet(PacketSession::new(conn)),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session({})", self.network())
    }
}

/// Strategy that turns a raw connection into a session toward `target`
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        conn: BoxedStream,
        network: Network,
        target: &str,
    ) -> Result<Session, ConnectorError>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}
