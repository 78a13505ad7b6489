//! Wire formats for datagram-over-stream encapsulation
//!
//! Packet frame:
//! ```text
//! +--------+--------+--------+-- ... --+
//! |  Length (2B, BE) |     Packet       |
//! +--------+--------+--------+-- ... --+
//! ```
//!
//! Handshake preamble, sent once by the tunnel connector before any frame:
//! ```text
//! +----+----+----+----+---------+---------+--------+--------+-- ... --+
//! |  Magic "HOPC" (4B) | Version | Network | Target len (2B)  | Target  |
//! +----+----+----+----+---------+---------+--------+--------+-- ... --+
//! ```

use super::Network;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Length prefix size in bytes
pub const FRAME_HEADER_SIZE: usize = 2;

/// Largest packet a frame can carry
pub const MAX_PACKET_SIZE: usize = u16::MAX as usize;

/// Preamble magic bytes
pub const PREAMBLE_MAGIC: [u8; 4] = *b"HOPC";

/// Preamble version understood by this build
pub const PREAMBLE_VERSION: u8 = 1;

/// Fixed part of the preamble (magic, version, network, target length)
pub const PREAMBLE_HEADER_SIZE: usize = 8;

/// Errors decoding encapsulated packets or the handshake preamble.
/// Fatal to the session that produced them.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Invalid frame length: {0}")]
    InvalidLength(usize),

    #[error("Truncated frame: expected {expected} bytes, got {received}")]
    Truncated { expected: usize, received: usize },

    #[error("Bad preamble magic")]
    BadMagic,

    #[error("Unsupported preamble version: {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid network type: {0}")]
    InvalidNetwork(u8),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Encode one packet as a length-prefixed frame
pub fn encode_packet(packet: &[u8]) -> Result<BytesMut, FrameError> {
    if packet.is_empty() || packet.len() > MAX_PACKET_SIZE {
        return Err(FrameError::InvalidLength(packet.len()));
    }

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + packet.len());
    buf.put_u16(packet.len() as u16);
    buf.extend_from_slice(packet);
    Ok(buf)
}

/// Decode one packet from the front of `buf`.
///
/// Returns `Ok(None)` until a whole frame is buffered.
pub fn decode_packet(buf: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }

    let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    if len == 0 {
        return Err(FrameError::InvalidLength(0));
    }

    if buf.len() < FRAME_HEADER_SIZE + len {
        return Ok(None);
    }

    buf.advance(FRAME_HEADER_SIZE);
    Ok(Some(buf.split_to(len).freeze()))
}

/// Target negotiation sent ahead of a tunneled session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preamble {
    pub network: Network,
    pub target: String,
}

impl Preamble {
    pub fn new(network: Network, target: impl Into<String>) -> Self {
        Self {
            network,
            target: target.into(),
        }
    }

    pub fn encode(&self) -> Result<BytesMut, FrameError> {
        let target = self.target.as_bytes();
        if target.is_empty() || target.len() > u16::MAX as usize {
            return Err(FrameError::InvalidTarget(self.target.clone()));
        }

        let mut buf = BytesMut::with_capacity(PREAMBLE_HEADER_SIZE + target.len());
        buf.extend_from_slice(&PREAMBLE_MAGIC);
        buf.put_u8(PREAMBLE_VERSION);
        buf.put_u8(self.network as u8);
        buf.put_u16(target.len() as u16);
        buf.extend_from_slice(target);
        Ok(buf)
    }

    pub async fn write<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<(), FrameError> {
        let buf = self.encode()?;
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }

    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, FrameError> {
        let mut header = [0u8; PREAMBLE_HEADER_SIZE];
        read_full(reader, &mut header).await?;

        if header[..4] != PREAMBLE_MAGIC {
            return Err(FrameError::BadMagic);
        }
        if header[4] != PREAMBLE_VERSION {
            return Err(FrameError::UnsupportedVersion(header[4]));
        }
        let network = Network::try_from(header[5])?;

        let len = u16::from_be_bytes([header[6], header[7]]) as usize;
        if len == 0 {
            return Err(FrameError::InvalidTarget(String::new()));
        }

        let mut target = vec![0u8; len];
        read_full(reader, &mut target).await?;
        let target = String::from_utf8(target)
            .map_err(|e| FrameError::InvalidTarget(String::from_utf8_lossy(e.as_bytes()).into_owned()))?;

        Ok(Self { network, target })
    }
}

/// Like `read_exact`, but reports how much arrived before EOF
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<(), FrameError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(FrameError::Truncated {
                expected: buf.len(),
                received: filled,
            });
        }
        filled += n;
    }
    Ok(())
}
