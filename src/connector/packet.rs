//! Packet sessions: whole IP packets carried over a byte stream

use super::frame::{decode_packet, encode_packet, FrameError, FRAME_HEADER_SIZE};
use crate::transport::BoxedStream;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

const READ_BUFFER_SIZE: usize = 65536;

/// Reassembles packets from a stream that may split or merge writes
pub struct PacketReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
        }
    }

    /// Next packet, or `None` when the peer closed on a frame boundary.
    ///
    /// Cancel safe: partially received frames stay buffered.
    pub async fn recv_packet(&mut self) -> Result<Option<Bytes>, FrameError> {
        loop {
            if let Some(packet) = decode_packet(&mut self.buf)? {
                return Ok(Some(packet));
            }

            if self.inner.read_buf(&mut self.buf).await? == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(self.truncated());
            }
        }
    }

    fn truncated(&self) -> FrameError {
        let expected = if self.buf.len() < FRAME_HEADER_SIZE {
            FRAME_HEADER_SIZE
        } else {
            FRAME_HEADER_SIZE + u16::from_be_bytes([self.buf[0], self.buf[1]]) as usize
        };
        FrameError::Truncated {
            expected,
            received: self.buf.len(),
        }
    }
}

/// Writes packets as length-prefixed frames, in order
pub struct PacketWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn send_packet(&mut self, packet: &[u8]) -> Result<(), FrameError> {
        let frame = encode_packet(packet)?;
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), FrameError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// A live datagram-over-stream session
pub struct PacketSession {
    reader: PacketReader<ReadHalf<BoxedStream>>,
    writer: PacketWriter<WriteHalf<BoxedStream>>,
}

impl PacketSession {
    pub fn new(conn: BoxedStream) -> Self {
        let (read_half, write_half) = tokio::io::split(conn);
        Self {
            reader: PacketReader::new(read_half),
            writer: PacketWriter::new(write_half),
        }
    }

    pub async fn send_packet(&mut self, packet: &[u8]) -> Result<(), FrameError> {
        self.writer.send_packet(packet).await
    }

    pub async fn recv_packet(&mut self) -> Result<Option<Bytes>, FrameError> {
        self.reader.recv_packet().await
    }

    /// Split into owned halves so reads and writes can run independently
    pub fn into_split(
        self,
    ) -> (
        PacketReader<ReadHalf<BoxedStream>>,
        PacketWriter<WriteHalf<BoxedStream>>,
    ) {
        (self.reader, self.writer)
    }

    pub async fn close(mut self) {
        self.writer.shutdown().await.ok();
    }
}
