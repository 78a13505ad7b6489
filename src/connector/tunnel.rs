//! Datagram-over-stream tunnel connector
//!
//! Lets traffic that only a stream can carry through restrictive
//! infrastructure (raw IP packets from a TUN device) ride a TCP or TLS
//! connection to a hop. The hop learns the final target from a
//! [`Preamble`] and relays the rest opaquely.

use super::{Connector, ConnectorError, Network, Preamble, Session};
use crate::transport::BoxedStream;
use async_trait::async_trait;
use tracing::trace;

#[derive(Debug, Clone, Copy, Default)]
pub struct TunnelConnector;

#[async_trait]
impl Connector for TunnelConnector {
    async fn connect(
        &self,
        mut conn: BoxedStream,
        network: Network,
        target: &str,
    ) -> Result<Session, ConnectorError> {
        Preamble::new(network, target).write(&mut conn).await?;
        trace!("Sent {} preamble for {}", network, target);

        Ok(Session::from_conn(conn, network))
    }

    fn name(&self) -> &'static str {
        "tunnel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_preamble_then_packets() {
        let (client, mut server) = tokio::io::duplex(4096);

        let session = TunnelConnector
            .connect(Box::new(client), Network::Datagram, "10.233.0.1:8422")
            .await
            .unwrap();

        let preamble = Preamble::read(&mut server).await.unwrap();
        assert_eq!(preamble.network, Network::Datagram);
        assert_eq!(preamble.target, "10.233.0.1:8422");

        let Session::Packet(mut session) = session else {
            panic!("expected a packet session");
        };
        session.send_packet(b"\x45abc").await.unwrap();

        let mut reader = crate::connector::PacketReader::new(server);
        assert_eq!(&reader.recv_packet().await.unwrap().unwrap()[..], b"\x45abc");
    }
}
