//! Pass-through connector

use super::{Connector, ConnectorError, Network, Session};
use crate::transport::BoxedStream;
use async_trait::async_trait;

/// Uses the raw connection as-is. The dialed address is the target.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamConnector;

#[async_trait]
impl Connector for StreamConnector {
    async fn connect(
        &self,
        conn: BoxedStream,
        network: Network,
        _target: &str,
    ) -> Result<Session, ConnectorError> {
        Ok(Session::from_conn(conn, network))
    }

    fn name(&self) -> &'static str {
        "stream"
    }
}
