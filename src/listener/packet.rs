//! Packet listener backed by a TUN interface

use super::ListenerError;
use crate::tun::TunConfig;
use async_trait::async_trait;
use std::io;
use std::sync::Arc;

/// Something that reads and writes whole IP packets
#[async_trait]
pub trait PacketDevice: Send + Sync {
    /// Read one packet into `buf`, returning its length
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write one packet
    async fn send(&self, packet: &[u8]) -> io::Result<()>;

    fn name(&self) -> &str;

    fn mtu(&self) -> u16;
}

#[cfg(target_os = "linux")]
#[async_trait]
impl PacketDevice for crate::tun::TunDevice {
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        crate::tun::TunDevice::recv(self, buf).await
    }

    async fn send(&self, packet: &[u8]) -> io::Result<()> {
        crate::tun::TunDevice::send(self, packet).await.map(|_| ())
    }

    fn name(&self) -> &str {
        crate::tun::TunDevice::name(self)
    }

    fn mtu(&self) -> u16 {
        crate::tun::TunDevice::mtu(self)
    }
}

/// A single logical packet stream: the interface itself
#[derive(Clone)]
pub struct PacketListener {
    device: Arc<dyn PacketDevice>,
}

impl PacketListener {
    /// Create and configure a TUN interface. Failure is fatal for this
    /// listener and is not retried.
    #[cfg(target_os = "linux")]
    pub async fn open(config: &TunConfig) -> Result<Self, ListenerError> {
        let device = crate::tun::TunDevice::create(config).await?;
        Ok(Self::from_device(Arc::new(device)))
    }

    #[cfg(not(target_os = "linux"))]
    pub async fn open(_config: &TunConfig) -> Result<Self, ListenerError> {
        Err(crate::tun::TunError::Unsupported.into())
    }

    /// Wrap an already configured device
    pub fn from_device(device: Arc<dyn PacketDevice>) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &Arc<dyn PacketDevice> {
        &self.device
    }
}
