//! Virtual network interface (TUN)
//!
//! Linux only: the device is opened through `/dev/net/tun` with
//! `ioctl(TUNSETIFF)`, driven non-blocking through tokio's `AsyncFd`, and
//! configured (address, MTU, routes) before the first packet is read.

mod packet;
mod routing;

#[cfg(target_os = "linux")]
mod device;

pub use packet::{destination_ip, source_ip, IpVersion};
pub use routing::{add_address, add_route};

#[cfg(target_os = "linux")]
pub use device::TunDevice;

use crate::node::Route;
use ipnet::IpNet;
use std::io;
use std::net::IpAddr;
use thiserror::Error;

/// Default MTU when the node does not set one
pub const DEFAULT_MTU: u16 = 1500;

/// TUN setup errors
#[derive(Debug, Error)]
pub enum TunError {
    #[error("failed to open /dev/net/tun: {0}")]
    Open(io::Error),

    #[error("permission denied (CAP_NET_ADMIN required)")]
    PermissionDenied,

    #[error("invalid interface name: {0}")]
    InvalidName(String),

    #[error("ioctl {0} failed: {1}")]
    Ioctl(&'static str, io::Error),

    #[error("`{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("TUN devices are not supported on this platform")]
    Unsupported,
}

/// Everything needed to bring a TUN interface up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunConfig {
    /// Interface name; empty lets the kernel pick (`tun0`, `tun1`, ...)
    pub name: String,
    /// Interface address with prefix, e.g. `223.254.0.100/16`
    pub addr: Option<IpNet>,
    pub mtu: u16,
    /// Routes installed against the interface
    pub routes: Vec<Route>,
    /// Node-level default gateway
    pub gateway: Option<IpAddr>,
}

impl Default for TunConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            addr: None,
            mtu: DEFAULT_MTU,
            routes: Vec::new(),
            gateway: None,
        }
    }
}
