//! Linux TUN device

use super::{add_address, add_route, TunConfig, TunError};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use tokio::io::unix::AsyncFd;
use tracing::info;

const IFNAMSIZ: usize = 16;

// TUN flags (from linux/if_tun.h)
const IFF_TUN: libc::c_short = 0x0001;
const IFF_NO_PI: libc::c_short = 0x1000;

// Interface flags
const IFF_UP: libc::c_short = 0x1;
const IFF_RUNNING: libc::c_short = 0x40;

// libc::Ioctl is c_int on musl and c_ulong on glibc
type IoctlRequest = libc::Ioctl;

const TUNSETIFF: IoctlRequest = 0x400454ca_u32 as IoctlRequest;
const SIOCGIFFLAGS: IoctlRequest = 0x8913_u32 as IoctlRequest;
const SIOCSIFFLAGS: IoctlRequest = 0x8914_u32 as IoctlRequest;
const SIOCSIFMTU: IoctlRequest = 0x8922_u32 as IoctlRequest;

#[repr(C)]
struct IfReqFlags {
    ifr_name: [u8; IFNAMSIZ],
    ifr_flags: libc::c_short,
    _pad: [u8; 22],
}

#[repr(C)]
struct IfReqMtu {
    ifr_name: [u8; IFNAMSIZ],
    ifr_mtu: libc::c_int,
    _pad: [u8; 20],
}

fn ifr_name(name: &str) -> Result<[u8; IFNAMSIZ], TunError> {
    if name.len() >= IFNAMSIZ || name.contains('\0') {
        return Err(TunError::InvalidName(name.to_string()));
    }
    let mut buf = [0u8; IFNAMSIZ];
    buf[..name.len()].copy_from_slice(name.as_bytes());
    Ok(buf)
}

/// Control socket for SIOC* ioctls, closed on drop
struct ControlSocket(RawFd);

impl ControlSocket {
    fn open() -> Result<Self, TunError> {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(Self(fd))
    }

    fn ioctl<T>(&self, name: &'static str, request: IoctlRequest, arg: &mut T) -> Result<(), TunError> {
        let result = unsafe { libc::ioctl(self.0, request, arg as *mut T) };
        if result < 0 {
            return Err(TunError::Ioctl(name, io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl Drop for ControlSocket {
    fn drop(&mut self) {
        unsafe { libc::close(self.0) };
    }
}

/// An open, configured TUN interface
pub struct TunDevice {
    fd: AsyncFd<File>,
    name: String,
    mtu: u16,
}

impl TunDevice {
    /// Create the interface, assign its address and MTU, bring it up and
    /// install `config.routes`. Any failure leaves no half-configured device
    /// behind in this process.
    pub async fn create(config: &TunConfig) -> Result<Self, TunError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open("/dev/net/tun")
            .map_err(|e| match e.kind() {
                io::ErrorKind::PermissionDenied => TunError::PermissionDenied,
                _ => TunError::Open(e),
            })?;

        let mut ifr = IfReqFlags {
            ifr_name: ifr_name(&config.name)?,
            ifr_flags: IFF_TUN | IFF_NO_PI,
            _pad: [0; 22],
        };
        let result = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF, &mut ifr as *mut IfReqFlags) };
        if result < 0 {
            return Err(TunError::Ioctl("TUNSETIFF", io::Error::last_os_error()));
        }

        let name: String = ifr
            .ifr_name
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as char)
            .collect();
        info!("TUN device created: {}", name);

        let device = Self {
            fd: AsyncFd::new(file)?,
            name,
            mtu: config.mtu,
        };

        device.set_mtu(config.mtu)?;
        if let Some(addr) = &config.addr {
            add_address(addr, &device.name).await?;
        }
        device.bring_up()?;

        for route in &config.routes {
            add_route(route, &device.name).await?;
        }

        Ok(device)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    fn set_mtu(&self, mtu: u16) -> Result<(), TunError> {
        let mut ifr = IfReqMtu {
            ifr_name: ifr_name(&self.name)?,
            ifr_mtu: mtu as libc::c_int,
            _pad: [0; 20],
        };
        ControlSocket::open()?.ioctl("SIOCSIFMTU", SIOCSIFMTU, &mut ifr)
    }

    fn bring_up(&self) -> Result<(), TunError> {
        let sock = ControlSocket::open()?;
        let mut ifr = IfReqFlags {
            ifr_name: ifr_name(&self.name)?,
            ifr_flags: 0,
            _pad: [0; 22],
        };

        sock.ioctl("SIOCGIFFLAGS", SIOCGIFFLAGS, &mut ifr)?;
        ifr.ifr_flags |= IFF_UP | IFF_RUNNING;
        sock.ioctl("SIOCSIFFLAGS", SIOCSIFFLAGS, &mut ifr)?;

        info!("Interface {} is UP (mtu {})", self.name, self.mtu);
        Ok(())
    }

    /// Read one packet
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| inner.get_ref().read(buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Write one packet
    pub async fn send(&self, packet: &[u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|inner| inner.get_ref().write(packet)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsRawFd for TunDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
