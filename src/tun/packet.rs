//! IP header inspection

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const IPV4_HEADER_MIN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;

/// IP packet version detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
    Unknown,
}

impl IpVersion {
    /// Detect IP version from the first nibble
    #[inline]
    pub fn from_packet(data: &[u8]) -> Self {
        match data.first().map(|b| b >> 4) {
            Some(4) => IpVersion::V4,
            Some(6) => IpVersion::V6,
            _ => IpVersion::Unknown,
        }
    }
}

/// Source address of an IPv4/IPv6 packet
pub fn source_ip(data: &[u8]) -> Option<IpAddr> {
    match IpVersion::from_packet(data) {
        IpVersion::V4 if data.len() >= IPV4_HEADER_MIN => {
            let src: [u8; 4] = data[12..16].try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(src)))
        }
        IpVersion::V6 if data.len() >= IPV6_HEADER_LEN => {
            let src: [u8; 16] = data[8..24].try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(src)))
        }
        _ => None,
    }
}

/// Destination address of an IPv4/IPv6 packet
pub fn destination_ip(data: &[u8]) -> Option<IpAddr> {
    match IpVersion::from_packet(data) {
        IpVersion::V4 if data.len() >= IPV4_HEADER_MIN => {
            let dst: [u8; 4] = data[16..20].try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(dst)))
        }
        IpVersion::V6 if data.len() >= IPV6_HEADER_LEN => {
            let dst: [u8; 16] = data[24..40].try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(dst)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_packet(src: [u8; 4], dst: [u8; 4]) -> Vec<u8> {
        let mut p = vec![0u8; 20];
        p[0] = 0x45;
        p[12..16].copy_from_slice(&src);
        p[16..20].copy_from_slice(&dst);
        p
    }

    #[test]
    fn test_ip_version_detection() {
        assert_eq!(IpVersion::from_packet(&[0x45, 0x00]), IpVersion::V4);
        assert_eq!(IpVersion::from_packet(&[0x60, 0x00]), IpVersion::V6);
        assert_eq!(IpVersion::from_packet(&[]), IpVersion::Unknown);
        assert_eq!(IpVersion::from_packet(&[0x10]), IpVersion::Unknown);
    }

    #[test]
    fn test_ipv4_addresses() {
        let p = ipv4_packet([223, 254, 0, 100], [10, 1, 2, 3]);
        assert_eq!(source_ip(&p), Some("223.254.0.100".parse().unwrap()));
        assert_eq!(destination_ip(&p), Some("10.1.2.3".parse().unwrap()));
    }

    #[test]
    fn test_ipv6_destination() {
        let mut p = vec![0u8; 40];
        p[0] = 0x60;
        p[24] = 0xfd;
        p[39] = 0x01;
        assert_eq!(destination_ip(&p), Some("fd00::1".parse().unwrap()));
    }

    #[test]
    fn test_short_packets() {
        assert_eq!(destination_ip(&[0x45; 19]), None);
        assert_eq!(destination_ip(&[0x60; 39]), None);
    }
}
