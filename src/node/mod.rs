//! Endpoint descriptors
//!
//! A node is written as `scheme://addr[/remote][?key=value&...]` where the
//! scheme is either `protocol` or `protocol+transport`:
//!
//! ```text
//! tcp://:8080?target=10.0.0.5:80
//! tcp+tls://gateway.example.com:443?sni=gateway.example.com
//! tun:///10.233.0.1:8422?net=223.254.0.100/16&route=10.0.0.0/8,172.16.0.0/12&mtu=1350
//! ```

mod route;

pub use route::{find_route, parse_routes, Route};

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Node parsing errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NodeError {
    /// The descriptor is absent or blank. Callers treat this as "no hop".
    #[error("empty node")]
    EmptyNode,

    #[error("invalid node specification `{spec}`: {reason}")]
    InvalidSpecification { spec: String, reason: String },
}

impl NodeError {
    fn invalid(spec: &str, reason: impl Into<String>) -> Self {
        NodeError::InvalidSpecification {
            spec: spec.to_string(),
            reason: reason.into(),
        }
    }
}

/// Application protocol spoken on a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Tun,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Tun => "tun",
        }
    }

    /// Transport used when the scheme names only the protocol
    pub fn default_transport(&self) -> Transport {
        match self {
            Protocol::Tcp => Transport::Tcp,
            Protocol::Tun => Transport::Tun,
        }
    }
}

impl FromStr for Protocol {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "tun" => Ok(Protocol::Tun),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the raw connection to a node is carried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Tcp,
    Tls,
    Tun,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Tls => "tls",
            Transport::Tun => "tun",
        }
    }

    /// Whether this transport is a byte stream (and so needs `host:port`)
    pub fn is_stream(&self) -> bool {
        matches!(self, Transport::Tcp | Transport::Tls)
    }
}

impl FromStr for Transport {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Transport::Tcp),
            "tls" => Ok(Transport::Tls),
            "tun" => Ok(Transport::Tun),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed endpoint descriptor. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub protocol: Protocol,
    pub transport: Transport,
    /// Local bind address for serve nodes, hop address for chain nodes
    pub addr: String,
    /// Far end for nodes that forward somewhere fixed (TUN peers)
    pub remote: Option<String>,
    options: HashMap<String, String>,
}

impl NodeSpec {
    /// Parse a textual descriptor
    pub fn parse(spec: &str) -> Result<Self, NodeError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(NodeError::EmptyNode);
        }

        let (scheme, rest) = spec
            .split_once("://")
            .ok_or_else(|| NodeError::invalid(spec, "missing `://`"))?;

        let (protocol, transport) = match scheme.split_once('+') {
            Some((p, t)) => {
                let protocol = p
                    .parse::<Protocol>()
                    .map_err(|_| NodeError::invalid(spec, format!("unknown protocol `{}`", p)))?;
                let transport = t
                    .parse::<Transport>()
                    .map_err(|_| NodeError::invalid(spec, format!("unknown transport `{}`", t)))?;
                (protocol, transport)
            }
            None => {
                let protocol = scheme.parse::<Protocol>().map_err(|_| {
                    NodeError::invalid(spec, format!("unknown protocol `{}`", scheme))
                })?;
                (protocol, protocol.default_transport())
            }
        };

        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };

        let (addr, remote) = match path.split_once('/') {
            Some((addr, remote)) if !remote.is_empty() => (addr, Some(remote.to_string())),
            Some((addr, _)) => (addr, None),
            None => (path, None),
        };

        if transport.is_stream() {
            validate_host_port(addr).map_err(|reason| NodeError::invalid(spec, reason))?;
        }

        let mut options = HashMap::new();
        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                if key.is_empty() {
                    return Err(NodeError::invalid(spec, format!("malformed option `{}`", pair)));
                }
                let value = percent_decode(value)
                    .ok_or_else(|| NodeError::invalid(spec, format!("bad escape in `{}`", pair)))?;
                options.insert(key.to_string(), value);
            }
        }

        Ok(Self {
            protocol,
            transport,
            addr: addr.to_string(),
            remote,
            options,
        })
    }

    /// Option value, or the empty string when unset
    pub fn get(&self, key: &str) -> &str {
        self.options.get(key).map(String::as_str).unwrap_or("")
    }

    /// Integer option; `None` when unset or not a number
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.options.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn options(&self) -> &HashMap<String, String> {
        &self.options
    }

    /// Address suitable for binding; a bare `:port` binds every interface
    pub fn bind_addr(&self) -> String {
        if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        }
    }

    /// Host part of `addr`, without brackets
    pub fn host(&self) -> &str {
        let host = match self.addr.rsplit_once(':') {
            Some((host, _)) => host,
            None => &self.addr,
        };
        host.trim_start_matches('[').trim_end_matches(']')
    }
}

impl fmt::Display for NodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.transport == self.protocol.default_transport() {
            write!(f, "{}://{}", self.protocol, self.addr)?;
        } else {
            write!(f, "{}+{}://{}", self.protocol, self.transport, self.addr)?;
        }
        if let Some(remote) = &self.remote {
            write!(f, "/{}", remote)?;
        }

        let mut keys: Vec<&String> = self.options.keys().collect();
        keys.sort();
        for (i, key) in keys.into_iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{}{}={}", sep, key, percent_encode(&self.options[key]))?;
        }
        Ok(())
    }
}

impl FromStr for NodeSpec {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn validate_host_port(addr: &str) -> Result<(), String> {
    let (_, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| format!("address `{}` has no port", addr))?;
    port.parse::<u16>()
        .map(|_| ())
        .map_err(|_| format!("invalid port `{}`", port))
}

fn percent_decode(value: &str) -> Option<String> {
    if !value.contains('%') {
        return Some(value.to_string());
    }

    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = value.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' => out.push_str("%25"),
            '&' => out.push_str("%26"),
            '=' => out.push_str("%3D"),
            '?' => out.push_str("%3F"),
            _ => out.push(c),
        }
    }
    out
}
