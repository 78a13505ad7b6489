//! Subnet routes captured by a TUN listener

use ipnet::IpNet;
use std::fmt;
use std::net::IpAddr;
use tracing::debug;

/// A destination subnet and the gateway it is reached through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub destination: IpNet,
    pub gateway: Option<IpAddr>,
}

impl Route {
    pub fn new(destination: IpNet) -> Self {
        Self {
            destination,
            gateway: None,
        }
    }

    /// Whether `addr` falls inside this route's destination
    pub fn matches(&self, addr: IpAddr) -> bool {
        self.destination.contains(&addr)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.gateway {
            Some(gw) => write!(f, "{} via {}", self.destination, gw),
            None => write!(f, "{}", self.destination),
        }
    }
}

/// Build a route table from a comma-separated CIDR list.
///
/// Entries may carry their own gateway as `cidr@gateway`. Entries that do not
/// parse are skipped; routes without a gateway inherit `default_gw`.
pub fn parse_routes(route_list: &str, default_gw: Option<IpAddr>) -> Vec<Route> {
    let mut routes = Vec::new();

    for entry in route_list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (cidr, gateway) = match entry.split_once('@') {
            Some((cidr, gw)) => match gw.trim().parse::<IpAddr>() {
                Ok(gw) => (cidr.trim(), Some(gw)),
                Err(_) => {
                    debug!("Skipping route `{}`: bad gateway", entry);
                    continue;
                }
            },
            None => (entry, None),
        };

        match cidr.parse::<IpNet>() {
            Ok(destination) => routes.push(Route {
                destination,
                gateway: gateway.or(default_gw),
            }),
            Err(e) => debug!("Skipping route `{}`: {}", entry, e),
        }
    }

    routes
}

/// First route in list order that contains `addr`
pub fn find_route(routes: &[Route], addr: IpAddr) -> Option<&Route> {
    routes.iter().find(|r| r.matches(addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_gateway_inherited() {
        let gw: IpAddr = "192.168.1.1".parse().unwrap();
        let routes = parse_routes("10.0.0.0/8", Some(gw));

        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].destination, "10.0.0.0/8".parse::<IpNet>().unwrap());
        assert_eq!(routes[0].gateway, Some(gw));
    }

    #[test]
    fn test_malformed_entries_skipped() {
        let routes = parse_routes("10.0.0.0/8,bad-cidr,10.1.0.0/16", None);
        let dests: Vec<String> = routes.iter().map(|r| r.destination.to_string()).collect();
        assert_eq!(dests, vec!["10.0.0.0/8", "10.1.0.0/16"]);
    }

    #[test]
    fn test_per_route_gateway_wins() {
        let default_gw: IpAddr = "192.168.1.1".parse().unwrap();
        let routes = parse_routes(" 10.0.0.0/8@10.255.0.1 , 172.16.0.0/12 ", Some(default_gw));

        assert_eq!(routes[0].gateway, Some("10.255.0.1".parse().unwrap()));
        assert_eq!(routes[1].gateway, Some(default_gw));
    }

    #[test]
    fn test_empty_list() {
        assert!(parse_routes("", None).is_empty());
        assert!(parse_routes(",,", None).is_empty());
    }

    #[test]
    fn test_first_match_wins() {
        let routes = parse_routes("10.0.0.0/8@1.1.1.1,10.1.0.0/16@2.2.2.2,fd00::/8", None);

        let hit = find_route(&routes, "10.1.2.3".parse().unwrap()).unwrap();
        assert_eq!(hit.gateway, Some("1.1.1.1".parse().unwrap()));

        assert!(find_route(&routes, "fd00::1".parse().unwrap()).is_some());
        assert!(find_route(&routes, "8.8.8.8".parse().unwrap()).is_none());
    }
}
