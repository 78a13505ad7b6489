//! Interface address and route installation via iproute2

use super::TunError;
use crate::node::Route;
use ipnet::IpNet;
use tokio::process::Command;
use tracing::{debug, info};

/// Assign `addr` to `dev`. An address that is already present is not an error.
pub async fn add_address(addr: &IpNet, dev: &str) -> Result<(), TunError> {
    let addr = addr.to_string();
    run_ip(&["addr", "add", &addr, "dev", dev], true).await?;
    info!("Address {} set on {}", addr, dev);
    Ok(())
}

/// Route `route.destination` into `dev`, through its gateway when it has one
pub async fn add_route(route: &Route, dev: &str) -> Result<(), TunError> {
    let dest = route.destination.to_string();
    let gw = route.gateway.map(|gw| gw.to_string());

    let mut args = vec!["route", "replace", dest.as_str()];
    if let Some(gw) = gw.as_deref() {
        args.extend(["via", gw]);
    }
    args.extend(["dev", dev]);

    run_ip(&args, false).await?;
    info!("Route {} -> {}", route, dev);
    Ok(())
}

async fn run_ip(args: &[&str], tolerate_exists: bool) -> Result<(), TunError> {
    let command = format!("ip {}", args.join(" "));
    debug!("Running `{}`", command);

    let output = Command::new("ip").args(args).output().await?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if tolerate_exists && stderr.contains("File exists") {
        return Ok(());
    }
    Err(TunError::Command { command, stderr })
}
