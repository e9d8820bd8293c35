//! `RouteBackend` over the `ip route` tool.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::application::ports::{CommandRunner, RouteBackend};
use crate::domain::{Family, RouteEntry, RouteError};

/// Applies routes with `ip -4|-6 route add|del <prefix> [via <gw>] dev <iface>`
/// and checks interfaces under `/sys/class/net`.
pub struct IpRouteBackend<R: CommandRunner> {
    runner: R,
    sysfs_net: PathBuf,
}

impl<R: CommandRunner> IpRouteBackend<R> {
    #[must_use]
    pub fn new(runner: R) -> Self {
        Self::with_sysfs(runner, PathBuf::from("/sys/class/net"))
    }

    /// Use another directory as the interface list (tests).
    #[must_use]
    pub fn with_sysfs(runner: R, sysfs_net: PathBuf) -> Self {
        Self { runner, sysfs_net }
    }

    async fn route(&self, verb: &str, iface: &str, route: &RouteEntry) -> Result<(), RouteError> {
        let args = route_args(verb, iface, route);
        debug!(cmd = %format!("ip {}", args.join(" ")), "route command");
        let output = self
            .runner
            .run("ip", &args)
            .await
            .map_err(|e| RouteError::Apply {
                network: route.network,
                reason: format!("{e:#}"),
            })?;
        if output.status.success() {
            return Ok(());
        }
        Err(classify_failure(route, &String::from_utf8_lossy(&output.stderr)))
    }
}

fn route_args(verb: &str, iface: &str, route: &RouteEntry) -> Vec<String> {
    let family = match route.family() {
        Family::V4 => "-4",
        Family::V6 => "-6",
    };
    let mut args = vec![
        family.to_string(),
        "route".to_string(),
        verb.to_string(),
        route.network.to_string(),
    ];
    if let Some(gateway) = route.gateway {
        args.push("via".to_string());
        args.push(gateway.to_string());
    }
    args.push("dev".to_string());
    args.push(iface.to_string());
    args
}

/// Map the kernel's complaint to a route outcome.
fn classify_failure(route: &RouteEntry, stderr: &str) -> RouteError {
    let network = route.network;
    if stderr.contains("File exists") {
        RouteError::Exists { network }
    } else if stderr.contains("No such process") || stderr.contains("Cannot find") {
        RouteError::Missing { network }
    } else {
        RouteError::Apply {
            network,
            reason: stderr.trim().to_string(),
        }
    }
}

#[async_trait]
impl<R: CommandRunner> RouteBackend for IpRouteBackend<R> {
    async fn interface_exists(&self, iface: &str) -> bool {
        if iface.is_empty() || iface.contains('/') {
            return false;
        }
        tokio::fs::try_exists(self.sysfs_net.join(iface))
            .await
            .unwrap_or(false)
    }

    async fn add(&self, iface: &str, route: &RouteEntry) -> Result<(), RouteError> {
        self.route("add", iface, route).await
    }

    async fn delete(&self, iface: &str, route: &RouteEntry) -> Result<(), RouteError> {
        self.route("del", iface, route).await
    }
}
