//! Route table domain types and pure helpers.
//!
//! Free of I/O and async; only `serde`, `ipnet`, `chrono` and `regex` are used here.

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Address family of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::V4 => "IPv4",
            Self::V6 => "IPv6",
        }
    }
}

/// A network prefix reachable through the emulation interface, optionally
/// via a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub network: IpNet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
}

impl RouteEntry {
    /// Build an entry, truncating the address to its network prefix.
    #[must_use]
    pub fn new(network: IpNet, gateway: Option<IpAddr>) -> Self {
        Self {
            network: network.trunc(),
            gateway,
        }
    }

    #[must_use]
    pub fn family(&self) -> Family {
        match self.network {
            IpNet::V4(_) => Family::V4,
            IpNet::V6(_) => Family::V6,
        }
    }
}

/// Routes announced for one peer host. Either family may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRoutes {
    pub v4: Option<RouteEntry>,
    pub v6: Option<RouteEntry>,
}

impl HostRoutes {
    #[must_use]
    pub fn get(&self, family: Family) -> Option<&RouteEntry> {
        match family {
            Family::V4 => self.v4.as_ref(),
            Family::V6 => self.v6.as_ref(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.v4.is_none() && self.v6.is_none()
    }

    /// Entries of `self` that `next` replaces or drops.
    #[must_use]
    pub fn superseded_by(&self, next: &HostRoutes) -> HostRoutes {
        HostRoutes {
            v4: self.v4.filter(|old| next.v4.as_ref() != Some(old)),
            v6: self.v6.filter(|old| next.v6.as_ref() != Some(old)),
        }
    }
}

/// A peer host as reported by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistantHost {
    pub name: String,
    pub v4: Option<Ipv4Net>,
    pub v6: Option<Ipv6Net>,
    pub gw_v4: Option<Ipv4Addr>,
    pub gw_v6: Option<Ipv6Addr>,
}

impl DistantHost {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            v4: None,
            v6: None,
            gw_v4: None,
            gw_v6: None,
        }
    }

    #[must_use]
    pub fn with_v4(mut self, network: Ipv4Net, gateway: Option<Ipv4Addr>) -> Self {
        self.v4 = Some(network);
        self.gw_v4 = gateway;
        self
    }

    #[must_use]
    pub fn with_v6(mut self, network: Ipv6Net, gateway: Option<Ipv6Addr>) -> Self {
        self.v6 = Some(network);
        self.gw_v6 = gateway;
        self
    }

    /// Normalized routes for this host.
    #[must_use]
    pub fn routes(&self) -> HostRoutes {
        HostRoutes {
            v4: self
                .v4
                .map(|net| RouteEntry::new(IpNet::V4(net), self.gw_v4.map(IpAddr::V4))),
            v6: self
                .v6
                .map(|net| RouteEntry::new(IpNet::V6(net), self.gw_v6.map(IpAddr::V6))),
        }
    }
}

/// Peer host name → routes, kept separately per address family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTable {
    v4: BTreeMap<String, RouteEntry>,
    v6: BTreeMap<String, RouteEntry>,
}

impl RouteTable {
    /// Store every family present in `routes`; absent families are left as-is.
    pub fn insert(&mut self, host: &str, routes: HostRoutes) {
        if let Some(entry) = routes.v4 {
            self.v4.insert(host.to_string(), entry);
        }
        if let Some(entry) = routes.v6 {
            self.v6.insert(host.to_string(), entry);
        }
    }

    pub fn remove_family(&mut self, host: &str, family: Family) -> Option<RouteEntry> {
        match family {
            Family::V4 => self.v4.remove(host),
            Family::V6 => self.v6.remove(host),
        }
    }

    /// Remove both families for `host`.
    pub fn remove(&mut self, host: &str) -> HostRoutes {
        HostRoutes {
            v4: self.v4.remove(host),
            v6: self.v6.remove(host),
        }
    }

    #[must_use]
    pub fn get(&self, host: &str) -> HostRoutes {
        HostRoutes {
            v4: self.v4.get(host).copied(),
            v6: self.v6.get(host).copied(),
        }
    }

    #[must_use]
    pub fn contains(&self, host: &str) -> bool {
        self.v4.contains_key(host) || self.v6.contains_key(host)
    }

    /// Every host with at least one family, sorted.
    #[must_use]
    pub fn hosts(&self) -> BTreeSet<String> {
        self.v4.keys().chain(self.v6.keys()).cloned().collect()
    }

    /// Number of distinct hosts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hosts().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }
}

/// On-disk form of the route table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSnapshot {
    pub saved_at: DateTime<Utc>,
    pub routes: BTreeMap<String, HostRoutes>,
}

impl RouteSnapshot {
    #[must_use]
    pub fn capture(table: &RouteTable) -> Self {
        let routes = table
            .hosts()
            .into_iter()
            .map(|host| {
                let routes = table.get(&host);
                (host, routes)
            })
            .collect();
        Self {
            saved_at: Utc::now(),
            routes,
        }
    }

    #[must_use]
    pub fn into_table(self) -> RouteTable {
        let mut table = RouteTable::default();
        for (host, routes) in self.routes {
            table.insert(&host, routes);
        }
        table
    }
}

#[allow(clippy::unwrap_used)]
static TERMINAL_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[^0-9]*([0-9]+)").unwrap());

/// Leading numeric identifier of a host name (`st12` → `12`), used as its
/// terminal id in the topology.
#[must_use]
pub fn terminal_id(host: &str) -> Option<&str> {
    TERMINAL_ID
        .captures(host)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
