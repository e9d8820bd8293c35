//! Domain layer: pure types, parsing, and validation.
//!
//! This module has zero imports from `crate::infra`, `crate::server`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`
//! sockets. All functions are synchronous and take data in, returning data out.

pub mod config;
pub mod error;
pub mod routes;
pub mod topology;

pub use config::{BinarySpec, DaemonConfig, Role, validate_config};
pub use error::{
    ConfigError, PersistenceError, RouteError, SessionError, SupervisorError, TopologyError,
};
pub use routes::{DistantHost, Family, HostRoutes, RouteEntry, RouteSnapshot, RouteTable};
pub use topology::Topology;
