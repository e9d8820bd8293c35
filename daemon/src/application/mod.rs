//! Application layer: port trait definitions and use-case orchestration.
//!
//! This module depends only on `crate::domain`, never on `crate::infra`
//! or `crate::server`.

pub mod ports;
pub mod services;

pub use ports::{
    CommandRunner, RouteBackend, RouteSnapshotStore, Supervisor, TopologyProvider,
};
pub use services::routes::{RouteManager, RouteSettings};
