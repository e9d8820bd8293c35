//! Infrastructure layer: concrete implementations of the application ports.

pub mod command_runner;
pub mod config;
pub mod ip_route;
pub mod state;
pub mod supervisor;
pub mod test_runner;

pub use command_runner::TokioCommandRunner;
pub use config::{TopologyFile, load_config};
pub use ip_route::IpRouteBackend;
pub use state::{JsonRouteSnapshotStore, PidFile};
pub use supervisor::ProcessSupervisor;
pub use test_runner::{TestOutcome, TestRunner};
