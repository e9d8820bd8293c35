//! Application services: use-case orchestration over injected ports.

pub mod routes;
