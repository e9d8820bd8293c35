//! Unit tests for sand-daemon
//!
//! Route management runs against in-memory doubles; the supervisor and the
//! test runner spawn short-lived local programs only.

mod test_runner;
