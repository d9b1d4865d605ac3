//! Integration test support for FleetCP
//!
//! The actual scenarios live in `tests/integration_tests.rs`; this crate
//! only provides the shared fixtures they build on. Everything here runs
//! against the control host itself, so the engine exercises the full
//! submit/schedule/finalize path without needing reachable SSH peers.

pub mod test_utils;
