//! Test fixtures for integration testing
//!
//! This module provides a reusable context wiring every maintenance job to one
//! pair of seeded stores.

mod maintenance_context;

pub use maintenance_context::{MaintenanceTestContext, TableSnapshot};
