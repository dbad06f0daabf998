//! Test utilities for rowkeeper.
//!
//! This module provides reusable test utilities for creating test configurations,
//! setting up in-memory stores, and injecting store failures.
//!
//! # Feature Flag
//!
//! This module is only available when the `testing` feature is enabled or during tests:
//!
//! ```toml
//! [dependencies]
//! common = { path = "../common", features = ["testing"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use common::testing::{FaultKind, FlakyTableStore, memory_table_store};
//!
//! let store = FlakyTableStore::new(memory_table_store())
//!     .fail_batch(1, FaultKind::Transient);
//! ```

mod config_builder;
mod flaky;

pub use config_builder::TestConfigBuilder;
pub use flaky::{FaultKind, FlakyDocumentStore, FlakyTableStore};

use object_store::memory::InMemory;
use std::sync::Arc;

use crate::document::{DocumentStore, ObjectDocumentStore};
use crate::table::{ObjectTableStore, TableStore};

/// Prefix used by every in-memory store handed out here.
pub const TEST_PREFIX: &str = "rowkeeper-test";

/// Empty table store over a fresh [`InMemory`] object store.
pub fn memory_table_store() -> Arc<dyn TableStore> {
    Arc::new(ObjectTableStore::new(Arc::new(InMemory::new()), TEST_PREFIX))
}

/// Empty document store over a fresh [`InMemory`] object store.
pub fn memory_document_store() -> Arc<dyn DocumentStore> {
    Arc::new(ObjectDocumentStore::new(
        Arc::new(InMemory::new()),
        TEST_PREFIX,
    ))
}
