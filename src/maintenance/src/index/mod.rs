//! Derived index tables: foreign-key edges, orphaned references and node
//! locators.

pub mod indexer;
pub mod locator;
pub mod writer;

pub use indexer::{EdgeIndexer, ReconcileOutcome};
pub use locator::{NodeLocatorEntry, NodeLocatorIndex};
pub use writer::{BatchedIndexWriter, EdgeMutation, WriteSummary};
