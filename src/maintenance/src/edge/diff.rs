//! Edge set difference.

use std::collections::BTreeSet;

use super::{EdgeDiffResult, ForeignKeyEdge};

/// Mutations that turn the `old` edge set into the `new` one.
///
/// Additions are `new - old` and removals `old - new`, compared on the full
/// edge tuple. Both lists come back sorted and free of duplicates, so the
/// result is deterministic regardless of input order. Edges with an
/// unresolved target type take part like any other edge.
pub fn compute_diff(old: &[ForeignKeyEdge], new: &[ForeignKeyEdge]) -> EdgeDiffResult {
    let old: BTreeSet<&ForeignKeyEdge> = old.iter().collect();
    let new: BTreeSet<&ForeignKeyEdge> = new.iter().collect();

    EdgeDiffResult {
        additions: new.difference(&old).map(|edge| (*edge).clone()).collect(),
        removals: old.difference(&new).map(|edge| (*edge).clone()).collect(),
    }
}
