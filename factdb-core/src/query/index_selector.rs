//! Index selector for choosing the prejoin key of a root
//!
//! Looks through the clauses of a root for a single comparison that an index
//! can answer directly.

use super::ast::{CompareOp, Comparison, Operand};
use super::normalize::ClauseBlock;
use super::path::Path;
use std::collections::BTreeSet;

/// Index selector over the set of indexed field paths
#[derive(Debug, Clone, Default)]
pub struct IndexSelector {
    /// Indexed paths, always on unaliased roots
    available_indexes: BTreeSet<Path>,
}

impl IndexSelector {
    /// Create a selector with no indexes
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a selector over the given indexed paths
    pub fn with_indexes(paths: impl IntoIterator<Item = Path>) -> Self {
        Self {
            available_indexes: paths.into_iter().map(|p| p.dealias()).collect(),
        }
    }

    /// Whether the field addressed by `path` is indexed, whatever its alias
    pub fn is_indexed(&self, path: &Path) -> bool {
        self.available_indexes.contains(&path.dealias())
    }

    pub fn len(&self) -> usize {
        self.available_indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.available_indexes.is_empty()
    }

    /// Position of the clause to use as prejoin key, if any.
    ///
    /// A candidate is a clause holding a single comparison between an indexed
    /// path and a literal or placeholder. Equality beats membership, which
    /// beats ranges, then inequality; ties go to the earliest clause.
    pub fn select_prejoin_key(&self, block: &ClauseBlock) -> Option<usize> {
        block
            .clauses()
            .iter()
            .enumerate()
            .filter_map(|(i, clause)| {
                let cmp = clause.as_comparison()?;
                self.usable(cmp).then(|| (Self::score(cmp.op), i))
            })
            .min()
            .map(|(_, i)| i)
    }

    /// Whether an index lookup answers `cmp` exactly.
    ///
    /// Indexes key on the native value order, so comparisons on fields with
    /// a custom ordering are never answered by one.
    pub fn usable(&self, cmp: &Comparison) -> bool {
        match (&cmp.left, &cmp.right) {
            (Operand::Path(path), right) => {
                right.is_constant() && cmp.has_native_order() && self.is_indexed(path)
            }
            _ => false,
        }
    }

    /// Lower is better
    pub fn score(op: CompareOp) -> u8 {
        match op {
            CompareOp::Eq => 0,
            CompareOp::In => 1,
            CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => 2,
            CompareOp::Ne => 3,
            CompareOp::NotIn => 4,
        }
    }
}
