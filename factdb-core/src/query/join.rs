//! Join declaration validation
//!
//! Declared roots and join comparisons form an undirected graph. A query is
//! valid when every join links exactly two distinct declared roots and the
//! graph is connected.

use super::ast::{Comparison, Condition};
use super::path::Root;
use crate::error::{FactDbError, Result};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// One declared join
#[derive(Debug, Clone, PartialEq)]
pub enum JoinSpec {
    /// Comparison between fields of two roots
    Condition(Condition),
    /// Unconstrained cross-product between two roots
    Cross(Root, Root),
}

impl From<Condition> for JoinSpec {
    fn from(condition: Condition) -> Self {
        JoinSpec::Condition(condition)
    }
}

/// Cross-product marker between two roots
pub fn cross(a: &Root, b: &Root) -> JoinSpec {
    JoinSpec::Cross(a.clone(), b.clone())
}

impl JoinSpec {
    fn edge(&self, roots: &[Root]) -> Result<(Root, Root, Option<Comparison>)> {
        let (a, b, cmp) = match self {
            JoinSpec::Cross(a, b) => (a.clone(), b.clone(), None),
            JoinSpec::Condition(Condition::Compare(cmp)) => {
                let (a, b) = match (cmp.left.as_path(), cmp.right.as_path()) {
                    (Some(a), Some(b)) => (a.root().clone(), b.root().clone()),
                    _ => {
                        return Err(FactDbError::join(format!(
                            "join '{}' must compare fields of two roots",
                            cmp
                        )))
                    }
                };
                (a, b, Some(cmp.clone()))
            }
            JoinSpec::Condition(other) => {
                return Err(FactDbError::join(format!(
                    "join '{}' must be a single comparison between two roots",
                    other
                )))
            }
        };
        for root in [&a, &b] {
            if !roots.contains(root) {
                return Err(FactDbError::schema(format!(
                    "join references undeclared root '{}'",
                    root
                )));
            }
        }
        if a == b {
            return Err(FactDbError::join(format!(
                "join must name two distinct roots, got '{}' twice",
                a
            )));
        }
        Ok((a, b, cmp))
    }
}

/// Check joins against the declared roots and return the join comparisons.
///
/// Cross markers take part in the connectivity check and are then dropped.
pub fn validate_joins(roots: &[Root], joins: &[JoinSpec]) -> Result<Vec<Comparison>> {
    let mut graph: BTreeMap<Root, BTreeSet<Root>> =
        roots.iter().map(|r| (r.clone(), BTreeSet::new())).collect();
    let mut comparisons = Vec::new();

    for join in joins {
        let (a, b, cmp) = join.edge(roots)?;
        graph.entry(a.clone()).or_default().insert(b.clone());
        graph.entry(b).or_default().insert(a);
        comparisons.extend(cmp);
    }

    if roots.len() <= 1 {
        return Ok(comparisons);
    }

    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([roots[0].clone()]);
    while let Some(root) = queue.pop_front() {
        if !seen.insert(root.clone()) {
            continue;
        }
        if let Some(next) = graph.get(&root) {
            queue.extend(next.iter().filter(|r| !seen.contains(*r)).cloned());
        }
    }

    if let Some(missing) = roots.iter().find(|r| !seen.contains(*r)) {
        return Err(FactDbError::join(format!(
            "root '{}' is not joined to the rest of the query",
            missing
        )));
    }
    Ok(comparisons)
}
