//! Output stage for query results
//!
//! Shapes the executor's tuples into values: projection or transform,
//! uniqueness, tuple forcing, grouping and the terminal operations.

use super::ast::Binding;
use super::executor::TupleStream;
use super::path::{Path, Root};
use super::planner::OrderKey;
use crate::error::{FactDbError, Result};
use crate::fact::Fact;
use crate::monitoring::QueryTracker;
use crate::value::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// User transform over the selected columns
pub type Transform = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// What each result row is made of
#[derive(Clone, Default)]
pub enum Selection {
    /// Every declared root, as whole facts
    #[default]
    Roots,
    /// Listed paths; a root path yields the whole fact
    Paths(Vec<Path>),
    /// Listed paths passed through a transform
    Transform { paths: Vec<Path>, func: Transform },
}

impl Selection {
    /// Paths read by this selection, `None` for all roots
    pub fn paths(&self) -> Option<&[Path]> {
        match self {
            Selection::Roots => None,
            Selection::Paths(paths) | Selection::Transform { paths, .. } => Some(paths),
        }
    }

    /// Roots whose facts a delete removes
    pub fn delete_targets(&self, roots: &[Root]) -> Vec<Root> {
        let selected: Vec<Root> = self
            .paths()
            .unwrap_or(&[])
            .iter()
            .filter(|p| p.is_root_path())
            .map(|p| p.root().clone())
            .collect();
        if selected.is_empty() {
            roots.to_vec()
        } else {
            roots.iter().filter(|r| selected.contains(r)).cloned().collect()
        }
    }
}

impl fmt::Debug for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::Roots => write!(f, "Roots"),
            Selection::Paths(paths) => f.debug_tuple("Paths").field(paths).finish(),
            Selection::Transform { paths, .. } => f
                .debug_struct("Transform")
                .field("paths", paths)
                .finish_non_exhaustive(),
        }
    }
}

/// Row shaping shared by a query's runs
#[derive(Debug, Clone)]
pub(crate) struct Projection {
    /// Roots in declaration order
    pub roots: Vec<Root>,
    pub selection: Selection,
    pub tuple: bool,
    pub order_keys: Vec<OrderKey>,
}

impl Projection {
    fn columns(&self, binding: &Binding<'_>) -> Option<Vec<Value>> {
        match self.selection.paths() {
            None => self
                .roots
                .iter()
                .map(|r| binding.fact(r).map(|f| Value::Fact(f.clone())))
                .collect(),
            Some(paths) => paths
                .iter()
                .map(|p| binding.resolve(p).map(|v| v.into_owned()))
                .collect(),
        }
    }

    /// Shape one tuple; rows with an unresolvable column are dropped
    fn project(&self, binding: &Binding<'_>) -> Option<Value> {
        let columns = self.columns(binding)?;
        let value = match &self.selection {
            Selection::Transform { func, .. } => {
                let out = func(&columns);
                if self.tuple {
                    Value::Tuple(vec![out])
                } else {
                    out
                }
            }
            _ if columns.len() == 1 && !self.tuple => columns.into_iter().next()?,
            _ => Value::Tuple(columns),
        };
        Some(value)
    }

    fn group_key(&self, binding: &Binding<'_>, n: usize) -> Option<Value> {
        let mut key: Vec<Value> = self.order_keys[..n]
            .iter()
            .map(|k| binding.resolve(&k.path).map(|v| v.into_owned()))
            .collect::<Option<_>>()?;
        if key.len() == 1 {
            key.pop()
        } else {
            Some(Value::Tuple(key))
        }
    }
}

/// Rows sharing the leading order keys
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub key: Value,
    pub values: Vec<Value>,
}

/// Lazy stream of result values
pub struct Output<'a> {
    tuples: TupleStream<'a>,
    join_roots: Vec<Root>,
    projection: Arc<Projection>,
    unique: bool,
    seen: BTreeSet<Value>,
    tracker: Option<QueryTracker>,
}

impl<'a> Output<'a> {
    pub(crate) fn new(
        tuples: TupleStream<'a>,
        join_roots: Vec<Root>,
        projection: Arc<Projection>,
        unique: bool,
        tracker: Option<QueryTracker>,
    ) -> Self {
        Self {
            tuples,
            join_roots,
            projection,
            unique,
            seen: BTreeSet::new(),
            tracker,
        }
    }

    fn next_row(&mut self) -> Option<(Vec<Fact>, Value)> {
        loop {
            let tuple = self.tuples.next()?;
            let value = match self.projection.project(&Binding::new(&self.join_roots, &tuple)) {
                Some(value) => value,
                None => continue,
            };
            if let Some(tracker) = self.tracker.as_mut() {
                tracker.record_row();
            }
            return Some((tuple, value));
        }
    }

    /// First result; fails when there is none
    pub fn first(mut self) -> Result<Value> {
        self.next().ok_or_else(|| FactDbError::Cardinality {
            expected: "at least one result".to_string(),
            found: 0,
        })
    }

    /// The only result; fails on zero or several
    pub fn singleton(mut self) -> Result<Value> {
        let first = self.next().ok_or_else(|| FactDbError::Cardinality {
            expected: "exactly one result".to_string(),
            found: 0,
        })?;
        match self.next() {
            None => Ok(first),
            Some(_) => Err(FactDbError::Cardinality {
                expected: "exactly one result".to_string(),
                found: 2 + self.count(),
            }),
        }
    }

    /// Group rows by their first `n` order keys.
    ///
    /// Rows arrive sorted by those keys, so every group is one contiguous
    /// run. With `unique`, values are deduplicated within each group.
    pub fn group_by(mut self, n: usize) -> Result<Vec<Group>> {
        let available = self.projection.order_keys.len();
        if n == 0 || n > available {
            return Err(FactDbError::Plan(format!(
                "group_by({}) needs between 1 and {} order keys",
                n, available
            )));
        }

        let mut groups: Vec<Group> = Vec::new();
        let mut seen: BTreeSet<Value> = BTreeSet::new();
        while let Some((tuple, value)) = self.next_row() {
            let key = match self
                .projection
                .group_key(&Binding::new(&self.join_roots, &tuple), n)
            {
                Some(key) => key,
                None => continue,
            };
            let same_group = groups.last().is_some_and(|g| g.key == key);
            if !same_group {
                seen.clear();
                groups.push(Group {
                    key,
                    values: Vec::new(),
                });
            }
            if self.unique && !seen.insert(value.clone()) {
                continue;
            }
            if let Some(group) = groups.last_mut() {
                group.values.push(value);
            }
        }
        Ok(groups)
    }
}

impl Iterator for Output<'_> {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        loop {
            let (_, value) = self.next_row()?;
            if self.unique && !self.seen.insert(value.clone()) {
                continue;
            }
            return Some(value);
        }
    }
}

impl fmt::Debug for Output<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output")
            .field("roots", &self.projection.roots)
            .field("selection", &self.projection.selection)
            .field("unique", &self.unique)
            .finish_non_exhaustive()
    }
}
