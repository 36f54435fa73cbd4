//! B-tree fact index
//!
//! Maps each distinct value of one field path to the set of facts holding
//! that value. Keys with no facts are removed, so the key list always equals
//! the distinct values present.

use crate::error::{FactDbError, Result};
use crate::fact::Fact;
use crate::query::ast::CompareOp;
use crate::query::path::Path;
use crate::schema::FieldDescriptor;
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// Sorted secondary index over one field of one record type
#[derive(Debug, Clone)]
pub struct FactIndex {
    /// Indexed field (always on the unaliased root)
    path: Path,
    /// Distinct field value to the facts holding it
    tree: BTreeMap<Value, BTreeSet<Fact>>,
    /// Total number of indexed facts
    total_entries: usize,
}

impl FactIndex {
    /// Create an empty index over `path`
    pub fn new(path: Path) -> Self {
        Self {
            path: path.dealias(),
            tree: BTreeMap::new(),
            total_entries: 0,
        }
    }

    /// Build an index over existing facts
    pub fn build<'a>(path: Path, facts: impl IntoIterator<Item = &'a Fact>) -> Result<Self> {
        let mut index = Self::new(path);
        for fact in facts {
            index.add(fact)?;
        }
        Ok(index)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn key_of(&self, fact: &Fact) -> Result<Value> {
        let record_type = self.path.root().record_type();
        if !fact.record_type().same_layout(record_type) {
            return Err(FactDbError::schema(format!(
                "index on '{}' cannot hold a '{}' fact",
                self.path,
                fact.type_name()
            )));
        }
        let value = self.path.resolve(fact).ok_or_else(|| {
            FactDbError::schema(format!("fact '{}' has no value at '{}'", fact, self.path))
        })?;
        if let Some(field_type) = self.path.field_type() {
            if !field_type.accepts(&value) {
                return Err(FactDbError::schema(format!(
                    "index on '{}' expects {}, got '{}'",
                    self.path,
                    field_type.type_name(),
                    value
                )));
            }
        }
        Ok(value.into_owned())
    }

    /// Index a fact; adding a fact twice is a no-op
    pub fn add(&mut self, fact: &Fact) -> Result<()> {
        let key = self.key_of(fact)?;
        if self.tree.entry(key).or_default().insert(fact.clone()) {
            self.total_entries += 1;
        }
        Ok(())
    }

    /// Remove a fact.
    ///
    /// When `strict`, removing an absent fact is a `NotFound` error;
    /// otherwise it is ignored. Returns whether the fact was present.
    pub fn remove(&mut self, fact: &Fact, strict: bool) -> Result<bool> {
        let key = self.key_of(fact)?;
        let removed = match self.tree.get_mut(&key) {
            Some(facts) => {
                let removed = facts.remove(fact);
                if facts.is_empty() {
                    self.tree.remove(&key);
                }
                removed
            }
            None => false,
        };
        if removed {
            self.total_entries -= 1;
        } else if strict {
            return Err(FactDbError::NotFound(format!(
                "fact '{}' is not in the index on '{}'",
                fact, self.path
            )));
        }
        Ok(removed)
    }

    /// Facts whose indexed value satisfies `value <op> key`
    pub fn find(&self, op: CompareOp, key: &Value) -> BTreeSet<Fact> {
        match op {
            CompareOp::Eq => self.tree.get(key).cloned().unwrap_or_default(),
            CompareOp::Lt => self.collect((Bound::Unbounded, Bound::Excluded(key))),
            CompareOp::Le => self.collect((Bound::Unbounded, Bound::Included(key))),
            CompareOp::Gt => self.collect((Bound::Excluded(key), Bound::Unbounded)),
            CompareOp::Ge => self.collect((Bound::Included(key), Bound::Unbounded)),
            CompareOp::Ne => self
                .collect((Bound::Unbounded, Bound::Excluded(key)))
                .into_iter()
                .chain(self.collect((Bound::Excluded(key), Bound::Unbounded)))
                .collect(),
            CompareOp::In => key
                .as_tuple()
                .unwrap_or_default()
                .iter()
                .filter_map(|k| self.tree.get(k))
                .flatten()
                .cloned()
                .collect(),
            CompareOp::NotIn => {
                let excluded = key.as_tuple().unwrap_or_default();
                self.tree
                    .iter()
                    .filter(|(k, _)| !excluded.contains(k))
                    .flat_map(|(_, facts)| facts.iter().cloned())
                    .collect()
            }
        }
    }

    fn collect(&self, range: (Bound<&Value>, Bound<&Value>)) -> BTreeSet<Fact> {
        self.tree
            .range::<Value, _>(range)
            .flat_map(|(_, facts)| facts.iter().cloned())
            .collect()
    }

    /// Distinct indexed values in ascending order
    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.tree.keys()
    }

    /// Number of distinct keys
    pub fn key_count(&self) -> usize {
        self.tree.len()
    }

    /// Number of indexed facts
    pub fn len(&self) -> usize {
        self.total_entries
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn clear(&mut self) {
        self.tree.clear();
        self.total_entries = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::path::Root;
    use crate::schema::{FieldType, RecordType};
    use std::sync::Arc;

    fn person() -> Arc<RecordType> {
        RecordType::builder("person")
            .field("id", FieldType::Integer)
            .field("name", FieldType::String)
            .build()
            .unwrap()
    }

    fn fact(p: &Arc<RecordType>, id: i64, name: &str) -> Fact {
        Fact::new(p, vec![Value::Int(id), Value::from(name)]).unwrap()
    }

    fn ids(facts: BTreeSet<Fact>) -> Vec<i64> {
        facts.iter().filter_map(|f| f.get(0)?.as_int()).collect()
    }

    #[test]
    fn test_find_operators() {
        let p = person();
        let path = Root::new(&p).field("id").unwrap();
        let facts: Vec<Fact> = (1..=5).map(|i| fact(&p, i, "x")).collect();
        let index = FactIndex::build(path, &facts).unwrap();

        assert_eq!(ids(index.find(CompareOp::Eq, &Value::Int(3))), vec![3]);
        assert_eq!(ids(index.find(CompareOp::Lt, &Value::Int(3))), vec![1, 2]);
        assert_eq!(ids(index.find(CompareOp::Le, &Value::Int(3))), vec![1, 2, 3]);
        assert_eq!(ids(index.find(CompareOp::Gt, &Value::Int(3))), vec![4, 5]);
        assert_eq!(ids(index.find(CompareOp::Ge, &Value::Int(3))), vec![3, 4, 5]);
        assert_eq!(ids(index.find(CompareOp::Ne, &Value::Int(3))), vec![1, 2, 4, 5]);

        let set = Value::tuple([Value::Int(2), Value::Int(4), Value::Int(9)]);
        assert_eq!(ids(index.find(CompareOp::In, &set)), vec![2, 4]);
        assert_eq!(ids(index.find(CompareOp::NotIn, &set)), vec![1, 3, 5]);
    }

    #[test]
    fn test_remove_drops_empty_keys() {
        let p = person();
        let path = Root::new(&p).field("name").unwrap();
        let a = fact(&p, 1, "a");
        let b = fact(&p, 2, "a");
        let mut index = FactIndex::build(path, [&a, &b]).unwrap();
        assert_eq!(index.key_count(), 1);
        assert_eq!(index.len(), 2);

        assert!(index.remove(&a, true).unwrap());
        assert_eq!(index.key_count(), 1);
        assert!(index.remove(&b, true).unwrap());
        assert!(index.is_empty());

        assert!(matches!(index.remove(&a, true), Err(FactDbError::NotFound(_))));
        assert!(!index.remove(&a, false).unwrap());
    }

    #[test]
    fn test_add_mistyped_fact() {
        let p = person();
        let other = RecordType::builder("pet")
            .field("id", FieldType::Integer)
            .build()
            .unwrap();
        let mut index = FactIndex::new(Root::new(&p).field("id").unwrap());
        let pet = Fact::new(&other, vec![Value::Int(1)]).unwrap();
        assert!(matches!(index.add(&pet), Err(FactDbError::SchemaMismatch(_))));
    }
}
