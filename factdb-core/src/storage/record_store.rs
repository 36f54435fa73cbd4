//! Per-type fact container

use crate::error::{FactDbError, Result};
use crate::fact::Fact;
use crate::index::FactIndex;
use crate::query::path::Path;
use crate::schema::RecordType;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// All facts of one record type plus their active indexes.
///
/// Every indexed fact is in the full set and every fact in the full set is
/// in each index.
#[derive(Debug, Clone)]
pub struct RecordStore {
    /// Record type of every stored fact
    record_type: Arc<RecordType>,
    /// Full fact set
    facts: BTreeSet<Fact>,
    /// Indexes keyed by field access sequence
    indexes: BTreeMap<Vec<usize>, FactIndex>,
}

impl RecordStore {
    /// Create an empty store
    pub fn new(record_type: Arc<RecordType>) -> Self {
        Self {
            record_type,
            facts: BTreeSet::new(),
            indexes: BTreeMap::new(),
        }
    }

    pub fn record_type(&self) -> &Arc<RecordType> {
        &self.record_type
    }

    /// Start indexing `path`, indexing existing facts immediately
    pub fn add_index(&mut self, path: &Path) -> Result<()> {
        if !path.root().record_type().same_layout(&self.record_type) {
            return Err(FactDbError::schema(format!(
                "cannot index '{}' in the store of '{}'",
                path, self.record_type.name
            )));
        }
        if self.indexes.contains_key(path.access()) {
            return Ok(());
        }
        let index = FactIndex::build(path.clone(), &self.facts)?;
        self.indexes.insert(path.access().to_vec(), index);
        Ok(())
    }

    /// Index on the field addressed by `path`, ignoring its alias
    pub fn index(&self, path: &Path) -> Option<&FactIndex> {
        self.indexes.get(path.access())
    }

    pub fn indexes(&self) -> impl Iterator<Item = &FactIndex> {
        self.indexes.values()
    }

    fn check_type(&self, fact: &Fact) -> Result<()> {
        if fact.record_type().same_layout(&self.record_type) {
            Ok(())
        } else {
            Err(FactDbError::schema(format!(
                "store of '{}' cannot hold fact '{}'",
                self.record_type, fact
            )))
        }
    }

    /// Add a fact; returns false when it was already present
    pub fn add(&mut self, fact: Fact) -> Result<bool> {
        self.check_type(&fact)?;
        if self.facts.contains(&fact) {
            return Ok(false);
        }
        for index in self.indexes.values_mut() {
            index.add(&fact)?;
        }
        self.facts.insert(fact);
        Ok(true)
    }

    /// Remove a fact, failing with `NotFound` when absent
    pub fn remove(&mut self, fact: &Fact) -> Result<()> {
        self.check_type(fact)?;
        if self.discard(fact) {
            Ok(())
        } else {
            Err(FactDbError::NotFound(format!("fact '{}' is not stored", fact)))
        }
    }

    /// Remove a fact if present; returns whether it was
    pub fn discard(&mut self, fact: &Fact) -> bool {
        if !self.facts.remove(fact) {
            return false;
        }
        for index in self.indexes.values_mut() {
            // the fact passed the type check on add, so this cannot fail
            let _ = index.remove(fact, false);
        }
        true
    }

    pub fn contains(&self, fact: &Fact) -> bool {
        self.facts.contains(fact)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fact> {
        self.facts.iter()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Remove every fact, keeping the index definitions
    pub fn clear(&mut self) {
        self.facts.clear();
        for index in self.indexes.values_mut() {
            index.clear();
        }
    }

    /// New store with the same indexes holding the selected facts
    fn with_facts<'a>(&self, facts: impl IntoIterator<Item = &'a Fact>) -> Result<RecordStore> {
        let mut store = RecordStore::new(self.record_type.clone());
        for index in self.indexes.values() {
            store.add_index(index.path())?;
        }
        for fact in facts {
            store.add(fact.clone())?;
        }
        Ok(store)
    }

    pub fn union(&self, other: &RecordStore) -> Result<RecordStore> {
        self.check_layout(other)?;
        self.with_facts(self.facts.union(&other.facts))
    }

    pub fn intersection(&self, other: &RecordStore) -> Result<RecordStore> {
        self.check_layout(other)?;
        self.with_facts(self.facts.intersection(&other.facts))
    }

    pub fn difference(&self, other: &RecordStore) -> Result<RecordStore> {
        self.check_layout(other)?;
        self.with_facts(self.facts.difference(&other.facts))
    }

    pub fn symmetric_difference(&self, other: &RecordStore) -> Result<RecordStore> {
        self.check_layout(other)?;
        self.with_facts(self.facts.symmetric_difference(&other.facts))
    }

    pub fn is_subset(&self, other: &RecordStore) -> bool {
        self.facts.is_subset(&other.facts)
    }

    fn check_layout(&self, other: &RecordStore) -> Result<()> {
        if self.record_type.same_layout(&other.record_type) {
            Ok(())
        } else {
            Err(FactDbError::schema(format!(
                "record type '{}' has conflicting layouts",
                self.record_type.name
            )))
        }
    }
}
