//! Fact base: record stores of every type plus declared indexes

use super::record_store::RecordStore;
use crate::error::{FactDbError, Result};
use crate::fact::Fact;
use crate::query::builder::{Query, QueryBuilder};
use crate::query::path::{Path, Root};
use crate::schema::RecordType;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Collection of facts of many record types
#[derive(Debug, Clone, Default)]
pub struct FactBase {
    /// Stores by record type name
    stores: BTreeMap<String, RecordStore>,
    /// Declared index paths (unaliased)
    index_paths: Vec<Path>,
}

impl FactBase {
    /// Create an empty fact base
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty fact base that indexes the given fields.
    ///
    /// Fields flagged `indexed` in their record type are indexed as well.
    pub fn with_indexes(paths: impl IntoIterator<Item = Path>) -> Result<Self> {
        let mut fb = Self::new();
        for path in paths {
            let path = path.dealias();
            let record_type = path.root().record_type().clone();
            fb.store_for(&record_type)?.add_index(&path)?;
            if !fb.index_paths.contains(&path) {
                fb.index_paths.push(path);
            }
        }
        Ok(fb)
    }

    /// Build a fact base holding `facts`
    pub fn from_facts(facts: impl IntoIterator<Item = Fact>) -> Result<Self> {
        let mut fb = Self::new();
        fb.extend(facts)?;
        Ok(fb)
    }

    fn store_for(&mut self, record_type: &Arc<RecordType>) -> Result<&mut RecordStore> {
        if let Some(existing) = self.stores.get(&record_type.name) {
            if !existing.record_type().same_layout(record_type) {
                return Err(FactDbError::schema(format!(
                    "record type '{}' already stored with a different layout",
                    record_type.name
                )));
            }
        } else {
            let mut store = RecordStore::new(record_type.clone());
            for field in record_type.indexed_fields() {
                store.add_index(&Root::new(record_type).at(field)?)?;
            }
            for path in &self.index_paths {
                if path.root().record_type().same_layout(record_type) {
                    store.add_index(path)?;
                }
            }
            self.stores.insert(record_type.name.clone(), store);
        }
        self.stores.get_mut(&record_type.name).ok_or_else(|| {
            FactDbError::NotFound(format!("no store for record type '{}'", record_type.name))
        })
    }

    /// Add a fact; returns false when it was already present
    pub fn add(&mut self, fact: Fact) -> Result<bool> {
        let record_type = fact.record_type().clone();
        self.store_for(&record_type)?.add(fact)
    }

    /// Add many facts; returns how many were new
    pub fn extend(&mut self, facts: impl IntoIterator<Item = Fact>) -> Result<usize> {
        let mut added = 0;
        for fact in facts {
            if self.add(fact)? {
                added += 1;
            }
        }
        debug!(added, total = self.len(), "Extended fact base");
        Ok(added)
    }

    /// Remove a fact, failing with `NotFound` when absent
    pub fn remove(&mut self, fact: &Fact) -> Result<()> {
        match self.stores.get_mut(fact.type_name()) {
            Some(store) => store.remove(fact),
            None => Err(FactDbError::NotFound(format!("fact '{}' is not stored", fact))),
        }
    }

    /// Remove a fact if present; returns whether it was
    pub fn discard(&mut self, fact: &Fact) -> bool {
        self.stores
            .get_mut(fact.type_name())
            .map_or(false, |store| store.discard(fact))
    }

    pub fn contains(&self, fact: &Fact) -> bool {
        self.stores
            .get(fact.type_name())
            .map_or(false, |store| store.contains(fact))
    }

    /// Total number of facts
    pub fn len(&self) -> usize {
        self.stores.values().map(RecordStore::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.values().all(RecordStore::is_empty)
    }

    /// Remove every fact, keeping stores and index definitions
    pub fn clear(&mut self) {
        for store in self.stores.values_mut() {
            store.clear();
        }
        debug!("Cleared fact base");
    }

    /// All facts, ordered by type name then fact order
    pub fn iter(&self) -> impl Iterator<Item = &Fact> {
        self.stores.values().flat_map(RecordStore::iter)
    }

    /// Facts of one record type
    pub fn facts_of<'a>(&'a self, type_name: &str) -> impl Iterator<Item = &'a Fact> {
        self.stores.get(type_name).into_iter().flat_map(RecordStore::iter)
    }

    /// Store of one record type
    pub fn store(&self, type_name: &str) -> Option<&RecordStore> {
        self.stores.get(type_name)
    }

    pub fn stores(&self) -> impl Iterator<Item = &RecordStore> {
        self.stores.values()
    }

    /// Declared index paths
    pub fn index_paths(&self) -> &[Path] {
        &self.index_paths
    }

    /// Start a query over this fact base's indexes
    pub fn query<I, R>(&self, roots: I) -> QueryBuilder
    where
        I: IntoIterator<Item = R>,
        R: Into<Root>,
    {
        Query::builder(roots).with_indexes(self.indexed_paths())
    }

    /// Every indexed path: declared ones plus schema-flagged fields
    pub(crate) fn indexed_paths(&self) -> Vec<Path> {
        let mut paths = self.index_paths.clone();
        for store in self.stores.values() {
            for index in store.indexes() {
                if !paths.contains(index.path()) {
                    paths.push(index.path().clone());
                }
            }
        }
        paths
    }

    fn combine(
        &self,
        other: &FactBase,
        op: impl Fn(&RecordStore, &RecordStore) -> Result<RecordStore>,
        keep_unmatched_self: bool,
        keep_unmatched_other: bool,
    ) -> Result<FactBase> {
        let mut result = FactBase {
            stores: BTreeMap::new(),
            index_paths: self.index_paths.clone(),
        };
        for path in &other.index_paths {
            if !result.index_paths.contains(path) {
                result.index_paths.push(path.clone());
            }
        }
        for (name, store) in &self.stores {
            let combined = match other.stores.get(name) {
                Some(theirs) => op(store, theirs)?,
                None if keep_unmatched_self => store.clone(),
                None => RecordStore::new(store.record_type().clone()),
            };
            result.stores.insert(name.clone(), combined);
        }
        for (name, store) in &other.stores {
            if !self.stores.contains_key(name) {
                let kept = if keep_unmatched_other {
                    store.clone()
                } else {
                    RecordStore::new(store.record_type().clone())
                };
                result.stores.insert(name.clone(), kept);
            }
        }
        Ok(result)
    }

    pub fn union(&self, other: &FactBase) -> Result<FactBase> {
        self.combine(other, RecordStore::union, true, true)
    }

    pub fn intersection(&self, other: &FactBase) -> Result<FactBase> {
        self.combine(other, RecordStore::intersection, false, false)
    }

    pub fn difference(&self, other: &FactBase) -> Result<FactBase> {
        self.combine(other, RecordStore::difference, true, false)
    }

    pub fn symmetric_difference(&self, other: &FactBase) -> Result<FactBase> {
        self.combine(other, RecordStore::symmetric_difference, true, true)
    }

    /// Whether every fact here is also in `other`
    pub fn is_subset(&self, other: &FactBase) -> bool {
        self.iter().all(|fact| other.contains(fact))
    }

    /// Text form: one `fact.` per line in sorted order
    pub fn to_text(&self) -> String {
        self.iter().map(|fact| format!("{}.\n", fact)).collect()
    }
}

impl PartialEq for FactBase {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.is_subset(other)
    }
}

impl fmt::Display for FactBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_text())
    }
}
