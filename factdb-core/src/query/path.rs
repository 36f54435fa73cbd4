//! Roots and field paths
//!
//! A `Root` names one participant of a query: a record type, optionally under
//! an alias so the same type can be joined with itself. A `Path` addresses a
//! (possibly nested) field of a root. Comparison methods on a path build
//! [`Condition`] nodes instead of evaluating anything.

use super::ast::{CompareOp, Comparison, Condition, Operand};
use crate::error::{FactDbError, Result};
use crate::fact::Fact;
use crate::schema::{FieldType, RecordType};
use crate::value::Value;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A query root: record type plus alias discriminator
#[derive(Debug, Clone)]
pub struct Root {
    record_type: Arc<RecordType>,
    alias: Option<String>,
}

impl Root {
    /// The unaliased root of a record type
    pub fn new(record_type: &Arc<RecordType>) -> Self {
        Self {
            record_type: record_type.clone(),
            alias: None,
        }
    }

    /// A distinct handle on the same record type
    pub fn aliased(record_type: &Arc<RecordType>, alias: impl Into<String>) -> Self {
        Self {
            record_type: record_type.clone(),
            alias: Some(alias.into()),
        }
    }

    /// Alias this root's record type under another name
    pub fn alias(&self, alias: impl Into<String>) -> Self {
        Self::aliased(&self.record_type, alias)
    }

    pub fn record_type(&self) -> &Arc<RecordType> {
        &self.record_type
    }

    pub fn alias_name(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn is_alias(&self) -> bool {
        self.alias.is_some()
    }

    /// The unaliased root of the same record type
    pub fn dealias(&self) -> Root {
        Root::new(&self.record_type)
    }

    /// Path to the whole fact
    pub fn path(&self) -> Path {
        Path {
            root: self.clone(),
            access: Vec::new(),
            names: Vec::new(),
            field_type: None,
        }
    }

    /// Path to a top-level field by name
    pub fn field(&self, name: &str) -> Result<Path> {
        self.path().field(name)
    }

    /// Path to a top-level field by position
    pub fn at(&self, index: usize) -> Result<Path> {
        self.path().at(index)
    }

    fn key(&self) -> (&str, Option<&str>) {
        (&self.record_type.name, self.alias.as_deref())
    }
}

impl PartialEq for Root {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Root {}

impl PartialOrd for Root {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Root {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl Hash for Root {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{}", alias),
            None => write!(f, "{}", self.record_type.name),
        }
    }
}

impl From<&Arc<RecordType>> for Root {
    fn from(record_type: &Arc<RecordType>) -> Self {
        Root::new(record_type)
    }
}

impl From<&Root> for Root {
    fn from(root: &Root) -> Self {
        root.clone()
    }
}

/// Reference to a (sub)field of a root.
///
/// Identity is `(root, access)`; the cached names and type are derived.
#[derive(Debug, Clone)]
pub struct Path {
    root: Root,
    access: Vec<usize>,
    names: Vec<String>,
    field_type: Option<FieldType>,
}

impl Path {
    /// Sub-field by name (nested records only)
    pub fn field(&self, name: &str) -> Result<Path> {
        let index = match &self.field_type {
            None => self.root.record_type.field_index(name),
            Some(ft) => ft.sub_field_index(name),
        }
        .ok_or_else(|| {
            FactDbError::schema(format!("path '{}' has no field '{}'", self, name))
        })?;
        self.step(index, name.to_string())
    }

    /// Sub-field by position (nested records and tuples)
    pub fn at(&self, index: usize) -> Result<Path> {
        let name = match &self.field_type {
            None => self.root.record_type.field(index).map(|f| f.name.clone()),
            Some(FieldType::Complex(rt)) => rt.field(index).map(|f| f.name.clone()),
            Some(_) => Some(format!("[{}]", index)),
        }
        .unwrap_or_else(|| format!("[{}]", index));
        self.step(index, name)
    }

    fn step(&self, index: usize, name: String) -> Result<Path> {
        let field_type = match &self.field_type {
            None => self.root.record_type.field(index).map(|f| f.field_type.clone()),
            Some(ft) => ft.sub_field(index),
        }
        .ok_or_else(|| {
            FactDbError::schema(format!("path '{}' has no sub-field at position {}", self, index))
        })?;
        let mut access = self.access.clone();
        access.push(index);
        let mut names = self.names.clone();
        names.push(name);
        Ok(Path {
            root: self.root.clone(),
            access,
            names,
            field_type: Some(field_type),
        })
    }

    pub fn root(&self) -> &Root {
        &self.root
    }

    /// Positional access sequence from the root fact
    pub fn access(&self) -> &[usize] {
        &self.access
    }

    /// Field type of the addressed value; `None` for a whole-fact path
    pub fn field_type(&self) -> Option<&FieldType> {
        self.field_type.as_ref()
    }

    /// Whether this path addresses the whole fact
    pub fn is_root_path(&self) -> bool {
        self.access.is_empty()
    }

    /// Same field accessed through the unaliased root
    pub fn dealias(&self) -> Path {
        Path {
            root: self.root.dealias(),
            access: self.access.clone(),
            names: self.names.clone(),
            field_type: self.field_type.clone(),
        }
    }

    /// Same field accessed through another root of the same record type
    pub fn with_root(&self, root: &Root) -> Result<Path> {
        if !root.record_type.same_layout(&self.root.record_type) {
            return Err(FactDbError::schema(format!(
                "cannot move path '{}' onto root '{}' of another record type",
                self, root
            )));
        }
        Ok(Path {
            root: root.clone(),
            access: self.access.clone(),
            names: self.names.clone(),
            field_type: self.field_type.clone(),
        })
    }

    /// Resolve the addressed value within a fact of this path's root type
    pub fn resolve<'a>(&self, fact: &'a Fact) -> Option<Cow<'a, Value>> {
        let (first, rest) = match self.access.split_first() {
            None => return Some(Cow::Owned(Value::Fact(fact.clone()))),
            Some(split) => split,
        };
        let mut current = fact.get(*first)?;
        for index in rest {
            current = current.get(*index)?;
        }
        Some(Cow::Borrowed(current))
    }

    /// Whether the addressed values order by the native [`Value`] order
    pub fn has_native_order(&self) -> bool {
        self.field_type.as_ref().map_or(true, FieldType::has_native_order)
    }

    /// Order two resolved values with this field's descriptor
    pub fn compare_values(&self, a: &Value, b: &Value) -> Ordering {
        use crate::schema::FieldDescriptor;
        match &self.field_type {
            Some(ft) => ft.compare(a, b),
            None => a.cmp(b),
        }
    }

    fn compare(&self, op: CompareOp, other: impl Into<Operand>) -> Condition {
        Condition::Compare(Comparison::new(op, Operand::Path(self.clone()), other.into()))
    }

    /// `self == other`
    pub fn eq(&self, other: impl Into<Operand>) -> Condition {
        self.compare(CompareOp::Eq, other)
    }

    /// `self != other`
    pub fn ne(&self, other: impl Into<Operand>) -> Condition {
        self.compare(CompareOp::Ne, other)
    }

    /// `self < other`
    pub fn lt(&self, other: impl Into<Operand>) -> Condition {
        self.compare(CompareOp::Lt, other)
    }

    /// `self <= other`
    pub fn le(&self, other: impl Into<Operand>) -> Condition {
        self.compare(CompareOp::Le, other)
    }

    /// `self > other`
    pub fn gt(&self, other: impl Into<Operand>) -> Condition {
        self.compare(CompareOp::Gt, other)
    }

    /// `self >= other`
    pub fn ge(&self, other: impl Into<Operand>) -> Condition {
        self.compare(CompareOp::Ge, other)
    }

    /// Membership in a tuple literal or a placeholder bound to a tuple
    pub fn in_(&self, collection: impl Into<Operand>) -> Condition {
        self.compare(CompareOp::In, collection)
    }

    /// Non-membership in a tuple literal or a placeholder bound to a tuple
    pub fn not_in(&self, collection: impl Into<Operand>) -> Condition {
        self.compare(CompareOp::NotIn, collection)
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root && self.access == other.access
    }
}

impl Eq for Path {}

impl PartialOrd for Path {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Path {
    fn cmp(&self, other: &Self) -> Ordering {
        self.root
            .cmp(&other.root)
            .then_with(|| self.access.cmp(&other.access))
    }
}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.root.hash(state);
        self.access.hash(state);
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for name in &self.names {
            if name.starts_with('[') {
                write!(f, "{}", name)?;
            } else {
                write!(f, ".{}", name)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> Arc<RecordType> {
        RecordType::builder("address")
            .field("city", FieldType::String)
            .field("zip", FieldType::Integer)
            .build()
            .unwrap()
    }

    fn person() -> Arc<RecordType> {
        RecordType::builder("person")
            .field("id", FieldType::Integer)
            .field("home", FieldType::Complex(address()))
            .field("pair", FieldType::Tuple(vec![FieldType::Integer, FieldType::Symbol]))
            .build()
            .unwrap()
    }

    #[test]
    fn test_nested_paths() {
        let root = Root::new(&person());
        let city = root.field("home").unwrap().field("city").unwrap();
        assert_eq!(city.access(), &[1, 0]);
        assert_eq!(city.to_string(), "person.home.city");

        let second = root.field("pair").unwrap().at(1).unwrap();
        assert_eq!(second.to_string(), "person.pair[1]");
        assert!(root.field("pair").unwrap().at(2).is_err());
        assert!(root.field("nope").is_err());
        assert!(root.field("id").unwrap().field("x").is_err());
    }

    #[test]
    fn test_alias_identity() {
        let p = person();
        let base = Root::new(&p);
        let other = base.alias("p2");
        assert_ne!(base, other);
        assert_ne!(base.field("id").unwrap(), other.field("id").unwrap());
        assert_eq!(other.field("id").unwrap().dealias(), base.field("id").unwrap());
        assert_eq!(other.to_string(), "p2");
    }

    #[test]
    fn test_resolve() {
        let p = person();
        let home = Fact::new(&address(), vec![Value::from("Oslo"), Value::Int(150)]).unwrap();
        let fact = Fact::new(
            &p,
            vec![
                Value::Int(1),
                Value::Fact(home),
                Value::tuple([Value::Int(4), Value::symbol("x")]),
            ],
        )
        .unwrap();
        let root = Root::new(&p);
        let zip = root.field("home").unwrap().field("zip").unwrap();
        assert_eq!(zip.resolve(&fact).unwrap().into_owned(), Value::Int(150));
        let whole = root.path().resolve(&fact).unwrap().into_owned();
        assert_eq!(whole, Value::Fact(fact.clone()));
    }
}
