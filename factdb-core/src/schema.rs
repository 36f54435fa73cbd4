//! Record type definitions for FactDB
//!
//! This module provides the schema descriptor consumed by the fact store:
//! - RecordType: a named, field-ordered schema
//! - FieldType / FieldDescriptor: per-field conversion, comparison and defaults
//! - SchemaRegistry: record types by name

use crate::error::{FactDbError, Result};
use crate::fact::Fact;
use crate::value::Value;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Capabilities of a field type: host conversion, comparison and defaults.
///
/// Built-in field types implement this through [`FieldType`]; user types
/// plug in with [`FieldType::Custom`]. Indexes always key on the native
/// [`Value`] order, so comparisons on custom fields are evaluated with
/// `compare` and never answered by an index lookup.
pub trait FieldDescriptor: Send + Sync + fmt::Debug {
    /// Name of the type token, used in error messages and layout checks
    fn type_name(&self) -> String;

    /// Whether a native value belongs to this field type
    fn accepts(&self, value: &Value) -> bool;

    /// Convert a host value into a native value
    fn from_host(&self, host: &serde_json::Value) -> Result<Value>;

    /// Convert a native value back into a host value
    fn to_host(&self, value: &Value) -> Result<serde_json::Value>;

    /// Order two values of this type
    fn compare(&self, a: &Value, b: &Value) -> Ordering {
        a.cmp(b)
    }

    /// Type-level default, used when a field has no explicit default rule
    fn default_value(&self) -> Option<Value> {
        None
    }
}

/// Field type enumeration
#[derive(Debug, Clone)]
pub enum FieldType {
    /// 64-bit integer
    Integer,
    /// 64-bit floating point
    Float,
    /// Quoted string
    String,
    /// Bare symbolic constant
    Symbol,
    /// Boolean
    Bool,
    /// Date/time (RFC 3339 on the host side)
    DateTime,
    /// Fixed-arity tuple with per-position types
    Tuple(Vec<FieldType>),
    /// Nested record of another type
    Complex(Arc<RecordType>),
    /// User-supplied descriptor
    Custom(Arc<dyn FieldDescriptor>),
}

impl FieldType {
    /// Whether sub-paths can be taken through this field
    pub fn is_complex(&self) -> bool {
        matches!(self, FieldType::Tuple(_) | FieldType::Complex(_))
    }

    /// Type of the positional sub-field `index`, if this type is complex
    pub fn sub_field(&self, index: usize) -> Option<FieldType> {
        match self {
            FieldType::Tuple(items) => items.get(index).cloned(),
            FieldType::Complex(record_type) => {
                record_type.fields.get(index).map(|f| f.field_type.clone())
            }
            _ => None,
        }
    }

    /// Position of the named sub-field, if this type is a nested record
    pub fn sub_field_index(&self, name: &str) -> Option<usize> {
        match self {
            FieldType::Complex(record_type) => record_type.field_index(name),
            _ => None,
        }
    }

    /// Whether values of this type order by the native [`Value`] order
    pub fn has_native_order(&self) -> bool {
        !matches!(self, FieldType::Custom(_))
    }

    /// Native value of this type for a query constant.
    ///
    /// Integers widen to floats and strings name symbols; anything else must
    /// already be accepted by the type.
    pub fn fit(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (FieldType::Float, Value::Int(i)) => Some(Value::Float(*i as f64)),
            (FieldType::Symbol, Value::Str(s)) => Some(Value::symbol(s.as_str())),
            (FieldType::Tuple(items), Value::Tuple(values)) if items.len() == values.len() => items
                .iter()
                .zip(values)
                .map(|(t, v)| t.fit(v))
                .collect::<Option<Vec<_>>>()
                .map(Value::Tuple),
            _ if self.accepts(value) => Some(value.clone()),
            _ => None,
        }
    }
}

impl PartialEq for FieldType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldType::Tuple(a), FieldType::Tuple(b)) => a == b,
            (FieldType::Complex(a), FieldType::Complex(b)) => a.same_layout(b),
            (FieldType::Custom(a), FieldType::Custom(b)) => a.type_name() == b.type_name(),
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

fn host_mismatch(expected: &str, host: &serde_json::Value) -> FactDbError {
    FactDbError::conversion(format!("expected {} host value, got {}", expected, host))
}

fn native_mismatch(expected: &str, value: &Value) -> FactDbError {
    FactDbError::conversion(format!(
        "expected {} value, got {} '{}'",
        expected,
        value.kind_name(),
        value
    ))
}

impl FieldDescriptor for FieldType {
    fn type_name(&self) -> String {
        match self {
            FieldType::Integer => "integer".to_string(),
            FieldType::Float => "float".to_string(),
            FieldType::String => "string".to_string(),
            FieldType::Symbol => "symbol".to_string(),
            FieldType::Bool => "bool".to_string(),
            FieldType::DateTime => "datetime".to_string(),
            FieldType::Tuple(items) => {
                let names: Vec<String> = items.iter().map(|t| t.type_name()).collect();
                format!("({})", names.join(","))
            }
            FieldType::Complex(record_type) => record_type.name.clone(),
            FieldType::Custom(descriptor) => descriptor.type_name(),
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (FieldType::Integer, Value::Int(_)) => true,
            (FieldType::Float, Value::Float(_)) => true,
            (FieldType::String, Value::Str(_)) => true,
            (FieldType::Symbol, Value::Symbol(_)) => true,
            (FieldType::Bool, Value::Bool(_)) => true,
            (FieldType::DateTime, Value::DateTime(_)) => true,
            (FieldType::Tuple(items), Value::Tuple(values)) => {
                items.len() == values.len()
                    && items.iter().zip(values).all(|(t, v)| t.accepts(v))
            }
            (FieldType::Complex(record_type), Value::Fact(fact)) => {
                fact.record_type().same_layout(record_type)
            }
            (FieldType::Custom(descriptor), value) => descriptor.accepts(value),
            _ => false,
        }
    }

    fn from_host(&self, host: &serde_json::Value) -> Result<Value> {
        match self {
            FieldType::Integer => host
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| host_mismatch("integer", host)),
            FieldType::Float => host
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| host_mismatch("float", host)),
            FieldType::String => host
                .as_str()
                .map(Value::from)
                .ok_or_else(|| host_mismatch("string", host)),
            FieldType::Symbol => host
                .as_str()
                .map(Value::symbol)
                .ok_or_else(|| host_mismatch("symbol", host)),
            FieldType::Bool => host
                .as_bool()
                .map(Value::Bool)
                .ok_or_else(|| host_mismatch("bool", host)),
            FieldType::DateTime => {
                let text = host.as_str().ok_or_else(|| host_mismatch("datetime", host))?;
                let parsed = DateTime::parse_from_rfc3339(text).map_err(|e| {
                    FactDbError::conversion(format!("invalid datetime '{}': {}", text, e))
                })?;
                Ok(Value::DateTime(parsed.with_timezone(&Utc)))
            }
            FieldType::Tuple(items) => {
                let array = host
                    .as_array()
                    .filter(|a| a.len() == items.len())
                    .ok_or_else(|| host_mismatch(&self.type_name(), host))?;
                let values = items
                    .iter()
                    .zip(array)
                    .map(|(t, h)| t.from_host(h))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Tuple(values))
            }
            FieldType::Complex(record_type) => {
                Ok(Value::Fact(Fact::from_json(record_type, host)?))
            }
            FieldType::Custom(descriptor) => descriptor.from_host(host),
        }
    }

    fn to_host(&self, value: &Value) -> Result<serde_json::Value> {
        if !self.accepts(value) {
            return Err(native_mismatch(&self.type_name(), value));
        }
        match (self, value) {
            (FieldType::Custom(descriptor), value) => descriptor.to_host(value),
            (_, Value::Bool(b)) => Ok(serde_json::Value::Bool(*b)),
            (_, Value::Int(i)) => Ok(serde_json::Value::from(*i)),
            (_, Value::Float(f)) => Ok(serde_json::Value::from(*f)),
            (_, Value::Str(s)) | (_, Value::Symbol(s)) => Ok(serde_json::Value::from(s.as_str())),
            (_, Value::DateTime(dt)) => Ok(serde_json::Value::from(dt.to_rfc3339())),
            (FieldType::Tuple(items), Value::Tuple(values)) => {
                let array = items
                    .iter()
                    .zip(values)
                    .map(|(t, v)| t.to_host(v))
                    .collect::<Result<Vec<_>>>()?;
                Ok(serde_json::Value::Array(array))
            }
            (_, Value::Fact(fact)) => fact.to_json(),
            (_, other) => Err(native_mismatch(&self.type_name(), other)),
        }
    }

    fn compare(&self, a: &Value, b: &Value) -> Ordering {
        match self {
            FieldType::Custom(descriptor) => descriptor.compare(a, b),
            _ => a.cmp(b),
        }
    }

    fn default_value(&self) -> Option<Value> {
        match self {
            FieldType::Custom(descriptor) => descriptor.default_value(),
            _ => None,
        }
    }
}

/// Default-value rule for a field
#[derive(Clone)]
pub enum DefaultRule {
    /// Fixed value
    Value(Value),
    /// Computed on each use
    Compute(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl DefaultRule {
    /// Produce the default value
    pub fn produce(&self) -> Value {
        match self {
            DefaultRule::Value(v) => v.clone(),
            DefaultRule::Compute(f) => f(),
        }
    }
}

impl fmt::Debug for DefaultRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultRule::Value(v) => write!(f, "DefaultRule::Value({})", v),
            DefaultRule::Compute(_) => write!(f, "DefaultRule::Compute(..)"),
        }
    }
}

/// Field definition with type, default rule and index flag
#[derive(Debug, Clone)]
pub struct FieldDefinition {
    /// Field name
    pub name: String,
    /// Field type
    pub field_type: FieldType,
    /// Default rule, used when a field is omitted at construction
    pub default: Option<DefaultRule>,
    /// Whether fact bases index this field automatically
    pub indexed: bool,
}

impl FieldDefinition {
    /// Create a new field definition
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            default: None,
            indexed: false,
        }
    }

    /// Set default value
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(DefaultRule::Value(value));
        self
    }

    /// Set computed default
    pub fn default_with(mut self, f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.default = Some(DefaultRule::Compute(Arc::new(f)));
        self
    }

    /// Set as indexed
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Default for an omitted field: the field rule first, then the type's
    pub fn resolve_default(&self) -> Option<Value> {
        self.default
            .as_ref()
            .map(DefaultRule::produce)
            .or_else(|| self.field_type.default_value())
    }
}

/// Schema of one record type
#[derive(Debug)]
pub struct RecordType {
    /// Record type name
    pub name: String,
    /// Ordered field definitions
    pub fields: Vec<FieldDefinition>,
}

impl RecordType {
    /// Start building a record type
    pub fn builder(name: impl Into<String>) -> RecordTypeBuilder {
        RecordTypeBuilder {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Number of fields
    pub fn arity(&self) -> usize {
        self.fields.len()
    }

    /// Position of a field by name
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Field definition by position
    pub fn field(&self, index: usize) -> Option<&FieldDefinition> {
        self.fields.get(index)
    }

    /// Positions of fields flagged as indexed
    pub fn indexed_fields(&self) -> Vec<usize> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.indexed)
            .map(|(i, _)| i)
            .collect()
    }

    /// Whether two record types share name and field layout
    pub fn same_layout(&self, other: &RecordType) -> bool {
        std::ptr::eq(self, other)
            || (self.name == other.name
                && self.fields.len() == other.fields.len()
                && self
                    .fields
                    .iter()
                    .zip(&other.fields)
                    .all(|(a, b)| a.name == b.name && a.field_type == b.field_type))
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.fields.len())
    }
}

/// Builder for [`RecordType`]
#[derive(Debug)]
pub struct RecordTypeBuilder {
    name: String,
    fields: Vec<FieldDefinition>,
}

impl RecordTypeBuilder {
    /// Add a plain field
    pub fn field(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.field_def(FieldDefinition::new(name, field_type))
    }

    /// Add an indexed field
    pub fn indexed_field(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.field_def(FieldDefinition::new(name, field_type).indexed())
    }

    /// Add a field with a fixed default
    pub fn field_with_default(
        self,
        name: impl Into<String>,
        field_type: FieldType,
        default: impl Into<Value>,
    ) -> Self {
        self.field_def(FieldDefinition::new(name, field_type).default_value(default.into()))
    }

    /// Add a fully specified field
    pub fn field_def(mut self, def: FieldDefinition) -> Self {
        self.fields.push(def);
        self
    }

    /// Validate and finish the record type
    pub fn build(self) -> Result<Arc<RecordType>> {
        if self.name.is_empty() {
            return Err(FactDbError::schema("record type name must not be empty"));
        }
        for (i, field) in self.fields.iter().enumerate() {
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(FactDbError::schema(format!(
                    "duplicate field '{}' in record type '{}'",
                    field.name, self.name
                )));
            }
            if let Some(default) = field.default.as_ref().map(DefaultRule::produce) {
                if !field.field_type.accepts(&default) {
                    return Err(FactDbError::schema(format!(
                        "default '{}' does not fit field '{}.{}' of type {}",
                        default,
                        self.name,
                        field.name,
                        field.field_type.type_name()
                    )));
                }
            }
        }
        Ok(Arc::new(RecordType {
            name: self.name,
            fields: self.fields,
        }))
    }
}

/// Registry of record types by name
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    types: BTreeMap<String, Arc<RecordType>>,
}

impl SchemaRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record type.
    ///
    /// Re-registering an identical layout is a no-op; a different layout under
    /// the same name is a schema mismatch.
    pub fn register(&mut self, record_type: Arc<RecordType>) -> Result<()> {
        if let Some(existing) = self.types.get(&record_type.name) {
            if !existing.same_layout(&record_type) {
                return Err(FactDbError::schema(format!(
                    "record type '{}' already registered with a different layout",
                    record_type.name
                )));
            }
            return Ok(());
        }
        self.types.insert(record_type.name.clone(), record_type);
        Ok(())
    }

    /// Look up a record type
    pub fn get(&self, name: &str) -> Option<&Arc<RecordType>> {
        self.types.get(name)
    }

    /// Iterate registered types in name order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<RecordType>> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person() -> Arc<RecordType> {
        RecordType::builder("person")
            .indexed_field("id", FieldType::Integer)
            .field_with_default("name", FieldType::String, "anon")
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_rejects_duplicate_field() {
        let result = RecordType::builder("p")
            .field("a", FieldType::Integer)
            .field("a", FieldType::String)
            .build();
        assert!(matches!(result, Err(FactDbError::SchemaMismatch(_))));
    }

    #[test]
    fn test_builder_rejects_mistyped_default() {
        let result = RecordType::builder("p")
            .field_with_default("a", FieldType::Integer, "x")
            .build();
        assert!(matches!(result, Err(FactDbError::SchemaMismatch(_))));
    }

    #[test]
    fn test_field_lookup() {
        let p = person();
        assert_eq!(p.arity(), 2);
        assert_eq!(p.field_index("name"), Some(1));
        assert_eq!(p.field_index("missing"), None);
        assert_eq!(p.indexed_fields(), vec![0]);
        assert_eq!(p.fields[1].resolve_default(), Some(Value::from("anon")));
    }

    #[test]
    fn test_host_conversion() {
        assert_eq!(FieldType::Integer.from_host(&json!(3)).unwrap(), Value::Int(3));
        assert!(FieldType::Integer.from_host(&json!("3")).is_err());

        let pair = FieldType::Tuple(vec![FieldType::Integer, FieldType::Symbol]);
        let value = pair.from_host(&json!([1, "x"])).unwrap();
        assert_eq!(value, Value::tuple([Value::Int(1), Value::symbol("x")]));
        assert_eq!(pair.to_host(&value).unwrap(), json!([1, "x"]));

        let dt = FieldType::DateTime
            .from_host(&json!("2024-01-02T03:04:05Z"))
            .unwrap();
        assert!(matches!(dt, Value::DateTime(_)));
    }

    #[test]
    fn test_fit_query_constants() {
        assert_eq!(FieldType::Float.fit(&Value::Int(1)), Some(Value::Float(1.0)));
        assert_eq!(FieldType::Symbol.fit(&Value::from("x")), Some(Value::symbol("x")));
        assert_eq!(FieldType::Integer.fit(&Value::Float(1.0)), None);
        assert_eq!(FieldType::String.fit(&Value::Int(1)), None);

        let pair = FieldType::Tuple(vec![FieldType::Float, FieldType::Integer]);
        assert_eq!(
            pair.fit(&Value::tuple([Value::Int(2), Value::Int(3)])),
            Some(Value::tuple([Value::Float(2.0), Value::Int(3)]))
        );
        assert_eq!(pair.fit(&Value::tuple([Value::Int(2)])), None);
    }

    #[test]
    fn test_registry_layout_conflict() {
        let mut registry = SchemaRegistry::new();
        registry.register(person()).unwrap();
        registry.register(person()).unwrap();
        assert_eq!(registry.len(), 1);

        let other = RecordType::builder("person")
            .field("id", FieldType::String)
            .build()
            .unwrap();
        assert!(matches!(
            registry.register(other),
            Err(FactDbError::SchemaMismatch(_))
        ));
    }
}
