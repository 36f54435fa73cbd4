//! Immutable typed records
//!
//! A fact is a tuple of field values tagged with its record type and a sign.
//! Facts are cheap to clone (shared storage) and never mutated after
//! construction.

use crate::error::{FactDbError, Result};
use crate::schema::{FieldDescriptor, RecordType};
use crate::value::Value;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Debug)]
struct FactInner {
    record_type: Arc<RecordType>,
    positive: bool,
    values: Vec<Value>,
}

/// Immutable instance of a record type
#[derive(Debug, Clone)]
pub struct Fact {
    inner: Arc<FactInner>,
}

impl Fact {
    /// Create a positive fact from positional values.
    ///
    /// The values must match the record type's arity and field types.
    pub fn new(record_type: &Arc<RecordType>, values: Vec<Value>) -> Result<Self> {
        if values.len() != record_type.arity() {
            return Err(FactDbError::schema(format!(
                "record type '{}' expects {} fields, got {}",
                record_type.name,
                record_type.arity(),
                values.len()
            )));
        }
        for (def, value) in record_type.fields.iter().zip(&values) {
            if !def.field_type.accepts(value) {
                return Err(FactDbError::schema(format!(
                    "field '{}.{}' expects {}, got {} '{}'",
                    record_type.name,
                    def.name,
                    def.field_type.type_name(),
                    value.kind_name(),
                    value
                )));
            }
        }
        Ok(Self {
            inner: Arc::new(FactInner {
                record_type: record_type.clone(),
                positive: true,
                values,
            }),
        })
    }

    /// Create a fact from named values, filling omitted fields from defaults
    pub fn from_pairs<I, K>(record_type: &Arc<RecordType>, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        let mut slots: Vec<Option<Value>> = vec![None; record_type.arity()];
        for (name, value) in pairs {
            let name = name.as_ref();
            let index = record_type.field_index(name).ok_or_else(|| {
                FactDbError::schema(format!(
                    "record type '{}' has no field '{}'",
                    record_type.name, name
                ))
            })?;
            slots[index] = Some(value);
        }
        let values = Self::fill_defaults(record_type, slots)?;
        Self::new(record_type, values)
    }

    /// Convert a host value (JSON object keyed by field name, or positional
    /// array) into a fact, filling omitted fields from defaults
    pub fn from_json(record_type: &Arc<RecordType>, host: &serde_json::Value) -> Result<Self> {
        let mut slots: Vec<Option<Value>> = vec![None; record_type.arity()];
        match host {
            serde_json::Value::Object(map) => {
                for (name, host_value) in map {
                    let index = record_type.field_index(name).ok_or_else(|| {
                        FactDbError::conversion(format!(
                            "record type '{}' has no field '{}'",
                            record_type.name, name
                        ))
                    })?;
                    slots[index] = Some(record_type.fields[index].field_type.from_host(host_value)?);
                }
            }
            serde_json::Value::Array(items) => {
                if items.len() > record_type.arity() {
                    return Err(FactDbError::conversion(format!(
                        "record type '{}' expects at most {} fields, got {}",
                        record_type.name,
                        record_type.arity(),
                        items.len()
                    )));
                }
                for (index, host_value) in items.iter().enumerate() {
                    slots[index] = Some(record_type.fields[index].field_type.from_host(host_value)?);
                }
            }
            other => {
                return Err(FactDbError::conversion(format!(
                    "cannot build '{}' from host value {}",
                    record_type.name, other
                )))
            }
        }
        let values = Self::fill_defaults(record_type, slots)?;
        Self::new(record_type, values)
    }

    fn fill_defaults(record_type: &RecordType, slots: Vec<Option<Value>>) -> Result<Vec<Value>> {
        slots
            .into_iter()
            .zip(&record_type.fields)
            .map(|(slot, def)| {
                slot.or_else(|| def.resolve_default()).ok_or_else(|| {
                    FactDbError::schema(format!(
                        "field '{}.{}' has no value and no default",
                        record_type.name, def.name
                    ))
                })
            })
            .collect()
    }

    /// Same fact with the sign flipped
    pub fn negate(&self) -> Self {
        Self {
            inner: Arc::new(FactInner {
                record_type: self.inner.record_type.clone(),
                positive: !self.inner.positive,
                values: self.inner.values.clone(),
            }),
        }
    }

    pub fn is_positive(&self) -> bool {
        self.inner.positive
    }

    pub fn record_type(&self) -> &Arc<RecordType> {
        &self.inner.record_type
    }

    pub fn type_name(&self) -> &str {
        &self.inner.record_type.name
    }

    pub fn values(&self) -> &[Value] {
        &self.inner.values
    }

    /// Field value by position
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.inner.values.get(index)
    }

    /// Field value by name
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.inner
            .record_type
            .field_index(name)
            .and_then(|i| self.inner.values.get(i))
    }

    /// Convert to a host value (JSON object keyed by field name)
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let mut map = serde_json::Map::new();
        for (def, value) in self.inner.record_type.fields.iter().zip(&self.inner.values) {
            map.insert(def.name.clone(), def.field_type.to_host(value)?);
        }
        Ok(serde_json::Value::Object(map))
    }
}

impl PartialEq for Fact {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Fact {}

impl PartialOrd for Fact {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fact {
    fn cmp(&self, other: &Self) -> Ordering {
        self.type_name()
            .cmp(other.type_name())
            .then_with(|| self.inner.positive.cmp(&other.inner.positive))
            .then_with(|| self.inner.values.cmp(&other.inner.values))
    }
}

impl Hash for Fact {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_name().hash(state);
        self.inner.positive.hash(state);
        self.inner.values.hash(state);
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.inner.positive {
            write!(f, "-")?;
        }
        write!(f, "{}", self.type_name())?;
        if self.inner.values.is_empty() {
            return Ok(());
        }
        write!(f, "(")?;
        for (i, v) in self.inner.values.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;
    use serde_json::json;

    fn person() -> Arc<RecordType> {
        RecordType::builder("person")
            .field("id", FieldType::Integer)
            .field_with_default("name", FieldType::String, "anon")
            .build()
            .unwrap()
    }

    #[test]
    fn test_new_validates_types() {
        let p = person();
        assert!(Fact::new(&p, vec![Value::Int(1), Value::from("a")]).is_ok());
        assert!(matches!(
            Fact::new(&p, vec![Value::from("1"), Value::from("a")]),
            Err(FactDbError::SchemaMismatch(_))
        ));
        assert!(matches!(
            Fact::new(&p, vec![Value::Int(1)]),
            Err(FactDbError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_defaults_and_lookup() {
        let p = person();
        let fact = Fact::from_pairs(&p, [("id", Value::Int(7))]).unwrap();
        assert_eq!(fact.field("name"), Some(&Value::from("anon")));
        assert_eq!(fact.get(0), Some(&Value::Int(7)));

        let missing = RecordType::builder("q")
            .field("a", FieldType::Integer)
            .build()
            .unwrap();
        assert!(Fact::from_pairs(&missing, Vec::<(&str, Value)>::new()).is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let p = person();
        let fact = Fact::from_json(&p, &json!({"id": 3, "name": "c"})).unwrap();
        assert_eq!(fact.to_json().unwrap(), json!({"id": 3, "name": "c"}));

        let positional = Fact::from_json(&p, &json!([3])).unwrap();
        assert_eq!(positional.field("name"), Some(&Value::from("anon")));
    }

    #[test]
    fn test_ordering_and_sign() {
        let p = person();
        let a = Fact::new(&p, vec![Value::Int(1), Value::from("b")]).unwrap();
        let b = Fact::new(&p, vec![Value::Int(2), Value::from("a")]).unwrap();
        assert!(a < b);
        assert_ne!(a, a.negate());
        assert_eq!(a, a.negate().negate());
        assert_eq!(a.negate().to_string(), "-person(1,\"b\")");
    }
}
