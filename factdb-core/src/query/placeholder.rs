//! Query placeholders and call-time arguments
//!
//! Placeholders stand in for values supplied when a query runs. Bindings are
//! carried by an immutable [`Args`] value passed to each grounding call, so a
//! single query definition can run many times with different arguments.

use crate::error::{FactDbError, Result};
use crate::value::Value;
use std::fmt;

/// Deferred value resolved at execution time
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Placeholder {
    /// 1-based positional argument
    Positional(usize),
    /// Named argument with an optional default
    Named { name: String, default: Option<Value> },
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placeholder::Positional(index) => write!(f, "ph{}", index),
            Placeholder::Named { name, default: None } => write!(f, "ph({})", name),
            Placeholder::Named {
                name,
                default: Some(d),
            } => write!(f, "ph({}={})", name, d),
        }
    }
}

/// Positional placeholder for argument `index` (1-based)
pub fn ph(index: usize) -> Placeholder {
    Placeholder::Positional(index)
}

pub fn ph1() -> Placeholder {
    ph(1)
}

pub fn ph2() -> Placeholder {
    ph(2)
}

pub fn ph3() -> Placeholder {
    ph(3)
}

pub fn ph4() -> Placeholder {
    ph(4)
}

/// Named placeholder without a default
pub fn ph_named(name: impl Into<String>) -> Placeholder {
    Placeholder::Named {
        name: name.into(),
        default: None,
    }
}

/// Named placeholder falling back to `default` when no argument is given
pub fn ph_named_default(name: impl Into<String>, default: impl Into<Value>) -> Placeholder {
    Placeholder::Named {
        name: name.into(),
        default: Some(default.into()),
    }
}

/// Call-time arguments: either positional or named, never both
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    positional: Vec<Value>,
    named: Vec<(String, Value)>,
}

impl Args {
    /// No arguments
    pub fn none() -> Self {
        Self::default()
    }

    /// Positional arguments, bound to `ph1`, `ph2`, ...
    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            positional: values.into_iter().map(Into::into).collect(),
            named: Vec::new(),
        }
    }

    /// Named arguments
    pub fn named<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            positional: Vec::new(),
            named: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Add one positional argument
    pub fn with_positional(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Add one named argument
    pub fn with_named(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.push((name.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }

    /// Reject mixed positional/named arguments and duplicate names
    pub fn validate(&self) -> Result<()> {
        if !self.positional.is_empty() && !self.named.is_empty() {
            return Err(FactDbError::placeholder(
                "positional and named arguments cannot be mixed in one call",
            ));
        }
        for (i, (name, _)) in self.named.iter().enumerate() {
            if self.named[..i].iter().any(|(n, _)| n == name) {
                return Err(FactDbError::placeholder(format!(
                    "named argument '{}' is bound more than once",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Value for a placeholder
    pub fn resolve(&self, placeholder: &Placeholder) -> Result<Value> {
        match placeholder {
            Placeholder::Positional(index) => index
                .checked_sub(1)
                .and_then(|i| self.positional.get(i))
                .cloned()
                .ok_or_else(|| {
                    FactDbError::placeholder(format!(
                        "missing placeholder {}: {} positional argument(s) supplied",
                        placeholder,
                        self.positional.len()
                    ))
                }),
            Placeholder::Named { name, default } => self
                .named
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
                .or_else(|| default.clone())
                .ok_or_else(|| {
                    FactDbError::placeholder(format!(
                        "missing placeholder '{}': no argument and no default",
                        name
                    ))
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_resolution() {
        let args = Args::positional([10, 20]);
        assert_eq!(args.resolve(&ph1()).unwrap(), Value::Int(10));
        assert_eq!(args.resolve(&ph2()).unwrap(), Value::Int(20));
        let err = args.resolve(&ph3()).unwrap_err();
        assert!(err.to_string().contains("ph3"));
        assert!(args.resolve(&ph(0)).is_err());
    }

    #[test]
    fn test_named_resolution_and_default() {
        let args = Args::named([("x", 1)]);
        assert_eq!(args.resolve(&ph_named("x")).unwrap(), Value::Int(1));
        assert_eq!(
            args.resolve(&ph_named_default("y", "d")).unwrap(),
            Value::from("d")
        );
        assert!(matches!(
            args.resolve(&ph_named("y")),
            Err(FactDbError::Placeholder(_))
        ));
    }

    #[test]
    fn test_validate() {
        assert!(Args::none().validate().is_ok());
        let mixed = Args::positional([1]).with_named("x", 2);
        assert!(matches!(mixed.validate(), Err(FactDbError::Placeholder(_))));
        let dup = Args::named([("x", 1), ("x", 2)]);
        assert!(matches!(dup.validate(), Err(FactDbError::Placeholder(_))));
    }
}
