//! Error types for FactDB
//!
//! Every error is a definition defect or a misuse of the API; nothing here
//! is transient, so nothing is retried.

/// Errors raised by the fact store and the query engine
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FactDbError {
    /// A record was added to a store of another type, or a path resolves
    /// outside the declared roots
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Invalid query condition
    #[error("Condition error: {0}")]
    Condition(String),

    /// Invalid join declaration
    #[error("Join error: {0}")]
    Join(String),

    /// Placeholder could not be grounded
    #[error("Placeholder error: {0}")]
    Placeholder(String),

    /// Singleton/first operation on the wrong number of results
    #[error("Cardinality error: expected {expected}, found {found}")]
    Cardinality { expected: String, found: usize },

    /// Strict removal of a record that is not present
    #[error("Not found: {0}")]
    NotFound(String),

    /// Query plan could not be built
    #[error("Plan error: {0}")]
    Plan(String),

    /// Host value does not fit a field descriptor
    #[error("Conversion error: {0}")]
    Conversion(String),
}

impl FactDbError {
    pub(crate) fn schema(msg: impl Into<String>) -> Self {
        Self::SchemaMismatch(msg.into())
    }

    pub(crate) fn condition(msg: impl Into<String>) -> Self {
        Self::Condition(msg.into())
    }

    pub(crate) fn join(msg: impl Into<String>) -> Self {
        Self::Join(msg.into())
    }

    pub(crate) fn placeholder(msg: impl Into<String>) -> Self {
        Self::Placeholder(msg.into())
    }

    pub(crate) fn conversion(msg: impl Into<String>) -> Self {
        Self::Conversion(msg.into())
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, FactDbError>;
