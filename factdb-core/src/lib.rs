//! FactDB Core - In-memory typed fact store with a declarative query engine
//!
//! This crate provides:
//! - Typed facts conforming to registered record types
//! - Per-type record stores with sorted secondary indexes
//! - Queries with joins, placeholders, ordering, grouping and deletion
//! - Configuration and structured logging

pub mod config;
pub mod error;
pub mod fact;
pub mod index;
pub mod monitoring;
pub mod query;
pub mod schema;
pub mod storage;
pub mod value;

pub use config::*;
pub use error::{FactDbError, Result};
pub use fact::Fact;
pub use index::*;
pub use monitoring::*;
pub use query::*;
pub use schema::*;
pub use storage::*;
pub use value::Value;
