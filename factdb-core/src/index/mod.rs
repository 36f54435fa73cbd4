//! Secondary indexes for FactDB
//!
//! This module provides sorted per-field indexes with support for:
//! - Equality, range and membership lookups
//! - Eager maintenance on add/remove
//! - Transient indexes built during joins

pub mod btree;

pub use btree::FactIndex;
