//! In-memory storage layer for FactDB
//!
//! This module provides the per-type record stores and the fact base
//! coordinating them with declared indexes

pub mod fact_base;
pub mod record_store;

pub use fact_base::*;
pub use record_store::*;
