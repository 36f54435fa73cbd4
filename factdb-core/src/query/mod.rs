//! Query engine for FactDB
//!
//! This module provides declarative queries over a fact base:
//! - Conditions built from paths, placeholders and predicates
//! - Normalization to per-root clause blocks
//! - Index selection and join planning
//! - Lazy execution and result shaping

pub mod ast;
pub mod builder;
pub mod executor;
pub mod index_selector;
pub mod join;
pub mod normalize;
pub mod output;
pub mod path;
pub mod placeholder;
pub mod planner;

pub use ast::{func, raw, Binding, CompareOp, Comparison, Condition, Operand};
pub use builder::{Query, QueryBuilder};
pub use executor::QueryExecutor;
pub use index_selector::IndexSelector;
pub use join::{cross, JoinSpec};
pub use normalize::{normalize, ClauseBlock, NormalizedCondition};
pub use output::{Group, Output, Selection};
pub use path::{Path, Root};
pub use placeholder::{
    ph, ph1, ph2, ph3, ph4, ph_named, ph_named_default, Args, Placeholder,
};
pub use planner::{
    asc, desc, DeclarationOrder, JoinOrderStrategy, OrderKey, PlanContext, QueryPlan,
    QueryPlanner, SelectivityOrder,
};
