//! Monitoring for FactDB
//!
//! This module provides:
//! - Structured logging with tracing
//! - Slow query tracking for result streams

pub mod logging;

pub use logging::*;
