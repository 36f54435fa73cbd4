//! Structured logging system with tracing
//!
//! Provides subscriber setup with text or JSON output and slow query logging

use crate::config::{LogFormat, LoggingSettings};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the configured level. Fails if a global subscriber
/// is already installed.
pub fn init_logging(settings: &LoggingSettings) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.as_directive()));

    let subscriber = Registry::default().with(env_filter);

    match settings.format {
        LogFormat::Json => {
            let json_layer = fmt::layer()
                .json()
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_target(true);

            subscriber
                .with(json_layer)
                .try_init()
                .context("Failed to install JSON log subscriber")?;
        }
        LogFormat::Text => {
            let fmt_layer = fmt::layer()
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .compact();

            subscriber
                .with(fmt_layer)
                .try_init()
                .context("Failed to install log subscriber")?;
        }
    }

    tracing::info!(
        level = settings.level.as_directive(),
        format = ?settings.format,
        slow_query_threshold_ms = settings.slow_query_threshold_ms,
        "Logging initialized"
    );

    Ok(())
}

/// Slow query record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowQuery {
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub query: String,
    pub rows: usize,
}

/// Slow query statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlowQueryStats {
    pub total_count: usize,
    pub avg_duration_ms: u64,
    pub max_duration_ms: u64,
    pub threshold_ms: u64,
}

/// Shared log of result streams that stayed open past a threshold
#[derive(Debug, Clone)]
pub struct SlowQueryLog {
    threshold: Duration,
    capacity: usize,
    queries: Arc<RwLock<VecDeque<SlowQuery>>>,
}

impl SlowQueryLog {
    pub fn new(threshold: Duration, capacity: usize) -> Self {
        Self {
            threshold,
            capacity: capacity.max(1),
            queries: Arc::new(RwLock::new(VecDeque::new())),
        }
    }

    pub fn from_settings(settings: &LoggingSettings) -> Self {
        Self::new(settings.slow_query_threshold(), settings.slow_query_capacity)
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Start tracking a query; the tracker reports when dropped
    pub fn start_query(&self, query: impl Into<String>) -> QueryTracker {
        QueryTracker {
            start_time: Instant::now(),
            query: query.into(),
            rows: 0,
            log: self.clone(),
        }
    }

    fn finish_query(&self, tracker: &QueryTracker) {
        let duration = tracker.start_time.elapsed();
        if duration < self.threshold {
            return;
        }

        let slow_query = SlowQuery {
            timestamp: Utc::now(),
            duration_ms: duration.as_millis() as u64,
            query: tracker.query.clone(),
            rows: tracker.rows,
        };

        tracing::warn!(
            target: "slow_query",
            duration_ms = slow_query.duration_ms,
            rows = slow_query.rows,
            query = %slow_query.query,
            "Slow query detected"
        );

        let mut queries = self.queries.write();
        queries.push_back(slow_query);
        while queries.len() > self.capacity {
            queries.pop_front();
        }
    }

    /// Most recent slow queries, newest first
    pub fn get_slow_queries(&self, limit: usize) -> Vec<SlowQuery> {
        let queries = self.queries.read();
        queries.iter().rev().take(limit).cloned().collect()
    }

    pub fn get_stats(&self) -> SlowQueryStats {
        let queries = self.queries.read();
        let threshold_ms = self.threshold.as_millis() as u64;

        if queries.is_empty() {
            return SlowQueryStats {
                threshold_ms,
                ..SlowQueryStats::default()
            };
        }

        let total_count = queries.len();
        let total_duration: u64 = queries.iter().map(|q| q.duration_ms).sum();
        let max_duration = queries.iter().map(|q| q.duration_ms).max().unwrap_or(0);

        SlowQueryStats {
            total_count,
            avg_duration_ms: total_duration / total_count as u64,
            max_duration_ms: max_duration,
            threshold_ms,
        }
    }

    pub fn clear(&self) {
        self.queries.write().clear();
    }
}

/// Tracks one result stream from creation until drop
#[derive(Debug)]
pub struct QueryTracker {
    start_time: Instant,
    query: String,
    rows: usize,
    log: SlowQueryLog,
}

impl QueryTracker {
    /// Count one produced row
    pub fn record_row(&mut self) {
        self.rows += 1;
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Drop for QueryTracker {
    fn drop(&mut self) {
        self.log.finish_query(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slow_query_recorded_on_drop() {
        let log = SlowQueryLog::new(Duration::ZERO, 10);
        {
            let mut tracker = log.start_query("person where id > 1");
            tracker.record_row();
            tracker.record_row();
        }
        let recent = log.get_slow_queries(5);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].rows, 2);
        assert_eq!(recent[0].query, "person where id > 1");
        assert_eq!(log.get_stats().total_count, 1);
    }

    #[test]
    fn test_fast_query_ignored() {
        let log = SlowQueryLog::new(Duration::from_secs(3600), 10);
        drop(log.start_query("fast"));
        assert!(log.get_slow_queries(5).is_empty());
        assert_eq!(log.get_stats().threshold_ms, 3_600_000);
    }

    #[test]
    fn test_capacity_is_bounded() {
        let log = SlowQueryLog::new(Duration::ZERO, 3);
        for i in 0..5 {
            drop(log.start_query(format!("q{}", i)));
        }
        let recent = log.get_slow_queries(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].query, "q4");
        log.clear();
        assert_eq!(log.get_stats().total_count, 0);
    }
}
