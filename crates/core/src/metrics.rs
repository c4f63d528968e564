use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::ticket::TagMethod;

#[derive(Clone, Debug)]
struct MetricsInner {
    keyword: u64,
    semantic: u64,
    fallback: u64,
    failures: u64,
    confidence_sum: f64,
    latency_ms_sum: u64,
    last_reset: DateTime<Utc>,
}

impl MetricsInner {
    fn zeroed(now: DateTime<Utc>) -> Self {
        Self {
            keyword: 0,
            semantic: 0,
            fallback: 0,
            failures: 0,
            confidence_sum: 0.0,
            latency_ms_sum: 0,
            last_reset: now,
        }
    }

    fn total(&self) -> u64 {
        self.keyword + self.semantic + self.fallback
    }
}

/// Point-in-time view of the recorder. Ratios are computed at snapshot time
/// so concurrent recorders never observe torn averages.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total: u64,
    pub keyword_count: u64,
    pub semantic_count: u64,
    pub fallback_count: u64,
    pub failure_count: u64,
    pub average_confidence: f64,
    pub average_latency_ms: f64,
    pub error_rate: f64,
    pub last_reset: DateTime<Utc>,
    pub uptime_seconds: i64,
}

/// Shared aggregate over all classification calls. The only cross-request
/// mutable state outside the per-conversation locks, so every update happens
/// under one short-lived mutex; `reset` zeroes all counters atomically.
#[derive(Debug)]
pub struct MetricsRecorder {
    inner: Mutex<MetricsInner>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self { inner: Mutex::new(MetricsInner::zeroed(Utc::now())) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MetricsInner> {
        // A poisoned metrics lock only means a panic mid-update; the counters
        // remain usable.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Records one finished classification. `success` is false when the
    /// outcome is a degraded fallback after a semantic failure.
    pub fn record(&self, method: TagMethod, confidence: f64, latency: Duration, success: bool) {
        let mut inner = self.lock();
        match method {
            TagMethod::Keyword => inner.keyword += 1,
            TagMethod::Semantic => inner.semantic += 1,
            TagMethod::KeywordFallback => inner.fallback += 1,
        }
        if !success {
            inner.failures += 1;
        }
        inner.confidence_sum += confidence.clamp(0.0, 1.0);
        inner.latency_ms_sum = inner.latency_ms_sum.saturating_add(latency.as_millis() as u64);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.lock();
        let total = inner.total();
        let divisor = total.max(1) as f64;
        MetricsSnapshot {
            total,
            keyword_count: inner.keyword,
            semantic_count: inner.semantic,
            fallback_count: inner.fallback,
            failure_count: inner.failures,
            average_confidence: if total == 0 { 0.0 } else { inner.confidence_sum / divisor },
            average_latency_ms: if total == 0 { 0.0 } else { inner.latency_ms_sum as f64 / divisor },
            error_rate: if total == 0 { 0.0 } else { inner.failures as f64 / divisor },
            last_reset: inner.last_reset,
            uptime_seconds: (Utc::now() - inner.last_reset).num_seconds(),
        }
    }

    pub fn reset(&self) {
        let mut inner = self.lock();
        *inner = MetricsInner::zeroed(Utc::now());
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::domain::ticket::TagMethod;

    use super::MetricsRecorder;

    #[test]
    fn records_counts_per_method() {
        let metrics = MetricsRecorder::new();
        metrics.record(TagMethod::Keyword, 0.9, Duration::from_millis(5), true);
        metrics.record(TagMethod::Semantic, 0.8, Duration::from_millis(120), true);
        metrics.record(TagMethod::KeywordFallback, 0.4, Duration::from_millis(900), false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.keyword_count, 1);
        assert_eq!(snapshot.semantic_count, 1);
        assert_eq!(snapshot.fallback_count, 1);
        assert_eq!(snapshot.failure_count, 1);
        assert!((snapshot.average_confidence - 0.7).abs() < 1e-9);
        assert!((snapshot.error_rate - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_recorder_reports_zeroes() {
        let snapshot = MetricsRecorder::new().snapshot();
        assert_eq!(snapshot.total, 0);
        assert_eq!(snapshot.average_confidence, 0.0);
        assert_eq!(snapshot.error_rate, 0.0);
    }

    #[test]
    fn reset_zeroes_all_counters() {
        let metrics = MetricsRecorder::new();
        metrics.record(TagMethod::Keyword, 0.9, Duration::from_millis(5), true);
        metrics.reset();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total, 0);
        assert_eq!(snapshot.failure_count, 0);
        assert_eq!(snapshot.average_latency_ms, 0.0);
    }

    #[test]
    fn concurrent_updates_are_all_counted() {
        let metrics = Arc::new(MetricsRecorder::new());
        let handles = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        metrics.record(TagMethod::Keyword, 0.5, Duration::from_millis(1), true);
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().expect("recorder thread");
        }

        assert_eq!(metrics.snapshot().total, 800);
    }
}
