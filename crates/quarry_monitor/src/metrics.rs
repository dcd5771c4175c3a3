//! Metric aggregation: counters, gauges, and time-bucketed series.
//!
//! Observations land in fixed 10-second buckets with a rolling one-hour
//! in-memory retention. Counter increments also feed a series so rates
//! can be computed over arbitrary windows inside the retention.

use chrono::{DateTime, Utc};
use quarry_protocol::defaults::{METRIC_BUCKET_SECS, METRIC_RETENTION_SECS};
use quarry_protocol::types::MetricPoint;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    /// Epoch seconds aligned down to the bucket width.
    start: i64,
    sum: f64,
    count: u64,
    max: f64,
}

#[derive(Default)]
struct Inner {
    counters: HashMap<String, u64>,
    gauges: HashMap<String, f64>,
    series: HashMap<String, VecDeque<Bucket>>,
}

pub struct MetricsRegistry {
    inner: Mutex<Inner>,
    bucket_secs: u64,
    retention_secs: u64,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new(METRIC_BUCKET_SECS, METRIC_RETENTION_SECS)
    }
}

impl MetricsRegistry {
    pub fn new(bucket_secs: u64, retention_secs: u64) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            bucket_secs: bucket_secs.max(1),
            retention_secs: retention_secs.max(bucket_secs),
        }
    }

    // ------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------

    pub fn inc_counter(&self, name: &str, by: u64) {
        self.inc_counter_at(name, by, Utc::now());
    }

    pub fn inc_counter_at(&self, name: &str, by: u64, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("metrics lock");
        *inner.counters.entry(name.to_string()).or_insert(0) += by;
        self.observe_locked(&mut inner, name, by as f64, now);
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        let mut inner = self.inner.lock().expect("metrics lock");
        inner.gauges.insert(name.to_string(), value);
    }

    /// Histogram-style observation (latencies, batch sizes).
    pub fn observe(&self, name: &str, value: f64) {
        self.observe_at(name, value, Utc::now());
    }

    pub fn observe_at(&self, name: &str, value: f64, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("metrics lock");
        self.observe_locked(&mut inner, name, value, now);
    }

    fn observe_locked(&self, inner: &mut Inner, name: &str, value: f64, now: DateTime<Utc>) {
        let aligned = now.timestamp() - now.timestamp().rem_euclid(self.bucket_secs as i64);
        let series = inner.series.entry(name.to_string()).or_default();
        match series.back_mut() {
            Some(bucket) if bucket.start == aligned => {
                bucket.sum += value;
                bucket.count += 1;
                bucket.max = bucket.max.max(value);
            }
            _ => series.push_back(Bucket {
                start: aligned,
                sum: value,
                count: 1,
                max: value,
            }),
        }
        let horizon = now.timestamp() - self.retention_secs as i64;
        while series.front().is_some_and(|b| b.start < horizon) {
            series.pop_front();
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn counter(&self, name: &str) -> u64 {
        let inner = self.inner.lock().expect("metrics lock");
        inner.counters.get(name).copied().unwrap_or(0)
    }

    pub fn gauge(&self, name: &str) -> f64 {
        let inner = self.inner.lock().expect("metrics lock");
        inner.gauges.get(name).copied().unwrap_or(0.0)
    }

    /// Per-second rate of a counter series over the trailing window.
    pub fn rate(&self, name: &str, window: Duration) -> f64 {
        self.rate_at(name, window, Utc::now())
    }

    pub fn rate_at(&self, name: &str, window: Duration, now: DateTime<Utc>) -> f64 {
        let secs = window.as_secs().max(1);
        self.window_sum(name, secs, now) / secs as f64
    }

    /// Mean observation over the trailing window.
    pub fn avg(&self, name: &str, window: Duration) -> f64 {
        self.avg_at(name, window, Utc::now())
    }

    pub fn avg_at(&self, name: &str, window: Duration, now: DateTime<Utc>) -> f64 {
        let secs = window.as_secs().max(1);
        let inner = self.inner.lock().expect("metrics lock");
        let horizon = now.timestamp() - secs as i64;
        let Some(series) = inner.series.get(name) else {
            return 0.0;
        };
        let (sum, count) = series
            .iter()
            .filter(|b| b.start >= horizon)
            .fold((0.0, 0u64), |(s, c), b| (s + b.sum, c + b.count));
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    fn window_sum(&self, name: &str, window_secs: u64, now: DateTime<Utc>) -> f64 {
        let inner = self.inner.lock().expect("metrics lock");
        let horizon = now.timestamp() - window_secs as i64;
        inner
            .series
            .get(name)
            .map(|series| {
                series
                    .iter()
                    .filter(|b| b.start >= horizon)
                    .map(|b| b.sum)
                    .sum()
            })
            .unwrap_or(0.0)
    }

    /// Bucketed points for trend charts, oldest first.
    pub fn series_points(&self, name: &str, window: Duration) -> Vec<MetricPoint> {
        self.series_points_at(name, window, Utc::now())
    }

    pub fn series_points_at(
        &self,
        name: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Vec<MetricPoint> {
        let inner = self.inner.lock().expect("metrics lock");
        let horizon = now.timestamp() - window.as_secs() as i64;
        inner
            .series
            .get(name)
            .map(|series| {
                series
                    .iter()
                    .filter(|b| b.start >= horizon)
                    .map(|b| MetricPoint {
                        name: name.to_string(),
                        timestamp: DateTime::from_timestamp(b.start, 0).unwrap_or(now),
                        value: b.sum,
                        labels: HashMap::new(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Current counters and gauges for the live stream / dashboards.
    pub fn snapshot(&self) -> Vec<MetricPoint> {
        let inner = self.inner.lock().expect("metrics lock");
        let now = Utc::now();
        let mut points: Vec<MetricPoint> = inner
            .counters
            .iter()
            .map(|(name, value)| MetricPoint {
                name: name.clone(),
                timestamp: now,
                value: *value as f64,
                labels: HashMap::new(),
            })
            .collect();
        points.extend(inner.gauges.iter().map(|(name, value)| MetricPoint {
            name: name.clone(),
            timestamp: now,
            value: *value,
            labels: HashMap::new(),
        }));
        points.sort_by(|a, b| a.name.cmp(&b.name));
        points
    }
}

// Canonical metric names used across the pipeline.
pub mod names {
    pub const EVENTS_TOTAL: &str = "events_total";
    pub const QUESTIONS_EXTRACTED_TOTAL: &str = "questions_extracted_total";
    pub const QUESTIONS_APPROVED_TOTAL: &str = "questions_approved_total";
    pub const QUESTIONS_REJECTED_TOTAL: &str = "questions_rejected_total";
    pub const DUPLICATES_TOTAL: &str = "duplicates_total";
    pub const ERRORS_TOTAL: &str = "errors_total";
    pub const PAGES_FETCHED_TOTAL: &str = "pages_fetched_total";
    pub const BACKPRESSURE_ENGAGED_TOTAL: &str = "backpressure_engaged_total";
    pub const ACTIVE_JOBS: &str = "active_jobs";
    pub const QUEUE_DEPTH: &str = "queue_depth";
    pub const PAGE_EXTRACT_LATENCY_MS: &str = "page_extract_latency_ms";
    pub const AI_BATCH_LATENCY_MS: &str = "ai_batch_latency_ms";
    pub const FUSED_SCORE: &str = "fused_score";
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn counters_accumulate_and_rate_windows() {
        let registry = MetricsRegistry::new(10, 3_600);
        for i in 0..6 {
            registry.inc_counter_at("errors_total", 2, at(i * 10));
        }
        assert_eq!(registry.counter("errors_total"), 12);

        // Last 30 seconds: buckets at 30, 40, 50 -> 6 increments.
        let rate = registry.rate_at("errors_total", Duration::from_secs(30), at(59));
        assert!((rate - 6.0 / 30.0).abs() < 1e-9, "rate {rate}");
    }

    #[test]
    fn avg_tracks_observations_in_window() {
        let registry = MetricsRegistry::new(10, 3_600);
        registry.observe_at("latency", 100.0, at(0));
        registry.observe_at("latency", 300.0, at(5));
        registry.observe_at("latency", 500.0, at(120));

        let avg = registry.avg_at("latency", Duration::from_secs(60), at(125));
        assert!((avg - 500.0).abs() < 1e-9);
        let avg_all = registry.avg_at("latency", Duration::from_secs(600), at(125));
        assert!((avg_all - 300.0).abs() < 1e-9);
    }

    #[test]
    fn retention_prunes_old_buckets() {
        let registry = MetricsRegistry::new(10, 60);
        registry.observe_at("x", 1.0, at(0));
        registry.observe_at("x", 1.0, at(120));
        let points = registry.series_points_at("x", Duration::from_secs(3_600), at(121));
        assert_eq!(points.len(), 1);
    }

    #[test]
    fn gauges_overwrite() {
        let registry = MetricsRegistry::default();
        registry.set_gauge("queue_depth", 4.0);
        registry.set_gauge("queue_depth", 7.0);
        assert!((registry.gauge("queue_depth") - 7.0).abs() < f64::EPSILON);
    }
}
