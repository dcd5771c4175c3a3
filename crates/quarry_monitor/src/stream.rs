//! Live-stream coalescing.
//!
//! Metric updates flood far faster than a dashboard can render; each
//! connected client owns a coalescer that keeps only the latest point per
//! metric and releases a batch at most once per second.

use quarry_protocol::defaults::STREAM_COALESCE_MS;
use quarry_protocol::types::MetricPoint;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

pub struct MetricCoalescer {
    latest: HashMap<String, MetricPoint>,
    interval: Duration,
    last_flush: Instant,
}

impl Default for MetricCoalescer {
    fn default() -> Self {
        Self::new(Duration::from_millis(STREAM_COALESCE_MS))
    }
}

impl MetricCoalescer {
    pub fn new(interval: Duration) -> Self {
        Self {
            latest: HashMap::new(),
            interval,
            last_flush: Instant::now(),
        }
    }

    /// Stage a point; newer values for the same metric replace older ones.
    pub fn offer(&mut self, point: MetricPoint) {
        self.latest.insert(point.name.clone(), point);
    }

    pub fn pending(&self) -> usize {
        self.latest.len()
    }

    /// Release the staged batch if the interval has elapsed.
    pub fn drain_if_due(&mut self) -> Option<Vec<MetricPoint>> {
        if self.latest.is_empty() || self.last_flush.elapsed() < self.interval {
            return None;
        }
        self.last_flush = Instant::now();
        let mut batch: Vec<MetricPoint> = self.latest.drain().map(|(_, p)| p).collect();
        batch.sort_by(|a, b| a.name.cmp(&b.name));
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn point(name: &str, value: f64) -> MetricPoint {
        MetricPoint {
            name: name.to_string(),
            timestamp: Utc::now(),
            value,
            labels: HashMap::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn coalesces_to_latest_value_per_metric() {
        let mut coalescer = MetricCoalescer::new(Duration::from_secs(1));
        for i in 0..100 {
            coalescer.offer(point("queue_depth", i as f64));
        }
        coalescer.offer(point("active_jobs", 2.0));
        assert_eq!(coalescer.pending(), 2);

        assert!(coalescer.drain_if_due().is_none());
        tokio::time::advance(Duration::from_millis(1_100)).await;
        let batch = coalescer.drain_if_due().unwrap();
        assert_eq!(batch.len(), 2);
        let depth = batch.iter().find(|p| p.name == "queue_depth").unwrap();
        assert!((depth.value - 99.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_coalescer_stays_quiet() {
        let mut coalescer = MetricCoalescer::new(Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(coalescer.drain_if_due().is_none());
    }
}
