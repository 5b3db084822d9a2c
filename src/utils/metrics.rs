use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Global metrics collector for the service.
///
/// Tracks request outcomes, detections emitted, and per-stage
/// latencies. Thread-safe and can be shared across the application.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Request metrics
    requests_total: AtomicUsize,
    requests_success: AtomicUsize,
    requests_failed: AtomicUsize,
    detections_total: AtomicUsize,

    // Per-stage latencies
    fetch_duration_ms: RwLock<Vec<u64>>,
    inference_duration_ms: RwLock<Vec<u64>>,
    annotation_duration_ms: RwLock<Vec<u64>>,

    // Per-endpoint request counters
    endpoint_counters: DashMap<String, AtomicUsize>,

    // Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                requests_total: AtomicUsize::new(0),
                requests_success: AtomicUsize::new(0),
                requests_failed: AtomicUsize::new(0),
                detections_total: AtomicUsize::new(0),
                fetch_duration_ms: RwLock::new(Vec::new()),
                inference_duration_ms: RwLock::new(Vec::new()),
                annotation_duration_ms: RwLock::new(Vec::new()),
                endpoint_counters: DashMap::new(),
                start_time: Instant::now(),
            }),
        }
    }

    pub fn record_request(&self, success: bool) {
        self.inner.requests_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.inner.requests_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_detections(&self, count: usize) {
        self.inner
            .detections_total
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_fetch(&self, duration: Duration) {
        self.inner
            .fetch_duration_ms
            .write()
            .push(duration.as_millis() as u64);
    }

    pub fn record_inference(&self, duration: Duration) {
        self.inner
            .inference_duration_ms
            .write()
            .push(duration.as_millis() as u64);
    }

    pub fn record_annotation(&self, duration: Duration) {
        self.inner
            .annotation_duration_ms
            .write()
            .push(duration.as_millis() as u64);
    }

    pub fn record_endpoint_request(&self, endpoint: &str) {
        self.inner
            .endpoint_counters
            .entry(endpoint.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    // Get snapshot for reporting
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inference = self.inner.inference_duration_ms.read();
        let inference_avg_ms = avg(&inference);
        let inference_p50_ms = percentile(&inference, 0.5);
        let inference_p95_ms = percentile(&inference, 0.95);
        let inference_p99_ms = percentile(&inference, 0.99);
        drop(inference);

        let fetch = self.inner.fetch_duration_ms.read();
        let fetch_avg_ms = avg(&fetch);
        drop(fetch);

        let annotation = self.inner.annotation_duration_ms.read();
        let annotation_avg_ms = avg(&annotation);
        drop(annotation);

        let endpoints = self
            .inner
            .endpoint_counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();

        MetricsSnapshot {
            requests_total: self.inner.requests_total.load(Ordering::Relaxed),
            requests_success: self.inner.requests_success.load(Ordering::Relaxed),
            requests_failed: self.inner.requests_failed.load(Ordering::Relaxed),
            detections_total: self.inner.detections_total.load(Ordering::Relaxed),
            fetch_avg_ms,
            inference_avg_ms,
            inference_p50_ms,
            inference_p95_ms,
            inference_p99_ms,
            annotation_avg_ms,
            endpoints,
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Generate Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            r#"# HELP requests_total Total number of detection requests handled
# TYPE requests_total counter
requests_total {{}} {}

# HELP requests_success Number of requests answered with a success payload
# TYPE requests_success counter
requests_success {{}} {}

# HELP requests_failed Number of requests answered with an error payload
# TYPE requests_failed counter
requests_failed {{}} {}

# HELP detections_total Total detections emitted above the confidence threshold
# TYPE detections_total counter
detections_total {{}} {}

# HELP fetch_avg_ms Average image download+decode latency in milliseconds
# TYPE fetch_avg_ms gauge
fetch_avg_ms {{}} {}

# HELP inference_avg_ms Average model inference latency in milliseconds
# TYPE inference_avg_ms gauge
inference_avg_ms {{}} {}

# HELP inference_p95_ms 95th percentile model inference latency in milliseconds
# TYPE inference_p95_ms gauge
inference_p95_ms {{}} {}

# HELP annotation_avg_ms Average drawing+encoding latency in milliseconds
# TYPE annotation_avg_ms gauge
annotation_avg_ms {{}} {}

# HELP uptime_seconds Application uptime in seconds
# TYPE uptime_seconds counter
uptime_seconds {{}} {}
"#,
            snapshot.requests_total,
            snapshot.requests_success,
            snapshot.requests_failed,
            snapshot.detections_total,
            snapshot.fetch_avg_ms,
            snapshot.inference_avg_ms,
            snapshot.inference_p95_ms,
            snapshot.annotation_avg_ms,
            snapshot.uptime_seconds,
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub requests_total: usize,
    pub requests_success: usize,
    pub requests_failed: usize,
    pub detections_total: usize,
    pub fetch_avg_ms: u64,
    pub inference_avg_ms: u64,
    pub inference_p50_ms: u64,
    pub inference_p95_ms: u64,
    pub inference_p99_ms: u64,
    pub annotation_avg_ms: u64,
    pub endpoints: BTreeMap<String, usize>,
    pub uptime_seconds: u64,
}

fn percentile(values: &[u64], p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let idx = ((values.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = Metrics::new();

        metrics.record_request(true);
        metrics.record_request(false);
        metrics.record_detections(3);
        metrics.record_fetch(Duration::from_millis(40));
        metrics.record_inference(Duration::from_millis(200));
        metrics.record_annotation(Duration::from_millis(10));
        metrics.record_endpoint_request("/detect");
        metrics.record_endpoint_request("/detect");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_total, 2);
        assert_eq!(snapshot.requests_success, 1);
        assert_eq!(snapshot.requests_failed, 1);
        assert_eq!(snapshot.detections_total, 3);
        assert_eq!(snapshot.fetch_avg_ms, 40);
        assert_eq!(snapshot.inference_avg_ms, 200);
        assert_eq!(snapshot.inference_p95_ms, 200);
        assert_eq!(snapshot.annotation_avg_ms, 10);
        assert_eq!(snapshot.endpoints.get("/detect"), Some(&2));
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.record_request(true);
        metrics.record_detections(5);

        let prometheus = metrics.to_prometheus();
        assert!(prometheus.contains("requests_total {} 1"));
        assert!(prometheus.contains("detections_total {} 5"));
    }

    #[test]
    fn test_empty_latency_vectors_report_zero() {
        let snapshot = Metrics::new().snapshot();
        assert_eq!(snapshot.inference_avg_ms, 0);
        assert_eq!(snapshot.inference_p99_ms, 0);
    }
}
