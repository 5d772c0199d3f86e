//! Gateway metrics in Prometheus text format
//!
//! Counters per route and per error kind, dispatcher retry and discovery
//! counters, and a latency histogram per route.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for latency measurements (in milliseconds)
const LATENCY_BUCKETS: [f64; 10] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0,
];

/// Fixed-bucket latency histogram
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: &'static [f64],
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            buckets: (0..=LATENCY_BUCKETS.len()).map(|_| AtomicU64::new(0)).collect(),
            boundaries: &LATENCY_BUCKETS,
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in milliseconds
    pub fn observe(&self, millis: f64) {
        let idx = self
            .boundaries
            .iter()
            .position(|&b| millis <= b)
            .unwrap_or(self.boundaries.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((millis * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative `(upper bound, count)` pairs, ending with `+Inf`
    pub fn cumulative(&self) -> Vec<(f64, u64)> {
        let mut running = 0u64;
        let mut out = Vec::with_capacity(self.buckets.len());
        for (i, bucket) in self.buckets.iter().enumerate() {
            running += bucket.load(Ordering::Relaxed);
            let bound = self.boundaries.get(i).copied().unwrap_or(f64::INFINITY);
            out.push((bound, running));
        }
        out
    }

    pub fn sum(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Per-route metrics
#[derive(Debug, Default)]
pub struct RouteMetrics {
    pub requests_total: Counter,
    pub requests_error: Counter,
    pub latency: Histogram,
}

/// Metrics registry for one gateway process
#[derive(Debug)]
pub struct MetricsRegistry {
    routes: Mutex<BTreeMap<String, Arc<RouteMetrics>>>,
    errors: Mutex<BTreeMap<&'static str, u64>>,

    /// RPCs re-issued against a freshly discovered instance
    pub dispatch_retries: Counter,
    /// Discovery calls issued by the dispatcher and its watch task
    pub discovery_calls: Counter,
    /// Cached backend addresses dropped after a transport failure
    pub cache_invalidations: Counter,

    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(BTreeMap::new()),
            errors: Mutex::new(BTreeMap::new()),
            dispatch_retries: Counter::new(),
            discovery_calls: Counter::new(),
            cache_invalidations: Counter::new(),
            start_time: Instant::now(),
        }
    }

    /// Get or create metrics for a route
    pub fn route(&self, route: &str) -> Arc<RouteMetrics> {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        routes.entry(route.to_string()).or_default().clone()
    }

    pub fn record_request(&self, route: &str, duration: Duration, success: bool) {
        let metrics = self.route(route);
        metrics.requests_total.inc();
        metrics.latency.observe(duration.as_secs_f64() * 1000.0);
        if !success {
            metrics.requests_error.inc();
        }
    }

    pub fn record_error(&self, kind: &'static str) {
        let mut errors = self.errors.lock().unwrap_or_else(PoisonError::into_inner);
        *errors.entry(kind).or_insert(0) += 1;
    }

    pub fn errors_of(&self, kind: &str) -> u64 {
        let errors = self.errors.lock().unwrap_or_else(PoisonError::into_inner);
        errors.get(kind).copied().unwrap_or(0)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "# TYPE roster_uptime_seconds gauge");
        let _ = writeln!(out, "roster_uptime_seconds {}", self.uptime_seconds());
        let _ = writeln!(out, "# TYPE roster_dispatch_retries_total counter");
        let _ = writeln!(out, "roster_dispatch_retries_total {}", self.dispatch_retries.get());
        let _ = writeln!(out, "# TYPE roster_discovery_calls_total counter");
        let _ = writeln!(out, "roster_discovery_calls_total {}", self.discovery_calls.get());
        let _ = writeln!(out, "# TYPE roster_cache_invalidations_total counter");
        let _ = writeln!(
            out,
            "roster_cache_invalidations_total {}",
            self.cache_invalidations.get()
        );

        {
            let errors = self.errors.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = writeln!(out, "# TYPE roster_errors_total counter");
            for (kind, n) in errors.iter() {
                let _ = writeln!(out, "roster_errors_total{{kind=\"{}\"}} {}", kind, n);
            }
        }

        let routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = writeln!(out, "# TYPE roster_requests_total counter");
        for (route, m) in routes.iter() {
            let _ = writeln!(
                out,
                "roster_requests_total{{route=\"{}\"}} {}",
                route,
                m.requests_total.get()
            );
        }
        let _ = writeln!(out, "# TYPE roster_request_errors_total counter");
        for (route, m) in routes.iter() {
            let _ = writeln!(
                out,
                "roster_request_errors_total{{route=\"{}\"}} {}",
                route,
                m.requests_error.get()
            );
        }
        let _ = writeln!(out, "# TYPE roster_request_duration_ms histogram");
        for (route, m) in routes.iter() {
            for (le, count) in m.latency.cumulative() {
                let le = if le.is_infinite() {
                    "+Inf".to_string()
                } else {
                    le.to_string()
                };
                let _ = writeln!(
                    out,
                    "roster_request_duration_ms_bucket{{route=\"{}\",le=\"{}\"}} {}",
                    route, le, count
                );
            }
            let _ = writeln!(
                out,
                "roster_request_duration_ms_sum{{route=\"{}\"}} {}",
                route,
                m.latency.sum()
            );
            let _ = writeln!(
                out,
                "roster_request_duration_ms_count{{route=\"{}\"}} {}",
                route,
                m.latency.count()
            );
        }

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide metrics instance
pub static METRICS: once_cell::sync::Lazy<MetricsRegistry> =
    once_cell::sync::Lazy::new(MetricsRegistry::new);
