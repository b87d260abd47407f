//! Metrics collection
//!
//! Prometheus-compatible counters and gauges for the control loop, exposed
//! as text over the agent status endpoint.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A monotonically increasing counter
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A gauge that can go up and down
#[derive(Debug, Default)]
pub struct Gauge(AtomicI64);

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, v: i64) {
        self.0.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Control-loop metrics registry
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Control-loop iterations
    pub ticks_total: Counter,
    /// Iterations that ended in an error
    pub tick_errors_total: Counter,
    /// Iterations paused because a concurrent operation held a lock
    pub pauses_total: Counter,
    /// Elections this agent won (lock acquired, slicer installed)
    pub elections_won_total: Counter,
    /// Streaming terminations with an error
    pub stream_errors_total: Counter,
    /// 1 while the local slicer handle is installed
    pub slicer_running: Gauge,
    /// Current slicing span in seconds (0 when no slicer runs)
    pub slicer_span_secs: Gauge,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render the registry in Prometheus text exposition format
    pub fn render(&self) -> String {
        let mut out = String::new();

        let counters = [
            ("pitrd_ticks_total", &self.ticks_total),
            ("pitrd_tick_errors_total", &self.tick_errors_total),
            ("pitrd_pauses_total", &self.pauses_total),
            ("pitrd_elections_won_total", &self.elections_won_total),
            ("pitrd_stream_errors_total", &self.stream_errors_total),
        ];
        for (name, c) in counters {
            writeln!(out, "# TYPE {} counter", name).unwrap();
            writeln!(out, "{} {}", name, c.get()).unwrap();
        }

        let gauges = [
            ("pitrd_slicer_running", &self.slicer_running),
            ("pitrd_slicer_span_secs", &self.slicer_span_secs),
        ];
        for (name, g) in gauges {
            writeln!(out, "# TYPE {} gauge", name).unwrap();
            writeln!(out, "{} {}", name, g.get()).unwrap();
        }

        out
    }
}

/// Global metrics instance
pub static METRICS: once_cell::sync::Lazy<MetricsRegistry> =
    once_cell::sync::Lazy::new(MetricsRegistry::new);
