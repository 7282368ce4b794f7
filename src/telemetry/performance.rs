//! Process-wide performance counters

use crate::config::LogLevel;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

static SHARED: Mutex<Option<Arc<PerformanceMonitor>>> = Mutex::new(None);

/// Thread-safe accumulator for logging performance data.
///
/// One instance is normally shared by every logger in the process
/// ([`PerformanceMonitor::shared`]); tests and embedders can build their own
/// and inject it.
#[derive(Debug)]
pub struct PerformanceMonitor {
    /// Disabled monitors ignore every record call
    enabled: bool,

    /// Set by `close()`
    closed: AtomicBool,

    /// Counters
    state: Mutex<Counters>,
}

#[derive(Debug)]
struct Counters {
    started_at: Instant,
    total_messages: u64,
    total_message_bytes: u64,
    total_latency: Duration,
    min_latency: Option<Duration>,
    max_latency: Duration,
    messages_by_level: BTreeMap<String, u64>,
    messages_by_layer: BTreeMap<String, u64>,
    handler_creations: u64,
    handler_creation_total: Duration,
    handler_creation_min: Option<Duration>,
    handler_creation_max: Duration,
    security_events: u64,
    sanitization_events: u64,
    plugin_events: u64,
    handler_metrics: BTreeMap<String, BTreeMap<String, u64>>,
}

impl Counters {
    fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_messages: 0,
            total_message_bytes: 0,
            total_latency: Duration::ZERO,
            min_latency: None,
            max_latency: Duration::ZERO,
            messages_by_level: BTreeMap::new(),
            messages_by_layer: BTreeMap::new(),
            handler_creations: 0,
            handler_creation_total: Duration::ZERO,
            handler_creation_min: None,
            handler_creation_max: Duration::ZERO,
            security_events: 0,
            sanitization_events: 0,
            plugin_events: 0,
            handler_metrics: BTreeMap::new(),
        }
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn average(total: Duration, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        millis(total) / count as f64
    }
}

/// Copy of every counter, taken under the monitor's lock
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSnapshot {
    /// Messages recorded
    pub total_messages: u64,
    /// Sum of message lengths in bytes
    pub total_message_bytes: u64,
    /// Cumulative latency
    pub total_latency_ms: f64,
    /// Fastest call
    pub min_latency_ms: f64,
    /// Slowest call
    pub max_latency_ms: f64,
    /// Mean latency
    pub avg_latency_ms: f64,
    /// Messages per second since start or last reset
    pub throughput_per_sec: f64,
    /// Seconds since start or last reset
    pub uptime_secs: f64,
    /// Messages per level name
    pub messages_by_level: BTreeMap<String, u64>,
    /// Messages per requested layer
    pub messages_by_layer: BTreeMap<String, u64>,
    /// Sinks constructed
    pub handler_creations: u64,
    /// Mean sink construction time
    pub handler_creation_avg_ms: f64,
    /// Fastest sink construction
    pub handler_creation_min_ms: f64,
    /// Slowest sink construction
    pub handler_creation_max_ms: f64,
    /// Security events (e.g. neutralized control sequences)
    pub security_events: u64,
    /// Messages altered by redaction
    pub sanitization_events: u64,
    /// Sinks provided by extensions
    pub plugin_events: u64,
    /// Latest metrics per sink name
    pub handler_metrics: BTreeMap<String, BTreeMap<String, u64>>,
}

impl PerformanceMonitor {
    /// Create an enabled monitor
    pub fn new() -> Self {
        Self::with_enabled(true)
    }

    /// Create a monitor whose record calls are no-ops
    pub fn disabled() -> Self {
        Self::with_enabled(false)
    }

    fn with_enabled(enabled: bool) -> Self {
        Self {
            enabled,
            closed: AtomicBool::new(false),
            state: Mutex::new(Counters::new()),
        }
    }

    /// The process-wide monitor, created on first use
    pub fn shared() -> Arc<Self> {
        let mut shared = SHARED.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(shared.get_or_insert_with(|| Arc::new(Self::new())))
    }

    /// Drop the process-wide monitor; the next [`shared`](Self::shared)
    /// call builds a fresh one. Loggers holding the old one keep it.
    pub fn reset_shared() {
        let previous = SHARED.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(monitor) = previous {
            monitor.close();
        }
    }

    /// Whether record calls have any effect
    pub fn is_active(&self) -> bool {
        self.enabled && !self.closed.load(Ordering::Acquire)
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one log call
    pub fn record_log(&self, layer: &str, level: LogLevel, message: &str, start: Instant, end: Instant) {
        if !self.is_active() {
            return;
        }
        let latency = end.saturating_duration_since(start);

        let mut c = self.counters();
        c.total_messages += 1;
        c.total_message_bytes += message.len() as u64;
        c.total_latency += latency;
        c.min_latency = Some(c.min_latency.map_or(latency, |min| min.min(latency)));
        c.max_latency = c.max_latency.max(latency);
        *c.messages_by_level.entry(level.as_str().to_string()).or_insert(0) += 1;
        *c.messages_by_layer.entry(layer.to_string()).or_insert(0) += 1;
    }

    /// Record how long constructing one sink took
    pub fn record_handler_creation(&self, duration: Duration) {
        if !self.is_active() {
            return;
        }
        let mut c = self.counters();
        c.handler_creations += 1;
        c.handler_creation_total += duration;
        c.handler_creation_min = Some(c.handler_creation_min.map_or(duration, |min| min.min(duration)));
        c.handler_creation_max = c.handler_creation_max.max(duration);
    }

    /// Count a security event
    pub fn record_security_event(&self) {
        if self.is_active() {
            self.counters().security_events += 1;
        }
    }

    /// Count a message altered by redaction
    pub fn record_sanitization_event(&self) {
        if self.is_active() {
            self.counters().sanitization_events += 1;
        }
    }

    /// Count a sink provided by an extension
    pub fn record_plugin_event(&self) {
        if self.is_active() {
            self.counters().plugin_events += 1;
        }
    }

    /// Store the latest metrics for a named sink
    pub fn record_handler_metrics(&self, name: &str, metrics: BTreeMap<String, u64>) {
        if self.is_active() {
            self.counters().handler_metrics.insert(name.to_string(), metrics);
        }
    }

    /// Copy every counter
    pub fn snapshot(&self) -> PerformanceSnapshot {
        let c = self.counters();
        let uptime = c.started_at.elapsed();
        let throughput = if uptime.is_zero() {
            0.0
        } else {
            c.total_messages as f64 / uptime.as_secs_f64()
        };

        PerformanceSnapshot {
            total_messages: c.total_messages,
            total_message_bytes: c.total_message_bytes,
            total_latency_ms: millis(c.total_latency),
            min_latency_ms: c.min_latency.map_or(0.0, millis),
            max_latency_ms: millis(c.max_latency),
            avg_latency_ms: average(c.total_latency, c.total_messages),
            throughput_per_sec: throughput,
            uptime_secs: uptime.as_secs_f64(),
            messages_by_level: c.messages_by_level.clone(),
            messages_by_layer: c.messages_by_layer.clone(),
            handler_creations: c.handler_creations,
            handler_creation_avg_ms: average(c.handler_creation_total, c.handler_creations),
            handler_creation_min_ms: c.handler_creation_min.map_or(0.0, millis),
            handler_creation_max_ms: millis(c.handler_creation_max),
            security_events: c.security_events,
            sanitization_events: c.sanitization_events,
            plugin_events: c.plugin_events,
            handler_metrics: c.handler_metrics.clone(),
        }
    }

    /// Zero every counter and restart the elapsed-time base
    pub fn reset(&self) {
        *self.counters() = Counters::new();
    }

    /// Stop recording; idempotent
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn record(monitor: &PerformanceMonitor, layer: &str, micros: u64) {
        let start = Instant::now();
        monitor.record_log(layer, LogLevel::Info, "hello", start, start + Duration::from_micros(micros));
    }

    #[test]
    fn test_latency_stats() {
        let monitor = PerformanceMonitor::new();
        record(&monitor, "api", 100);
        record(&monitor, "api", 300);
        record(&monitor, "db", 200);

        let snap = monitor.snapshot();
        assert_eq!(snap.total_messages, 3);
        assert_eq!(snap.total_message_bytes, 15);
        assert!((snap.min_latency_ms - 0.1).abs() < 1e-9);
        assert!((snap.max_latency_ms - 0.3).abs() < 1e-9);
        assert!((snap.avg_latency_ms - 0.2).abs() < 1e-9);
        assert!((snap.total_latency_ms - 0.6).abs() < 1e-9);
        assert_eq!(snap.messages_by_layer["api"], 2);
        assert_eq!(snap.messages_by_level["INFO"], 3);
        assert!(snap.throughput_per_sec > 0.0);
    }

    #[test]
    fn test_event_counters() {
        let monitor = PerformanceMonitor::new();
        monitor.record_security_event();
        monitor.record_sanitization_event();
        monitor.record_sanitization_event();
        monitor.record_plugin_event();
        monitor.record_handler_creation(Duration::from_millis(2));
        monitor.record_handler_creation(Duration::from_millis(4));

        let snap = monitor.snapshot();
        assert_eq!(snap.security_events, 1);
        assert_eq!(snap.sanitization_events, 2);
        assert_eq!(snap.plugin_events, 1);
        assert_eq!(snap.handler_creations, 2);
        assert!((snap.handler_creation_avg_ms - 3.0).abs() < 1e-9);
        assert!((snap.handler_creation_min_ms - 2.0).abs() < 1e-9);
        assert!((snap.handler_creation_max_ms - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_handler_metrics_keep_latest() {
        let monitor = PerformanceMonitor::new();
        monitor.record_handler_metrics("app[0]:file", BTreeMap::from([("writes".to_string(), 1)]));
        monitor.record_handler_metrics("app[0]:file", BTreeMap::from([("writes".to_string(), 5)]));

        let snap = monitor.snapshot();
        assert_eq!(snap.handler_metrics.len(), 1);
        assert_eq!(snap.handler_metrics["app[0]:file"]["writes"], 5);
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let monitor = PerformanceMonitor::new();
        record(&monitor, "api", 50);
        monitor.record_plugin_event();
        monitor.reset();

        let snap = monitor.snapshot();
        assert_eq!(snap.total_messages, 0);
        assert_eq!(snap.plugin_events, 0);
        assert_eq!(snap.min_latency_ms, 0.0);
        assert!(snap.messages_by_layer.is_empty());
    }

    #[test]
    fn test_disabled_and_closed_are_noops() {
        let disabled = PerformanceMonitor::disabled();
        record(&disabled, "api", 10);
        disabled.record_security_event();
        assert_eq!(disabled.snapshot().total_messages, 0);
        assert_eq!(disabled.snapshot().security_events, 0);

        let closed = PerformanceMonitor::new();
        record(&closed, "api", 10);
        closed.close();
        closed.close();
        record(&closed, "api", 10);
        assert_eq!(closed.snapshot().total_messages, 1);
    }

    #[test]
    fn test_concurrent_recording() {
        let monitor = Arc::new(PerformanceMonitor::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let monitor = Arc::clone(&monitor);
                thread::spawn(move || {
                    for _ in 0..500 {
                        record(&monitor, "api", 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(monitor.snapshot().total_messages, 4000);
    }

    #[test]
    fn test_shared_instance() {
        let a = PerformanceMonitor::shared();
        let b = PerformanceMonitor::shared();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
