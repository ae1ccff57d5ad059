//! Call metrics for monitoring and diagnostics.
//!
//! This module counts what happens to calls as they cross the bridge:
//! submitted, resolved, failed, timed out, rejected, or abandoned, and
//! tracks the round-trip latency of resolved calls.

use crate::error::ErrorCode;
use crate::lifecycle::LifecycleState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Snapshot of a bridge's counters and state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStats {
    /// Lifecycle state at snapshot time
    pub state: LifecycleState,

    /// Calls currently waiting for a result
    pub pending_calls: usize,

    /// Calls handed to the engine (async and sync)
    pub calls_submitted: u64,

    /// Pending callbacks fired by a script result
    pub results_resolved: u64,

    /// Results that matched no pending call
    pub unsolicited_results: u64,

    /// Scripts the engine failed to evaluate
    pub evaluation_failures: u64,

    /// Calls that reached their deadline
    pub timeouts: u64,

    /// Calls refused before reaching the engine
    pub rejected_calls: u64,

    /// Pending callbacks dropped by disposal
    pub abandoned_calls: u64,

    /// Average round trip of resolved calls in microseconds
    pub avg_round_trip_us: f64,
}

/// Metrics collector shared by the bridge, correlator and result intake
pub struct MetricsCollector {
    calls_submitted: AtomicU64,
    results_resolved: AtomicU64,
    unsolicited_results: AtomicU64,
    evaluation_failures: AtomicU64,
    timeouts: AtomicU64,
    replaced_callbacks: AtomicU64,
    callback_panics: AtomicU64,
    abandoned_calls: AtomicU64,
    total_round_trip_us: AtomicU64,
    rejections: parking_lot::Mutex<HashMap<ErrorCode, u64>>,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            calls_submitted: AtomicU64::new(0),
            results_resolved: AtomicU64::new(0),
            unsolicited_results: AtomicU64::new(0),
            evaluation_failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            replaced_callbacks: AtomicU64::new(0),
            callback_panics: AtomicU64::new(0),
            abandoned_calls: AtomicU64::new(0),
            total_round_trip_us: AtomicU64::new(0),
            rejections: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Record a call handed to the engine
    pub fn record_submitted(&self) {
        self.calls_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a resolved call and its round trip
    pub fn record_resolved(&self, round_trip: Duration) {
        self.results_resolved.fetch_add(1, Ordering::Relaxed);
        self.total_round_trip_us
            .fetch_add(round_trip.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record a result with no pending call
    pub fn record_unsolicited(&self) {
        self.unsolicited_results.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an engine evaluation failure
    pub fn record_evaluation_failure(&self) {
        self.evaluation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an expired call
    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a pending callback replaced by a newer registration
    pub fn record_replaced(&self) {
        self.replaced_callbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a callback that panicked
    pub fn record_callback_panic(&self) {
        self.callback_panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Record callbacks dropped by disposal
    pub fn record_abandoned(&self, count: usize) {
        self.abandoned_calls
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record a call refused before reaching the engine
    pub fn record_rejection(&self, code: ErrorCode) {
        let mut rejections = self.rejections.lock();
        *rejections.entry(code).or_insert(0) += 1;
    }

    /// Get submitted calls
    pub fn calls_submitted(&self) -> u64 {
        self.calls_submitted.load(Ordering::Relaxed)
    }

    /// Get resolved results
    pub fn results_resolved(&self) -> u64 {
        self.results_resolved.load(Ordering::Relaxed)
    }

    /// Get unsolicited results
    pub fn unsolicited_results(&self) -> u64 {
        self.unsolicited_results.load(Ordering::Relaxed)
    }

    /// Get evaluation failures
    pub fn evaluation_failures(&self) -> u64 {
        self.evaluation_failures.load(Ordering::Relaxed)
    }

    /// Get timeouts
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Get replaced callbacks
    pub fn replaced_callbacks(&self) -> u64 {
        self.replaced_callbacks.load(Ordering::Relaxed)
    }

    /// Get panicking callbacks
    pub fn callback_panics(&self) -> u64 {
        self.callback_panics.load(Ordering::Relaxed)
    }

    /// Get abandoned calls
    pub fn abandoned_calls(&self) -> u64 {
        self.abandoned_calls.load(Ordering::Relaxed)
    }

    /// Get rejection counts by code
    pub fn rejections(&self) -> HashMap<ErrorCode, u64> {
        self.rejections.lock().clone()
    }

    /// Get total rejected calls
    pub fn rejected_calls(&self) -> u64 {
        self.rejections.lock().values().sum()
    }

    /// Get average round trip in microseconds
    pub fn avg_round_trip_us(&self) -> f64 {
        let resolved = self.results_resolved();
        if resolved == 0 {
            0.0
        } else {
            self.total_round_trip_us.load(Ordering::Relaxed) as f64 / resolved as f64
        }
    }

    /// Build a stats snapshot
    pub fn snapshot(&self, state: LifecycleState, pending_calls: usize) -> BridgeStats {
        BridgeStats {
            state,
            pending_calls,
            calls_submitted: self.calls_submitted(),
            results_resolved: self.results_resolved(),
            unsolicited_results: self.unsolicited_results(),
            evaluation_failures: self.evaluation_failures(),
            timeouts: self.timeouts(),
            rejected_calls: self.rejected_calls(),
            abandoned_calls: self.abandoned_calls(),
            avg_round_trip_us: self.avg_round_trip_us(),
        }
    }

    /// Export Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP js_bridge_calls_total Calls handed to the script engine\n");
        output.push_str("# TYPE js_bridge_calls_total counter\n");
        output.push_str(&format!("js_bridge_calls_total {}\n", self.calls_submitted()));

        output.push_str("\n# HELP js_bridge_results_total Results delivered by scripts\n");
        output.push_str("# TYPE js_bridge_results_total counter\n");
        output.push_str(&format!(
            "js_bridge_results_total{{outcome=\"resolved\"}} {}\n",
            self.results_resolved()
        ));
        output.push_str(&format!(
            "js_bridge_results_total{{outcome=\"unsolicited\"}} {}\n",
            self.unsolicited_results()
        ));

        output.push_str("\n# HELP js_bridge_failures_total Calls that ended without a script result\n");
        output.push_str("# TYPE js_bridge_failures_total counter\n");
        output.push_str(&format!(
            "js_bridge_failures_total{{reason=\"evaluation\"}} {}\n",
            self.evaluation_failures()
        ));
        output.push_str(&format!(
            "js_bridge_failures_total{{reason=\"timeout\"}} {}\n",
            self.timeouts()
        ));
        output.push_str(&format!(
            "js_bridge_failures_total{{reason=\"abandoned\"}} {}\n",
            self.abandoned_calls()
        ));

        output.push_str("\n# HELP js_bridge_round_trip_us Average round trip of resolved calls\n");
        output.push_str("# TYPE js_bridge_round_trip_us gauge\n");
        output.push_str(&format!(
            "js_bridge_round_trip_us {:.2}\n",
            self.avg_round_trip_us()
        ));

        output.push_str("\n# HELP js_bridge_rejections_total Calls refused by code\n");
        output.push_str("# TYPE js_bridge_rejections_total counter\n");
        for (code, count) in self.rejections() {
            output.push_str(&format!(
                "js_bridge_rejections_total{{code=\"{}\"}} {}\n",
                code, count
            ));
        }

        output
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_starts_empty() {
        let collector = MetricsCollector::new();
        assert_eq!(collector.calls_submitted(), 0);
        assert_eq!(collector.rejected_calls(), 0);
        assert_eq!(collector.avg_round_trip_us(), 0.0);
    }

    #[test]
    fn test_round_trip_average() {
        let collector = MetricsCollector::new();
        collector.record_resolved(Duration::from_micros(100));
        collector.record_resolved(Duration::from_micros(300));

        assert_eq!(collector.results_resolved(), 2);
        assert!((collector.avg_round_trip_us() - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rejections_by_code() {
        let collector = MetricsCollector::new();
        collector.record_rejection(ErrorCode::ValidationError);
        collector.record_rejection(ErrorCode::ValidationError);
        collector.record_rejection(ErrorCode::InvalidState);

        assert_eq!(collector.rejected_calls(), 3);
        assert_eq!(collector.rejections()[&ErrorCode::ValidationError], 2);
    }

    #[test]
    fn test_snapshot() {
        let collector = MetricsCollector::new();
        collector.record_submitted();
        collector.record_abandoned(2);

        let stats = collector.snapshot(LifecycleState::Disposed, 0);
        assert_eq!(stats.calls_submitted, 1);
        assert_eq!(stats.abandoned_calls, 2);
        assert_eq!(stats.state, LifecycleState::Disposed);

        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"pendingCalls\":0"));
        assert!(json.contains("\"state\":\"disposed\""));
    }

    #[test]
    fn test_prometheus_output() {
        let collector = MetricsCollector::new();
        collector.record_submitted();
        collector.record_timeout();
        collector.record_rejection(ErrorCode::Conflict);

        let output = collector.to_prometheus();
        assert!(output.contains("js_bridge_calls_total 1"));
        assert!(output.contains("js_bridge_failures_total{reason=\"timeout\"} 1"));
        assert!(output.contains("js_bridge_rejections_total{code=\"CONFLICT\"} 1"));
    }
}
