//! Prometheus-style metrics for the interception pipeline
//!
//! Recording is synchronous and lock-free: counters are atomics and latency
//! samples go into a fixed ring indexed by an atomic cursor, so concurrent
//! calls never wait on each other. Percentiles are computed on `snapshot`.

use crate::audit::AuditStats;
use crate::types::StatusKind;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

const DEFAULT_MAX_SAMPLES: usize = 10_000;

/// Pipeline counters and gate latency percentiles
#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    /// Total intercepted calls
    pub total_calls: u64,

    /// Calls that passed every gate
    pub allowed: u64,

    /// Calls denied with `Unauthorized`
    pub denied_unauthorized: u64,

    /// Calls denied with `Forbidden`
    pub denied_forbidden: u64,

    /// Allowed calls whose operation returned an error or panicked
    pub operation_failures: u64,

    /// Pre-handle hook errors and panics that were swallowed
    pub pre_handle_faults: u64,

    /// Gate evaluation latency (p50, p90, p99), filled in by `snapshot`
    pub gate_latency_p50_us: f64,
    pub gate_latency_p90_us: f64,
    pub gate_latency_p99_us: f64,

    /// Average gate evaluation latency
    pub avg_gate_latency_us: f64,
}

impl PipelineMetrics {
    pub fn denied(&self) -> u64 {
        self.denied_unauthorized + self.denied_forbidden
    }

    /// Fraction of calls that passed every gate
    pub fn allow_rate(&self) -> f64 {
        let total = self.allowed + self.denied();
        if total == 0 {
            0.0
        } else {
            self.allowed as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    total_calls: AtomicU64,
    allowed: AtomicU64,
    denied_unauthorized: AtomicU64,
    denied_forbidden: AtomicU64,
    operation_failures: AtomicU64,
    pre_handle_faults: AtomicU64,
}

/// Metrics collector shared by every chain of a service
pub struct GateMetrics {
    counters: Counters,

    /// Latency samples in nanoseconds; slot `cursor % len` is overwritten next
    latency_samples: Box<[AtomicU64]>,

    cursor: AtomicUsize,
}

impl GateMetrics {
    pub fn new() -> Self {
        Self::with_max_samples(DEFAULT_MAX_SAMPLES)
    }

    /// Collector keeping the most recent `max_samples` latency samples
    pub fn with_max_samples(max_samples: usize) -> Self {
        Self {
            counters: Counters::default(),
            latency_samples: (0..max_samples.max(1)).map(|_| AtomicU64::new(0)).collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn record_allowed(&self) {
        self.counters.total_calls.fetch_add(1, Ordering::Relaxed);
        self.counters.allowed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_denied(&self, status: StatusKind) {
        self.counters.total_calls.fetch_add(1, Ordering::Relaxed);
        let counter = match status {
            StatusKind::Unauthorized => &self.counters.denied_unauthorized,
            StatusKind::Forbidden => &self.counters.denied_forbidden,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_operation_failure(&self) {
        self.counters.operation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pre_handle_fault(&self) {
        self.counters.pre_handle_faults.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how long the gates took for one call
    pub fn record_gate_latency(&self, latency: Duration) {
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        let slot = self.cursor.fetch_add(1, Ordering::Relaxed) % self.latency_samples.len();
        self.latency_samples[slot].store(nanos, Ordering::Relaxed);
    }

    /// Current metrics snapshot
    pub fn snapshot(&self) -> PipelineMetrics {
        let filled = self.cursor.load(Ordering::Relaxed).min(self.latency_samples.len());
        let mut sorted: Vec<f64> = self.latency_samples[..filled]
            .iter()
            .map(|sample| sample.load(Ordering::Relaxed) as f64 / 1_000.0)
            .collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let counters = &self.counters;
        let mut metrics = PipelineMetrics {
            total_calls: counters.total_calls.load(Ordering::Relaxed),
            allowed: counters.allowed.load(Ordering::Relaxed),
            denied_unauthorized: counters.denied_unauthorized.load(Ordering::Relaxed),
            denied_forbidden: counters.denied_forbidden.load(Ordering::Relaxed),
            operation_failures: counters.operation_failures.load(Ordering::Relaxed),
            pre_handle_faults: counters.pre_handle_faults.load(Ordering::Relaxed),
            ..Default::default()
        };
        if !sorted.is_empty() {
            metrics.avg_gate_latency_us = sorted.iter().sum::<f64>() / sorted.len() as f64;
        }
        metrics.gate_latency_p50_us = Self::percentile(&sorted, 0.50);
        metrics.gate_latency_p90_us = Self::percentile(&sorted, 0.90);
        metrics.gate_latency_p99_us = Self::percentile(&sorted, 0.99);
        metrics
    }

    pub fn reset(&self) {
        let counters = &self.counters;
        for counter in [
            &counters.total_calls,
            &counters.allowed,
            &counters.denied_unauthorized,
            &counters.denied_forbidden,
            &counters.operation_failures,
            &counters.pre_handle_faults,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.cursor.store(0, Ordering::Relaxed);
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self, audit: Option<&AuditStats>) -> String {
        let metrics = self.snapshot();

        let mut out = format!(
            r#"# HELP warden_calls_total Total number of intercepted calls
# TYPE warden_calls_total counter
warden_calls_total {}

# HELP warden_allowed_total Calls that passed every gate
# TYPE warden_allowed_total counter
warden_allowed_total {}

# HELP warden_denied_total Calls refused by a gate
# TYPE warden_denied_total counter
warden_denied_total{{status="unauthorized"}} {}
warden_denied_total{{status="forbidden"}} {}

# HELP warden_operation_failures_total Operations that failed after admission
# TYPE warden_operation_failures_total counter
warden_operation_failures_total {}

# HELP warden_pre_handle_faults_total Swallowed pre-handle hook faults
# TYPE warden_pre_handle_faults_total counter
warden_pre_handle_faults_total {}

# HELP warden_gate_latency_seconds Gate evaluation latency
# TYPE warden_gate_latency_seconds summary
warden_gate_latency_seconds{{quantile="0.5"}} {}
warden_gate_latency_seconds{{quantile="0.9"}} {}
warden_gate_latency_seconds{{quantile="0.99"}} {}
"#,
            metrics.total_calls,
            metrics.allowed,
            metrics.denied_unauthorized,
            metrics.denied_forbidden,
            metrics.operation_failures,
            metrics.pre_handle_faults,
            metrics.gate_latency_p50_us / 1_000_000.0,
            metrics.gate_latency_p90_us / 1_000_000.0,
            metrics.gate_latency_p99_us / 1_000_000.0,
        );

        if let Some(audit) = audit {
            out.push_str(&format!(
                r#"
# HELP warden_audit_submitted_total Audit records submitted
# TYPE warden_audit_submitted_total counter
warden_audit_submitted_total {}

# HELP warden_audit_persisted_total Audit records durably written
# TYPE warden_audit_persisted_total counter
warden_audit_persisted_total {}

# HELP warden_audit_dropped_total Audit records dropped
# TYPE warden_audit_dropped_total counter
warden_audit_dropped_total{{reason="overflow"}} {}
warden_audit_dropped_total{{reason="failed"}} {}
warden_audit_dropped_total{{reason="closed"}} {}

# HELP warden_audit_queued Audit records waiting to be written
# TYPE warden_audit_queued gauge
warden_audit_queued {}
"#,
                audit.submitted,
                audit.persisted,
                audit.dropped_overflow,
                audit.dropped_failed,
                audit.dropped_closed,
                audit.queued,
            ));
        }

        out
    }

    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }

        let idx = ((sorted.len() as f64) * p) as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}

impl Default for GateMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = GateMetrics::new().snapshot();
        assert_eq!(metrics.total_calls, 0);
        assert_eq!(metrics.allow_rate(), 0.0);
    }

    #[test]
    fn test_record_decisions() {
        let collector = GateMetrics::new();

        collector.record_allowed();
        collector.record_denied(StatusKind::Unauthorized);
        collector.record_denied(StatusKind::Forbidden);
        collector.record_allowed();

        let metrics = collector.snapshot();
        assert_eq!(metrics.total_calls, 4);
        assert_eq!(metrics.allowed, 2);
        assert_eq!(metrics.denied(), 2);
        assert!((metrics.allow_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_record_gate_latency() {
        let collector = GateMetrics::new();

        collector.record_gate_latency(Duration::from_micros(5));
        collector.record_gate_latency(Duration::from_micros(10));
        collector.record_gate_latency(Duration::from_micros(15));

        let metrics = collector.snapshot();
        assert!((metrics.avg_gate_latency_us - 10.0).abs() < 1.0);
        assert!(metrics.gate_latency_p99_us >= metrics.gate_latency_p50_us);
    }

    #[test]
    fn test_latency_ring_keeps_most_recent_samples() {
        let collector = GateMetrics::with_max_samples(4);

        for _ in 0..4 {
            collector.record_gate_latency(Duration::from_micros(1_000));
        }
        for _ in 0..4 {
            collector.record_gate_latency(Duration::from_micros(2));
        }

        let metrics = collector.snapshot();
        assert!((metrics.avg_gate_latency_us - 2.0).abs() < 0.01);
        assert!((metrics.gate_latency_p99_us - 2.0).abs() < 0.01);
    }

    #[test]
    fn test_concurrent_recording_loses_no_counts() {
        let collector = std::sync::Arc::new(GateMetrics::with_max_samples(64));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let collector = std::sync::Arc::clone(&collector);
                std::thread::spawn(move || {
                    for i in 0..1_000 {
                        collector.record_gate_latency(Duration::from_micros(3));
                        if i % 2 == 0 {
                            collector.record_allowed();
                        } else {
                            collector.record_denied(StatusKind::Forbidden);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let metrics = collector.snapshot();
        assert_eq!(metrics.total_calls, 8_000);
        assert_eq!(metrics.allowed, 4_000);
        assert_eq!(metrics.denied_forbidden, 4_000);
        assert!((metrics.avg_gate_latency_us - 3.0).abs() < 0.01);
    }

    #[test]
    fn test_prometheus_export() {
        let collector = GateMetrics::new();
        collector.record_allowed();
        collector.record_denied(StatusKind::Forbidden);

        let text = collector.export_prometheus(None);
        assert!(text.contains("warden_calls_total 2"));
        assert!(text.contains("warden_denied_total{status=\"forbidden\"} 1"));
        assert!(!text.contains("warden_audit_submitted_total"));

        let audit = AuditStats {
            submitted: 7,
            dropped_overflow: 2,
            ..Default::default()
        };
        let text = collector.export_prometheus(Some(&audit));
        assert!(text.contains("warden_audit_submitted_total 7"));
        assert!(text.contains("warden_audit_dropped_total{reason=\"overflow\"} 2"));
    }

    #[test]
    fn test_reset() {
        let collector = GateMetrics::new();
        collector.record_allowed();
        collector.record_pre_handle_fault();
        collector.record_gate_latency(Duration::from_micros(7));
        collector.reset();

        let metrics = collector.snapshot();
        assert_eq!(metrics.total_calls, 0);
        assert_eq!(metrics.pre_handle_faults, 0);
        assert_eq!(metrics.avg_gate_latency_us, 0.0);
    }
}
