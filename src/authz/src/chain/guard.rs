//! Drop guard that emits the audit record of one call
//!
//! The record is submitted exactly once: by [`AuditGuard::finish`] on every
//! normal return, or by `Drop` when the call unwinds (panic) or its future is
//! dropped (cancellation).

use crate::audit::{AuditOutcome, AuditRecord, AuditRecorder};
use crate::metrics::GateMetrics;
use std::sync::Arc;
use tracing::warn;

struct Pending {
    recorder: Arc<dyn AuditRecorder>,
    metrics: Option<Arc<GateMetrics>>,
    actor_id: Option<String>,
    action: String,
    detail: String,
}

impl Pending {
    fn emit(self, outcome: AuditOutcome) {
        let record = AuditRecord::new(
            self.actor_id.as_deref(),
            self.action,
            self.detail,
            outcome,
        );
        self.recorder.submit(record);
    }
}

pub(crate) struct AuditGuard {
    pending: Option<Pending>,
}

impl AuditGuard {
    pub(crate) fn new(
        recorder: Arc<dyn AuditRecorder>,
        metrics: Option<Arc<GateMetrics>>,
        actor_id: Option<String>,
        action: String,
        detail: String,
    ) -> Self {
        Self {
            pending: Some(Pending {
                recorder,
                metrics,
                actor_id,
                action,
                detail,
            }),
        }
    }

    /// Submit the record with the call's outcome
    pub(crate) fn finish(mut self, outcome: AuditOutcome) {
        if let Some(pending) = self.pending.take() {
            pending.emit(outcome);
        }
    }
}

impl Drop for AuditGuard {
    fn drop(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        let outcome = if std::thread::panicking() {
            AuditOutcome::Panicked
        } else {
            AuditOutcome::Cancelled
        };

        warn!(
            "Call to '{}' did not complete ({:?}); recording audit entry",
            pending.action, outcome
        );

        if let Some(metrics) = &pending.metrics {
            metrics.record_operation_failure();
        }

        pending.emit(outcome);
    }
}
