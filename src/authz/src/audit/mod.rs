//! Audit trail for intercepted calls
//!
//! Every pass through an [`InterceptionChain`](crate::chain::InterceptionChain)
//! produces exactly one [`AuditRecord`], handed to an [`AuditRecorder`].
//! The production recorder is [`AuditSink`]: a bounded queue drained by
//! background workers that write to an [`AuditStore`]. Submission never
//! blocks the caller and persistence failures never reach it.

pub mod sink;
pub mod store;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use sink::{AuditSink, AuditSinkConfig, AuditStats, OverflowPolicy};
pub use store::{AuditStore, InMemoryAuditStore};
#[cfg(feature = "postgres")]
pub use postgres::PostgresAuditStore;

use crate::types::{StatusKind, ANONYMOUS_ACTOR};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How an intercepted call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditOutcome {
    /// All gates passed and the operation returned `Ok`
    Allowed,
    /// A gate refused the call
    Denied { status: StatusKind },
    /// The operation returned an error
    Failed,
    /// The operation panicked
    Panicked,
    /// The async call was dropped before completing
    Cancelled,
}

/// One completed call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique record identifier
    pub id: Uuid,

    /// Principal id, or `"anonymous"`
    pub actor_id: String,

    /// Symbolic operation identifier
    pub action: String,

    /// Snapshot of the call arguments
    pub detail: String,

    /// How the call ended
    pub outcome: AuditOutcome,

    /// Time of emission (end of the call, not its start)
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    /// Create a record stamped with the current time
    pub fn new(
        actor_id: Option<&str>,
        action: impl Into<String>,
        detail: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id: actor_id.unwrap_or(ANONYMOUS_ACTOR).to_string(),
            action: action.into(),
            detail: detail.into(),
            outcome,
            timestamp: Utc::now(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.actor_id == ANONYMOUS_ACTOR
    }
}

/// Accepts completed audit records
///
/// `submit` must return promptly and must not fail on behalf of the caller.
pub trait AuditRecorder: Send + Sync {
    fn submit(&self, record: AuditRecord);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_defaults_to_anonymous_actor() {
        let record = AuditRecord::new(None, "HELLO", "[]", AuditOutcome::Allowed);
        assert_eq!(record.actor_id, "anonymous");
        assert!(record.is_anonymous());
    }

    #[test]
    fn test_record_serialization() {
        let record = AuditRecord::new(
            Some("alice"),
            "HELLO",
            "[]",
            AuditOutcome::Denied {
                status: StatusKind::Forbidden,
            },
        );

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["actor_id"], "alice");
        assert_eq!(json["outcome"]["type"], "denied");
        assert_eq!(json["outcome"]["status"], "FORBIDDEN");

        let back: AuditRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_record_ids_are_unique() {
        let a = AuditRecord::new(Some("alice"), "A", "", AuditOutcome::Failed);
        let b = AuditRecord::new(Some("alice"), "A", "", AuditOutcome::Failed);
        assert_ne!(a.id, b.id);
    }
}
