//! Durable storage collaborators for audit records

use super::AuditRecord;
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::RwLock;

/// Durable storage for audit records
///
/// Only [`AuditSink`](super::AuditSink) workers call this. Implementations
/// may fail; the sink retries with backoff and eventually drops the record.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persist one record
    async fn persist(&self, record: &AuditRecord) -> Result<()>;
}

/// In-memory audit store
///
/// Keeps at most `max_entries` records; the oldest are evicted in blocks.
pub struct InMemoryAuditStore {
    entries: RwLock<Vec<AuditRecord>>,
    max_entries: usize,
}

impl InMemoryAuditStore {
    /// Create a store holding up to 10,000 records
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Most recent records for an actor, newest first
    pub fn query_by_actor(&self, actor_id: &str, limit: usize) -> Vec<AuditRecord> {
        self.entries
            .read()
            .iter()
            .rev()
            .filter(|r| r.actor_id == actor_id)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Most recent records, newest first
    pub fn recent(&self, limit: usize) -> Vec<AuditRecord> {
        self.entries.read().iter().rev().take(limit).cloned().collect()
    }

    /// All records in persistence order
    pub fn all(&self) -> Vec<AuditRecord> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for InMemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn persist(&self, record: &AuditRecord) -> Result<()> {
        let mut entries = self.entries.write();
        entries.push(record.clone());

        if entries.len() > self.max_entries {
            let excess = (entries.len() - self.max_entries).max(self.max_entries / 10);
            let excess = excess.min(entries.len());
            entries.drain(0..excess);
        }

        Ok(())
    }
}
