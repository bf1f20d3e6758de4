//! Asynchronous, bounded audit sink
//!
//! ```text
//! caller threads ──submit()──▶ [bounded VecDeque] ──▶ worker 1..N ──▶ AuditStore
//!                   O(1), never awaits      │            retry + backoff
//!                                     overflow policy
//! ```
//!
//! The queue is the only structure shared between concurrent calls. It is
//! guarded by a `parking_lot::Mutex` that is never held across an `.await`.
//! Workers are tokio tasks woken through [`tokio::sync::Notify`].

use super::{AuditRecord, AuditRecorder, AuditStore};
use crate::error::{AuthzError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What to discard when the queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued record to make room
    #[default]
    DropOldest,
    /// Discard the record being submitted
    DropIncoming,
}

impl std::str::FromStr for OverflowPolicy {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "drop_oldest" => Ok(OverflowPolicy::DropOldest),
            "drop_incoming" => Ok(OverflowPolicy::DropIncoming),
            other => Err(AuthzError::Configuration(format!(
                "unknown overflow policy '{}'",
                other
            ))),
        }
    }
}

/// Audit sink configuration
///
/// Durations are expressed in milliseconds so the struct maps directly onto
/// configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSinkConfig {
    /// Maximum queued records
    pub capacity: usize,

    /// Background worker tasks
    pub workers: usize,

    /// Overflow behavior
    pub overflow: OverflowPolicy,

    /// Retries after the first failed persist attempt
    pub max_retries: u32,

    /// Backoff before the first retry
    pub initial_backoff_ms: u64,

    /// Upper bound on backoff
    pub max_backoff_ms: u64,

    /// Backoff growth factor
    pub backoff_multiplier: f64,

    /// Timeout for a single persist attempt
    pub persist_timeout_ms: u64,
}

impl Default for AuditSinkConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            workers: 2,
            overflow: OverflowPolicy::DropOldest,
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            backoff_multiplier: 2.0,
            persist_timeout_ms: 5_000,
        }
    }
}

impl AuditSinkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(AuthzError::Configuration(
                "audit capacity must be at least 1".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(AuthzError::Configuration(
                "audit workers must be at least 1".to_string(),
            ));
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(AuthzError::Configuration(format!(
                "backoff multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.persist_timeout_ms == 0 {
            return Err(AuthzError::Configuration(
                "persist timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_timeout_ms)
    }

    /// Exponential backoff before retry number `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let backoff_ms =
            (self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent)) as u64;
        Duration::from_millis(backoff_ms.min(self.max_backoff_ms))
    }
}

/// Snapshot of sink counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuditStats {
    /// Records handed to `submit`
    pub submitted: u64,
    /// Records durably written
    pub persisted: u64,
    /// Records discarded by the overflow policy
    pub dropped_overflow: u64,
    /// Records discarded after exhausting retries
    pub dropped_failed: u64,
    /// Records submitted after shutdown began
    pub dropped_closed: u64,
    /// Retry attempts performed
    pub retries: u64,
    /// Records waiting in the queue
    pub queued: usize,
    /// Records being written right now
    pub in_flight: usize,
}

impl AuditStats {
    pub fn dropped(&self) -> u64 {
        self.dropped_overflow + self.dropped_failed + self.dropped_closed
    }
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    persisted: AtomicU64,
    dropped_overflow: AtomicU64,
    dropped_failed: AtomicU64,
    dropped_closed: AtomicU64,
    retries: AtomicU64,
}

struct Shared {
    queue: Mutex<VecDeque<AuditRecord>>,
    notify: Notify,
    closed: AtomicBool,
    in_flight: AtomicUsize,
    counters: Counters,
    store: Arc<dyn AuditStore>,
    config: AuditSinkConfig,
}

impl Shared {
    fn close(&self) {
        {
            let _queue = self.queue.lock();
            self.closed.store(true, Ordering::SeqCst);
        }
        self.notify.notify_waiters();
    }
}

/// Bounded, multi-worker audit sink
pub struct AuditSink {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl AuditSink {
    /// Start the sink and spawn its workers on the current tokio runtime
    pub fn start(config: AuditSinkConfig, store: Arc<dyn AuditStore>) -> Result<Self> {
        config.validate()?;

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            AuthzError::Runtime(format!("audit sink requires a tokio runtime: {}", e))
        })?;

        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(config.capacity.min(1024))),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            counters: Counters::default(),
            store,
            config,
        });

        let workers = (0..shared.config.workers)
            .map(|id| runtime.spawn(run_worker(id, Arc::clone(&shared))))
            .collect();

        info!(
            "AuditSink started with workers={}, capacity={}, overflow={:?}",
            shared.config.workers, shared.config.capacity, shared.config.overflow
        );

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
        })
    }

    pub fn config(&self) -> &AuditSinkConfig {
        &self.shared.config
    }

    /// Current counters
    pub fn stats(&self) -> AuditStats {
        let counters = &self.shared.counters;
        let (queued, in_flight) = self.pending_parts();

        AuditStats {
            submitted: counters.submitted.load(Ordering::Relaxed),
            persisted: counters.persisted.load(Ordering::Relaxed),
            dropped_overflow: counters.dropped_overflow.load(Ordering::Relaxed),
            dropped_failed: counters.dropped_failed.load(Ordering::Relaxed),
            dropped_closed: counters.dropped_closed.load(Ordering::Relaxed),
            retries: counters.retries.load(Ordering::Relaxed),
            queued,
            in_flight,
        }
    }

    /// Wait until every accepted record has been persisted or dropped
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            let (queued, in_flight) = self.pending_parts();
            if queued == 0 && in_flight == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                warn!(
                    "Audit flush timed out with {} queued and {} in flight",
                    queued, in_flight
                );
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Stop accepting records, drain the queue and join the workers
    pub async fn shutdown(&self) {
        self.shared.close();

        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if let Err(e) = handle.await {
                error!("Audit worker terminated abnormally: {}", e);
            }
        }

        let stats = self.stats();
        info!(
            "AuditSink stopped: submitted={}, persisted={}, dropped={}",
            stats.submitted,
            stats.persisted,
            stats.dropped()
        );
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Queue length and in-flight count, read under the queue lock
    fn pending_parts(&self) -> (usize, usize) {
        let queue = self.shared.queue.lock();
        (queue.len(), self.shared.in_flight.load(Ordering::SeqCst))
    }
}

impl AuditRecorder for AuditSink {
    fn submit(&self, record: AuditRecord) {
        let shared = &self.shared;
        shared.counters.submitted.fetch_add(1, Ordering::Relaxed);

        {
            // `closed` is only set under this lock, so a record pushed here
            // is always seen by a worker before it exits.
            let mut queue = shared.queue.lock();
            if shared.closed.load(Ordering::SeqCst) {
                drop(queue);
                shared.counters.dropped_closed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Audit sink closed, dropping record {} ({} by {})",
                    record.id, record.action, record.actor_id
                );
                return;
            }

            if queue.len() >= shared.config.capacity {
                shared.counters.dropped_overflow.fetch_add(1, Ordering::Relaxed);
                match shared.config.overflow {
                    OverflowPolicy::DropIncoming => {
                        drop(queue);
                        warn!(
                            "Audit queue full, dropping incoming record {} ({})",
                            record.id, record.action
                        );
                        return;
                    }
                    OverflowPolicy::DropOldest => {
                        if let Some(evicted) = queue.pop_front() {
                            warn!(
                                "Audit queue full, dropping oldest record {} ({})",
                                evicted.id, evicted.action
                            );
                        }
                    }
                }
            }
            queue.push_back(record);
        }

        shared.notify.notify_one();
    }
}

impl Drop for AuditSink {
    fn drop(&mut self) {
        // Detached workers drain what is left and exit.
        self.shared.close();
    }
}

async fn run_worker(id: usize, shared: Arc<Shared>) {
    debug!("Audit worker {} started", id);

    loop {
        // Register interest before inspecting the queue so a submit or
        // shutdown between the check and the await is not missed.
        let notified = shared.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let (next, closed) = {
            let mut queue = shared.queue.lock();
            let record = queue.pop_front();
            if record.is_some() {
                shared.in_flight.fetch_add(1, Ordering::SeqCst);
            }
            (record, shared.closed.load(Ordering::SeqCst))
        };

        match next {
            Some(record) => {
                persist_with_retry(&shared, record).await;
                shared.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            None if closed => break,
            None => notified.await,
        }
    }

    debug!("Audit worker {} stopped", id);
}

async fn persist_with_retry(shared: &Shared, record: AuditRecord) {
    let timeout = shared.config.persist_timeout();
    let mut attempt = 0u32;

    loop {
        match persist_once(shared, &record, timeout).await {
            Ok(()) => {
                shared.counters.persisted.fetch_add(1, Ordering::Relaxed);
                debug!("Audit record {} persisted ({})", record.id, record.action);
                return;
            }
            Err(e) if attempt < shared.config.max_retries => {
                attempt += 1;
                shared.counters.retries.fetch_add(1, Ordering::Relaxed);
                let backoff = shared.config.backoff_for(attempt);
                warn!(
                    "Persisting audit record {} failed (attempt {}): {}; retrying in {:?}",
                    record.id, attempt, e, backoff
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => {
                shared.counters.dropped_failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    "Dropping audit record {} ({} by {}) after {} retries: {}",
                    record.id, record.action, record.actor_id, attempt, e
                );
                return;
            }
        }
    }
}

/// One bounded attempt; a panicking store is reported as a failure
async fn persist_once(shared: &Shared, record: &AuditRecord, timeout: Duration) -> Result<()> {
    let store = Arc::clone(&shared.store);
    let record = record.clone();
    let mut handle = tokio::spawn(async move { store.persist(&record).await });

    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(AuthzError::AuditStore(format!(
            "store task failed: {}",
            join_error
        ))),
        Err(_) => {
            handle.abort();
            Err(AuthzError::Timeout(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditOutcome, InMemoryAuditStore};

    fn record(action: &str) -> AuditRecord {
        AuditRecord::new(Some("alice"), action, "[]", AuditOutcome::Allowed)
    }

    #[test]
    fn test_backoff_calculation() {
        let config = AuditSinkConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: 350,
            backoff_multiplier: 2.0,
            ..Default::default()
        };

        assert_eq!(config.backoff_for(1), Duration::from_millis(100));
        assert_eq!(config.backoff_for(2), Duration::from_millis(200));
        assert_eq!(config.backoff_for(3), Duration::from_millis(350));
    }

    #[test]
    fn test_config_validation() {
        assert!(AuditSinkConfig::default().validate().is_ok());

        let zero_capacity = AuditSinkConfig {
            capacity: 0,
            ..Default::default()
        };
        assert!(zero_capacity.validate().is_err());

        let zero_workers = AuditSinkConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(zero_workers.validate().is_err());

        let shrinking = AuditSinkConfig {
            backoff_multiplier: 0.5,
            ..Default::default()
        };
        assert!(shrinking.validate().is_err());

        let not_a_number = AuditSinkConfig {
            backoff_multiplier: f64::NAN,
            ..Default::default()
        };
        assert!(not_a_number.validate().is_err());
    }

    #[test]
    fn test_overflow_policy_parsing() {
        assert_eq!(
            "drop-oldest".parse::<OverflowPolicy>().unwrap(),
            OverflowPolicy::DropOldest
        );
        assert_eq!(
            "DROP_INCOMING".parse::<OverflowPolicy>().unwrap(),
            OverflowPolicy::DropIncoming
        );
        assert!("block".parse::<OverflowPolicy>().is_err());
    }

    #[test]
    fn test_start_requires_runtime() {
        let result = AuditSink::start(
            AuditSinkConfig::default(),
            Arc::new(InMemoryAuditStore::new()),
        );
        assert!(matches!(result, Err(AuthzError::Runtime(_))));
    }

    #[tokio::test]
    async fn test_submit_and_flush() {
        let store = Arc::new(InMemoryAuditStore::new());
        let sink = AuditSink::start(AuditSinkConfig::default(), store.clone()).unwrap();

        for i in 0..10 {
            sink.submit(record(&format!("OP_{}", i)));
        }

        assert!(sink.flush(Duration::from_secs(5)).await);
        assert_eq!(store.len(), 10);

        let stats = sink.stats();
        assert_eq!(stats.submitted, 10);
        assert_eq!(stats.persisted, 10);
        assert_eq!(stats.dropped(), 0);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_dropped() {
        let store = Arc::new(InMemoryAuditStore::new());
        let sink = AuditSink::start(AuditSinkConfig::default(), store.clone()).unwrap();

        sink.submit(record("BEFORE"));
        sink.shutdown().await;
        sink.submit(record("AFTER"));

        assert!(sink.is_closed());
        assert_eq!(store.len(), 1);
        assert_eq!(sink.stats().dropped_closed, 1);
    }
}
