//! PostgreSQL audit store
//!
//! Writes one row per record into `audit_log`. The outcome is stored as its
//! JSON rendering so new outcome variants need no schema change.

use super::{AuditOutcome, AuditRecord, AuditStore};
use crate::error::{AuthzError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS audit_log (
    id UUID PRIMARY KEY,
    username TEXT NOT NULL,
    action TEXT NOT NULL,
    details TEXT NOT NULL,
    outcome TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
)
"#;

/// PostgreSQL-backed [`AuditStore`]
pub struct PostgresAuditStore {
    pool: PgPool,
}

impl PostgresAuditStore {
    /// Connect and make sure the `audit_log` table exists
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(3))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| {
                AuthzError::DatabaseError(format!("Failed to connect to database: {}", e))
            })?;

        let store = Self::with_pool(pool);
        store.ensure_schema().await?;
        info!("PostgresAuditStore connected");
        Ok(store)
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(|e| AuthzError::DatabaseError(format!("Failed to create audit_log: {}", e)))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Most recent records of one actor, newest first
    pub async fn query_by_actor(&self, actor_id: &str, limit: i64) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query_as::<_, (Uuid, String, String, String, String, DateTime<Utc>)>(
            r#"
            SELECT id, username, action, details, outcome, created_at
            FROM audit_log
            WHERE username = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(actor_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AuthzError::DatabaseError(format!("Failed to query audit_log: {}", e)))?;

        rows.into_iter()
            .map(|(id, actor_id, action, detail, outcome, timestamp)| {
                let outcome: AuditOutcome = serde_json::from_str(&outcome).map_err(|e| {
                    AuthzError::DatabaseError(format!("Corrupt outcome for record {}: {}", id, e))
                })?;
                Ok(AuditRecord {
                    id,
                    actor_id,
                    action,
                    detail,
                    outcome,
                    timestamp,
                })
            })
            .collect()
    }
}

#[async_trait]
impl AuditStore for PostgresAuditStore {
    async fn persist(&self, record: &AuditRecord) -> Result<()> {
        let outcome = serde_json::to_string(&record.outcome)
            .map_err(|e| AuthzError::AuditStore(format!("Failed to encode outcome: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO audit_log (id, username, action, details, outcome, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(&record.actor_id)
        .bind(&record.action)
        .bind(&record.detail)
        .bind(outcome)
        .bind(record.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| AuthzError::DatabaseError(format!("Failed to insert audit record: {}", e)))?;

        Ok(())
    }
}
