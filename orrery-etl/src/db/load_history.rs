//! Load attempt audit trail
//!
//! One row per ingestion attempt in `load_history`. The content hash is
//! the idempotence key: a repeat attempt whose hash already has a
//! `success` row is reported as a duplicate and skipped. Attempts are
//! never deleted and each reaches exactly one terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{EtlError, EtlResult};

/// Attempt lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    Pending,
    Success,
    Partial,
    Failed,
}

impl LoadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadStatus::Pending => "pending",
            LoadStatus::Success => "success",
            LoadStatus::Partial => "partial",
            LoadStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(LoadStatus::Pending),
            "success" => Some(LoadStatus::Success),
            "partial" => Some(LoadStatus::Partial),
            "failed" => Some(LoadStatus::Failed),
            _ => None,
        }
    }
}

/// One row of the audit trail
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LoadAttempt {
    pub attempt_id: String,
    pub source_id: String,
    pub target_table: String,
    pub status: String,
    pub rows_loaded: i64,
    pub rows_failed: i64,
    pub error_message: Option<String>,
    pub content_hash: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Load tracker over the `load_history` table
#[derive(Clone)]
pub struct LoadTracker {
    db: SqlitePool,
}

impl LoadTracker {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Open a new attempt in `pending` status
    ///
    /// Returns `DuplicateLoad` when the same content hash already has a
    /// `success` attempt; callers treat that as already-done, not as a
    /// failure.
    pub async fn begin(
        &self,
        source_id: &str,
        target_table: &str,
        content_hash: &str,
    ) -> EtlResult<Uuid> {
        let prior: Option<(String,)> = sqlx::query_as(
            "SELECT attempt_id FROM load_history WHERE content_hash = ? AND status = 'success' LIMIT 1",
        )
        .bind(content_hash)
        .fetch_optional(&self.db)
        .await?;

        if let Some((prior_id,)) = prior {
            let attempt_id = Uuid::parse_str(&prior_id).map_err(|e| {
                EtlError::Common(orrery_common::Error::Internal(format!(
                    "Invalid UUID in load_history: {}",
                    e
                )))
            })?;
            tracing::info!(
                content_hash = %content_hash,
                prior_attempt = %attempt_id,
                "Content hash already loaded, skipping"
            );
            return Err(EtlError::DuplicateLoad {
                content_hash: content_hash.to_string(),
                attempt_id,
            });
        }

        let attempt_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO load_history
                (attempt_id, source_id, target_table, status, content_hash, started_at)
            VALUES (?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(attempt_id.to_string())
        .bind(source_id)
        .bind(target_table)
        .bind(content_hash)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;

        tracing::debug!(
            attempt_id = %attempt_id,
            source_id = %source_id,
            target_table = %target_table,
            "Load attempt opened"
        );

        Ok(attempt_id)
    }

    /// Set the terminal status of an attempt
    ///
    /// Status is derived from the counts: `success` when nothing failed,
    /// `failed` when nothing loaded and something failed (or an explicit
    /// error is recorded), otherwise `partial`. The update is guarded on
    /// `status = 'pending'` so a terminal status is never revisited.
    pub async fn finalize(
        &self,
        attempt_id: Uuid,
        rows_loaded: i64,
        rows_failed: i64,
        error_message: Option<&str>,
    ) -> EtlResult<LoadStatus> {
        let status = if error_message.is_some() || (rows_loaded == 0 && rows_failed > 0) {
            LoadStatus::Failed
        } else if rows_failed > 0 {
            LoadStatus::Partial
        } else {
            LoadStatus::Success
        };

        let result = sqlx::query(
            r#"
            UPDATE load_history
            SET status = ?, rows_loaded = ?, rows_failed = ?, error_message = ?, completed_at = ?
            WHERE attempt_id = ? AND status = 'pending'
            "#,
        )
        .bind(status.as_str())
        .bind(rows_loaded)
        .bind(rows_failed)
        .bind(error_message)
        .bind(Utc::now())
        .bind(attempt_id.to_string())
        .execute(&self.db)
        .await?;

        if result.rows_affected() != 1 {
            return Err(EtlError::Common(orrery_common::Error::Internal(format!(
                "Attempt {} is not pending, refusing to finalize twice",
                attempt_id
            ))));
        }

        tracing::info!(
            attempt_id = %attempt_id,
            status = status.as_str(),
            rows_loaded,
            rows_failed,
            "Load attempt finalized"
        );

        Ok(status)
    }

    /// Fetch one attempt by id
    pub async fn get(&self, attempt_id: Uuid) -> EtlResult<Option<LoadAttempt>> {
        let attempt = sqlx::query_as::<_, LoadAttempt>(
            "SELECT * FROM load_history WHERE attempt_id = ?",
        )
        .bind(attempt_id.to_string())
        .fetch_optional(&self.db)
        .await?;
        Ok(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_begin_and_finalize_success() {
        let pool = test_pool().await;
        let tracker = LoadTracker::new(pool);

        let id = tracker.begin("orders.ndjson", "fact_orders", "hash-1").await.unwrap();
        let status = tracker.finalize(id, 10, 0, None).await.unwrap();
        assert_eq!(status, LoadStatus::Success);

        let attempt = tracker.get(id).await.unwrap().unwrap();
        assert_eq!(attempt.status, "success");
        assert_eq!(attempt.rows_loaded, 10);
        assert!(attempt.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_partial_and_failed_status() {
        let pool = test_pool().await;
        let tracker = LoadTracker::new(pool);

        let id = tracker.begin("a", "fact_orders", "hash-a").await.unwrap();
        assert_eq!(tracker.finalize(id, 95, 5, None).await.unwrap(), LoadStatus::Partial);

        let id = tracker.begin("b", "fact_orders", "hash-b").await.unwrap();
        assert_eq!(tracker.finalize(id, 0, 7, None).await.unwrap(), LoadStatus::Failed);

        let id = tracker.begin("c", "fact_orders", "hash-c").await.unwrap();
        assert_eq!(
            tracker.finalize(id, 0, 0, Some("disk full")).await.unwrap(),
            LoadStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_duplicate_hash_after_success_is_skip() {
        let pool = test_pool().await;
        let tracker = LoadTracker::new(pool);

        let first = tracker.begin("orders.ndjson", "fact_orders", "same-hash").await.unwrap();
        tracker.finalize(first, 100, 0, None).await.unwrap();

        let err = tracker
            .begin("orders.ndjson", "fact_orders", "same-hash")
            .await
            .unwrap_err();
        match err {
            EtlError::DuplicateLoad { attempt_id, .. } => assert_eq!(attempt_id, first),
            other => panic!("Expected DuplicateLoad, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_hash_after_failure_is_retryable() {
        let pool = test_pool().await;
        let tracker = LoadTracker::new(pool);

        let first = tracker.begin("orders.ndjson", "fact_orders", "retry-hash").await.unwrap();
        tracker.finalize(first, 0, 0, Some("write failure")).await.unwrap();

        // A failed attempt does not block a retry with the same hash
        let second = tracker.begin("orders.ndjson", "fact_orders", "retry-hash").await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_finalize_is_terminal_once() {
        let pool = test_pool().await;
        let tracker = LoadTracker::new(pool);

        let id = tracker.begin("x", "fact_orders", "hash-x").await.unwrap();
        tracker.finalize(id, 1, 0, None).await.unwrap();

        let err = tracker.finalize(id, 2, 0, None).await;
        assert!(err.is_err());

        let attempt = tracker.get(id).await.unwrap().unwrap();
        assert_eq!(attempt.rows_loaded, 1);
    }
}
