//! Quarantine storage for rejected records
//!
//! Records that fail validation or conversion are written here with the
//! reason and the attempt that produced them. Quarantined records never
//! reach the star schema; they are kept for operator inspection.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::EtlResult;
use crate::types::RawRecord;

/// One quarantined record
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QuarantinedRecord {
    pub record_id: String,
    pub attempt_id: String,
    pub source_id: String,
    pub payload: String,
    pub reason: String,
    pub quarantined_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct QuarantineStore {
    db: SqlitePool,
}

impl QuarantineStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Persist one rejected record with its reason
    pub async fn put(
        &self,
        attempt_id: Uuid,
        record: &RawRecord,
        reason: &str,
    ) -> EtlResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO quarantine
                (record_id, attempt_id, source_id, payload, reason, quarantined_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.record_id.to_string())
        .bind(attempt_id.to_string())
        .bind(&record.source_id)
        .bind(record.payload.to_string())
        .bind(reason)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;

        tracing::warn!(
            record_id = %record.record_id,
            source_id = %record.source_id,
            reason = %reason,
            "Record quarantined"
        );

        Ok(())
    }

    /// All records quarantined under one attempt
    pub async fn for_attempt(&self, attempt_id: Uuid) -> EtlResult<Vec<QuarantinedRecord>> {
        let rows = sqlx::query_as::<_, QuarantinedRecord>(
            "SELECT * FROM quarantine WHERE attempt_id = ? ORDER BY quarantined_at",
        )
        .bind(attempt_id.to_string())
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    pub async fn count(&self) -> EtlResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM quarantine")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use serde_json::json;

    fn record(payload: serde_json::Value) -> RawRecord {
        RawRecord {
            record_id: Uuid::new_v4(),
            payload,
            source_id: "orders.ndjson".to_string(),
            content_hash: "abc".to_string(),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_put_and_fetch() {
        let pool = test_pool().await;
        let store = QuarantineStore::new(pool);
        let attempt = Uuid::new_v4();

        let rec = record(json!({"order_id": "ORD-1", "amount": -5.0}));
        store
            .put(attempt, &rec, "field 'amount' out of range")
            .await
            .unwrap();

        let rows = store.for_attempt(attempt).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record_id, rec.record_id.to_string());
        assert!(rows[0].reason.contains("amount"));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_other_attempt_not_returned() {
        let pool = test_pool().await;
        let store = QuarantineStore::new(pool);

        let rec = record(json!({"bad": true}));
        store.put(Uuid::new_v4(), &rec, "missing fields").await.unwrap();

        let rows = store.for_attempt(Uuid::new_v4()).await.unwrap();
        assert!(rows.is_empty());
    }
}
