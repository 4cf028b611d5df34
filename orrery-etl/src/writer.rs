//! Transactional star-schema writer
//!
//! One sqlx transaction per attempt: dimension upserts keyed by natural
//! keys, fact upserts keyed by order number, never a delete. Any
//! failure rolls the whole attempt back; the content hash makes the
//! retry safe. Transient lock errors are retried with backoff, the
//! commit is bounded by a timeout, and cancellation aborts before
//! commit.

use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use orrery_common::time::date_attributes;

use crate::config::IngestConfig;
use crate::error::{EtlError, EtlResult};
use crate::types::OrderRecord;
use crate::utils::retry::retry_transient;

#[derive(Clone)]
pub struct StarSchemaWriter {
    db: SqlitePool,
    write_timeout: Duration,
    max_lock_wait: Duration,
}

impl StarSchemaWriter {
    pub fn new(db: SqlitePool, config: &IngestConfig) -> Self {
        Self {
            db,
            write_timeout: Duration::from_millis(config.write_timeout_ms),
            max_lock_wait: Duration::from_millis(config.max_lock_wait_ms),
        }
    }

    /// Write one attempt's orders atomically
    ///
    /// Returns the number of fact rows written. Cancellation before the
    /// commit aborts the transaction and surfaces `Cancelled`; a write
    /// exceeding the timeout surfaces a write failure.
    pub async fn write_orders(
        &self,
        attempt_id: Uuid,
        orders: &[OrderRecord],
        cancel: &CancellationToken,
    ) -> EtlResult<u64> {
        if orders.is_empty() {
            return Ok(0);
        }

        let write = retry_transient(self.max_lock_wait, || self.write_once(attempt_id, orders));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::warn!(attempt_id = %attempt_id, "Write cancelled before commit");
                Err(EtlError::Cancelled)
            }
            result = tokio::time::timeout(self.write_timeout, write) => match result {
                Ok(inner) => inner,
                Err(_) => Err(EtlError::Write(format!(
                    "write transaction exceeded {:?}",
                    self.write_timeout
                ))),
            }
        }
    }

    async fn write_once(
        &self,
        attempt_id: Uuid,
        orders: &[OrderRecord],
    ) -> Result<u64, sqlx::Error> {
        let mut tx = self.db.begin().await?;
        let loaded_at = Utc::now();

        for order in orders {
            let date = date_attributes(order.order_ts.date_naive());

            sqlx::query(
                r#"
                INSERT OR IGNORE INTO dim_date
                    (date_key, full_date, day_of_week, day_of_month, month, quarter, year, is_weekend)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(date.date_key)
            .bind(date.full_date.to_string())
            .bind(date.day_of_week as i64)
            .bind(date.day_of_month as i64)
            .bind(date.month as i64)
            .bind(date.quarter as i64)
            .bind(date.year as i64)
            .bind(date.is_weekend)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO dim_products (sku, name, category, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (sku) DO UPDATE SET
                    name = COALESCE(excluded.name, dim_products.name),
                    category = excluded.category,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&order.product_sku)
            .bind(&order.product_name)
            .bind(&order.category)
            .bind(loaded_at)
            .execute(&mut *tx)
            .await?;

            // Minimal customer row so the fact's back-reference always
            // resolves; the enricher fills in the measures afterward
            sqlx::query(
                "INSERT OR IGNORE INTO dim_customers (customer_key, updated_at) VALUES (?, ?)",
            )
            .bind(&order.customer_key)
            .bind(loaded_at)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO fact_orders
                    (order_number, customer_key, product_sku, date_key, order_ts,
                     amount, status, category, attempt_id, loaded_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (order_number) DO UPDATE SET
                    customer_key = excluded.customer_key,
                    product_sku = excluded.product_sku,
                    date_key = excluded.date_key,
                    order_ts = excluded.order_ts,
                    amount = excluded.amount,
                    status = excluded.status,
                    category = excluded.category,
                    attempt_id = excluded.attempt_id,
                    loaded_at = excluded.loaded_at
                "#,
            )
            .bind(&order.order_number)
            .bind(&order.customer_key)
            .bind(&order.product_sku)
            .bind(date.date_key)
            .bind(order.order_ts)
            .bind(order.amount)
            .bind(order.status.as_str())
            .bind(&order.category)
            .bind(attempt_id.to_string())
            .bind(loaded_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::info!(
            attempt_id = %attempt_id,
            rows = orders.len(),
            "Fact rows committed"
        );

        Ok(orders.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::types::OrderStatus;
    use chrono::TimeZone;

    fn order(number: &str, customer: &str, amount: f64) -> OrderRecord {
        OrderRecord {
            order_number: number.to_string(),
            customer_key: customer.to_string(),
            product_sku: "SKU-1".to_string(),
            product_name: Some("Widget".to_string()),
            amount,
            order_ts: Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap(),
            status: OrderStatus::Delivered,
            category: "gadgets".to_string(),
        }
    }

    fn writer(pool: SqlitePool) -> StarSchemaWriter {
        StarSchemaWriter::new(pool, &IngestConfig::default())
    }

    #[tokio::test]
    async fn test_write_populates_star_schema() {
        let pool = test_pool().await;
        let w = writer(pool.clone());
        let cancel = CancellationToken::new();

        let rows = w
            .write_orders(
                Uuid::new_v4(),
                &[order("ORD-1", "C-1", 10.0), order("ORD-2", "C-2", 20.0)],
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(rows, 2);

        let (facts,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM fact_orders")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(facts, 2);

        let (customers,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dim_customers")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(customers, 2);

        let (dates,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dim_date")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(dates, 1);
    }

    #[tokio::test]
    async fn test_rewrite_same_order_is_upsert() {
        let pool = test_pool().await;
        let w = writer(pool.clone());
        let cancel = CancellationToken::new();

        w.write_orders(Uuid::new_v4(), &[order("ORD-1", "C-1", 10.0)], &cancel)
            .await
            .unwrap();
        w.write_orders(Uuid::new_v4(), &[order("ORD-1", "C-1", 15.0)], &cancel)
            .await
            .unwrap();

        let (count, amount): (i64, f64) =
            sqlx::query_as("SELECT COUNT(*), SUM(amount) FROM fact_orders")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(count, 1);
        assert!((amount - 15.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts_write() {
        let pool = test_pool().await;
        let w = writer(pool.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = w
            .write_orders(Uuid::new_v4(), &[order("ORD-1", "C-1", 10.0)], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::Cancelled));
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let pool = test_pool().await;
        let w = writer(pool);
        let rows = w
            .write_orders(Uuid::new_v4(), &[], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }
}
