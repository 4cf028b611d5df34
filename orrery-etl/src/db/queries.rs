//! Read-only query surface over the star schema
//!
//! A library API only; nothing here mutates state.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::db::load_history::LoadAttempt;
use crate::error::EtlResult;

/// Count and average lifetime value for one segment
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SegmentStats {
    pub segment: String,
    pub customer_count: i64,
    pub avg_lifetime_value: f64,
}

/// One customer ranked by lifetime value
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CustomerRank {
    pub customer_key: String,
    pub segment: String,
    pub lifetime_value: f64,
    pub frequency_count: i64,
    pub last_order_date: Option<String>,
}

/// One persisted anomaly alert
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AlertRow {
    pub alert_id: String,
    pub series_key: String,
    pub observed_at: DateTime<Utc>,
    pub value: f64,
    pub score: f64,
    pub method: String,
}

#[derive(Clone)]
pub struct Queries {
    db: SqlitePool,
}

impl Queries {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Customer count and mean lifetime value per segment
    pub async fn segment_distribution(&self) -> EtlResult<Vec<SegmentStats>> {
        let rows = sqlx::query_as::<_, SegmentStats>(
            r#"
            SELECT segment,
                   COUNT(*) AS customer_count,
                   COALESCE(AVG(lifetime_value), 0) AS avg_lifetime_value
            FROM dim_customers
            GROUP BY segment
            ORDER BY customer_count DESC
            "#,
        )
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    /// Top customers ranked by lifetime value
    pub async fn top_customers_by_ltv(&self, limit: i64) -> EtlResult<Vec<CustomerRank>> {
        let rows = sqlx::query_as::<_, CustomerRank>(
            r#"
            SELECT customer_key, segment, lifetime_value, frequency_count, last_order_date
            FROM dim_customers
            ORDER BY lifetime_value DESC, customer_key
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    /// Alerts for one series over a closed time range
    pub async fn alerts_in_range(
        &self,
        series_key: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> EtlResult<Vec<AlertRow>> {
        let rows = sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT alert_id, series_key, observed_at, value, score, method
            FROM anomaly_alerts
            WHERE series_key = ? AND observed_at >= ? AND observed_at <= ?
            ORDER BY observed_at
            "#,
        )
        .bind(series_key)
        .bind(from)
        .bind(to)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    /// Most recent alerts across all series
    pub async fn recent_alerts(&self, limit: i64) -> EtlResult<Vec<AlertRow>> {
        let rows = sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT alert_id, series_key, observed_at, value, score, method
            FROM anomaly_alerts
            ORDER BY observed_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    /// Load history, optionally filtered by source and/or status
    pub async fn load_history(
        &self,
        source_id: Option<&str>,
        status: Option<&str>,
    ) -> EtlResult<Vec<LoadAttempt>> {
        let rows = sqlx::query_as::<_, LoadAttempt>(
            r#"
            SELECT * FROM load_history
            WHERE (? IS NULL OR source_id = ?)
              AND (? IS NULL OR status = ?)
            ORDER BY started_at DESC
            "#,
        )
        .bind(source_id)
        .bind(source_id)
        .bind(status)
        .bind(status)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use chrono::TimeZone;

    async fn seed_customers(pool: &SqlitePool) {
        for (key, segment, ltv, freq) in [
            ("C-1", "vip", 5000.0, 40_i64),
            ("C-2", "vip", 4200.0, 31),
            ("C-3", "returning", 800.0, 6),
            ("C-4", "churned", 120.0, 2),
        ] {
            sqlx::query(
                r#"
                INSERT INTO dim_customers
                    (customer_key, segment, lifetime_value, frequency_count, updated_at)
                VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
                "#,
            )
            .bind(key)
            .bind(segment)
            .bind(ltv)
            .bind(freq)
            .execute(pool)
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn test_segment_distribution() {
        let pool = test_pool().await;
        seed_customers(&pool).await;
        let queries = Queries::new(pool);

        let dist = queries.segment_distribution().await.unwrap();
        assert_eq!(dist.len(), 3);
        let vip = dist.iter().find(|s| s.segment == "vip").unwrap();
        assert_eq!(vip.customer_count, 2);
        assert!((vip.avg_lifetime_value - 4600.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_top_customers() {
        let pool = test_pool().await;
        seed_customers(&pool).await;
        let queries = Queries::new(pool);

        let top = queries.top_customers_by_ltv(2).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].customer_key, "C-1");
        assert_eq!(top[1].customer_key, "C-2");
    }

    #[tokio::test]
    async fn test_alerts_in_range() {
        let pool = test_pool().await;

        let ts = |h: u32| Utc.with_ymd_and_hms(2025, 3, 1, h, 0, 0).unwrap();
        for (id, at) in [("a-1", ts(1)), ("a-2", ts(5)), ("a-3", ts(9))] {
            sqlx::query(
                r#"
                INSERT INTO anomaly_alerts
                    (alert_id, series_key, observed_at, value, score, method, created_at)
                VALUES (?, 'daily_revenue', ?, 100.0, 4.2, 'z_score', ?)
                "#,
            )
            .bind(id)
            .bind(at)
            .bind(at)
            .execute(&pool)
            .await
            .unwrap();
        }

        let queries = Queries::new(pool);
        let rows = queries
            .alerts_in_range("daily_revenue", ts(2), ts(10))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].alert_id, "a-2");

        let none = queries
            .alerts_in_range("daily_order_count", ts(0), ts(23))
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
