//! Customer RFM scoring and segmentation
//!
//! Recomputed in full on every pass: each customer's measures are
//! aggregated from the fact table (cancelled and refunded orders
//! excluded), quintile scores 1-5 are assigned against the current
//! population, and the segment falls out of a fixed rule table. The
//! segment is a pure function of the measures, so two passes over the
//! same facts always agree.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use orrery_common::time::days_between;

use crate::config::RfmConfig;
use crate::error::EtlResult;

/// Customer segment vocabulary
pub const SEGMENT_NEW: &str = "new";
pub const SEGMENT_RETURNING: &str = "returning";
pub const SEGMENT_VIP: &str = "vip";
pub const SEGMENT_AT_RISK: &str = "at_risk";
pub const SEGMENT_CHURNED: &str = "churned";

/// One customer's aggregates pulled from the fact table
#[derive(Debug, sqlx::FromRow)]
struct CustomerAggregate {
    customer_key: String,
    first_order: DateTime<Utc>,
    last_order: DateTime<Utc>,
    /// Orders inside the trailing measurement window
    freq_window: i64,
    monetary_window: f64,
    lifetime_value: f64,
    /// Orders in the most recent trend window
    recent_trend: i64,
    /// Orders in the trend window before that
    prior_trend: i64,
}

/// Outcome of one enrichment pass
#[derive(Debug, Default)]
pub struct EnrichmentSummary {
    pub customers_scored: u64,
    pub customers_reset: u64,
}

pub struct RfmScorer {
    db: SqlitePool,
    config: RfmConfig,
}

impl RfmScorer {
    pub fn new(db: SqlitePool, config: RfmConfig) -> Self {
        Self { db, config }
    }

    /// Recompute scores and segments for the whole customer population
    ///
    /// `now` anchors the recency and window arithmetic; callers pass
    /// `Utc::now()` outside of tests.
    pub async fn recompute_all(&self, now: DateTime<Utc>) -> EtlResult<EnrichmentSummary> {
        let window_start = now - chrono::Duration::days(self.config.window_days);
        let trend_start = now - chrono::Duration::days(self.config.trend_window_days);
        let prior_trend_start = now - chrono::Duration::days(2 * self.config.trend_window_days);

        let aggregates = sqlx::query_as::<_, CustomerAggregate>(
            r#"
            SELECT customer_key,
                   MIN(order_ts) AS first_order,
                   MAX(order_ts) AS last_order,
                   SUM(CASE WHEN order_ts >= ? THEN 1 ELSE 0 END) AS freq_window,
                   COALESCE(SUM(CASE WHEN order_ts >= ? THEN amount ELSE 0.0 END), 0.0) AS monetary_window,
                   COALESCE(SUM(amount), 0) AS lifetime_value,
                   SUM(CASE WHEN order_ts >= ? THEN 1 ELSE 0 END) AS recent_trend,
                   SUM(CASE WHEN order_ts >= ? AND order_ts < ? THEN 1 ELSE 0 END) AS prior_trend
            FROM fact_orders
            WHERE status NOT IN ('cancelled', 'refunded')
            GROUP BY customer_key
            "#,
        )
        .bind(window_start)
        .bind(window_start)
        .bind(trend_start)
        .bind(prior_trend_start)
        .bind(trend_start)
        .fetch_all(&self.db)
        .await?;

        // Quintile boundaries over the current population
        let recency_values: Vec<f64> = aggregates
            .iter()
            .map(|a| days_between(a.last_order, now) as f64)
            .collect();
        let frequency_values: Vec<f64> = aggregates.iter().map(|a| a.freq_window as f64).collect();
        let monetary_values: Vec<f64> = aggregates.iter().map(|a| a.monetary_window).collect();

        let recency_bounds = quintile_boundaries(&recency_values);
        let frequency_bounds = quintile_boundaries(&frequency_values);
        let monetary_bounds = quintile_boundaries(&monetary_values);

        let mut tx = self.db.begin().await?;
        let mut summary = EnrichmentSummary::default();

        for aggregate in &aggregates {
            let recency_days = days_between(aggregate.last_order, now);

            // Lower recency is better, so the bucket is reversed
            let r_score = 6 - bucket(recency_days as f64, &recency_bounds);
            let f_score = bucket(aggregate.freq_window as f64, &frequency_bounds);
            let m_score = bucket(aggregate.monetary_window, &monetary_bounds);

            let segment = self.segment_for(
                (r_score, f_score, m_score),
                recency_days,
                aggregate.freq_window,
                aggregate.recent_trend,
                aggregate.prior_trend,
            );

            sqlx::query(
                r#"
                INSERT INTO dim_customers
                    (customer_key, recency_days, frequency_count, monetary_total,
                     rfm_recency, rfm_frequency, rfm_monetary, segment,
                     lifetime_value, first_order_date, last_order_date, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (customer_key) DO UPDATE SET
                    recency_days = excluded.recency_days,
                    frequency_count = excluded.frequency_count,
                    monetary_total = excluded.monetary_total,
                    rfm_recency = excluded.rfm_recency,
                    rfm_frequency = excluded.rfm_frequency,
                    rfm_monetary = excluded.rfm_monetary,
                    segment = excluded.segment,
                    lifetime_value = excluded.lifetime_value,
                    first_order_date = excluded.first_order_date,
                    last_order_date = excluded.last_order_date,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&aggregate.customer_key)
            .bind(recency_days)
            .bind(aggregate.freq_window)
            .bind(aggregate.monetary_window)
            .bind(r_score as i64)
            .bind(f_score as i64)
            .bind(m_score as i64)
            .bind(segment)
            .bind(aggregate.lifetime_value)
            .bind(aggregate.first_order.to_rfc3339())
            .bind(aggregate.last_order.to_rfc3339())
            .bind(now)
            .execute(&mut *tx)
            .await?;

            summary.customers_scored += 1;
        }

        // Customers with no qualifying orders left fall back to new
        let reset = sqlx::query(
            r#"
            UPDATE dim_customers
            SET recency_days = NULL, frequency_count = 0, monetary_total = 0,
                rfm_recency = NULL, rfm_frequency = NULL, rfm_monetary = NULL,
                segment = 'new', lifetime_value = 0, updated_at = ?
            WHERE customer_key NOT IN (
                SELECT DISTINCT customer_key FROM fact_orders
                WHERE status NOT IN ('cancelled', 'refunded')
            )
            "#,
        )
        .bind(now)
        .execute(&mut *tx)
        .await?;
        summary.customers_reset = reset.rows_affected();

        tx.commit().await?;

        tracing::info!(
            scored = summary.customers_scored,
            reset = summary.customers_reset,
            "Customer enrichment pass complete"
        );

        Ok(summary)
    }

    /// Segment rule table, evaluated top to bottom
    fn segment_for(
        &self,
        scores: (u8, u8, u8),
        recency_days: i64,
        freq_window: i64,
        recent_trend: i64,
        prior_trend: i64,
    ) -> &'static str {
        if scores == (5, 5, 5) {
            SEGMENT_VIP
        } else if recency_days > self.config.churn_recency_days {
            SEGMENT_CHURNED
        } else if recency_days > self.config.at_risk_recency_days && recent_trend < prior_trend {
            SEGMENT_AT_RISK
        } else if freq_window <= 1 {
            SEGMENT_NEW
        } else {
            SEGMENT_RETURNING
        }
    }
}

/// 20/40/60/80th percentile boundaries over a population
fn quintile_boundaries(values: &[f64]) -> [f64; 4] {
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    [
        percentile(&sorted, 0.20),
        percentile(&sorted, 0.40),
        percentile(&sorted, 0.60),
        percentile(&sorted, 0.80),
    ]
}

/// Quintile bucket 1-5: one more than the boundaries strictly exceeded
fn bucket(value: f64, bounds: &[f64; 4]) -> u8 {
    1 + bounds.iter().filter(|b| value > **b).count() as u8
}

fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = pos - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}
