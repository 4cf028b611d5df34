//! Online anomaly detection over metric series
//!
//! One aggregator per series key, updated a point at a time. Raw
//! history is never stored: the z-score method keeps Welford running
//! moments, the IQR method a bounded sliding window, and the
//! percentage-change method only the previous point. Each new point is
//! evaluated against the state built from the points before it, then
//! folded in. Flagged points are persisted to `anomaly_alerts`.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::AnomalyConfig;
use crate::error::EtlResult;
use crate::types::OrderRecord;

/// Detection method, selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyMethod {
    ZScore,
    Iqr,
    PctChange,
}

impl AnomalyMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyMethod::ZScore => "z_score",
            AnomalyMethod::Iqr => "iqr",
            AnomalyMethod::PctChange => "pct_change",
        }
    }
}

impl Default for AnomalyMethod {
    fn default() -> Self {
        AnomalyMethod::ZScore
    }
}

/// Per-series running state
#[derive(Debug, Default)]
pub struct SeriesState {
    pub count: u64,
    mean: f64,
    /// Sum of squared deviations (Welford's M2)
    m2: f64,
    /// Bounded window backing the IQR method
    window: VecDeque<f64>,
    previous: Option<f64>,
    /// Non-finite points seen and ignored
    pub skipped: u64,
}

impl SeriesState {
    fn std_dev(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        (self.m2 / (self.count - 1) as f64).sqrt()
    }

    fn update(&mut self, x: f64, window_cap: usize) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);

        if self.window.len() == window_cap {
            self.window.pop_front();
        }
        self.window.push_back(x);
        self.previous = Some(x);
    }
}

/// Verdict for one observed point
#[derive(Debug, Clone, Copy)]
pub struct Evaluation {
    pub is_anomalous: bool,
    pub score: f64,
    pub method: AnomalyMethod,
}

impl Evaluation {
    fn clean(method: AnomalyMethod) -> Self {
        Self {
            is_anomalous: false,
            score: 0.0,
            method,
        }
    }
}

pub struct AnomalyDetector {
    db: SqlitePool,
    config: AnomalyConfig,
    states: HashMap<String, SeriesState>,
}

impl AnomalyDetector {
    pub fn new(db: SqlitePool, config: AnomalyConfig) -> Self {
        Self {
            db,
            config,
            states: HashMap::new(),
        }
    }

    /// Observe one point and persist an alert if it flags
    ///
    /// Non-finite values are counted as skipped and never flag. Below
    /// `min_samples` every point is absorbed without flagging; a
    /// constant series never flags regardless of count.
    pub async fn observe(
        &mut self,
        series_key: &str,
        observed_at: DateTime<Utc>,
        value: f64,
    ) -> EtlResult<Evaluation> {
        let method = self.config.method;
        let state = self.states.entry(series_key.to_string()).or_default();

        if !value.is_finite() {
            state.skipped += 1;
            tracing::debug!(series_key, "Non-finite point skipped");
            return Ok(Evaluation::clean(method));
        }

        // Evaluate against the state before this point
        let evaluation = if state.count < self.config.min_samples {
            Evaluation::clean(method)
        } else {
            match method {
                AnomalyMethod::ZScore => evaluate_z_score(state, value, self.config.z_threshold),
                AnomalyMethod::Iqr => evaluate_iqr(state, value, self.config.iqr_multiplier),
                AnomalyMethod::PctChange => {
                    evaluate_pct_change(state, value, self.config.pct_threshold)
                }
            }
        };

        state.update(value, self.config.iqr_window);

        if evaluation.is_anomalous {
            tracing::warn!(
                series_key,
                value,
                score = evaluation.score,
                method = method.as_str(),
                "Anomalous point flagged"
            );
            self.persist_alert(series_key, observed_at, value, evaluation)
                .await?;
        }

        Ok(evaluation)
    }

    /// Fold an accepted batch into the daily revenue and order-count
    /// series, one point per calendar day present in the batch
    pub async fn observe_orders(&mut self, orders: &[OrderRecord]) -> EtlResult<Vec<Evaluation>> {
        let mut revenue: BTreeMap<i64, f64> = BTreeMap::new();
        let mut counts: BTreeMap<i64, u64> = BTreeMap::new();

        for order in orders {
            if order.status.excluded_from_revenue() {
                continue;
            }
            let key = orrery_common::time::date_key(order.order_ts.date_naive());
            *revenue.entry(key).or_insert(0.0) += order.amount;
            *counts.entry(key).or_insert(0) += 1;
        }

        let mut evaluations = Vec::new();
        for (key, total) in revenue {
            let at = date_key_midnight(key);
            evaluations.push(self.observe("daily_revenue", at, total).await?);
        }
        for (key, count) in counts {
            let at = date_key_midnight(key);
            evaluations.push(self.observe("daily_order_count", at, count as f64).await?);
        }
        Ok(evaluations)
    }

    async fn persist_alert(
        &self,
        series_key: &str,
        observed_at: DateTime<Utc>,
        value: f64,
        evaluation: Evaluation,
    ) -> EtlResult<()> {
        sqlx::query(
            r#"
            INSERT INTO anomaly_alerts
                (alert_id, series_key, observed_at, value, score, method, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(series_key)
        .bind(observed_at)
        .bind(value)
        .bind(evaluation.score)
        .bind(evaluation.method.as_str())
        .bind(Utc::now())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    #[cfg(test)]
    pub fn state(&self, series_key: &str) -> Option<&SeriesState> {
        self.states.get(series_key)
    }
}

fn date_key_midnight(date_key: i64) -> DateTime<Utc> {
    let year = (date_key / 10_000) as i32;
    let month = ((date_key / 100) % 100) as u32;
    let day = (date_key % 100) as u32;
    // date_key came from a valid date, so this always resolves
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

fn evaluate_z_score(state: &SeriesState, x: f64, threshold: f64) -> Evaluation {
    let std = state.std_dev();
    if std == 0.0 {
        // Constant series never flags
        return Evaluation::clean(AnomalyMethod::ZScore);
    }
    let z = (x - state.mean).abs() / std;
    Evaluation {
        is_anomalous: z > threshold,
        score: z,
        method: AnomalyMethod::ZScore,
    }
}

fn evaluate_iqr(state: &SeriesState, x: f64, multiplier: f64) -> Evaluation {
    let mut sorted: Vec<f64> = state.window.iter().copied().collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let q1 = percentile(&sorted, 0.25);
    let q3 = percentile(&sorted, 0.75);
    let iqr = q3 - q1;
    if iqr == 0.0 {
        return Evaluation::clean(AnomalyMethod::Iqr);
    }

    let lower = q1 - multiplier * iqr;
    let upper = q3 + multiplier * iqr;
    let distance = if x < lower {
        lower - x
    } else if x > upper {
        x - upper
    } else {
        0.0
    };

    Evaluation {
        is_anomalous: distance > 0.0,
        score: distance / iqr,
        method: AnomalyMethod::Iqr,
    }
}

fn evaluate_pct_change(state: &SeriesState, x: f64, threshold: f64) -> Evaluation {
    let Some(previous) = state.previous else {
        return Evaluation::clean(AnomalyMethod::PctChange);
    };
    if previous == 0.0 {
        return Evaluation::clean(AnomalyMethod::PctChange);
    }
    let change = ((x - previous) / previous).abs();
    Evaluation {
        is_anomalous: change > threshold,
        score: change,
        method: AnomalyMethod::PctChange,
    }
}

/// Linear-interpolation percentile over a sorted slice
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    fn detector_with(pool: SqlitePool, method: AnomalyMethod) -> AnomalyDetector {
        let config = AnomalyConfig {
            method,
            ..AnomalyConfig::default()
        };
        AnomalyDetector::new(pool, config)
    }

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_cold_start_never_flags() {
        let pool = test_pool().await;
        let mut detector = detector_with(pool, AnomalyMethod::ZScore);

        // Nine wild points are all inside the cold-start window
        for (i, value) in [1.0, 900.0, 2.0, 800.0, 3.0, 700.0, 4.0, 600.0, 5.0]
            .iter()
            .enumerate()
        {
            let eval = detector
                .observe("s", ts(i as u32 + 1), *value)
                .await
                .unwrap();
            assert!(!eval.is_anomalous);
        }
    }

    #[tokio::test]
    async fn test_constant_series_never_flags() {
        let pool = test_pool().await;
        let mut detector = detector_with(pool, AnomalyMethod::ZScore);

        for i in 0..30 {
            let eval = detector.observe("s", ts(i % 28 + 1), 100.0).await.unwrap();
            assert!(!eval.is_anomalous);
        }
    }

    #[tokio::test]
    async fn test_z_score_flags_spike() {
        let pool = test_pool().await;
        let mut detector = detector_with(pool.clone(), AnomalyMethod::ZScore);

        // Alternating around 100 gives a small but nonzero variance
        for i in 0..20u32 {
            let value = if i % 2 == 0 { 98.0 } else { 102.0 };
            let eval = detector.observe("s", ts(i % 28 + 1), value).await.unwrap();
            assert!(!eval.is_anomalous);
        }

        let eval = detector.observe("s", ts(28), 500.0).await.unwrap();
        assert!(eval.is_anomalous);
        assert!(eval.score > 3.0);

        let (alerts,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM anomaly_alerts")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(alerts, 1);
    }

    #[tokio::test]
    async fn test_non_finite_skipped() {
        let pool = test_pool().await;
        let mut detector = detector_with(pool, AnomalyMethod::ZScore);

        for i in 0..15u32 {
            detector
                .observe("s", ts(i % 28 + 1), 100.0 + (i % 3) as f64)
                .await
                .unwrap();
        }
        let count_before = detector.state("s").unwrap().count;

        let eval = detector.observe("s", ts(20), f64::NAN).await.unwrap();
        assert!(!eval.is_anomalous);

        let state = detector.state("s").unwrap();
        assert_eq!(state.skipped, 1);
        assert_eq!(state.count, count_before);
    }

    #[tokio::test]
    async fn test_iqr_flags_outlier() {
        let pool = test_pool().await;
        let mut detector = detector_with(pool, AnomalyMethod::Iqr);

        for i in 0..20u32 {
            let value = 50.0 + (i % 5) as f64;
            let eval = detector.observe("s", ts(i % 28 + 1), value).await.unwrap();
            assert!(!eval.is_anomalous);
        }

        let eval = detector.observe("s", ts(25), 200.0).await.unwrap();
        assert!(eval.is_anomalous);
    }

    #[tokio::test]
    async fn test_pct_change_flags_jump() {
        let pool = test_pool().await;
        let mut detector = detector_with(pool, AnomalyMethod::PctChange);

        for i in 0..12u32 {
            detector
                .observe("s", ts(i % 28 + 1), 100.0 + (i % 2) as f64)
                .await
                .unwrap();
        }

        // 100 -> 180 is an 80% jump against the 0.5 default threshold
        let eval = detector.observe("s", ts(15), 180.0).await.unwrap();
        assert!(eval.is_anomalous);
        assert!(eval.score > 0.5);
    }

    #[tokio::test]
    async fn test_observe_orders_builds_daily_series() {
        use crate::types::{OrderRecord, OrderStatus};

        let pool = test_pool().await;
        let mut detector = detector_with(pool, AnomalyMethod::ZScore);

        let order = |number: &str, day: u32, amount: f64, status: OrderStatus| OrderRecord {
            order_number: number.to_string(),
            customer_key: "C-1".to_string(),
            product_sku: "SKU-1".to_string(),
            product_name: None,
            amount,
            order_ts: Utc.with_ymd_and_hms(2025, 3, day, 12, 0, 0).unwrap(),
            status,
            category: "books".to_string(),
        };

        detector
            .observe_orders(&[
                order("O-1", 1, 10.0, OrderStatus::Delivered),
                order("O-2", 1, 20.0, OrderStatus::Shipped),
                order("O-3", 2, 5.0, OrderStatus::Delivered),
                order("O-4", 2, 99.0, OrderStatus::Cancelled),
            ])
            .await
            .unwrap();

        // Two distinct days observed per series, cancelled excluded
        let revenue = detector.state("daily_revenue").unwrap();
        assert_eq!(revenue.count, 2);
        let counts = detector.state("daily_order_count").unwrap();
        assert_eq!(counts.count, 2);
    }
}
