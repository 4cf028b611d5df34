//! Star schema and audit table definitions
//!
//! Dimension tables for customer, product, and date; a fact table for
//! orders; the `load_history` audit trail; quarantine and anomaly alert
//! storage. All DDL is idempotent so startup can run it unconditionally.

use sqlx::SqlitePool;

use crate::error::EtlResult;

/// Create all tables and indexes if they do not exist
pub async fn init_tables(pool: &SqlitePool) -> EtlResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS load_history (
            attempt_id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            target_table TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            rows_loaded INTEGER NOT NULL DEFAULT 0,
            rows_failed INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            content_hash TEXT NOT NULL,
            started_at TEXT NOT NULL,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS ix_load_history_hash ON load_history (content_hash, status)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS ix_load_history_source ON load_history (source_id, status)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS quarantine (
            record_id TEXT PRIMARY KEY,
            attempt_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            reason TEXT NOT NULL,
            quarantined_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dim_customers (
            customer_key TEXT PRIMARY KEY,
            recency_days INTEGER,
            frequency_count INTEGER NOT NULL DEFAULT 0,
            monetary_total REAL NOT NULL DEFAULT 0,
            rfm_recency INTEGER,
            rfm_frequency INTEGER,
            rfm_monetary INTEGER,
            segment TEXT NOT NULL DEFAULT 'new',
            lifetime_value REAL NOT NULL DEFAULT 0,
            first_order_date TEXT,
            last_order_date TEXT,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS ix_dim_customers_segment ON dim_customers (segment)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS ix_dim_customers_ltv ON dim_customers (lifetime_value)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dim_products (
            sku TEXT PRIMARY KEY,
            name TEXT,
            category TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dim_date (
            date_key INTEGER PRIMARY KEY,
            full_date TEXT NOT NULL UNIQUE,
            day_of_week INTEGER NOT NULL,
            day_of_month INTEGER NOT NULL,
            month INTEGER NOT NULL,
            quarter INTEGER NOT NULL,
            year INTEGER NOT NULL,
            is_weekend INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fact_orders (
            order_number TEXT PRIMARY KEY,
            customer_key TEXT NOT NULL,
            product_sku TEXT NOT NULL,
            date_key INTEGER NOT NULL,
            order_ts TEXT NOT NULL,
            amount REAL NOT NULL,
            status TEXT NOT NULL,
            category TEXT NOT NULL,
            attempt_id TEXT NOT NULL,
            loaded_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS ix_fact_orders_customer ON fact_orders (customer_key, order_ts)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS ix_fact_orders_date ON fact_orders (date_key)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS anomaly_alerts (
            alert_id TEXT PRIMARY KEY,
            series_key TEXT NOT NULL,
            observed_at TEXT NOT NULL,
            value REAL NOT NULL,
            score REAL NOT NULL,
            method TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS ix_anomaly_alerts_series ON anomaly_alerts (series_key, observed_at)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized");

    Ok(())
}
