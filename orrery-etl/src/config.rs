//! Pipeline configuration
//!
//! An immutable configuration struct loaded once at startup and threaded
//! through each component's entry point; never mutated at runtime.
//! File resolution follows CLI → ORRERY_CONFIG env → default location;
//! every field has a compiled default so the pipeline runs with no file
//! at all.

use serde::Deserialize;
use tracing::info;

use crate::analytics::anomaly::AnomalyMethod;
use crate::error::EtlResult;

/// Top-level pipeline configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub rfm: RfmConfig,
    pub anomaly: AnomalyConfig,
    pub ingest: IngestConfig,
}

/// RFM scoring windows and segment thresholds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RfmConfig {
    /// Trailing window for frequency/monetary measures (days)
    pub window_days: i64,
    /// Window for the declining-frequency trend comparison (days)
    pub trend_window_days: i64,
    /// Recency beyond which a customer with no recent orders is churned
    pub churn_recency_days: i64,
    /// Recency beyond which a declining trend marks a customer at risk
    pub at_risk_recency_days: i64,
}

impl Default for RfmConfig {
    fn default() -> Self {
        Self {
            window_days: 365,
            trend_window_days: 90,
            churn_recency_days: 180,
            at_risk_recency_days: 90,
        }
    }
}

/// Anomaly detector selection and thresholds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub method: AnomalyMethod,
    pub z_threshold: f64,
    /// Points absorbed before any flagging (cold start)
    pub min_samples: u64,
    pub iqr_multiplier: f64,
    /// Bounded sliding window backing the IQR method
    pub iqr_window: usize,
    /// Fractional change threshold for the percentage-change method
    pub pct_threshold: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            method: AnomalyMethod::ZScore,
            z_threshold: 3.0,
            min_samples: 10,
            iqr_multiplier: 1.5,
            iqr_window: 64,
            pct_threshold: 0.5,
        }
    }
}

/// Ingestion concurrency and timeout bounds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Bounded pool of per-file workers
    pub max_concurrent_files: usize,
    /// Upper bound on reading one source file (ms)
    pub read_timeout_ms: u64,
    /// Upper bound on one write transaction (ms)
    pub write_timeout_ms: u64,
    /// Total backoff budget for transient lock errors (ms)
    pub max_lock_wait_ms: u64,
    /// Messages per micro-batch attempt on a stream partition
    pub stream_batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_concurrent_files: 4,
            read_timeout_ms: 30_000,
            write_timeout_ms: 30_000,
            max_lock_wait_ms: 5_000,
            stream_batch_size: 100,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from the resolved file, or defaults when none
    pub fn load(cli_path: Option<&str>) -> EtlResult<Self> {
        match orrery_common::config::resolve_config_path(cli_path) {
            Some(path) => {
                let config: PipelineConfig = orrery_common::config::load_toml(&path)?;
                info!(path = %path.display(), "Pipeline configuration loaded");
                Ok(config)
            }
            None => {
                info!("No configuration file found, using defaults");
                Ok(PipelineConfig::default())
            }
        }
    }
}
