//! Pipeline orchestration
//!
//! Per batch: read, hash, open an attempt, validate, quarantine the
//! rejects, write the facts transactionally, then run enrichment and
//! anomaly detection over the accepted data before finalizing the
//! attempt. Directory ingest runs one worker per file under a bounded
//! semaphore with no cross-file ordering.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::analytics::anomaly::AnomalyDetector;
use crate::analytics::rfm::RfmScorer;
use crate::config::PipelineConfig;
use crate::db::load_history::{LoadStatus, LoadTracker};
use crate::db::quarantine::QuarantineStore;
use crate::error::{EtlError, EtlResult};
use crate::ingest::reader::{self, SourceBatch};
use crate::ingest::validator::{self, RuleSet};
use crate::types::{OrderRecord, RawRecord};
use crate::writer::StarSchemaWriter;

/// Everything one ingest run needs, shared across file workers
pub struct PipelineContext {
    pub db: SqlitePool,
    pub config: PipelineConfig,
    pub tracker: LoadTracker,
    pub quarantine: QuarantineStore,
    pub writer: StarSchemaWriter,
    pub scorer: RfmScorer,
    pub detector: Mutex<AnomalyDetector>,
    pub rules: RuleSet,
    pub cancel: CancellationToken,
}

impl PipelineContext {
    pub fn new(db: SqlitePool, config: PipelineConfig) -> EtlResult<Arc<Self>> {
        let rules = RuleSet::orders()?;
        Ok(Arc::new(Self {
            tracker: LoadTracker::new(db.clone()),
            quarantine: QuarantineStore::new(db.clone()),
            writer: StarSchemaWriter::new(db.clone(), &config.ingest),
            scorer: RfmScorer::new(db.clone(), config.rfm.clone()),
            detector: Mutex::new(AnomalyDetector::new(db.clone(), config.anomaly.clone())),
            rules,
            cancel: CancellationToken::new(),
            db,
            config,
        }))
    }
}

/// Terminal record of one attempt
#[derive(Debug, Clone)]
pub struct AttemptSummary {
    pub attempt_id: Uuid,
    pub source_id: String,
    pub status: LoadStatus,
    pub rows_loaded: u64,
    pub rows_failed: u64,
}

/// What happened to one batch
#[derive(Debug)]
pub enum IngestOutcome {
    Loaded(AttemptSummary),
    /// Content already loaded successfully under a prior attempt
    Skipped {
        source_id: String,
        content_hash: String,
        prior_attempt: Uuid,
    },
}

/// Ingest one already-read batch under a fresh load attempt
pub async fn ingest_batch(ctx: &PipelineContext, batch: SourceBatch) -> EtlResult<IngestOutcome> {
    let SourceBatch {
        source_id,
        content_hash,
        records,
    } = batch;

    let attempt_id = match ctx
        .tracker
        .begin(&source_id, &ctx.rules.target_table, &content_hash)
        .await
    {
        Ok(id) => id,
        Err(EtlError::DuplicateLoad {
            content_hash,
            attempt_id,
        }) => {
            return Ok(IngestOutcome::Skipped {
                source_id,
                content_hash,
                prior_attempt: attempt_id,
            });
        }
        Err(err) => return Err(err),
    };

    let total = records.len();
    let report = validator::validate_batch(&ctx.rules, records);

    let mut orders: Vec<OrderRecord> = Vec::with_capacity(report.accepted.len());
    let mut rejected: Vec<(RawRecord, String)> = report.quarantined;

    // Conversion can still reject a record validation let through
    for record in report.accepted {
        match OrderRecord::from_payload(&record.payload) {
            Ok(order) => orders.push(order),
            Err(reason) => rejected.push((record, reason)),
        }
    }

    for (record, reason) in &rejected {
        ctx.quarantine.put(attempt_id, record, reason).await?;
    }

    let rows_loaded = match ctx
        .writer
        .write_orders(attempt_id, &orders, &ctx.cancel)
        .await
    {
        Ok(rows) => rows,
        Err(err) => {
            // Nothing committed; the whole attempt is failed and the
            // content hash stays retryable
            let message = err.to_string();
            ctx.tracker
                .finalize(attempt_id, 0, total as i64, Some(&message))
                .await?;
            return Err(err);
        }
    };

    // Enrichment and anomaly detection both read only committed facts
    // and accepted orders, so they run concurrently
    let enrichment = ctx.scorer.recompute_all(Utc::now());
    let detection = async {
        let mut detector = ctx.detector.lock().await;
        detector.observe_orders(&orders).await
    };
    let (enrich_result, detect_result) = tokio::join!(enrichment, detection);

    let rows_failed = rejected.len() as u64;

    // The facts are already committed, so the attempt must reach a
    // terminal status even when a post-write phase fails
    let post_write: EtlResult<()> = enrich_result.map(|_| ()).and(detect_result.map(|_| ()));
    if let Err(err) = post_write {
        let message = err.to_string();
        ctx.tracker
            .finalize(attempt_id, rows_loaded as i64, rows_failed as i64, Some(&message))
            .await?;
        return Err(err);
    }

    let status = ctx
        .tracker
        .finalize(attempt_id, rows_loaded as i64, rows_failed as i64, None)
        .await?;

    Ok(IngestOutcome::Loaded(AttemptSummary {
        attempt_id,
        source_id,
        status,
        rows_loaded,
        rows_failed,
    }))
}

/// Read and ingest one NDJSON file
pub async fn ingest_file(ctx: &PipelineContext, path: &Path) -> EtlResult<IngestOutcome> {
    let read_timeout = std::time::Duration::from_millis(ctx.config.ingest.read_timeout_ms);
    let batch = reader::read_batch_file(path, read_timeout).await?;
    ingest_batch(ctx, batch).await
}

/// Ingest every batch file under a directory with bounded concurrency
///
/// Files are processed independently; there is no ordering guarantee
/// across files. Cancellation stops new files from starting and aborts
/// in-flight writes before commit.
pub async fn ingest_directory(
    ctx: Arc<PipelineContext>,
    root: &Path,
) -> EtlResult<Vec<IngestOutcome>> {
    let files = reader::discover_batch_files(root)?;
    let semaphore = Arc::new(Semaphore::new(ctx.config.ingest.max_concurrent_files));
    let mut tasks: JoinSet<EtlResult<IngestOutcome>> = JoinSet::new();

    for path in files {
        if ctx.cancel.is_cancelled() {
            break;
        }
        let ctx = Arc::clone(&ctx);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|_| EtlError::Cancelled)?;
            ingest_file(&ctx, &path).await
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let result = joined.map_err(|e| {
            EtlError::Common(orrery_common::Error::Internal(format!(
                "ingest worker panicked: {}",
                e
            )))
        })?;
        match result {
            Ok(outcome) => outcomes.push(outcome),
            Err(EtlError::Cancelled) => {
                tracing::warn!("Ingest worker cancelled");
            }
            Err(err) => {
                // One bad file does not stop the rest of the run
                tracing::error!(error = %err, "Batch ingest failed");
            }
        }
    }

    Ok(outcomes)
}
