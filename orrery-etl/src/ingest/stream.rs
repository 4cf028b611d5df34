//! Streaming source consumer
//!
//! Each partition is an mpsc channel of offset-carrying messages.
//! Partitions are consumed sequentially internally, so events for one
//! customer keyed to a partition stay ordered; separate partitions run
//! as independent tasks. Messages are micro-batched into load attempts
//! whose content hash covers the batch, giving streams the same
//! idempotence guarantee as files.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::error::{EtlError, EtlResult};
use crate::ingest::pipeline::{ingest_batch, IngestOutcome, PipelineContext};
use crate::ingest::reader::{hash_payloads, SourceBatch};
use crate::types::RawRecord;

/// One message from a streaming source
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub partition: u32,
    pub offset: u64,
    pub payload: Value,
}

/// Consume one partition to completion
///
/// Drains the channel in micro-batches of `stream_batch_size`; a
/// partial batch left when the sender closes is flushed as its own
/// attempt. Returns the outcome of every attempt in order.
pub async fn consume_partition(
    ctx: Arc<PipelineContext>,
    partition: u32,
    mut rx: mpsc::Receiver<StreamMessage>,
) -> EtlResult<Vec<IngestOutcome>> {
    let batch_size = ctx.config.ingest.stream_batch_size;
    let mut outcomes = Vec::new();
    let mut pending: Vec<StreamMessage> = Vec::with_capacity(batch_size);

    loop {
        let message = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                tracing::warn!(partition, "Partition consumer cancelled");
                return Err(EtlError::Cancelled);
            }
            message = rx.recv() => message,
        };

        match message {
            Some(message) => {
                pending.push(message);
                if pending.len() >= batch_size {
                    outcomes.push(flush_batch(&ctx, partition, &mut pending).await?);
                }
            }
            None => {
                if !pending.is_empty() {
                    outcomes.push(flush_batch(&ctx, partition, &mut pending).await?);
                }
                break;
            }
        }
    }

    tracing::info!(partition, attempts = outcomes.len(), "Partition drained");
    Ok(outcomes)
}

/// Run one consumer task per partition and collect every outcome
pub async fn consume_partitions(
    ctx: Arc<PipelineContext>,
    partitions: Vec<(u32, mpsc::Receiver<StreamMessage>)>,
) -> EtlResult<Vec<IngestOutcome>> {
    let mut tasks: JoinSet<EtlResult<Vec<IngestOutcome>>> = JoinSet::new();
    for (partition, rx) in partitions {
        let ctx = Arc::clone(&ctx);
        tasks.spawn(consume_partition(ctx, partition, rx));
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let result = joined.map_err(|e| {
            EtlError::Common(orrery_common::Error::Internal(format!(
                "partition consumer panicked: {}",
                e
            )))
        })?;
        outcomes.extend(result?);
    }
    Ok(outcomes)
}

async fn flush_batch(
    ctx: &PipelineContext,
    partition: u32,
    pending: &mut Vec<StreamMessage>,
) -> EtlResult<IngestOutcome> {
    let messages = std::mem::take(pending);
    let first = messages.first().map(|m| m.offset).unwrap_or(0);
    let last = messages.last().map(|m| m.offset).unwrap_or(0);
    let source_id = format!("stream:{}:{}-{}", partition, first, last);

    let payloads: Vec<Value> = messages.iter().map(|m| m.payload.clone()).collect();
    let content_hash = hash_payloads(&payloads);

    let records = payloads
        .into_iter()
        .map(|payload| RawRecord {
            record_id: Uuid::new_v4(),
            payload,
            source_id: source_id.clone(),
            content_hash: content_hash.clone(),
            received_at: Utc::now(),
        })
        .collect();

    ingest_batch(
        ctx,
        SourceBatch {
            source_id,
            content_hash,
            records,
        },
    )
    .await
}
