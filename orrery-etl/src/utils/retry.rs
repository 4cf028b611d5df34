//! Transient-error retry with exponential backoff
//!
//! SQLite reports writer contention as "database is locked". Those
//! errors are transient: the operation is retried with exponential
//! backoff (10ms doubling to a 1s cap) until a wall-clock budget is
//! spent, then escalated to a write failure.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::{EtlError, EtlResult};

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

/// Whether a database error is worth retrying
pub fn is_transient(err: &sqlx::Error) -> bool {
    let text = err.to_string();
    text.contains("database is locked") || text.contains("database table is locked")
}

/// Run `op`, retrying transient lock errors within `max_wait`
pub async fn retry_transient<T, F, Fut>(max_wait: Duration, mut op: F) -> EtlResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let start = Instant::now();
    let mut backoff_ms = INITIAL_BACKOFF_MS;
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) => {
                if start.elapsed() >= max_wait {
                    tracing::warn!(
                        attempts,
                        waited_ms = start.elapsed().as_millis() as u64,
                        "Lock wait budget exhausted"
                    );
                    return Err(EtlError::Write(format!(
                        "database still locked after {} attempts ({:?}): {}",
                        attempts, max_wait, err
                    )));
                }
                tracing::debug!(attempts, backoff_ms, "Database locked, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
            Err(err) => return Err(err.into()),
        }
    }
}
