//! Transient store error retry
//!
//! The sweep shares the store with live interview uploads, so page fetches
//! and batch flushes can hit lock contention or brief connectivity loss.
//! Those are retried with exponential backoff inside a total wait budget;
//! anything non-transient fails straight through.

use std::time::{Duration, Instant};

use crate::error::{ReconcileError, ReconcileResult};

const INITIAL_BACKOFF_MS: u64 = 25;
const MAX_BACKOFF_MS: u64 = 1_000;

/// Retry `operation` while it keeps failing with a transient store error,
/// until `max_wait_ms` of total elapsed time is spent.
///
/// `position` is the batch's cursor position (or another locator) so a
/// retrying batch can be found in the logs.
pub async fn retry_transient<F, Fut, T>(
    operation_name: &str,
    position: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> ReconcileResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ReconcileResult<T>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(
                        operation = operation_name,
                        position,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Store operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if err.is_transient() => {
                let elapsed = start_time.elapsed();

                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        position,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        max_wait_ms,
                        error = %err,
                        "Store operation failed: retry budget exhausted"
                    );
                    return Err(err);
                }

                tracing::warn!(
                    operation = operation_name,
                    position,
                    attempt,
                    backoff_ms,
                    error = %err,
                    "Transient store error, will retry after backoff"
                );

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
            Err(err) => return Err(err),
        }
    }
}
