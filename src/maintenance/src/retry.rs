//! Bounded retry for transient store errors.

use common::StoreResult;
use common::config::RetryConfig;
use std::future::Future;

use crate::metrics::MaintenanceMetrics;

/// Run `attempt` until it succeeds, fails permanently, or exhausts
/// `config.max_retries`. Only [`StoreError::is_transient`] failures are
/// retried.
///
/// [`StoreError::is_transient`]: common::StoreError::is_transient
pub(crate) async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    metrics: &MaintenanceMetrics,
    operation: &str,
    mut attempt: F,
) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut retries = 0;
    loop {
        match attempt().await {
            Ok(value) => {
                if retries > 0 {
                    tracing::info!(operation, retries, "Store call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && retries < config.max_retries => {
                retries += 1;
                let delay = config.delay_for(retries);
                tracing::warn!(
                    operation,
                    attempt = retries,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient store error, retrying after backoff"
                );
                metrics.record_retry();
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
