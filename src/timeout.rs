use crate::error::HarnessError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Default bound for bodies wrapped in [`with_timeout`] by helpers that do not pick their own
pub const DEFAULT_MAX_EXECUTION_TIME: Duration = Duration::from_secs(5);

/// Runs `fut` to completion unless it takes longer than `limit`.
///
/// The future is dropped at the deadline, so anything it holds is released
/// before the timeout is reported.
pub async fn with_timeout<F, T>(limit: Duration, fut: F) -> Result<T, HarnessError>
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(value) => Ok(value),
        Err(_) => {
            warn!("execution exceeded {:?}", limit);
            Err(HarnessError::Timeout(limit))
        }
    }
}

/// Runs blocking `work` on the blocking pool, bounded by `limit`.
///
/// Blocking code cannot be interrupted; a timed-out worker keeps running
/// detached and its result is discarded.
pub async fn with_timeout_blocking<F, T>(limit: Duration, work: F) -> Result<T, HarnessError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::task::spawn_blocking(work);
    match tokio::time::timeout(limit, task).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(join_error)) if join_error.is_panic() => {
            std::panic::resume_unwind(join_error.into_panic())
        }
        Ok(Err(_)) | Err(_) => {
            warn!("blocking execution exceeded {:?}", limit);
            Err(HarnessError::Timeout(limit))
        }
    }
}
