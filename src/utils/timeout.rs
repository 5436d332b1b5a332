//! Async timeout helpers.

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

use crate::error::{RpcError, Result};

/// Default timeout for a single socket write
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default grace period for draining on shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a failed accept or receive before retrying
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Run `fut` with a deadline, mapping expiry to [`RpcError::Timeout`].
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::Timeout),
    }
}

/// Like [`with_timeout_error`], but `None` runs without a deadline.
pub async fn maybe_timeout<F, T>(fut: F, duration: Option<Duration>) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match duration {
        Some(d) => with_timeout_error(fut, d).await,
        None => fut.await,
    }
}
