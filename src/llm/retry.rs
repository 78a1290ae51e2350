//! Fixed-delay retry for file operations that hit a locked or busy file.

use crate::error::{Error, Result};
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: usize, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }
}

/// Errors that usually clear up on their own (another process holding the
/// file, an interrupted call).
pub fn is_transient(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::WouldBlock
        | io::ErrorKind::Interrupted
        | io::ErrorKind::TimedOut
        | io::ErrorKind::PermissionDenied => true,
        _ => is_lock_violation(err),
    }
}

/// ERROR_SHARING_VIOLATION / ERROR_LOCK_VIOLATION.
#[cfg(windows)]
fn is_lock_violation(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(32) | Some(33))
}

#[cfg(not(windows))]
fn is_lock_violation(_err: &io::Error) -> bool {
    false
}

/// Run `op` until it succeeds, fails with a non-transient error, or runs out
/// of attempts.
pub async fn retry_transient<T, F, Fut>(policy: RetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !is_transient(&e) => return Err(Error::Io(e)),
            Err(e) if attempt >= attempts => {
                return Err(Error::Transient {
                    operation: operation.to_string(),
                    attempts,
                    source: e,
                })
            }
            Err(e) => {
                warn!(
                    "{} failed (attempt {}/{}): {}, retrying in {:?}",
                    operation, attempt, attempts, e, policy.delay
                );
                attempt += 1;
                sleep(policy.delay).await;
            }
        }
    }
}
