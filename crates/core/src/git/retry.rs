//! Bounded retry for push conflicts.

use std::future::Future;

use tracing::warn;

use crate::errors::GitError;

/// Run `attempt` until it succeeds, fails with anything other than a
/// non-fast-forward rejection, or has been retried `max_retries` times.
///
/// `attempt` receives the 1-based attempt number. Every attempt must start
/// from scratch (fresh clone); nothing is carried over between attempts.
/// When the budget is spent the last conflict is wrapped in
/// [`GitError::RetriesExhausted`].
pub async fn retry_on_conflict<T, F, Fut>(max_retries: u32, mut attempt: F) -> Result<T, GitError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, GitError>>,
{
    let mut retries = 0;
    loop {
        let number = retries + 1;
        match attempt(number).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_non_fast_forward() => {
                if retries >= max_retries {
                    return Err(GitError::RetriesExhausted {
                        attempts: number,
                        source: Box::new(e),
                    });
                }
                retries += 1;
                warn!(
                    attempt = number,
                    max_retries,
                    error = %e,
                    "push conflict, retrying from a fresh clone"
                );
            }
            Err(e) => return Err(e),
        }
    }
}
