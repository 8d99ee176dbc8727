use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: usize, last: E },

    #[error("interrupted by shutdown")]
    Interrupted,
}

/// Exponential backoff: the delay doubles after each failure up to `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl Backoff {
    /// Run `operation` until it succeeds, `max_retries` retries have failed,
    /// or `stop` is cancelled while waiting between attempts.
    pub async fn retry<F, Fut, T, E>(
        &self,
        stop: &CancellationToken,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempts = 0;
        let mut delay = self.initial_delay;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    attempts += 1;
                    if attempts > self.max_retries {
                        tracing::error!(attempts, error = %e, "Max retries exceeded");
                        return Err(RetryError::Exhausted { attempts, last: e });
                    }

                    tracing::warn!(
                        attempt = attempts,
                        backoff_ms = delay.as_millis() as u64,
                        error = %e,
                        "Operation failed, retrying"
                    );

                    tokio::select! {
                        _ = stop.cancelled() => return Err(RetryError::Interrupted),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = std::cmp::min(delay * 2, self.max_delay);
                }
            }
        }
    }
}
