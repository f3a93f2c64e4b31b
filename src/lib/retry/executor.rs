use std::fmt::Display;
use std::future::Future;

use tracing::debug;

use super::backoff::BackoffSchedule;

/// Sequential bounded retry driven by a [`BackoffSchedule`].
///
/// Attempts never overlap: each one is awaited to completion before the next
/// wait starts.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    name: &'static str,
    schedule: BackoffSchedule,
    max_attempts: Option<usize>,
}

impl RetryExecutor {
    pub fn new(name: &'static str, schedule: BackoffSchedule) -> Self {
        Self {
            name,
            schedule,
            max_attempts: None,
        }
    }

    /// Overrides the attempt count implied by the schedule.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn attempts(&self) -> usize {
        let implied = if self.schedule.is_empty() {
            1
        } else {
            self.schedule.attempts()
        };
        self.max_attempts.unwrap_or(implied).max(1)
    }

    /// Retries every failure until the attempt bound.
    pub async fn run<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.run_with(op, |_| true, None::<fn(E, usize) -> E>).await
    }

    /// Retries only failures accepted by `should_retry`; the final error goes
    /// through `wrap` together with the number of attempts made.
    pub async fn run_with<T, E, F, Fut, P, W>(
        &self,
        mut op: F,
        should_retry: P,
        wrap: Option<W>,
    ) -> Result<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: Fn(&E) -> bool,
        W: FnOnce(E, usize) -> E,
    {
        let attempts = self.attempts();
        let mut attempt = 0;

        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let made = attempt + 1;
            if made >= attempts || !should_retry(&err) {
                debug!(op = self.name, attempts = made, error = %err, "giving up");
                return Err(match wrap {
                    Some(wrap) => wrap(err, made),
                    None => err,
                });
            }

            let delay = self.schedule.delay_for(attempt);
            debug!(
                op = self.name,
                attempt = made,
                of = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "attempt failed, retrying"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }
}
