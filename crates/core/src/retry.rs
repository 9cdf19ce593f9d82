//! Retry policy and execution
//!
//! Implements the bounded-retry driver used by unary-style calls and the
//! unbounded reconnect loops of the coordination session and topic writer.
//! Delays grow exponentially from a base, are capped, and carry a uniform
//! jitter so a fleet of reconnecting clients does not stampede the server.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;

use crate::{Ctx, Error, Result};

/// How errors are classified for a retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryKind {
    /// Unary-style call: transport `CANCELLED` is terminal.
    #[default]
    Unary,
    /// Long-lived stream reconnect loop: every transport failure retries,
    /// including `CANCELLED`.
    Stream,
}

/// Configuration for [`retry`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempt budget; `None` means retry forever (reconnect loops).
    pub max_attempts: Option<u32>,
    /// Delay before the second attempt; doubles each attempt after that.
    pub base_delay: Duration,
    /// Upper bound on the computed delay, before jitter.
    pub max_delay: Duration,
    /// Jitter fraction `j`: the delay is scaled by a uniform factor in
    /// `[1 - j, 1 + j]`.
    pub jitter: f64,
    /// Whether the wrapped operation is safe to re-execute.
    pub idempotent: bool,
    /// Error classification mode.
    pub kind: RetryKind,
}

impl Default for RetryConfig {
    /// Default policy: 10 attempts, 50 ms base, 5 s cap, ±50% jitter.
    fn default() -> Self {
        RetryConfig {
            max_attempts: Some(10),
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            jitter: 0.5,
            idempotent: true,
            kind: RetryKind::Unary,
        }
    }
}

impl RetryConfig {
    /// Policy for stream reconnect loops: no attempt budget, stream
    /// classification.
    pub fn unbounded_stream() -> Self {
        RetryConfig {
            max_attempts: None,
            kind: RetryKind::Stream,
            ..Default::default()
        }
    }

    /// Set the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the base delay.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Set the delay cap.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set the jitter fraction.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Mark the operation non-idempotent.
    pub fn non_idempotent(mut self) -> Self {
        self.idempotent = false;
        self
    }

    /// Delay to sleep after the given failed attempt (1-indexed), with
    /// jitter applied: `min(cap, base * 2^(attempt-1)) * (1 + U(-j, +j))`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let raw_ms = self.base_delay.as_millis() as f64 * 2f64.powi(exp);
        let capped_ms = raw_ms.min(self.max_delay.as_millis() as f64);
        let factor = if self.jitter > 0.0 {
            1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter)
        } else {
            1.0
        };
        Duration::from_millis((capped_ms * factor).max(0.0) as u64)
    }

    fn should_retry(&self, err: &Error) -> bool {
        match self.kind {
            RetryKind::Unary => err.is_retryable(self.idempotent),
            RetryKind::Stream => err.is_stream_retryable(),
        }
    }
}

/// Execute `op` with retries per `config`.
///
/// `op` receives the 1-indexed attempt number. Cancellation of `ctx` during
/// a backoff sleep or between attempts surfaces as the context's error and
/// is never retried.
pub async fn retry<T, F, Fut>(config: &RetryConfig, ctx: &Ctx, op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with_observer(config, ctx, |_, _| {}, op).await
}

/// Like [`retry`], but invokes `observer(attempt, &err)` before every
/// backoff sleep.
pub async fn retry_with_observer<T, F, Fut, O>(
    config: &RetryConfig,
    ctx: &Ctx,
    mut observer: O,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    O: FnMut(u32, &Error),
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        ctx.check()?;

        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if matches!(err, Error::Cancelled | Error::DeadlineExceeded) {
            return Err(err);
        }
        if !config.should_retry(&err) {
            return Err(err);
        }
        if let Some(max) = config.max_attempts {
            if attempt >= max {
                tracing::warn!(attempt, error = %err, "retry budget exhausted");
                return Err(err);
            }
        }

        observer(attempt, &err);
        let delay = config.delay_for_attempt(attempt);
        tracing::debug!(attempt, ?delay, error = %err, "operation failed, backing off");

        tokio::select! {
            _ = sleep(delay) => {}
            _ = ctx.done() => return Err(ctx.err()),
        }
    }
}
