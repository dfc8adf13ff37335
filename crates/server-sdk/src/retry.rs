//! Backoff strategies and the retry executor.
//!
//! An operation reports `true` to stop and `false` to go again; it keeps its
//! own result in its fields, which the caller inspects after the executor
//! returns.

use std::time::Duration;

use rand::Rng;

/// One retryable unit of work.
#[async_trait::async_trait]
pub trait Retryable: Send {
    /// Run once.  Returns `true` when no further attempt is wanted.
    async fn attempt(&mut self) -> bool;
}

/// Decides how many times and how far apart a [`Retryable`] is attempted.
#[async_trait::async_trait]
pub trait RetryStrategy: Send + Sync {
    async fn apply(&self, op: &mut dyn Retryable);
}

// ── Geometric ────────────────────────────────────────────────────────

/// Coarse backoff for connection attempts: full sleep between attempts,
/// interval multiplied by `backoff_factor` and capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct GeometricBackoff {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: u32,
}

impl Default for GeometricBackoff {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2,
        }
    }
}

impl GeometricBackoff {
    /// Delay after the given failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_delay;
        for _ in 0..attempt {
            delay = delay.saturating_mul(self.backoff_factor).min(self.max_delay);
        }
        delay.min(self.max_delay)
    }
}

#[async_trait::async_trait]
impl RetryStrategy for GeometricBackoff {
    async fn apply(&self, op: &mut dyn Retryable) {
        for attempt in 0..self.max_attempts {
            if op.attempt().await {
                return;
            }
            if attempt + 1 == self.max_attempts {
                break;
            }
            let delay = self.delay_for_attempt(attempt);
            tracing::warn!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "connect attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

// ── Jittered geometric ───────────────────────────────────────────────

/// Backoff for message sends.  Each wait is drawn uniformly from
/// `[min_delay, ceiling]`; the ceiling starts at `initial_ceiling` and is
/// multiplied by `backoff_factor` after every failure with no cap.
#[derive(Debug, Clone)]
pub struct JitteredGeometricBackoff {
    pub max_attempts: u32,
    pub initial_ceiling: Duration,
    pub min_delay: Duration,
    pub backoff_factor: u32,
}

impl Default for JitteredGeometricBackoff {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_ceiling: Duration::from_millis(1000),
            min_delay: Duration::from_millis(200),
            backoff_factor: 2,
        }
    }
}

impl JitteredGeometricBackoff {
    /// Ceiling in force after the given number of failed attempts.
    pub fn ceiling_for_attempt(&self, attempt: u32) -> Duration {
        self.initial_ceiling
            .saturating_mul(self.backoff_factor.saturating_pow(attempt))
    }
}

fn uniform_between(lo: Duration, hi: Duration) -> Duration {
    if hi <= lo {
        return lo;
    }
    let ms = rand::thread_rng().gen_range(lo.as_millis() as u64..=hi.as_millis() as u64);
    Duration::from_millis(ms)
}

#[async_trait::async_trait]
impl RetryStrategy for JitteredGeometricBackoff {
    async fn apply(&self, op: &mut dyn Retryable) {
        let mut ceiling = self.initial_ceiling;
        for attempt in 0..self.max_attempts {
            if op.attempt().await {
                return;
            }
            if attempt + 1 == self.max_attempts {
                break;
            }
            let wait = uniform_between(self.min_delay, ceiling);
            tracing::warn!(
                attempt = attempt + 1,
                wait_ms = wait.as_millis() as u64,
                "send failed, retrying"
            );
            tokio::time::sleep(wait).await;
            ceiling = ceiling.saturating_mul(self.backoff_factor);
        }
    }
}

// ── Executor ─────────────────────────────────────────────────────────

/// Binds an operation to a strategy.  After [`call`](Self::call) the
/// operation is handed back so the caller can read what it captured.
pub struct RetryingCallable<'a, R> {
    strategy: &'a dyn RetryStrategy,
    op: R,
}

impl<'a, R: Retryable> RetryingCallable<'a, R> {
    pub fn new(strategy: &'a dyn RetryStrategy, op: R) -> Self {
        Self { strategy, op }
    }

    pub async fn call(mut self) -> R {
        self.strategy.apply(&mut self.op).await;
        self.op
    }
}
