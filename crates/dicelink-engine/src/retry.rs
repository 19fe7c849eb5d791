//! Bounded, backoff-based reconnection.
//!
//! One [`RetryController`] belongs to one connection manager. Its loop is the
//! only place that sleeps for backoff delays, it never runs more than one
//! instance at a time, and it re-checks the enabled flag before sleeping and
//! before every attempt. Exhaustion is terminal: the caller moves the
//! endpoint to `Failed` and nothing restarts the loop short of an explicit
//! re-enable.

use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use dicelink_core::ExitCode;

// =============================================================================
// RetryPolicy
// =============================================================================

/// Backoff configuration. Plain tunable values, not computed state.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum consecutive failed attempts before giving up.
    pub max_retries: u32,
    /// Delay before the second attempt; later delays double from here.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Backoff multiplier between successive delays.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt` (1-based). The first attempt runs
    /// immediately; attempt N (N ≥ 2) waits `base * multiplier^(N-2)`,
    /// capped at `max_delay`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2) as i32;
        let delay = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

// =============================================================================
// RetryState / RetryController
// =============================================================================

/// Mutable retry bookkeeping, scoped to one manager instance.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    /// Consecutive failed attempts since the last successful connection.
    pub attempts: u32,
    /// Whether the retry loop is currently running.
    pub is_retrying: bool,
    /// Last failure description, for operators.
    pub last_error: Option<String>,
}

/// How a retry loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Clean shutdown or endpoint disabled mid-loop. Not a failure.
    Stopped,
    /// `max_retries` consecutive attempts failed. Terminal.
    Exhausted,
    /// An attempt reported a fatal (non-retryable) failure. Terminal.
    Fatal,
    /// Another retry loop is already running for this manager.
    AlreadyRetrying,
}

/// Runs the bounded retry loop around a connection-attempt closure.
pub struct RetryController {
    policy: RetryPolicy,
    state: Mutex<RetryState>,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(RetryState::default()),
        }
    }

    /// Snapshot of the current retry bookkeeping.
    pub fn state(&self) -> RetryState {
        self.state.lock().clone()
    }

    /// Resets the consecutive-failure counter. The manager calls this when a
    /// connection attempt reaches `Connected`.
    pub fn reset_attempts(&self) {
        let mut state = self.state.lock();
        state.attempts = 0;
        state.last_error = None;
    }

    /// Records a failed attempt, returning the new consecutive count.
    fn record_failure(&self, error: Option<String>) -> u32 {
        let mut state = self.state.lock();
        state.attempts += 1;
        state.last_error = error;
        state.attempts
    }

    /// Runs attempts until success-then-clean-exit, disablement, fatal
    /// failure or exhaustion.
    ///
    /// `enabled` is re-checked before every sleep and every attempt;
    /// `cancel` aborts an in-flight backoff sleep immediately. The attempt
    /// closure performs one full connection cycle and reports how it ended.
    /// Retry scheduling and the socket attempt are distinct phases, so this
    /// guard (`is_retrying`) is independent of the manager's connect guard.
    pub async fn run<F, Fut>(
        &self,
        cancel: &CancellationToken,
        enabled: impl Fn() -> bool,
        mut attempt: F,
    ) -> RetryOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ExitCode>,
    {
        {
            let mut state = self.state.lock();
            if state.is_retrying {
                warn!("retry loop already running, refusing second instance");
                return RetryOutcome::AlreadyRetrying;
            }
            state.is_retrying = true;
            state.attempts = 0;
        }
        let outcome = self.run_inner(cancel, &enabled, &mut attempt).await;
        self.state.lock().is_retrying = false;
        outcome
    }

    async fn run_inner<F, Fut>(
        &self,
        cancel: &CancellationToken,
        enabled: &impl Fn() -> bool,
        attempt: &mut F,
    ) -> RetryOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ExitCode>,
    {
        loop {
            let attempt_no = self.state.lock().attempts + 1;
            if attempt_no > self.policy.max_retries {
                warn!(
                    attempts = self.policy.max_retries,
                    "retries exhausted, giving up"
                );
                return RetryOutcome::Exhausted;
            }

            let delay = self.policy.delay_before(attempt_no);
            if !delay.is_zero() {
                if !enabled() || cancel.is_cancelled() {
                    return RetryOutcome::Stopped;
                }
                info!(attempt = attempt_no, max = self.policy.max_retries, ?delay, "reconnecting after backoff");
                tokio::select! {
                    _ = cancel.cancelled() => return RetryOutcome::Stopped,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if !enabled() || cancel.is_cancelled() {
                return RetryOutcome::Stopped;
            }

            match attempt().await {
                ExitCode::Clean => return RetryOutcome::Stopped,
                ExitCode::Fatal => return RetryOutcome::Fatal,
                ExitCode::Transient => {
                    // A successful attempt resets `attempts` via the
                    // manager's reset_attempts, so the count here is the
                    // consecutive-failure count the bound applies to.
                    self.record_failure(None);
                }
            }
        }
    }
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
