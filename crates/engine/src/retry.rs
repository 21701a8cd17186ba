//! Retry policy
//!
//! A pure decision function: given the attempt number that just finished and
//! its outcome, decide whether to try again and how long to wait first.

use std::time::Duration;

use steadfast_common::{BackoffStrategy, FatalReason, Outcome, RetryConfig};

use crate::error::{EngineError, EngineResult};

/// What to do after an attempt
#[derive(Debug, Clone, PartialEq)]
pub struct RetryDecision {
    pub retry: bool,
    /// Wait before the next attempt; zero when not retrying
    pub delay: Duration,
    /// The outcome to report; a transient failure on the last allowed
    /// attempt becomes `fatalFailure(retriesExhausted)`
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    strategy: BackoffStrategy,
    max_delay: Option<Duration>,
    jitter: f64,
}

impl RetryPolicy {
    /// Delays have millisecond resolution; a `base_delay` with a sub-millisecond
    /// part is rejected rather than truncated.
    pub fn new(max_attempts: u32, base_delay: Duration, strategy: BackoffStrategy) -> EngineResult<Self> {
        if base_delay.subsec_nanos() % 1_000_000 != 0 {
            return Err(EngineError::Config(steadfast_common::Error::InvalidConfig(format!(
                "retry base delay must be whole milliseconds, got {:?}",
                base_delay
            ))));
        }
        Self::from_config(&RetryConfig {
            max_attempts,
            backoff: strategy,
            base_delay_ms: u64::try_from(base_delay.as_millis()).unwrap_or(u64::MAX),
            max_delay_ms: None,
            jitter: 0.0,
        })
    }

    pub fn from_config(config: &RetryConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay(),
            strategy: config.backoff,
            max_delay: config.max_delay(),
            jitter: config.jitter,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before attempt `attempt + 1`, without jitter.
    ///
    /// fixed: `base`; linear: `base * n`; exponential: `base * 2^(n-1)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let n = attempt.max(1);
        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(n),
            BackoffStrategy::Exponential => {
                let factor = 1u32.checked_shl(n - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        };
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let extra = delay.mul_f64(self.jitter * rand::random::<f64>());
        let total = delay.saturating_add(extra);
        match self.max_delay {
            Some(cap) => total.min(cap),
            None => total,
        }
    }

    /// Decide what follows attempt `attempt_number` (1-based)
    pub fn should_retry(&self, attempt_number: u32, outcome: &Outcome) -> RetryDecision {
        match outcome {
            Outcome::TransientFailure { reason, detail } => {
                if attempt_number >= self.max_attempts {
                    RetryDecision {
                        retry: false,
                        delay: Duration::ZERO,
                        outcome: Outcome::fatal(
                            FatalReason::RetriesExhausted,
                            format!(
                                "gave up after {} attempt(s); last failure ({}): {}",
                                attempt_number, reason, detail
                            ),
                        ),
                    }
                } else {
                    RetryDecision {
                        retry: true,
                        delay: self.jittered(self.backoff_delay(attempt_number)),
                        outcome: outcome.clone(),
                    }
                }
            }
            _ => RetryDecision {
                retry: false,
                delay: Duration::ZERO,
                outcome: outcome.clone(),
            },
        }
    }
}
