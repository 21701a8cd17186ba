//! State probes
//!
//! A probe polls the environment until a criterion matches or its timeout
//! elapses. Absence is an answer, not an error: a probe that times out
//! returns `found = false`. Every query is bounded by the time left, so a
//! probe never outlives its timeout.

use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, trace};

use crate::environment::{Criterion, Environment, ProbeResult};

/// Outcome of a priority-ordered probe over several criteria
#[derive(Debug, Clone, PartialEq)]
pub struct FirstMatch {
    /// Index of the first criterion that matched, if any
    pub index: Option<usize>,
    pub result: ProbeResult,
}

impl FirstMatch {
    pub fn none() -> Self {
        Self {
            index: None,
            result: ProbeResult::absent(),
        }
    }

    pub fn matched(&self) -> bool {
        self.index.is_some()
    }
}

/// Read-only view of an environment
#[derive(Clone, Copy)]
pub struct StateProbe<'e> {
    env: &'e dyn Environment,
}

impl<'e> StateProbe<'e> {
    pub fn new(env: &'e dyn Environment) -> Self {
        Self { env }
    }

    /// Poll `criterion` every `poll_interval` until it matches or `timeout` elapses
    pub async fn probe(
        &self,
        criterion: &Criterion,
        timeout: Duration,
        poll_interval: Duration,
    ) -> ProbeResult {
        let found = self
            .probe_first_match(std::slice::from_ref(criterion), timeout, poll_interval)
            .await;
        found.result
    }

    /// Evaluate `criteria` in priority order on every poll.
    ///
    /// Within one poll round the earliest matching criterion wins, even if a
    /// later one also matches. Returns [`FirstMatch::none`] (with the last
    /// observation of the first criterion) once the timeout elapses.
    pub async fn probe_first_match(
        &self,
        criteria: &[Criterion],
        timeout: Duration,
        poll_interval: Duration,
    ) -> FirstMatch {
        if criteria.is_empty() {
            return FirstMatch::none();
        }

        let deadline = Instant::now() + timeout;
        let mut last_seen = ProbeResult::absent();
        let mut round: u32 = 0;

        loop {
            round += 1;
            for (index, criterion) in criteria.iter().enumerate() {
                let budget = deadline.saturating_duration_since(Instant::now());
                let Some(result) = self.query_within(criterion, budget).await else {
                    continue;
                };
                if criterion.is_satisfied_by(&result) {
                    debug!("Probe matched {} (round {})", criterion, round);
                    return FirstMatch {
                        index: Some(index),
                        result: ProbeResult {
                            found: true,
                            ..result
                        },
                    };
                }
                if index == 0 {
                    last_seen = result;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(
                    "Probe gave up after {} round(s): none of {} criteria matched",
                    round,
                    criteria.len()
                );
                return FirstMatch {
                    index: None,
                    result: ProbeResult {
                        found: false,
                        ..last_seen
                    },
                };
            }

            sleep(poll_interval.min(deadline - now)).await;
        }
    }

    /// One query, cut off when the budget runs out.
    ///
    /// A zero budget still gives an immediately ready environment one chance
    /// to answer.
    async fn query_within(&self, criterion: &Criterion, budget: Duration) -> Option<ProbeResult> {
        match timeout(budget, self.env.query_state(criterion)).await {
            Ok(Ok(result)) => Some(result),
            Ok(Err(e)) => {
                debug!("Probe query for {} failed: {}", criterion, e);
                None
            }
            Err(_) => {
                trace!("Probe query for {} hit the deadline", criterion);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::error::EnvironmentError;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Environment whose matches appear after a number of queries
    struct Countdown {
        ready_after: Mutex<u32>,
        queries: Mutex<u32>,
    }

    impl Countdown {
        fn new(ready_after: u32) -> Self {
            Self {
                ready_after: Mutex::new(ready_after),
                queries: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl Environment for Countdown {
        async fn query_state(&self, criterion: &Criterion) -> Result<ProbeResult, EnvironmentError> {
            *self.queries.lock() += 1;
            if let Criterion::Text(t) = criterion {
                if t == "never" {
                    return Ok(ProbeResult::absent());
                }
            }
            let mut remaining = self.ready_after.lock();
            if *remaining == 0 {
                Ok(ProbeResult::matched(1))
            } else {
                *remaining -= 1;
                Ok(ProbeResult::absent())
            }
        }

        async fn perform_mutation(&self, _action: &Action) -> Result<(), EnvironmentError> {
            Ok(())
        }

        async fn current_location(&self) -> Result<String, EnvironmentError> {
            Ok("/".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_returns_absent_immediately() {
        let env = Countdown::new(0);
        let probe = StateProbe::new(&env);
        let start = Instant::now();

        let result = probe
            .probe(&Criterion::text("never"), Duration::ZERO, Duration::from_millis(50))
            .await;

        assert!(!result.found);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(*env.queries.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_match() {
        let env = Countdown::new(3);
        let probe = StateProbe::new(&env);
        let start = Instant::now();

        let result = probe
            .probe(&Criterion::selector("#late"), Duration::from_secs(2), Duration::from_millis(100))
            .await;

        assert!(result.found);
        assert_eq!(*env.queries.lock(), 4);
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_timeout() {
        let env = Countdown::new(0);
        let probe = StateProbe::new(&env);
        let start = Instant::now();

        let result = probe
            .probe(&Criterion::text("never"), Duration::from_millis(250), Duration::from_millis(100))
            .await;

        assert!(!result.found);
        assert_eq!(start.elapsed(), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_match_preserves_priority() {
        let env = Countdown::new(0);
        let probe = StateProbe::new(&env);

        let found = probe
            .probe_first_match(
                &[
                    Criterion::text("never"),
                    Criterion::selector("#b"),
                    Criterion::selector("#c"),
                ],
                Duration::from_secs(1),
                Duration::from_millis(100),
            )
            .await;

        assert_eq!(found.index, Some(1));
        assert!(found.result.found);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_match_with_no_criteria() {
        let env = Countdown::new(0);
        let probe = StateProbe::new(&env);

        let found = probe
            .probe_first_match(&[], Duration::from_secs(1), Duration::from_millis(100))
            .await;

        assert!(!found.matched());
        assert_eq!(*env.queries.lock(), 0);
    }
}
