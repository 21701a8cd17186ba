//! Action execution
//!
//! The executor checks an action's preconditions, then applies the mutation
//! once, bounded by a timeout. Every failure mode maps to an [`Outcome`].

use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::debug;

use steadfast_common::{Outcome, TransientReason};

use crate::action::{Action, ActionKind};
use crate::environment::Environment;
use crate::probe::StateProbe;

/// Tracks whether an action already landed during the current attempt chain
#[derive(Debug, Clone, Default)]
pub struct AttemptChain {
    settled: bool,
    invocations: u32,
}

impl AttemptChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// The action succeeded; further executions in this chain are no-ops
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// How many times the mutation was actually attempted
    pub fn invocations(&self) -> u32 {
        self.invocations
    }
}

/// Applies actions to one environment
#[derive(Clone, Copy)]
pub struct ActionExecutor<'e> {
    env: &'e dyn Environment,
    probe: StateProbe<'e>,
    action_timeout: Duration,
    precondition_timeout: Duration,
    poll_interval: Duration,
}

impl<'e> ActionExecutor<'e> {
    pub fn new(
        env: &'e dyn Environment,
        action_timeout: Duration,
        precondition_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            env,
            probe: StateProbe::new(env),
            action_timeout,
            precondition_timeout,
            poll_interval,
        }
    }

    pub fn probe(&self) -> StateProbe<'e> {
        self.probe
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Execute an action once.
    ///
    /// Missing preconditions yield `preconditionNotMet` without touching the
    /// environment. An environment error during the mutation yields
    /// `environmentChanged`; running past the timeout yields `timeoutExceeded`.
    pub async fn execute(&self, action: &Action) -> Outcome {
        let label = action.label();

        for criterion in &action.preconditions {
            let result = self
                .probe
                .probe(criterion, self.precondition_timeout, self.poll_interval)
                .await;
            if !result.found {
                debug!("Precondition {} not met for {}", criterion, label);
                return Outcome::transient(
                    TransientReason::PreconditionNotMet,
                    format!("{} not present before {}", criterion, label),
                );
            }
        }

        let result = if let ActionKind::Wait { ms } = action.kind {
            timeout(self.action_timeout, sleep(Duration::from_millis(ms)))
                .await
                .map(Ok)
        } else {
            debug!("Executing {}", label);
            timeout(self.action_timeout, self.env.perform_mutation(action)).await
        };

        match result {
            Ok(Ok(())) => Outcome::Success,
            Ok(Err(e)) => Outcome::transient(
                TransientReason::EnvironmentChanged,
                format!("{}: {}", label, e),
            ),
            Err(_) => Outcome::transient(
                TransientReason::TimeoutExceeded,
                format!(
                    "{} did not complete within {} ms",
                    label,
                    self.action_timeout.as_millis()
                ),
            ),
        }
    }

    /// Execute unless the chain already holds a success for this action
    pub async fn execute_in_chain(&self, chain: &mut AttemptChain, action: &Action) -> Outcome {
        if chain.settled {
            debug!("{} already landed in this chain, not repeating it", action.label());
            return Outcome::Success;
        }
        chain.invocations += 1;
        let outcome = self.execute(action).await;
        if outcome.is_success() {
            chain.settled = true;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{Criterion, ProbeResult};
    use crate::error::EnvironmentError;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        present: Vec<String>,
        mutations: Mutex<Vec<String>>,
        fail_with: Mutex<Option<EnvironmentError>>,
        hang: bool,
    }

    #[async_trait]
    impl Environment for Recorder {
        async fn query_state(&self, criterion: &Criterion) -> Result<ProbeResult, EnvironmentError> {
            let hit = match criterion {
                Criterion::Selector(s) => self.present.contains(s),
                _ => false,
            };
            Ok(if hit { ProbeResult::matched(1) } else { ProbeResult::absent() })
        }

        async fn perform_mutation(&self, action: &Action) -> Result<(), EnvironmentError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            if let Some(err) = self.fail_with.lock().take() {
                return Err(err);
            }
            self.mutations.lock().push(action.label());
            Ok(())
        }

        async fn current_location(&self) -> Result<String, EnvironmentError> {
            Ok("/".to_string())
        }
    }

    fn executor(env: &Recorder) -> ActionExecutor<'_> {
        ActionExecutor::new(
            env,
            Duration::from_secs(1),
            Duration::from_millis(200),
            Duration::from_millis(50),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_mutates_once() {
        let env = Recorder::default();
        let outcome = executor(&env).execute(&Action::click("#go")).await;
        assert_eq!(outcome, Outcome::Success);
        assert_eq!(*env.mutations.lock(), vec!["click:#go".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_precondition_skips_mutation() {
        let env = Recorder::default();
        let action = Action::click("#go").with_precondition(Criterion::selector("#form"));

        let outcome = executor(&env).execute(&action).await;

        assert_eq!(outcome.transient_reason(), Some(TransientReason::PreconditionNotMet));
        assert!(env.mutations.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_environment_error_is_environment_changed() {
        let env = Recorder {
            present: vec!["#form".to_string()],
            ..Default::default()
        };
        *env.fail_with.lock() = Some(EnvironmentError::TargetVanished("#go".to_string()));
        let action = Action::click("#go").with_precondition(Criterion::selector("#form"));

        let outcome = executor(&env).execute(&action).await;

        assert_eq!(outcome.transient_reason(), Some(TransientReason::EnvironmentChanged));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_mutation_times_out() {
        let env = Recorder {
            hang: true,
            ..Default::default()
        };
        let outcome = executor(&env).execute(&Action::click("#go")).await;
        assert_eq!(outcome.transient_reason(), Some(TransientReason::TimeoutExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_never_reaches_environment() {
        let env = Recorder::default();
        let start = tokio::time::Instant::now();
        let outcome = executor(&env).execute(&Action::wait(300)).await;
        assert!(outcome.is_success());
        assert_eq!(start.elapsed(), Duration::from_millis(300));
        assert!(env.mutations.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_longer_than_action_timeout() {
        let env = Recorder::default();
        let exec = ActionExecutor::new(
            &env,
            Duration::from_millis(100),
            Duration::from_millis(100),
            Duration::from_millis(10),
        );
        let start = tokio::time::Instant::now();

        let outcome = exec.execute(&Action::wait(60_000)).await;

        assert_eq!(outcome.transient_reason(), Some(TransientReason::TimeoutExceeded));
        assert_eq!(start.elapsed(), Duration::from_millis(100));
        assert!(env.mutations.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_settled_chain_does_not_repeat() {
        let env = Recorder::default();
        let exec = executor(&env);
        let mut chain = AttemptChain::new();
        let action = Action::click("#submit");

        assert!(exec.execute_in_chain(&mut chain, &action).await.is_success());
        assert!(exec.execute_in_chain(&mut chain, &action).await.is_success());

        assert!(chain.is_settled());
        assert_eq!(chain.invocations(), 1);
        assert_eq!(env.mutations.lock().len(), 1);
    }
}
