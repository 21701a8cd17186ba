//! Scenario runner
//!
//! Drives one scenario against one environment: every step is wrapped in
//! the retry policy and, when it needs a session, the session guard. The
//! runner owns the environment for the scenario's duration and releases it
//! at the end whatever the outcome.

use chrono::Utc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use steadfast_common::{
    AttemptRecord, EngineConfig, EnvironmentState, Outcome, ScenarioResult, ScenarioStatus,
    StepStatus, StepSummary, TransientReason,
};

use crate::dispatch::ConditionalDispatcher;
use crate::environment::{Environment, EnvironmentFactory};
use crate::error::EngineResult;
use crate::executor::{ActionExecutor, AttemptChain};
use crate::retry::RetryPolicy;
use crate::scenario::{Scenario, Step, StepBody};
use crate::session::SessionGuard;

/// How a step ended, before it is folded into the scenario result
struct StepRun {
    status: StepStatus,
    attempts: u32,
    branch: Option<String>,
    outcome: Outcome,
}

pub struct ScenarioRunner {
    config: EngineConfig,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl ScenarioRunner {
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let retry = RetryPolicy::from_config(&config.retry)?;
        Ok(Self {
            config,
            retry,
            cancel: CancellationToken::new(),
        })
    }

    /// Share a cancellation token with the caller (or with a suite)
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Acquire a fresh environment from `factory` and run `scenario` on it.
    ///
    /// Acquisition and configuration problems are reported as a failed
    /// result so a suite can keep going.
    pub async fn run_acquired(
        &self,
        scenario: &Scenario,
        factory: &dyn EnvironmentFactory,
    ) -> ScenarioResult {
        let started_at = Utc::now();
        let clock = Instant::now();

        let env = match factory.acquire(&scenario.name).await {
            Ok(env) => env,
            Err(e) => {
                error!("Could not acquire an environment for {}: {}", scenario.name, e);
                return aborted(scenario, started_at, clock, format!("environment unavailable: {}", e));
            }
        };

        match self.run_scenario(scenario, env.as_ref()).await {
            Ok(result) => result,
            Err(e) => {
                error!("Scenario {} could not run: {}", scenario.name, e);
                aborted(scenario, started_at, clock, e.to_string())
            }
        }
    }

    /// Run every step of `scenario` against `env`, then release `env`.
    ///
    /// Only malformed configuration is an `Err`; everything that happens
    /// in the environment ends up in the returned [`ScenarioResult`].
    pub async fn run_scenario(
        &self,
        scenario: &Scenario,
        env: &dyn Environment,
    ) -> EngineResult<ScenarioResult> {
        let policies = match self.step_policies(scenario) {
            Ok(policies) => policies,
            Err(e) => {
                self.release(env, &scenario.name).await;
                return Err(e);
            }
        };

        info!("Running scenario: {}", scenario.name);
        let started_at = Utc::now();
        let clock = Instant::now();

        let probe_config = &self.config.probe;
        let mut guard = scenario
            .session
            .clone()
            .map(|spec| SessionGuard::new(spec, probe_config.timeout()));

        let mut attempts = Vec::new();
        let mut steps = Vec::new();
        let mut failed_step = None;
        let mut failure_reason = None;
        let mut environment_state = EnvironmentState::Consistent;
        let mut cancelled = false;

        for (step, policy) in scenario.steps.iter().zip(&policies) {
            if self.cancel.is_cancelled() {
                info!("Scenario {} cancelled before step {}", scenario.name, step.name);
                failure_reason.get_or_insert_with(|| format!("cancelled before step '{}'", step.name));
                cancelled = true;
                break;
            }

            if step.requires_session && guard.is_none() {
                warn!(
                    "Step {} requires a session but scenario {} configures none",
                    step.name, scenario.name
                );
            }

            debug!("Step {}: {}", step.name, step.action_label());
            let run = self
                .run_step(step, policy, env, &mut guard, &mut attempts)
                .await;

            match run.status {
                StepStatus::Passed => debug!("Step {} passed", step.name),
                StepStatus::Skipped => info!("Step {} skipped: {}", step.name, run.outcome),
                StepStatus::Failed if step.optional => {
                    warn!("Optional step {} failed, continuing: {}", step.name, run.outcome);
                }
                StepStatus::Failed => {
                    error!("Step {} failed: {}", step.name, run.outcome);
                    if failed_step.is_none() {
                        failed_step = Some(step.name.clone());
                        failure_reason = Some(format!("step '{}' failed: {}", step.name, run.outcome));
                    }
                }
                StepStatus::Cancelled => {
                    warn!("Scenario {} cancelled during step {}", scenario.name, step.name);
                    if run.outcome == Outcome::Interrupted {
                        environment_state = EnvironmentState::Unknown;
                    }
                    failure_reason.get_or_insert_with(|| format!("cancelled during step '{}'", step.name));
                    cancelled = true;
                }
            }

            let stop = cancelled
                || (run.status == StepStatus::Failed && !step.optional && self.config.fail_fast);
            steps.push(StepSummary {
                name: step.name.clone(),
                status: run.status,
                attempts: run.attempts,
                optional: step.optional,
                branch: run.branch,
                outcome: run.outcome,
            });
            if stop {
                break;
            }
        }

        let status = if cancelled {
            ScenarioStatus::Cancelled
        } else if failed_step.is_some() {
            ScenarioStatus::Failed
        } else if !steps.is_empty() && steps.iter().all(|s| s.status == StepStatus::Skipped) {
            ScenarioStatus::Skipped
        } else {
            ScenarioStatus::Passed
        };

        let final_location = match timeout(probe_config.timeout(), env.current_location()).await {
            Ok(Ok(location)) => Some(location),
            Ok(Err(e)) => {
                warn!("Could not read final location: {}", e);
                None
            }
            Err(_) => {
                warn!("Timed out reading final location");
                None
            }
        };
        self.release(env, &scenario.name).await;

        let duration_ms = clock.elapsed().as_millis() as u64;
        match status {
            ScenarioStatus::Passed => info!("Scenario {} passed ({} ms)", scenario.name, duration_ms),
            _ => info!("Scenario {} {} ({} ms)", scenario.name, status, duration_ms),
        }

        Ok(ScenarioResult {
            run_id: Uuid::new_v4(),
            name: scenario.name.clone(),
            status,
            started_at,
            duration_ms,
            attempts,
            steps,
            failed_step,
            failure_reason,
            final_location,
            environment_state,
        })
    }

    /// Validate every step's retry override before touching the environment
    fn step_policies(&self, scenario: &Scenario) -> EngineResult<Vec<RetryPolicy>> {
        scenario
            .steps
            .iter()
            .map(|step| match &step.retry {
                Some(config) => RetryPolicy::from_config(config),
                None => Ok(self.retry.clone()),
            })
            .collect()
    }

    async fn run_step(
        &self,
        step: &Step,
        policy: &RetryPolicy,
        env: &dyn Environment,
        guard: &mut Option<SessionGuard>,
        records: &mut Vec<AttemptRecord>,
    ) -> StepRun {
        let probe_config = &self.config.probe;
        let executor = ActionExecutor::new(
            env,
            step.timeout().unwrap_or(self.config.per_step_timeout()),
            probe_config.precondition_timeout(),
            probe_config.poll_interval(),
        );
        let label = step.action_label();
        let mut chain = AttemptChain::new();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let started_at = Utc::now();
            let clock = Instant::now();

            let (outcome, branch) = {
                let work = self.attempt(step, &executor, &mut chain, guard);
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => (Outcome::Interrupted, None),
                    done = work => done,
                }
            };
            let duration_ms = clock.elapsed().as_millis() as u64;

            if outcome == Outcome::Interrupted {
                records.push(AttemptRecord {
                    step: step.name.clone(),
                    action: label.clone(),
                    attempt_number: attempt,
                    started_at,
                    duration_ms,
                    outcome: Outcome::Interrupted,
                    branch: branch.clone(),
                    delay_before_next_ms: None,
                });
                return StepRun {
                    status: StepStatus::Cancelled,
                    attempts: attempt,
                    branch,
                    outcome: Outcome::Interrupted,
                };
            }

            let decision = policy.should_retry(attempt, &outcome);
            records.push(AttemptRecord {
                step: step.name.clone(),
                action: label.clone(),
                attempt_number: attempt,
                started_at,
                duration_ms,
                outcome: outcome.clone(),
                branch: branch.clone(),
                delay_before_next_ms: decision.retry.then(|| decision.delay.as_millis() as u64),
            });

            if decision.retry {
                warn!(
                    "Step {} attempt {}/{} failed ({}), retrying in {:?}",
                    step.name,
                    attempt,
                    policy.max_attempts(),
                    outcome,
                    decision.delay
                );
                let waited = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => false,
                    _ = sleep(decision.delay) => true,
                };
                if !waited {
                    return StepRun {
                        status: StepStatus::Cancelled,
                        attempts: attempt,
                        branch,
                        outcome,
                    };
                }
                continue;
            }

            let status = match &decision.outcome {
                Outcome::Success => StepStatus::Passed,
                Outcome::Skipped { .. } => StepStatus::Skipped,
                _ => StepStatus::Failed,
            };
            return StepRun {
                status,
                attempts: attempt,
                branch,
                outcome: decision.outcome,
            };
        }
    }

    /// One attempt of a step: session check, then the step body
    async fn attempt(
        &self,
        step: &Step,
        executor: &ActionExecutor<'_>,
        chain: &mut AttemptChain,
        guard: &mut Option<SessionGuard>,
    ) -> (Outcome, Option<String>) {
        if step.requires_session {
            if let Some(guard) = guard.as_mut() {
                let session = guard.ensure_authenticated(executor).await;
                if !session.is_success() {
                    return (session, None);
                }
            }
        }

        match &step.body {
            StepBody::Execute(action) => (executor.execute_in_chain(chain, action).await, None),
            StepBody::Dispatch(table) => {
                let dispatcher = ConditionalDispatcher::new(executor, self.config.probe.timeout());
                let result = dispatcher.dispatch(table).await;
                (result.outcome, Some(result.choice.label()))
            }
            StepBody::Expect(criterion) => {
                let wait = step.timeout().unwrap_or(self.config.probe.timeout());
                let observed = executor
                    .probe()
                    .probe(criterion, wait, executor.poll_interval())
                    .await;
                if observed.found {
                    (Outcome::Success, None)
                } else {
                    (
                        Outcome::transient(
                            TransientReason::TimeoutExceeded,
                            format!("{} not observed within {} ms", criterion, wait.as_millis()),
                        ),
                        None,
                    )
                }
            }
        }
    }

    async fn release(&self, env: &dyn Environment, scenario: &str) {
        match timeout(self.config.per_step_timeout(), env.release()).await {
            Ok(Ok(())) => debug!("Released environment for {}", scenario),
            Ok(Err(e)) => warn!("Failed to release environment for {}: {}", scenario, e),
            Err(_) => warn!("Timed out releasing environment for {}", scenario),
        }
    }
}

fn aborted(
    scenario: &Scenario,
    started_at: chrono::DateTime<Utc>,
    clock: Instant,
    reason: String,
) -> ScenarioResult {
    ScenarioResult {
        run_id: Uuid::new_v4(),
        name: scenario.name.clone(),
        status: ScenarioStatus::Failed,
        started_at,
        duration_ms: clock.elapsed().as_millis() as u64,
        attempts: Vec::new(),
        steps: Vec::new(),
        failed_step: None,
        failure_reason: Some(reason),
        final_location: None,
        environment_state: EnvironmentState::Consistent,
    }
}

/// Run an ad-hoc list of steps as a scenario named `name`
pub async fn run_scenario(
    name: &str,
    steps: Vec<Step>,
    config: &EngineConfig,
    env: &dyn Environment,
) -> EngineResult<ScenarioResult> {
    let runner = ScenarioRunner::new(config.clone())?;
    runner.run_scenario(&Scenario::new(name, steps), env).await
}

/// Fixed backoff with `max_attempts` tries and `base_delay` between them.
///
/// Configured delays have millisecond resolution; `base_delay` is truncated
/// to whole milliseconds.
pub fn fixed_retry_config(max_attempts: u32, base_delay: Duration) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.retry.max_attempts = max_attempts;
    config.retry.base_delay_ms = u64::try_from(base_delay.as_millis()).unwrap_or(u64::MAX);
    config
}
