//! Result schema for Steadfast
//!
//! Everything an external reporter consumes: per-attempt outcomes, the
//! attempt history, and the scenario and suite summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a retry-eligible failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientReason {
    PreconditionNotMet,
    EnvironmentChanged,
    TimeoutExceeded,
}

impl std::fmt::Display for TransientReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransientReason::PreconditionNotMet => write!(f, "precondition not met"),
            TransientReason::EnvironmentChanged => write!(f, "environment changed"),
            TransientReason::TimeoutExceeded => write!(f, "timeout exceeded"),
        }
    }
}

/// Why a terminal failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalReason {
    RetriesExhausted,
    SessionRecoveryFailed,
    NoBranchMatchedAndRequired,
}

impl std::fmt::Display for FatalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FatalReason::RetriesExhausted => write!(f, "retries exhausted"),
            FatalReason::SessionRecoveryFailed => write!(f, "session recovery failed"),
            FatalReason::NoBranchMatchedAndRequired => {
                write!(f, "no branch matched and one was required")
            }
        }
    }
}

/// Why a step was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoBranchMatched,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoBranchMatched => write!(f, "no branch matched"),
        }
    }
}

/// Outcome of a single action invocation, dispatch, or step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    TransientFailure {
        reason: TransientReason,
        detail: String,
    },
    FatalFailure {
        reason: FatalReason,
        detail: String,
    },
    Skipped {
        reason: SkipReason,
        detail: String,
    },
    /// Cancelled while a mutation was in flight; the environment state is unknown
    Interrupted,
}

impl Outcome {
    pub fn transient(reason: TransientReason, detail: impl Into<String>) -> Self {
        Outcome::TransientFailure {
            reason,
            detail: detail.into(),
        }
    }

    pub fn fatal(reason: FatalReason, detail: impl Into<String>) -> Self {
        Outcome::FatalFailure {
            reason,
            detail: detail.into(),
        }
    }

    pub fn skipped(reason: SkipReason, detail: impl Into<String>) -> Self {
        Outcome::Skipped {
            reason,
            detail: detail.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Outcome::TransientFailure { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Outcome::FatalFailure { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped { .. })
    }

    pub fn transient_reason(&self) -> Option<TransientReason> {
        match self {
            Outcome::TransientFailure { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    pub fn fatal_reason(&self) -> Option<FatalReason> {
        match self {
            Outcome::FatalFailure { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::TransientFailure { reason, detail } => {
                write!(f, "transient failure ({}): {}", reason, detail)
            }
            Outcome::FatalFailure { reason, detail } => {
                write!(f, "fatal failure ({}): {}", reason, detail)
            }
            Outcome::Skipped { reason, detail } => write!(f, "skipped ({}): {}", reason, detail),
            Outcome::Interrupted => write!(f, "interrupted while acting"),
        }
    }
}

/// One attempt of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub step: String,
    pub action: String,
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: Outcome,
    /// Dispatch branch this attempt ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Backoff applied before the next attempt, if one was scheduled
    pub delay_before_next_ms: Option<u64>,
}

/// Terminal state of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
    Cancelled,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Passed => write!(f, "passed"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::Skipped => write!(f, "skipped"),
            StepStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Per-step summary kept next to the raw attempt history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub name: String,
    pub status: StepStatus,
    pub attempts: u32,
    pub optional: bool,
    /// Label of the dispatch branch that ran, for dispatch steps
    pub branch: Option<String>,
    pub outcome: Outcome,
}

/// Scenario status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Passed,
    Failed,
    Skipped,
    Cancelled,
}

impl std::fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScenarioStatus::Passed => write!(f, "passed"),
            ScenarioStatus::Failed => write!(f, "failed"),
            ScenarioStatus::Skipped => write!(f, "skipped"),
            ScenarioStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What the engine can vouch for about the environment after a scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentState {
    /// Every mutation either landed or was reported as not landed
    #[default]
    Consistent,
    /// A mutation was cut off mid-flight
    Unknown,
}

/// Result of running a single scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub run_id: Uuid,
    pub name: String,
    pub status: ScenarioStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub attempts: Vec<AttemptRecord>,
    pub steps: Vec<StepSummary>,
    pub failed_step: Option<String>,
    pub failure_reason: Option<String>,
    pub final_location: Option<String>,
    pub environment_state: EnvironmentState,
}

impl ScenarioResult {
    pub fn passed(&self) -> bool {
        self.status == ScenarioStatus::Passed
    }

    /// Attempt records belonging to one step, in invocation order
    pub fn attempts_for<'a>(&'a self, step: &'a str) -> impl Iterator<Item = &'a AttemptRecord> {
        self.attempts.iter().filter(move |a| a.step == step)
    }

    pub fn step(&self, name: &str) -> Option<&StepSummary> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// Result of running a batch of scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioResult>,
}

impl SuiteResult {
    pub fn from_results(results: Vec<ScenarioResult>, duration_ms: u64) -> Self {
        let count = |status: ScenarioStatus| results.iter().filter(|r| r.status == status).count();
        Self {
            total: results.len(),
            passed: count(ScenarioStatus::Passed),
            failed: count(ScenarioStatus::Failed),
            skipped: count(ScenarioStatus::Skipped),
            cancelled: count(ScenarioStatus::Cancelled),
            duration_ms,
            results,
        }
    }

    pub fn success(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serializes_with_reason() {
        let outcome = Outcome::transient(TransientReason::EnvironmentChanged, "target vanished");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "transient_failure");
        assert_eq!(json["reason"], "environment_changed");
        assert_eq!(json["detail"], "target vanished");
    }

    #[test]
    fn test_outcome_display() {
        let outcome = Outcome::fatal(FatalReason::RetriesExhausted, "3 attempts");
        assert_eq!(outcome.to_string(), "fatal failure (retries exhausted): 3 attempts");
        assert!(outcome.is_fatal());
        assert_eq!(outcome.fatal_reason(), Some(FatalReason::RetriesExhausted));
    }

    #[test]
    fn test_suite_counts() {
        let make = |name: &str, status| ScenarioResult {
            run_id: Uuid::new_v4(),
            name: name.to_string(),
            status,
            started_at: Utc::now(),
            duration_ms: 0,
            attempts: vec![],
            steps: vec![],
            failed_step: None,
            failure_reason: None,
            final_location: None,
            environment_state: EnvironmentState::Consistent,
        };
        let suite = SuiteResult::from_results(
            vec![
                make("a", ScenarioStatus::Passed),
                make("b", ScenarioStatus::Failed),
                make("c", ScenarioStatus::Passed),
                make("d", ScenarioStatus::Skipped),
            ],
            12,
        );
        assert_eq!(suite.total, 4);
        assert_eq!(suite.passed, 2);
        assert_eq!(suite.failed, 1);
        assert_eq!(suite.skipped, 1);
        assert!(!suite.success());
    }
}
