//! Scenario model: named sequences of guarded, retried steps

use serde::{Deserialize, Serialize};
use std::time::Duration;

use steadfast_common::RetryConfig;

use crate::action::Action;
use crate::dispatch::DispatchTable;
use crate::environment::Criterion;
use crate::session::SessionSpec;

/// What a step does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepBody {
    /// Run one action
    Execute(Action),
    /// Pick and run an action based on what is on screen
    Dispatch(DispatchTable),
    /// Wait for a criterion to hold
    Expect(Criterion),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,

    #[serde(flatten)]
    pub body: StepBody,

    /// A fatal failure here is logged and the scenario continues
    #[serde(default)]
    pub optional: bool,

    /// Consult the session guard before every attempt
    #[serde(default)]
    pub requires_session: bool,

    /// Overrides the engine's per-step timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Overrides the engine's retry configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

impl Step {
    fn with_body(name: impl Into<String>, body: StepBody) -> Self {
        Self {
            name: name.into(),
            body,
            optional: false,
            requires_session: false,
            timeout_ms: None,
            retry: None,
        }
    }

    pub fn execute(name: impl Into<String>, action: Action) -> Self {
        Self::with_body(name, StepBody::Execute(action))
    }

    pub fn dispatch(name: impl Into<String>, table: DispatchTable) -> Self {
        Self::with_body(name, StepBody::Dispatch(table))
    }

    pub fn expect(name: impl Into<String>, criterion: Criterion) -> Self {
        Self::with_body(name, StepBody::Expect(criterion))
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn requires_session(mut self) -> Self {
        self.requires_session = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Label recorded for each attempt of this step
    pub fn action_label(&self) -> String {
        match &self.body {
            StepBody::Execute(action) => action.label(),
            StepBody::Dispatch(table) => format!("dispatch:{} branch(es)", table.branches.len()),
            StepBody::Expect(criterion) => format!("expect:{}", criterion),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSpec>,

    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            tags: Vec::new(),
            session: None,
            steps,
        }
    }

    pub fn with_session(mut self, session: SessionSpec) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}
