//! Conditional dispatch
//!
//! A dispatch table replaces nested "if this is on screen do that, else ..."
//! code. Branches are evaluated in declaration order and the first match
//! wins. When the chosen branch's action finds its own preconditions
//! missing, evaluation falls through to the branches after it.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use steadfast_common::{FatalReason, Outcome, SkipReason, TransientReason};

use crate::action::Action;
use crate::environment::Criterion;
use crate::executor::ActionExecutor;

/// One `(criterion, action)` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub when: Criterion,
    pub then: Action,
}

impl Branch {
    pub fn new(when: Criterion, then: Action) -> Self {
        Self {
            label: None,
            when,
            then,
        }
    }

    pub fn display_label(&self) -> String {
        self.label.clone().unwrap_or_else(|| self.then.label())
    }
}

/// Ordered branches plus an optional fallback
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DispatchTable {
    pub branches: Vec<Branch>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Action>,

    /// No match and no default is a fatal failure instead of a skip
    #[serde(default)]
    pub required: bool,

    /// How long to wait for any branch criterion to show up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_timeout_ms: Option<u64>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn branch(mut self, when: Criterion, then: Action) -> Self {
        self.branches.push(Branch::new(when, then));
        self
    }

    pub fn otherwise(mut self, action: Action) -> Self {
        self.default = Some(action);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Which arm of the table ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchChoice {
    Branch { index: usize, label: String },
    Default { label: String },
    NoMatch,
}

impl BranchChoice {
    pub fn label(&self) -> String {
        match self {
            BranchChoice::Branch { label, .. } | BranchChoice::Default { label } => label.clone(),
            BranchChoice::NoMatch => "none".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub choice: BranchChoice,
    pub outcome: Outcome,
}

/// Evaluates dispatch tables against one environment
pub struct ConditionalDispatcher<'a, 'e> {
    executor: &'a ActionExecutor<'e>,
    probe_timeout: Duration,
}

impl<'a, 'e> ConditionalDispatcher<'a, 'e> {
    pub fn new(executor: &'a ActionExecutor<'e>, probe_timeout: Duration) -> Self {
        Self {
            executor,
            probe_timeout,
        }
    }

    pub async fn dispatch(&self, table: &DispatchTable) -> DispatchOutcome {
        let probe = self.executor.probe();
        let timeout = table
            .probe_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.probe_timeout);
        let criteria: Vec<Criterion> = table.branches.iter().map(|b| b.when.clone()).collect();

        let mut start = 0;
        let mut precondition_miss: Option<DispatchOutcome> = None;

        while start < criteria.len() {
            let found = probe
                .probe_first_match(&criteria[start..], timeout, self.executor.poll_interval())
                .await;
            let Some(offset) = found.index else {
                break;
            };
            let index = start + offset;
            let branch = &table.branches[index];
            let label = branch.display_label();
            info!("Dispatch matched branch {} ({})", index, label);

            let outcome = self.executor.execute(&branch.then).await;
            let choice = BranchChoice::Branch { index, label };
            if outcome.transient_reason() != Some(TransientReason::PreconditionNotMet) {
                return DispatchOutcome { choice, outcome };
            }

            debug!("Branch {} preconditions missing, trying later branches", index);
            precondition_miss = Some(DispatchOutcome { choice, outcome });
            start = index + 1;
        }

        if let Some(default) = &table.default {
            let label = default.label();
            info!("Dispatch falling back to default ({})", label);
            let outcome = self.executor.execute(default).await;
            return DispatchOutcome {
                choice: BranchChoice::Default { label },
                outcome,
            };
        }

        if let Some(miss) = precondition_miss {
            return miss;
        }

        let detail = format!("none of {} branch criteria matched", table.branches.len());
        let outcome = if table.required {
            Outcome::fatal(FatalReason::NoBranchMatchedAndRequired, detail)
        } else {
            Outcome::skipped(SkipReason::NoBranchMatched, detail)
        };
        DispatchOutcome {
            choice: BranchChoice::NoMatch,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{Environment, ProbeResult};
    use crate::error::EnvironmentError;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Page {
        present: Vec<&'static str>,
        clicked: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Environment for Page {
        async fn query_state(&self, criterion: &Criterion) -> Result<ProbeResult, EnvironmentError> {
            let hit = matches!(criterion, Criterion::Selector(s) if self.present.iter().any(|p| *p == s.as_str()));
            Ok(if hit { ProbeResult::matched(1) } else { ProbeResult::absent() })
        }

        async fn perform_mutation(&self, action: &Action) -> Result<(), EnvironmentError> {
            self.clicked.lock().push(action.label());
            Ok(())
        }

        async fn current_location(&self) -> Result<String, EnvironmentError> {
            Ok("/".to_string())
        }
    }

    fn executor(env: &Page) -> ActionExecutor<'_> {
        ActionExecutor::new(
            env,
            Duration::from_secs(1),
            Duration::from_millis(100),
            Duration::from_millis(50),
        )
    }

    fn table() -> DispatchTable {
        DispatchTable::new()
            .branch(Criterion::selector("#b1"), Action::click("#a1"))
            .branch(Criterion::selector("#b2"), Action::click("#a2"))
            .otherwise(Action::click("#fallback"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_second_branch_matches() {
        let env = Page {
            present: vec!["#b2"],
            ..Default::default()
        };
        let exec = executor(&env);
        let dispatcher = ConditionalDispatcher::new(&exec, Duration::from_millis(500));

        let result = dispatcher.dispatch(&table()).await;

        assert_eq!(result.outcome, Outcome::Success);
        assert!(matches!(result.choice, BranchChoice::Branch { index: 1, .. }));
        assert_eq!(*env.clicked.lock(), vec!["click:#a2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_match_wins_over_later_matches() {
        let env = Page {
            present: vec!["#b1", "#b2"],
            ..Default::default()
        };
        let exec = executor(&env);
        let dispatcher = ConditionalDispatcher::new(&exec, Duration::from_millis(500));

        dispatcher.dispatch(&table()).await;

        assert_eq!(*env.clicked.lock(), vec!["click:#a1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_runs_when_nothing_matches() {
        let env = Page::default();
        let exec = executor(&env);
        let dispatcher = ConditionalDispatcher::new(&exec, Duration::from_millis(200));

        let result = dispatcher.dispatch(&table()).await;

        assert!(matches!(result.choice, BranchChoice::Default { .. }));
        assert_eq!(*env.clicked.lock(), vec!["click:#fallback".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_match_without_default() {
        let env = Page::default();
        let exec = executor(&env);
        let dispatcher = ConditionalDispatcher::new(&exec, Duration::from_millis(200));
        let optional = DispatchTable::new().branch(Criterion::selector("#b1"), Action::click("#a1"));

        let skipped = dispatcher.dispatch(&optional).await;
        assert!(skipped.outcome.is_skipped());
        assert_eq!(skipped.choice, BranchChoice::NoMatch);

        let required = dispatcher.dispatch(&optional.clone().required()).await;
        assert_eq!(
            required.outcome.fatal_reason(),
            Some(FatalReason::NoBranchMatchedAndRequired)
        );
        assert!(env.clicked.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_precondition_miss_falls_through() {
        let env = Page {
            present: vec!["#b1", "#b2"],
            ..Default::default()
        };
        let exec = executor(&env);
        let dispatcher = ConditionalDispatcher::new(&exec, Duration::from_millis(200));
        let table = DispatchTable::new()
            .branch(
                Criterion::selector("#b1"),
                Action::click("#a1").with_precondition(Criterion::selector("#missing")),
            )
            .branch(Criterion::selector("#b2"), Action::click("#a2"));

        let result = dispatcher.dispatch(&table).await;

        assert!(result.outcome.is_success());
        assert_eq!(*env.clicked.lock(), vec!["click:#a2".to_string()]);
    }
}
