//! The environment boundary
//!
//! An [`Environment`] is the live, mutable surface the engine interacts with:
//! a browser page, a remote UI, a service. The engine never interprets
//! selector syntax; it hands [`Criterion`] values to the environment as-is.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::error::EnvironmentError;

/// An opaque predicate over environment state
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    /// At least one element matches the selector
    Selector(String),
    /// At least `at_least` elements match the selector
    Count { selector: String, at_least: usize },
    /// The text appears somewhere in the current view
    Text(String),
    /// The current location contains the fragment
    Location(String),
}

impl Criterion {
    pub fn selector(selector: impl Into<String>) -> Self {
        Criterion::Selector(selector.into())
    }

    pub fn count(selector: impl Into<String>, at_least: usize) -> Self {
        Criterion::Count {
            selector: selector.into(),
            at_least,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Criterion::Text(text.into())
    }

    pub fn location(fragment: impl Into<String>) -> Self {
        Criterion::Location(fragment.into())
    }

    /// Whether an environment answer satisfies this criterion
    pub fn is_satisfied_by(&self, result: &ProbeResult) -> bool {
        match self {
            Criterion::Count { at_least, .. } => result.matched_count >= *at_least,
            _ => result.found,
        }
    }
}

impl std::fmt::Display for Criterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Criterion::Selector(s) => write!(f, "selector:{}", s),
            Criterion::Count { selector, at_least } => write!(f, "count:{}>={}", selector, at_least),
            Criterion::Text(t) => write!(f, "text:{}", t),
            Criterion::Location(l) => write!(f, "location:{}", l),
        }
    }
}

/// What a single query observed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub found: bool,
    pub matched_count: usize,
    /// Environment-specific view of what was observed, for diagnostics
    #[serde(default)]
    pub snapshot: Option<serde_json::Value>,
}

impl ProbeResult {
    /// Nothing matched
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn matched(count: usize) -> Self {
        Self {
            found: count > 0,
            matched_count: count,
            snapshot: None,
        }
    }

    pub fn with_snapshot(mut self, snapshot: serde_json::Value) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}

/// The live state surface a scenario interacts with.
///
/// Implementations must keep `query_state` free of side effects. A single
/// environment is driven by one scenario at a time; the engine never issues
/// overlapping calls against it.
#[async_trait]
pub trait Environment: Send + Sync {
    /// Observe the state without mutating it
    async fn query_state(&self, criterion: &Criterion) -> Result<ProbeResult, EnvironmentError>;

    /// Apply a single state-changing action
    async fn perform_mutation(&self, action: &Action) -> Result<(), EnvironmentError>;

    /// Identifier of the current view (a URL, a screen name)
    async fn current_location(&self) -> Result<String, EnvironmentError>;

    /// Give the environment back; called once when the scenario ends
    async fn release(&self) -> Result<(), EnvironmentError> {
        Ok(())
    }
}

/// Hands out a fresh, exclusively owned environment per scenario
#[async_trait]
pub trait EnvironmentFactory: Send + Sync {
    async fn acquire(&self, scenario: &str) -> Result<Box<dyn Environment>, EnvironmentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_criteria() {
        let yaml = r#"
- selector: '#accountTable'
- count:
    selector: '#accountTable tbody tr'
    at_least: 1
- text: Accounts Overview
- location: overview.htm
"#;
        let criteria: Vec<Criterion> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(criteria[0], Criterion::selector("#accountTable"));
        assert_eq!(criteria[1], Criterion::count("#accountTable tbody tr", 1));
        assert_eq!(criteria[2], Criterion::text("Accounts Overview"));
        assert_eq!(criteria[3], Criterion::location("overview.htm"));
    }

    #[test]
    fn test_count_criterion_uses_matched_count() {
        let criterion = Criterion::count("tr", 3);
        assert!(!criterion.is_satisfied_by(&ProbeResult::matched(2)));
        assert!(criterion.is_satisfied_by(&ProbeResult::matched(3)));
        assert!(Criterion::selector("tr").is_satisfied_by(&ProbeResult::matched(1)));
        assert!(!Criterion::selector("tr").is_satisfied_by(&ProbeResult::absent()));
    }
}
