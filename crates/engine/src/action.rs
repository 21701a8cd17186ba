//! Actions: single state-changing operations against an environment

use serde::{Deserialize, Serialize};

use crate::environment::Criterion;

/// What an action does
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    /// Go to a location
    Navigate { url: String },

    /// Type a value into a target
    Input {
        target: String,
        value: String,
        #[serde(default)]
        clear_first: bool,
    },

    /// Click a target
    Click { target: String },

    /// Pause the scenario; served by the engine, never sent to the environment
    Wait { ms: u64 },
}

/// A mutation plus the state that must be present before it runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Optional display name; defaults to a label derived from the kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(flatten)]
    pub kind: ActionKind,

    /// Every criterion must be found before the mutation is attempted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preconditions: Vec<Criterion>,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            name: None,
            kind,
            preconditions: Vec::new(),
        }
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        Self::new(ActionKind::Navigate { url: url.into() })
    }

    pub fn input(target: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(ActionKind::Input {
            target: target.into(),
            value: value.into(),
            clear_first: true,
        })
    }

    pub fn click(target: impl Into<String>) -> Self {
        Self::new(ActionKind::Click {
            target: target.into(),
        })
    }

    pub fn wait(ms: u64) -> Self {
        Self::new(ActionKind::Wait { ms })
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_precondition(mut self, criterion: Criterion) -> Self {
        self.preconditions.push(criterion);
        self
    }

    /// The element the action operates on, if any
    pub fn target(&self) -> Option<&str> {
        match &self.kind {
            ActionKind::Input { target, .. } | ActionKind::Click { target } => Some(target),
            ActionKind::Navigate { .. } | ActionKind::Wait { .. } => None,
        }
    }

    /// Stable label used in attempt records and logs
    pub fn label(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match &self.kind {
            ActionKind::Navigate { url } => format!("navigate:{}", url),
            ActionKind::Input { target, .. } => format!("input:{}", target),
            ActionKind::Click { target } => format!("click:{}", target),
            ActionKind::Wait { ms } => format!("wait:{}ms", ms),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}
