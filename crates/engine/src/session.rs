//! Session guard
//!
//! Keeps an authenticated session alive across a scenario:
//!
//! ```text
//!   Unknown ──login ok──▶ Authenticated ──expiry observed──▶ Expired
//!                              ▲                                │
//!                              └──────── re-login ok ───────────┘
//! ```
//!
//! The session state is always re-derived by probing; nothing is carried
//! between scenarios. Each `ensure` call re-authenticates at most once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use steadfast_common::{FatalReason, Outcome};

use crate::action::Action;
use crate::environment::Criterion;
use crate::executor::ActionExecutor;

/// How a scenario recognizes and re-establishes its session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSpec {
    /// Present whenever the session is valid
    pub authenticated: Criterion,

    /// Present when the session has lapsed (a login prompt, a timeout banner)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired: Option<Criterion>,

    /// Actions that log in, run in order
    pub login: Vec<Action>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Unknown,
    Authenticated,
    Expired,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Unknown => write!(f, "unknown"),
            SessionPhase::Authenticated => write!(f, "authenticated"),
            SessionPhase::Expired => write!(f, "expired"),
        }
    }
}

/// Derived view of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub authenticated: bool,
    pub last_verified_at: Option<DateTime<Utc>>,
}

pub struct SessionGuard {
    spec: SessionSpec,
    phase: SessionPhase,
    last_verified_at: Option<DateTime<Utc>>,
    probe_timeout: Duration,
    logins: u32,
}

impl SessionGuard {
    pub fn new(spec: SessionSpec, probe_timeout: Duration) -> Self {
        Self {
            spec,
            phase: SessionPhase::Unknown,
            last_verified_at: None,
            probe_timeout,
            logins: 0,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn state(&self) -> SessionState {
        SessionState {
            authenticated: self.phase == SessionPhase::Authenticated,
            last_verified_at: self.last_verified_at,
        }
    }

    /// Number of times the login actions were run
    pub fn login_count(&self) -> u32 {
        self.logins
    }

    /// Run the login actions and verify the authenticated view appears
    pub async fn login(&mut self, executor: &ActionExecutor<'_>) -> Outcome {
        let authenticated = self.spec.authenticated.clone();
        match self.authenticate(executor, &authenticated).await {
            Ok(()) => Outcome::Success,
            Err(detail) => Outcome::fatal(FatalReason::SessionRecoveryFailed, detail),
        }
    }

    /// Make sure the session is valid before an authenticated action
    pub async fn ensure_authenticated(&mut self, executor: &ActionExecutor<'_>) -> Outcome {
        let authenticated = self.spec.authenticated.clone();
        self.ensure(executor, &authenticated).await
    }

    /// Probe for `authenticated`; if absent, log in once and re-verify.
    ///
    /// A failure during that single recovery is terminal for this call,
    /// including the session lapsing again mid-login.
    pub async fn ensure(&mut self, executor: &ActionExecutor<'_>, authenticated: &Criterion) -> Outcome {
        let probe = executor.probe();
        let mut criteria = vec![authenticated.clone()];
        if let Some(expired) = &self.spec.expired {
            criteria.push(expired.clone());
        }

        let observed = probe
            .probe_first_match(&criteria, self.probe_timeout, executor.poll_interval())
            .await;

        match observed.index {
            Some(0) => {
                debug!("Session verified ({})", authenticated);
                self.mark_authenticated();
                return Outcome::Success;
            }
            Some(_) => {
                if self.phase == SessionPhase::Authenticated {
                    warn!("Session expired, re-authenticating");
                    self.phase = SessionPhase::Expired;
                } else {
                    info!("Login prompt present, authenticating");
                }
            }
            None => {
                if self.phase == SessionPhase::Authenticated {
                    warn!("Authenticated view gone, re-authenticating");
                    self.phase = SessionPhase::Expired;
                } else {
                    info!("Session not established, authenticating");
                }
            }
        }

        match self.authenticate(executor, authenticated).await {
            Ok(()) => Outcome::Success,
            Err(detail) => Outcome::fatal(FatalReason::SessionRecoveryFailed, detail),
        }
    }

    async fn authenticate(
        &mut self,
        executor: &ActionExecutor<'_>,
        authenticated: &Criterion,
    ) -> Result<(), String> {
        self.logins += 1;

        let login = self.spec.login.clone();
        for action in &login {
            let outcome = executor.execute(action).await;
            if !outcome.is_success() {
                self.fail_recovery();
                return Err(format!("login action {} failed: {}", action.label(), outcome));
            }
        }

        let verified = executor
            .probe()
            .probe(authenticated, self.probe_timeout, executor.poll_interval())
            .await;
        if !verified.found {
            self.fail_recovery();
            return Err(format!("{} not observed after login", authenticated));
        }

        info!("Session established (login #{})", self.logins);
        self.mark_authenticated();
        Ok(())
    }

    fn mark_authenticated(&mut self) {
        self.phase = SessionPhase::Authenticated;
        self.last_verified_at = Some(Utc::now());
    }

    fn fail_recovery(&mut self) {
        if self.phase == SessionPhase::Authenticated {
            self.phase = SessionPhase::Expired;
        }
        warn!("Session recovery failed (phase: {})", self.phase);
    }
}
