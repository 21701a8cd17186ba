//! Simulated environment
//!
//! Plays a small web application described by a YAML [`SiteModel`]: pages
//! with elements and text, click transitions, a session that lapses after a
//! number of requests, and injected faults. Used by the CLI to run specs
//! without a browser and by the engine's own tests.
//!
//! Session handling mirrors a typical server-rendered site: once the session
//! has lapsed, the next request made from a page that requires it lands on
//! the login page instead.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

use crate::action::{Action, ActionKind};
use crate::environment::{Criterion, Environment, EnvironmentFactory, ProbeResult};
use crate::error::{EngineError, EngineResult, EnvironmentError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteModel {
    /// Id of the page a fresh environment starts on
    pub start: String,

    pub pages: Vec<PageModel>,

    #[serde(default)]
    pub session: Option<SessionModel>,

    #[serde(default)]
    pub faults: Vec<FaultModel>,

    /// Added to every mutation
    #[serde(default)]
    pub mutation_latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageModel {
    pub id: String,
    pub location: String,

    #[serde(default)]
    pub texts: Vec<String>,

    #[serde(default)]
    pub elements: Vec<ElementModel>,

    /// Only reachable with a live session
    #[serde(default)]
    pub requires_session: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementModel {
    pub selector: String,

    /// How many nodes the selector matches
    #[serde(default = "default_count")]
    pub count: usize,

    #[serde(default)]
    pub text: Option<String>,

    /// Rendered this long after the page is entered
    #[serde(default)]
    pub appears_after_ms: u64,

    #[serde(default)]
    pub on_click: Option<Transition>,
}

fn default_count() -> usize {
    1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transition {
    /// Page entered after the click
    #[serde(default)]
    pub goto: Option<String>,

    /// The click starts a session
    #[serde(default)]
    pub authenticate: bool,

    /// The click ends the session
    #[serde(default)]
    pub logout: bool,

    /// Input values (by target) the click needs to succeed
    #[serde(default)]
    pub require_inputs: BTreeMap<String, String>,

    /// Page entered when `require_inputs` is not satisfied
    #[serde(default)]
    pub otherwise: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionModel {
    /// Where requests land once the session is gone
    pub login_page: String,

    /// Session lapses after this many requests
    #[serde(default)]
    pub expires_after: Option<u32>,
}

/// The first `fail_times` mutations against `target` fail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultModel {
    pub target: String,
    pub fail_times: u32,
}

impl SiteModel {
    pub fn from_yaml(yaml: &str) -> EngineResult<Self> {
        let model: Self = serde_yaml::from_str(yaml)?;
        model.validate()?;
        Ok(model)
    }

    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Check that every page reference resolves
    pub fn validate(&self) -> EngineResult<()> {
        let mut ids = HashSet::new();
        for page in &self.pages {
            if !ids.insert(page.id.as_str()) {
                return Err(EngineError::SiteModel(format!("duplicate page id: {}", page.id)));
            }
        }

        let check = |id: &str, what: &str| {
            if ids.contains(id) {
                Ok(())
            } else {
                Err(EngineError::SiteModel(format!("{} refers to unknown page: {}", what, id)))
            }
        };

        check(&self.start, "start")?;
        if let Some(session) = &self.session {
            check(&session.login_page, "session.login_page")?;
        }
        for page in &self.pages {
            for element in &page.elements {
                if let Some(transition) = &element.on_click {
                    let what = format!("{} {}", page.id, element.selector);
                    if let Some(goto) = &transition.goto {
                        check(goto, &what)?;
                    }
                    if let Some(otherwise) = &transition.otherwise {
                        check(otherwise, &what)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn page(&self, id: &str) -> Option<&PageModel> {
        self.pages.iter().find(|p| p.id == id)
    }
}

struct SimState {
    page: String,
    entered_at: Instant,
    inputs: HashMap<String, String>,
    authenticated: bool,
    requests_since_login: u32,
    faults: HashMap<String, u32>,
    released: bool,
    log: Vec<String>,
}

pub struct SimulatedEnvironment {
    model: Arc<SiteModel>,
    state: Mutex<SimState>,
}

impl SimulatedEnvironment {
    pub fn new(model: Arc<SiteModel>) -> Self {
        let faults = model
            .faults
            .iter()
            .map(|f| (f.target.clone(), f.fail_times))
            .collect();
        let state = SimState {
            page: model.start.clone(),
            entered_at: Instant::now(),
            inputs: HashMap::new(),
            authenticated: false,
            requests_since_login: 0,
            faults,
            released: false,
            log: Vec::new(),
        };
        Self {
            model,
            state: Mutex::new(state),
        }
    }

    /// Labels of every mutation that landed, in order
    pub fn mutation_log(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.lock().authenticated
    }

    pub fn current_page(&self) -> String {
        self.state.lock().page.clone()
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    fn enter(&self, state: &mut SimState, page_id: &str) {
        let target = match self.model.page(page_id) {
            Some(page) if page.requires_session && !state.authenticated => self.login_page(page_id),
            _ => page_id.to_string(),
        };
        trace!("Entering page {}", target);
        state.page = target;
        state.entered_at = Instant::now();
        state.inputs.clear();
    }

    fn login_page(&self, fallback: &str) -> String {
        self.model
            .session
            .as_ref()
            .map(|s| s.login_page.clone())
            .unwrap_or_else(|| fallback.to_string())
    }

    /// Count a request against the session and drop it once it has lapsed
    fn touch_session(&self, state: &mut SimState) {
        if !state.authenticated {
            return;
        }
        state.requests_since_login += 1;
        if let Some(limit) = self.model.session.as_ref().and_then(|s| s.expires_after) {
            if state.requests_since_login > limit {
                debug!("Simulated session lapsed after {} request(s)", limit);
                state.authenticated = false;
            }
        }
    }

    fn visible<'m>(&self, page: &'m PageModel, state: &SimState, selector: &str) -> Vec<&'m ElementModel> {
        let shown_for = state.entered_at.elapsed();
        page.elements
            .iter()
            .filter(|e| e.selector == selector)
            .filter(|e| shown_for >= Duration::from_millis(e.appears_after_ms))
            .collect()
    }

    fn apply(&self, state: &mut SimState, action: &Action) -> Result<(), EnvironmentError> {
        let page = self
            .model
            .page(&state.page)
            .ok_or_else(|| EnvironmentError::UnknownLocation(state.page.clone()))?;

        // A lapsed session turns any request from a protected page into a login redirect
        if page.requires_session && !state.authenticated {
            let login = self.login_page(&state.page);
            self.enter(state, &login);
            return Err(EnvironmentError::TargetVanished(format!(
                "session expired, redirected to {}",
                login
            )));
        }

        match &action.kind {
            ActionKind::Navigate { url } => {
                let path = url.split(|c: char| c == '?' || c == '#').next().unwrap_or(url.as_str());
                let destination = self
                    .model
                    .pages
                    .iter()
                    .find(|p| path == p.location || path.ends_with(&p.location))
                    .ok_or_else(|| EnvironmentError::UnknownLocation(url.clone()))?;
                let id = destination.id.clone();
                self.enter(state, &id);
            }
            ActionKind::Input {
                target,
                value,
                clear_first,
            } => {
                if self.visible(page, state, target).is_empty() {
                    return Err(EnvironmentError::TargetVanished(target.clone()));
                }
                let entry = state.inputs.entry(target.clone()).or_default();
                if *clear_first {
                    entry.clear();
                }
                entry.push_str(value);
            }
            ActionKind::Click { target } => {
                let transition = match self.visible(page, state, target).first() {
                    Some(element) => element.on_click.clone().unwrap_or_default(),
                    None => return Err(EnvironmentError::TargetVanished(target.clone())),
                };

                let satisfied = transition
                    .require_inputs
                    .iter()
                    .all(|(field, expected)| state.inputs.get(field) == Some(expected));
                if !satisfied {
                    debug!("Click on {} rejected, inputs do not match", target);
                    if let Some(otherwise) = &transition.otherwise {
                        self.enter(state, otherwise);
                    }
                    return Ok(());
                }

                if transition.authenticate {
                    state.authenticated = true;
                    state.requests_since_login = 0;
                }
                if transition.logout {
                    state.authenticated = false;
                }
                if let Some(goto) = &transition.goto {
                    self.enter(state, goto);
                }
            }
            ActionKind::Wait { .. } => {}
        }
        Ok(())
    }
}

#[async_trait]
impl Environment for SimulatedEnvironment {
    async fn query_state(&self, criterion: &Criterion) -> Result<ProbeResult, EnvironmentError> {
        let state = self.state.lock();
        if state.released {
            return Err(EnvironmentError::Closed);
        }
        let page = self
            .model
            .page(&state.page)
            .ok_or_else(|| EnvironmentError::UnknownLocation(state.page.clone()))?;

        let matched = match criterion {
            Criterion::Selector(selector) | Criterion::Count { selector, .. } => self
                .visible(page, &state, selector)
                .iter()
                .map(|e| e.count)
                .sum(),
            Criterion::Text(text) => {
                let shown_for = state.entered_at.elapsed();
                let in_page = page.texts.iter().any(|t| t.contains(text.as_str()));
                let in_elements = page.elements.iter().any(|e| {
                    shown_for >= Duration::from_millis(e.appears_after_ms)
                        && e.text.as_deref().map(|t| t.contains(text.as_str())).unwrap_or(false)
                });
                usize::from(in_page || in_elements)
            }
            Criterion::Location(fragment) => usize::from(page.location.contains(fragment.as_str())),
        };

        let mut result = ProbeResult::matched(matched);
        result.found = criterion.is_satisfied_by(&result);
        Ok(result.with_snapshot(serde_json::json!({ "page": page.id })))
    }

    async fn perform_mutation(&self, action: &Action) -> Result<(), EnvironmentError> {
        if self.model.mutation_latency_ms > 0 {
            sleep(Duration::from_millis(self.model.mutation_latency_ms)).await;
        }

        let mut state = self.state.lock();
        if state.released {
            return Err(EnvironmentError::Closed);
        }

        let key = match &action.kind {
            ActionKind::Navigate { url } => url.as_str(),
            _ => action.target().unwrap_or_default(),
        };
        if let Some(remaining) = state.faults.get_mut(key) {
            if *remaining > 0 {
                *remaining -= 1;
                debug!("Injected fault on {} ({} left)", key, remaining);
                return Err(EnvironmentError::TargetVanished(key.to_string()));
            }
        }

        self.touch_session(&mut state);
        self.apply(&mut state, action)?;
        state.log.push(action.label());
        Ok(())
    }

    async fn current_location(&self) -> Result<String, EnvironmentError> {
        let state = self.state.lock();
        self.model
            .page(&state.page)
            .map(|p| p.location.clone())
            .ok_or_else(|| EnvironmentError::UnknownLocation(state.page.clone()))
    }

    async fn release(&self) -> Result<(), EnvironmentError> {
        self.state.lock().released = true;
        Ok(())
    }
}

/// Hands out a fresh simulated environment per scenario
#[derive(Clone)]
pub struct SimulatedFactory {
    model: Arc<SiteModel>,
}

impl SimulatedFactory {
    pub fn new(model: SiteModel) -> Self {
        Self {
            model: Arc::new(model),
        }
    }
}

#[async_trait]
impl EnvironmentFactory for SimulatedFactory {
    async fn acquire(&self, scenario: &str) -> Result<Box<dyn Environment>, EnvironmentError> {
        debug!("Starting simulated environment for {}", scenario);
        Ok(Box::new(SimulatedEnvironment::new(self.model.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE: &str = r#"
start: login
session:
  login_page: login
  expires_after: 2
faults:
  - target: '#flaky'
    fail_times: 1
pages:
  - id: login
    location: /login
    texts: [Customer Login]
    elements:
      - selector: '#user'
      - selector: '#go'
        on_click:
          require_inputs: { '#user': john }
          goto: home
          authenticate: true
          otherwise: error
  - id: error
    location: /error
    texts: [could not be verified]
  - id: home
    location: /home
    requires_session: true
    texts: [Accounts Overview]
    elements:
      - selector: '.row'
        count: 3
      - selector: '#flaky'
      - selector: '#late'
        appears_after_ms: 500
"#;

    fn env() -> SimulatedEnvironment {
        SimulatedEnvironment::new(Arc::new(SiteModel::from_yaml(SITE).unwrap()))
    }

    async fn login(env: &SimulatedEnvironment) {
        env.perform_mutation(&Action::input("#user", "john")).await.unwrap();
        env.perform_mutation(&Action::click("#go")).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_transition() {
        let env = env();
        login(&env).await;
        assert!(env.is_authenticated());
        assert_eq!(env.current_location().await.unwrap(), "/home");

        let rows = env.query_state(&Criterion::count(".row", 3)).await.unwrap();
        assert!(rows.found);
        assert_eq!(rows.matched_count, 3);
        assert!(!env.query_state(&Criterion::count(".row", 4)).await.unwrap().found);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_credentials() {
        let env = env();
        env.perform_mutation(&Action::input("#user", "eve")).await.unwrap();
        env.perform_mutation(&Action::click("#go")).await.unwrap();
        assert!(!env.is_authenticated());
        assert!(env.query_state(&Criterion::text("could not be verified")).await.unwrap().found);
    }

    #[tokio::test(start_paused = true)]
    async fn test_protected_page_redirects_to_login() {
        let env = env();
        env.perform_mutation(&Action::navigate("https://bank.test/home?tab=1")).await.unwrap();
        assert_eq!(env.current_page(), "login");
        assert!(env.perform_mutation(&Action::navigate("/nowhere")).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_then_success() {
        let env = env();
        login(&env).await;
        let err = env.perform_mutation(&Action::click("#flaky")).await.unwrap_err();
        assert_eq!(err, EnvironmentError::TargetVanished("#flaky".to_string()));
        env.perform_mutation(&Action::click("#flaky")).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_element() {
        let env = env();
        login(&env).await;
        assert!(!env.query_state(&Criterion::selector("#late")).await.unwrap().found);
        sleep(Duration::from_millis(500)).await;
        assert!(env.query_state(&Criterion::selector("#late")).await.unwrap().found);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_lapses_after_requests() {
        let env = env();
        login(&env).await;
        env.perform_mutation(&Action::click(".row")).await.unwrap();
        env.perform_mutation(&Action::click(".row")).await.unwrap();

        let err = env.perform_mutation(&Action::click(".row")).await.unwrap_err();
        assert!(matches!(err, EnvironmentError::TargetVanished(_)));
        assert_eq!(env.current_page(), "login");
        assert!(env.query_state(&Criterion::text("Customer Login")).await.unwrap().found);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_closes() {
        let env = env();
        env.release().await.unwrap();
        assert!(env.is_released());
        assert_eq!(
            env.query_state(&Criterion::selector("#user")).await.unwrap_err(),
            EnvironmentError::Closed
        );
    }

    #[test]
    fn test_dangling_reference_rejected() {
        let yaml = "start: nowhere\npages:\n  - id: home\n    location: /\n";
        assert!(SiteModel::from_yaml(yaml).is_err());
    }
}
