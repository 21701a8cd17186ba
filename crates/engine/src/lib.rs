//! Steadfast Adaptive Interaction Engine
//!
//! Drives scenarios against a live, changing environment (a web page, a
//! remote UI) without hard-coded sleeps or nested "is it there yet" checks:
//! - Polls the environment with bounded probes
//! - Executes actions once each, guarded by preconditions
//! - Retries transient failures under a backoff policy
//! - Picks actions from ordered dispatch tables
//! - Keeps an authenticated session alive across steps
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  SuiteRunner                                                │
//! │    └── EnvironmentFactory::acquire() per scenario           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ScenarioRunner                                             │
//! │    ├── for each step:                                       │
//! │    │     ├── SessionGuard::ensure()  (requires_session)     │
//! │    │     ├── execute  -> ActionExecutor::execute()          │
//! │    │     ├── dispatch -> ConditionalDispatcher::dispatch()  │
//! │    │     ├── expect   -> StateProbe::probe()                │
//! │    │     └── RetryPolicy::should_retry() -> AttemptRecord   │
//! │    └── Environment::release()                               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Environment (trait)                                        │
//! │    ├── query_state(criterion) -> ProbeResult                │
//! │    ├── perform_mutation(action)                             │
//! │    └── current_location()                                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod action;
pub mod dispatch;
pub mod environment;
pub mod error;
pub mod executor;
pub mod probe;
pub mod retry;
pub mod runner;
pub mod scenario;
pub mod session;
pub mod simulated;
pub mod spec;
pub mod suite;

pub use action::{Action, ActionKind};
pub use dispatch::{Branch, BranchChoice, ConditionalDispatcher, DispatchOutcome, DispatchTable};
pub use environment::{Criterion, Environment, EnvironmentFactory, ProbeResult};
pub use error::{EngineError, EngineResult, EnvironmentError};
pub use executor::{ActionExecutor, AttemptChain};
pub use probe::{FirstMatch, StateProbe};
pub use retry::{RetryDecision, RetryPolicy};
pub use runner::{run_scenario, ScenarioRunner};
pub use scenario::{Scenario, Step, StepBody};
pub use session::{SessionGuard, SessionPhase, SessionSpec, SessionState};
pub use simulated::{SimulatedEnvironment, SimulatedFactory, SiteModel};
pub use spec::{load_scenarios, ScenarioSpec};
pub use suite::{SuiteRunner, RESULTS_FILE};
