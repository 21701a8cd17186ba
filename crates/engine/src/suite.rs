//! Suite runner: many scenarios, one fresh environment each

use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use steadfast_common::{EngineConfig, ScenarioStatus, SuiteResult};

use crate::environment::EnvironmentFactory;
use crate::error::{EngineError, EngineResult};
use crate::runner::ScenarioRunner;
use crate::scenario::Scenario;

/// Name of the JSON report written by [`SuiteRunner::write_results`]
pub const RESULTS_FILE: &str = "scenario-results.json";

pub struct SuiteRunner {
    runner: ScenarioRunner,
    factory: Arc<dyn EnvironmentFactory>,
    output_dir: PathBuf,
}

impl SuiteRunner {
    pub fn new(config: EngineConfig, factory: Arc<dyn EnvironmentFactory>) -> EngineResult<Self> {
        Ok(Self {
            runner: ScenarioRunner::new(config)?,
            factory,
            output_dir: steadfast_common::default_output_dir(),
        })
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Cancelling this token stops every scenario still running
    pub fn cancellation_token(&self) -> CancellationToken {
        self.runner.cancellation_token()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Run all scenarios, `parallelism` at a time; results keep input order
    pub async fn run_all(&self, scenarios: &[Scenario]) -> SuiteResult {
        let start = Instant::now();
        let parallelism = self.runner.config().parallelism.max(1);

        info!(
            "Running {} scenario(s), {} at a time...",
            scenarios.len(),
            parallelism
        );

        let mut indexed: Vec<_> = stream::iter(scenarios.iter().enumerate())
            .map(|(i, scenario)| async move {
                let result = self.runner.run_acquired(scenario, self.factory.as_ref()).await;
                match result.status {
                    ScenarioStatus::Passed => info!("✓ {} ({} ms)", result.name, result.duration_ms),
                    ScenarioStatus::Skipped => info!("- {} (skipped)", result.name),
                    _ => error!(
                        "✗ {} - {}",
                        result.name,
                        result.failure_reason.as_deref().unwrap_or("unknown error")
                    ),
                }
                (i, result)
            })
            .buffer_unordered(parallelism)
            .collect()
            .await;
        indexed.sort_by_key(|(i, _)| *i);

        let results = indexed.into_iter().map(|(_, r)| r).collect();
        let suite = SuiteResult::from_results(results, start.elapsed().as_millis() as u64);

        info!("");
        info!(
            "Scenario results: {} passed, {} failed, {} skipped, {} cancelled ({} ms)",
            suite.passed, suite.failed, suite.skipped, suite.cancelled, suite.duration_ms
        );
        suite
    }

    /// Run scenarios carrying `tag`
    pub async fn run_tagged(&self, scenarios: &[Scenario], tag: &str) -> SuiteResult {
        let filtered: Vec<Scenario> = scenarios.iter().filter(|s| s.has_tag(tag)).cloned().collect();
        self.run_all(&filtered).await
    }

    /// Run the scenarios whose name is `name` or starts with `name[`
    /// (all matrix rows of a spec)
    pub async fn run_named(&self, scenarios: &[Scenario], name: &str) -> EngineResult<SuiteResult> {
        let filtered = filter_by_name(scenarios, name);
        if filtered.is_empty() {
            return Err(EngineError::SpecParse(format!("Scenario not found: {}", name)));
        }
        Ok(self.run_all(&filtered).await)
    }

    /// Write the suite result as pretty JSON into the output directory
    pub fn write_results(&self, results: &SuiteResult) -> EngineResult<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)?;

        let path = self.output_dir.join(RESULTS_FILE);
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

/// Scenarios named `name`, or matrix rows of a spec named `name`
pub fn filter_by_name(scenarios: &[Scenario], name: &str) -> Vec<Scenario> {
    let row_prefix = format!("{}[", name);
    scenarios
        .iter()
        .filter(|s| s.name == name || s.name.starts_with(&row_prefix))
        .cloned()
        .collect()
}
