//! `steadfast run`: execute scenarios against a simulated site

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use steadfast_common::{EngineConfig, ScenarioResult, ScenarioStatus, StepStatus, SuiteResult};
use steadfast_engine::{load_scenarios, SimulatedFactory, SiteModel, SuiteRunner};

use crate::output::{self, OutputFormat, TableDisplay};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Scenario spec file or directory of specs
    pub specs: PathBuf,

    /// Site model the scenarios run against
    #[arg(long)]
    pub site: PathBuf,

    /// Engine configuration file (defaults to ./steadfast.toml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Only run scenarios carrying this tag
    #[arg(long)]
    pub tag: Option<String>,

    /// Only run the named scenario (matrix rows match by base name)
    #[arg(long)]
    pub name: Option<String>,

    /// Scenarios to run at once
    #[arg(long)]
    pub parallel: Option<usize>,

    /// Directory for the JSON report
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Keep going after a required step fails
    #[arg(long)]
    pub no_fail_fast: bool,

    /// Print every step of every scenario
    #[arg(long)]
    pub details: bool,
}

/// One line of the results table
#[derive(Debug, Serialize)]
pub struct ScenarioRow {
    pub name: String,
    pub status: ScenarioStatus,
    pub steps: String,
    pub attempts: usize,
    pub duration: String,
    pub failed_step: String,
    pub reason: String,
}

impl From<&ScenarioResult> for ScenarioRow {
    fn from(result: &ScenarioResult) -> Self {
        let passed = result
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Passed)
            .count();
        Self {
            name: result.name.clone(),
            status: result.status,
            steps: format!("{}/{}", passed, result.steps.len()),
            attempts: result.attempts.len(),
            duration: output::format_duration_ms(result.duration_ms),
            failed_step: result.failed_step.clone().unwrap_or_else(|| "-".to_string()),
            reason: result.failure_reason.clone().unwrap_or_else(|| "-".to_string()),
        }
    }
}

impl TableDisplay for ScenarioRow {
    fn headers() -> Vec<&'static str> {
        vec!["SCENARIO", "STATUS", "STEPS", "ATTEMPTS", "DURATION", "FAILED STEP", "REASON"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.status.to_string(),
            self.steps.clone(),
            self.attempts.to_string(),
            self.duration.clone(),
            self.failed_step.clone(),
            self.reason.clone(),
        ]
    }
}

/// Load the engine configuration, applying command-line overrides
pub fn resolve_config(args: &RunArgs) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            if !path.exists() {
                bail!("Configuration file not found: {}", path.display());
            }
            EngineConfig::load(path)
                .with_context(|| format!("Failed to load {}", path.display()))?
        }
        None => EngineConfig::load(&steadfast_common::default_config_path())?,
    };

    if let Some(parallel) = args.parallel {
        config.parallelism = parallel;
    }
    if args.no_fail_fast {
        config.fail_fast = false;
    }
    config.validate()?;
    Ok(config)
}

/// Run the selected scenarios; `Ok(false)` means at least one did not pass
pub async fn execute(args: RunArgs, format: OutputFormat) -> Result<bool> {
    let config = resolve_config(&args)?;
    let site = SiteModel::from_file(&args.site)
        .with_context(|| format!("Failed to load site model {}", args.site.display()))?;
    let mut scenarios = load_scenarios(&args.specs)?;

    if let Some(tag) = &args.tag {
        scenarios.retain(|s| s.has_tag(tag));
        if scenarios.is_empty() {
            bail!("No scenarios tagged '{}' in {}", tag, args.specs.display());
        }
    }

    let suite = SuiteRunner::new(config, Arc::new(SimulatedFactory::new(site)))?
        .with_output_dir(report_dir(&args));

    let token = suite.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling running scenarios...");
            token.cancel();
        }
    });

    let result = match &args.name {
        Some(name) => suite.run_named(&scenarios, name).await?,
        None => suite.run_all(&scenarios).await,
    };

    let report = suite.write_results(&result)?;
    print_results(&result, format, args.details);
    if format != OutputFormat::Json {
        output::print_info(&format!("Report written to {}", report.display()));
    }

    Ok(result.success())
}

fn print_results(result: &SuiteResult, format: OutputFormat, details: bool) {
    match format {
        OutputFormat::Json | OutputFormat::Yaml => output::print_value(result, format),
        OutputFormat::Table | OutputFormat::Plain => {
            let rows: Vec<ScenarioRow> = result.results.iter().map(ScenarioRow::from).collect();
            output::print_list(&rows, format);
            if details {
                for scenario in &result.results {
                    print_steps(scenario);
                }
            }
            print_summary(result);
        }
    }
}

fn print_steps(scenario: &ScenarioResult) {
    println!();
    println!("{} [{}]", scenario.name, output::scenario_status(scenario.status));
    for step in &scenario.steps {
        let branch = step
            .branch
            .as_deref()
            .map(|b| format!(" via {}", b))
            .unwrap_or_default();
        println!(
            "  {:<28} {:<10} {} attempt(s){}",
            step.name,
            output::step_status(step.status),
            step.attempts,
            branch
        );
        if !step.outcome.is_success() {
            println!("      {}", step.outcome);
        }
    }
    if let Some(location) = &scenario.final_location {
        println!("  ended at {}", location);
    }
}

fn print_summary(result: &SuiteResult) {
    println!();
    let line = format!(
        "{} passed, {} failed, {} skipped, {} cancelled in {}",
        result.passed,
        result.failed,
        result.skipped,
        result.cancelled,
        output::format_duration_ms(result.duration_ms)
    );
    if result.success() {
        output::print_success(&line);
    } else {
        output::print_error(&line);
    }
}

/// Directory the report lands in for these arguments
pub fn report_dir(args: &RunArgs) -> PathBuf {
    args.output
        .clone()
        .unwrap_or_else(steadfast_common::default_output_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use steadfast_engine::RESULTS_FILE;

    const SITE: &str = r#"
start: home
pages:
  - id: home
    location: /home
    texts: [Welcome]
    elements:
      - selector: '#next'
        on_click:
          goto: done
  - id: done
    location: /done
    texts: [Finished]
"#;

    const SPEC: &str = r#"
name: click-through
tags: [smoke]
steps:
  - name: next
    execute:
      kind: click
      target: '#next'
  - name: finished
    expect:
      text: Finished
"#;

    fn args(dir: &Path) -> RunArgs {
        RunArgs {
            specs: dir.join("spec.yaml"),
            site: dir.join("site.yaml"),
            config: None,
            tag: None,
            name: None,
            parallel: Some(2),
            output: Some(dir.join("out")),
            no_fail_fast: false,
            details: true,
        }
    }

    #[test]
    fn test_overrides_apply() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args(dir.path());
        args.no_fail_fast = true;

        let config = resolve_config(&args).unwrap();
        assert_eq!(config.parallelism, 2);
        assert!(!config.fail_fast);
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args(dir.path());
        args.config = Some(dir.path().join("nope.toml"));

        assert!(resolve_config(&args).is_err());
    }

    #[tokio::test]
    async fn test_run_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("site.yaml"), SITE).unwrap();
        std::fs::write(dir.path().join("spec.yaml"), SPEC).unwrap();
        let args = args(dir.path());
        let report = report_dir(&args).join(RESULTS_FILE);

        let passed = execute(args, OutputFormat::Plain).await.unwrap();

        assert!(passed);
        let written: SuiteResult =
            serde_json::from_str(&std::fs::read_to_string(report).unwrap()).unwrap();
        assert_eq!(written.passed, 1);
        assert_eq!(written.results[0].name, "click-through");
    }

    #[tokio::test]
    async fn test_unknown_tag_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("site.yaml"), SITE).unwrap();
        std::fs::write(dir.path().join("spec.yaml"), SPEC).unwrap();
        let mut args = args(dir.path());
        args.tag = Some("nightly".to_string());

        assert!(execute(args, OutputFormat::Plain).await.is_err());
    }
}
