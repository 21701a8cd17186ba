//! `steadfast validate`: parse specs and site models without running anything

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use steadfast_engine::{load_scenarios, Scenario, SiteModel, StepBody};

use crate::output::{self, OutputFormat, TableDisplay};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Scenario spec file or directory of specs
    pub specs: PathBuf,

    /// Also check a site model
    #[arg(long)]
    pub site: Option<PathBuf>,

    /// Print each step's action
    #[arg(long)]
    pub steps: bool,
}

#[derive(Debug, Serialize)]
pub struct ScenarioInfo {
    pub name: String,
    pub steps: usize,
    pub dispatches: usize,
    pub session: bool,
    pub tags: Vec<String>,
}

impl From<&Scenario> for ScenarioInfo {
    fn from(scenario: &Scenario) -> Self {
        Self {
            name: scenario.name.clone(),
            steps: scenario.steps.len(),
            dispatches: scenario
                .steps
                .iter()
                .filter(|s| matches!(s.body, StepBody::Dispatch(_)))
                .count(),
            session: scenario.session.is_some(),
            tags: scenario.tags.clone(),
        }
    }
}

impl TableDisplay for ScenarioInfo {
    fn headers() -> Vec<&'static str> {
        vec!["SCENARIO", "STEPS", "DISPATCH", "SESSION", "TAGS"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.steps.to_string(),
            self.dispatches.to_string(),
            if self.session { "yes" } else { "no" }.to_string(),
            self.tags.join(", "),
        ]
    }
}

pub fn execute(args: ValidateArgs, format: OutputFormat) -> Result<()> {
    let scenarios = load_scenarios(&args.specs)
        .with_context(|| format!("Invalid scenario specs in {}", args.specs.display()))?;

    let infos: Vec<ScenarioInfo> = scenarios.iter().map(ScenarioInfo::from).collect();
    output::print_list(&infos, format);

    if args.steps && format != OutputFormat::Json {
        for scenario in &scenarios {
            println!();
            println!("{}", scenario.name);
            for step in &scenario.steps {
                let mut flags = Vec::new();
                if step.optional {
                    flags.push("optional");
                }
                if step.requires_session {
                    flags.push("session");
                }
                println!("  {:<28} {} {}", step.name, step.action_label(), flags.join(" "));
            }
        }
    }

    if let Some(site) = &args.site {
        let model = SiteModel::from_file(site)
            .with_context(|| format!("Invalid site model {}", site.display()))?;
        if format != OutputFormat::Json {
            output::print_success(&format!(
                "Site model {} ({} pages)",
                site.display(),
                model.pages.len()
            ));
        }
    }

    if format != OutputFormat::Json {
        output::print_success(&format!("{} scenario(s) valid", scenarios.len()));
    }
    Ok(())
}
