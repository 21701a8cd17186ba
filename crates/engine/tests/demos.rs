//! The bundled ParaBank demo: site model, specs and configuration

use std::path::PathBuf;
use std::sync::Arc;

use steadfast_common::{EngineConfig, ScenarioStatus, StepStatus};
use steadfast_engine::{
    load_scenarios, ScenarioRunner, SimulatedEnvironment, SimulatedFactory, SiteModel, SuiteRunner,
};

fn demo_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../demos/parabank")
}

fn demo_config() -> EngineConfig {
    EngineConfig::load(&demo_dir().join("steadfast.toml")).unwrap()
}

fn demo_site() -> SiteModel {
    SiteModel::from_file(&demo_dir().join("site.yaml")).unwrap()
}

#[test]
fn demo_specs_expand() {
    let scenarios = load_scenarios(&demo_dir().join("scenarios")).unwrap();
    let names: Vec<&str> = scenarios.iter().map(|s| s.name.as_str()).collect();

    assert!(names.contains(&"login"));
    assert!(names.contains(&"viewport-login[HEIGHT=1080,WIDTH=1920]"));
    assert!(names.contains(&"account-details[ROW=3]"));
    assert_eq!(names.iter().filter(|n| n.starts_with("viewport-login[")).count(), 3);
    assert_eq!(demo_config().parallelism, 4);
}

#[tokio::test(start_paused = true)]
async fn every_demo_scenario_passes() {
    let scenarios = load_scenarios(&demo_dir().join("scenarios")).unwrap();
    let factory = Arc::new(SimulatedFactory::new(demo_site()));
    let suite = SuiteRunner::new(demo_config(), factory).unwrap();

    let result = suite.run_all(&scenarios).await;

    for scenario in &result.results {
        assert_eq!(
            scenario.status,
            ScenarioStatus::Passed,
            "{} failed: {:?}",
            scenario.name,
            scenario.failure_reason
        );
    }
    assert!(result.success());
}

#[tokio::test(start_paused = true)]
async fn open_account_needs_three_clicks() {
    let scenarios = load_scenarios(&demo_dir().join("scenarios/open-account.yaml")).unwrap();
    let env = SimulatedEnvironment::new(Arc::new(demo_site()));
    let runner = ScenarioRunner::new(demo_config()).unwrap();

    let result = runner.run_scenario(&scenarios[0], &env).await.unwrap();

    assert!(result.passed());
    let clicks: Vec<_> = result.attempts_for("open-new-account").collect();
    assert_eq!(clicks.len(), 3);
    assert_eq!(clicks[0].delay_before_next_ms, Some(1000));
    assert_eq!(clicks[1].delay_before_next_ms, Some(1000));
    assert_eq!(result.final_location.as_deref(), Some("/parabank/overview.htm"));
}

#[tokio::test(start_paused = true)]
async fn transfer_goes_through_the_account_page() {
    let scenarios = load_scenarios(&demo_dir().join("scenarios/transfer.yaml")).unwrap();
    let env = SimulatedEnvironment::new(Arc::new(demo_site()));
    let runner = ScenarioRunner::new(demo_config()).unwrap();

    let result = runner.run_scenario(&scenarios[0], &env).await.unwrap();

    assert!(result.passed(), "{:?}", result.failure_reason);
    assert_eq!(
        result.step("choose-path").unwrap().branch.as_deref(),
        Some("first-account")
    );
    assert_eq!(
        result.step("activity-or-transfer").unwrap().branch.as_deref(),
        Some("transfer-link")
    );
}

#[tokio::test(start_paused = true)]
async fn browsing_outlives_the_session() {
    let scenarios = load_scenarios(&demo_dir().join("scenarios/session-recovery.yaml")).unwrap();
    let env = SimulatedEnvironment::new(Arc::new(demo_site()));
    let runner = ScenarioRunner::new(demo_config()).unwrap();

    let result = runner.run_scenario(&scenarios[0], &env).await.unwrap();

    assert!(result.passed(), "{:?}", result.failure_reason);
    let logins = env
        .mutation_log()
        .iter()
        .filter(|label| label.as_str() == r#"click:input[value="Log In"]"#)
        .count();
    assert_eq!(logins, 2);
    assert_eq!(result.step("overview-4").unwrap().attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn rejected_login_skips_the_logout_branch() {
    let scenarios = load_scenarios(&demo_dir().join("scenarios/bad-credentials.yaml")).unwrap();
    let env = SimulatedEnvironment::new(Arc::new(demo_site()));
    let runner = ScenarioRunner::new(demo_config()).unwrap();

    let result = runner.run_scenario(&scenarios[0], &env).await.unwrap();

    assert!(result.passed());
    assert_eq!(
        result.step("log-out-if-somehow-in").unwrap().status,
        StepStatus::Skipped
    );
    assert!(!env.is_authenticated());
}
