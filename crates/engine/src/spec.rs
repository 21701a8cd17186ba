//! Declarative YAML scenario specs
//!
//! A spec file describes one scenario, optionally multiplied by a matrix of
//! variable rows. `${VAR}` placeholders anywhere inside `session` or `steps`
//! are filled from the row, then from `vars`, then from the process
//! environment. Expanded values are always strings.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::scenario::{Scenario, Step};
use crate::session::SessionSpec;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z0-9_]+)\}").expect("placeholder pattern is valid"));

/// A scenario spec as written on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSpec {
    /// Unique name for this scenario
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Tags for filtering
    #[serde(default)]
    pub tags: Vec<String>,

    /// Variables shared by every matrix row
    #[serde(default)]
    pub vars: BTreeMap<String, Value>,

    /// One scenario is instantiated per row
    #[serde(default)]
    pub matrix: Vec<BTreeMap<String, Value>>,

    #[serde(default)]
    pub session: Option<Value>,

    /// Steps, kept raw until placeholders are expanded
    pub steps: Vec<Value>,
}

impl ScenarioSpec {
    pub fn from_yaml(yaml: &str) -> EngineResult<Self> {
        serde_yaml::from_str(yaml).map_err(EngineError::from)
    }

    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| EngineError::SpecParse(format!("{}: {}", path.display(), e)))
    }

    /// Load all specs below a directory, in file name order
    pub fn load_all(dir: &Path) -> EngineResult<Vec<Self>> {
        let mut specs = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            debug!("Loading spec {}", entry.path().display());
            specs.push(Self::from_file(entry.path())?);
        }

        Ok(specs)
    }

    pub fn filter_by_tag<'a>(specs: &'a [Self], tag: &str) -> Vec<&'a Self> {
        specs.iter().filter(|s| s.tags.iter().any(|t| t == tag)).collect()
    }

    /// Expand the matrix and placeholders into runnable scenarios
    pub fn instantiate(&self) -> EngineResult<Vec<Scenario>> {
        let rows = if self.matrix.is_empty() {
            vec![BTreeMap::new()]
        } else {
            self.matrix.clone()
        };

        let mut scenarios = Vec::with_capacity(rows.len());
        for row in &rows {
            let vars = self.resolve_vars(row)?;
            let name = if self.matrix.is_empty() {
                self.name.clone()
            } else {
                let cells: Vec<String> = row
                    .iter()
                    .map(|(k, v)| Ok(format!("{}={}", k, scalar_to_string(k, v)?)))
                    .collect::<EngineResult<_>>()?;
                format!("{}[{}]", self.name, cells.join(","))
            };

            let steps = self
                .steps
                .iter()
                .enumerate()
                .map(|(i, raw)| {
                    let value = expand_value(raw, &vars)?;
                    serde_yaml::from_value::<Step>(value).map_err(|e| {
                        EngineError::SpecParse(format!("{}: step {}: {}", name, i + 1, e))
                    })
                })
                .collect::<EngineResult<Vec<_>>>()?;

            let session = match &self.session {
                Some(raw) => {
                    let value = expand_value(raw, &vars)?;
                    Some(serde_yaml::from_value::<SessionSpec>(value).map_err(|e| {
                        EngineError::SpecParse(format!("{}: session: {}", name, e))
                    })?)
                }
                None => None,
            };

            scenarios.push(Scenario {
                name,
                description: self.description.clone(),
                tags: self.tags.clone(),
                session,
                steps,
            });
        }

        Ok(scenarios)
    }

    /// Row values override spec-wide vars
    fn resolve_vars(&self, row: &BTreeMap<String, Value>) -> EngineResult<BTreeMap<String, String>> {
        let mut vars = BTreeMap::new();
        for (key, value) in self.vars.iter().chain(row.iter()) {
            vars.insert(key.clone(), scalar_to_string(key, value)?);
        }
        Ok(vars)
    }
}

/// Load scenarios from a single spec file or a directory of specs.
///
/// Scenario names must be unique across everything loaded.
pub fn load_scenarios(path: &Path) -> EngineResult<Vec<Scenario>> {
    let specs = if path.is_dir() {
        ScenarioSpec::load_all(path)?
    } else {
        vec![ScenarioSpec::from_file(path)?]
    };

    let mut seen = HashSet::new();
    let mut scenarios = Vec::new();
    for spec in &specs {
        for scenario in spec.instantiate()? {
            if !seen.insert(scenario.name.clone()) {
                return Err(EngineError::SpecParse(format!(
                    "duplicate scenario name: {}",
                    scenario.name
                )));
            }
            scenarios.push(scenario);
        }
    }
    Ok(scenarios)
}

fn scalar_to_string(key: &str, value: &Value) -> EngineResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(EngineError::SpecParse(format!(
            "variable '{}' must be a string, number or bool",
            key
        ))),
    }
}

/// Replace `${NAME}` in one string
pub fn expand_placeholders(template: &str, vars: &BTreeMap<String, String>) -> EngineResult<String> {
    let mut missing = None;
    let expanded = PLACEHOLDER.replace_all(template, |caps: &regex::Captures| {
        let key = &caps[1];
        if let Some(val) = vars.get(key) {
            return val.clone();
        }
        if let Ok(val) = std::env::var(key) {
            return val;
        }
        missing.get_or_insert_with(|| key.to_string());
        String::new()
    });

    match missing {
        Some(name) => Err(EngineError::Placeholder {
            template: template.to_string(),
            name,
        }),
        None => Ok(expanded.into_owned()),
    }
}

fn expand_value(value: &Value, vars: &BTreeMap<String, String>) -> EngineResult<Value> {
    Ok(match value {
        Value::String(s) => Value::String(expand_placeholders(s, vars)?),
        Value::Sequence(items) => Value::Sequence(
            items
                .iter()
                .map(|item| expand_value(item, vars))
                .collect::<EngineResult<_>>()?,
        ),
        Value::Mapping(map) => {
            let mut out = serde_yaml::Mapping::new();
            for (k, v) in map {
                out.insert(k.clone(), expand_value(v, vars)?);
            }
            Value::Mapping(out)
        }
        other => other.clone(),
    })
}
