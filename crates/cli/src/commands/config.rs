//! `steadfast config`: create and inspect engine configuration files

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use std::path::{Path, PathBuf};

use steadfast_common::EngineConfig;

use crate::output::{self, OutputFormat};

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Write the default configuration
    Init {
        /// Destination (defaults to ./steadfast.toml)
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show {
        /// Configuration file (defaults to ./steadfast.toml when present)
        path: Option<PathBuf>,
    },
}

pub fn execute(cmd: ConfigCommands, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Init { path, force } => {
            let path = path.unwrap_or_else(steadfast_common::default_config_path);
            init(&path, force)?;
            output::print_success(&format!("Wrote {}", path.display()));
        }
        ConfigCommands::Show { path } => {
            let path = path.unwrap_or_else(steadfast_common::default_config_path);
            let config = EngineConfig::load(&path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            if !path.exists() {
                output::print_warning(&format!("{} not found, showing defaults", path.display()));
            }
            match format {
                OutputFormat::Table | OutputFormat::Plain => {
                    print!("{}", toml::to_string_pretty(&config)?);
                }
                _ => output::print_value(&config, format),
            }
        }
    }
    Ok(())
}

fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    EngineConfig::default().save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_loadable_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf/steadfast.toml");

        init(&path, false).unwrap();

        assert_eq!(EngineConfig::load(&path).unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steadfast.toml");
        std::fs::write(&path, "parallelism = 7\n").unwrap();

        assert!(init(&path, false).is_err());
        init(&path, true).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap().parallelism, 1);
    }
}
