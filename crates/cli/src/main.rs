//! Steadfast CLI - Main Entry Point
//!
//! Validates scenario specs and runs them against simulated sites.

use clap::{Parser, Subcommand};

use steadfast_cli::commands::{config, run, validate};
use steadfast_cli::output;

/// Steadfast - adaptive interaction scenarios
#[derive(Parser)]
#[command(name = "steadfast")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scenarios against a site model
    Run(run::RunArgs),

    /// Parse specs and list the scenarios they expand to
    Validate(validate::ValidateArgs),

    /// Manage engine configuration
    #[command(subcommand)]
    Config(config::ConfigCommands),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Run(args) => match run::execute(args, cli.format).await {
            Ok(true) => Ok(()),
            Ok(false) => std::process::exit(1),
            Err(e) => Err(e),
        },
        Commands::Validate(args) => validate::execute(args, cli.format),
        Commands::Config(cmd) => config::execute(cmd, cli.format),
        Commands::Version => {
            println!("Steadfast CLI v{}", steadfast_common::VERSION);
            Ok(())
        }
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
