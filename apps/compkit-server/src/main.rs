use anyhow::Result;
use clap::{Parser, Subcommand};
use compkit::runtime::{run, RunOptions, ShutdownOptions};
use compkit::ComponentList;
use compkit_bootstrap::{default_logging_config, AppConfig, AppConfigProvider, CliArgs};
use mimalloc::MiMalloc;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

mod heartbeat;
mod registered_components;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Compkit Server - hosts components built concurrently with runtime dependency resolution
#[derive(Parser)]
#[command(name = "compkit-server")]
#[command(about = "Compkit Server - concurrent component host")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Default per-component construction timeout, e.g. "30s" (overrides config)
    #[arg(long, value_parser = humantime::parse_duration)]
    construction_timeout: Option<Duration>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load every component and serve until a shutdown signal
    Run,
    /// Validate configuration and the component registry without constructing anything
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        construction_timeout: cli.construction_timeout,
        print_config: cli.print_config,
        verbose: cli.verbose,
    };

    // Layered config:
    // 1) defaults -> 2) YAML (if provided) -> 3) env (APP__*) -> 4) CLI overrides
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    let logging_config = config
        .logging
        .clone()
        .unwrap_or_else(default_logging_config);
    compkit_bootstrap::init_logging(&logging_config, Path::new(&config.home_dir));

    tracing::info!("Compkit Server starting");

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(config).await,
        Commands::Check => check_config(config),
    }
}

async fn run_server(config: AppConfig) -> Result<()> {
    tracing::info!("Loading components…");

    let manager = config.manager.clone();
    let provider = Arc::new(AppConfigProvider::new(config));

    let run_options = RunOptions {
        components: ComponentList::discover(),
        config: provider,
        manager,
        shutdown: ShutdownOptions::Signals,
    };

    run(run_options).await
}

fn check_config(config: AppConfig) -> Result<()> {
    tracing::info!("Checking configuration…");
    let provider = AppConfigProvider::new(config);
    let registry = ComponentList::discover().build(&provider)?;

    println!("Configuration is valid");
    for entry in registry.entries() {
        let status = if entry.enabled { "enabled" } else { "disabled" };
        match entry.construction_timeout(provider.inner().manager.construction_timeout) {
            Some(timeout) => println!(
                "  {:<24} {status} (construction timeout {})",
                entry.name,
                humantime::format_duration(timeout)
            ),
            None => println!("  {:<24} {status}", entry.name),
        }
    }
    println!("{}", provider.inner().to_yaml()?);
    Ok(())
}
