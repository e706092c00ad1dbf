use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use capagent::config::AgentConfig;
use capagent::{Adapter, AggregateHealth, OverallStatus};

mod cli;

use cli::Cli;
use cli::commands::Commands;

fn setup_logging(default_level: &str) -> Result<PathBuf> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("capagent")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("capagent.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(log_file)
}

fn status_label(status: OverallStatus) -> ColoredString {
    match status {
        OverallStatus::Healthy => status.to_string().green(),
        OverallStatus::Degraded => status.to_string().yellow(),
        OverallStatus::Unhealthy => status.to_string().red(),
    }
}

fn print_health(health: &AggregateHealth) {
    println!(
        "{} {} | link {} | endpoints {} | open circuits {} | heartbeats {}/{} ok",
        "Status:".bold(),
        status_label(health.status),
        health.connection,
        health.total_endpoints(),
        health.open_circuits.len(),
        health.stats.successful_heartbeats,
        health.stats.total_heartbeats,
    );
    if let Some(error) = &health.stats.last_error {
        println!("  {} {}", "last error:".dimmed(), error);
    }
}

async fn run_agent(config: AgentConfig, status_every: u64) -> Result<()> {
    let adapter = Adapter::from_config(config).context("Failed to build adapter")?;
    adapter.start();

    println!(
        "{} {} -> {}",
        "capagent running:".green(),
        adapter.adapter_id().cyan(),
        adapter.config().cloud_endpoint
    );
    println!("{}", "Press Ctrl-C to stop".dimmed());

    let mut ticker = tokio::time::interval(Duration::from_secs(status_every.max(1)));
    ticker.tick().await;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                break;
            }
            _ = ticker.tick(), if status_every > 0 => {
                print_health(&adapter.health());
            }
        }
    }

    println!("{}", "Stopping...".yellow());
    adapter.stop().await;
    print_health(&adapter.health());
    Ok(())
}

fn check_config(config: &AgentConfig) -> Result<()> {
    config.validate().context("Configuration is invalid")?;

    let mut shown = config.clone();
    if shown.api_key.is_some() {
        shown.api_key = Some("********".to_string());
    }
    let yaml = serde_yaml::to_string(&shown).context("Failed to render configuration")?;

    println!("{}", "Configuration OK".green());
    println!("{} {}", "version:".bold(), config.version());
    println!("{}", yaml);
    Ok(())
}

async fn discover_once(config: AgentConfig) -> Result<()> {
    let adapter = Adapter::from_config(config).context("Failed to build adapter")?;
    let report = adapter.discover().await.context("Discovery failed")?;

    println!(
        "{} {} registered, {} manifest(s) skipped",
        "Discovery:".green(),
        report.registered,
        report.failed_manifests
    );
    for endpoint in adapter.registry().snapshot(None) {
        let capabilities: Vec<&str> = endpoint.capabilities.iter().map(String::as_str).collect();
        println!(
            "  {} [{}] {} (max {})",
            endpoint.id.cyan(),
            capabilities.join(", "),
            endpoint.address,
            endpoint.max_concurrent
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = AgentConfig::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging once the default level is known
    let level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    setup_logging(&level).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match cli.command.unwrap_or(Commands::Run { status_every: 60 }) {
        Commands::Run { status_every } => run_agent(config, status_every).await,
        Commands::CheckConfig => check_config(&config),
        Commands::Discover => discover_once(config).await,
    }
}
