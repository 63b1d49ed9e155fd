//! sentineld — the Sentinel daemon and operator CLI.
//!
//! `run` starts the periodic health loop; every other subcommand opens the
//! same store, does one thing and exits.
//!
//! # Usage
//!
//! ```text
//! sentineld --config sentinel.toml run
//! sentineld check --format json
//! sentineld trend portal --window 24h
//! sentineld policy set portal --strategy rebuild --auto-repair false
//! sentineld repair portal restart
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;

use sentinel_core::{SentinelConfig, parse_duration};
use sentinel_health::{format_human, format_json};
use sentinel_scheduler::HealthEngine;
use sentinel_state::{CheckStatus, RepairStrategy};

#[derive(Parser)]
#[command(name = "sentineld", about = "Sentinel health intelligence daemon")]
struct Cli {
    /// Path to sentinel.toml.
    #[arg(long, global = true, default_value = "sentinel.toml")]
    config: PathBuf,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until interrupted.
    Run,

    /// Run one manual cycle and print its report.
    Check {
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },

    /// List recent reports, newest first.
    History {
        #[arg(long, default_value = "20")]
        limit: usize,

        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },

    /// Response-time and status trend for a target.
    Trend {
        target: String,

        /// Look-back window, e.g. "24h" or "7d".
        #[arg(long, default_value = "24h")]
        window: String,

        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },

    /// List recent repair actions, newest first.
    Repairs {
        #[arg(long, default_value = "20")]
        limit: usize,

        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },

    /// Inspect or change repair policies.
    Policy {
        #[command(subcommand)]
        action: PolicyCommand,
    },

    /// Run a repair strategy against a target now.
    Repair {
        target: String,
        /// One of restart, rebuild, rollback.
        strategy: String,
    },

    /// Write a starter sentinel.toml.
    Init {
        /// Services as name:port, e.g. portal:8080.
        #[arg(long = "service", value_name = "NAME:PORT")]
        services: Vec<String>,

        #[arg(long, default_value = "sentinel.toml")]
        output: PathBuf,
    },
}

#[derive(Subcommand)]
enum PolicyCommand {
    /// Show every live policy.
    List {
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },

    /// Update fields of a target's policy.
    Set {
        target: String,

        #[arg(long)]
        max_response_ms: Option<u64>,

        #[arg(long)]
        auto_repair: Option<bool>,

        /// One of restart, rebuild, rollback, none.
        #[arg(long)]
        strategy: Option<String>,
    },

    /// Restore a target's default policy.
    Reset { target: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Init { services, output } => init(&services, &output),
        command => {
            let config = SentinelConfig::from_file(&cli.config)
                .with_context(|| format!("loading {}", cli.config.display()))?;
            let engine = open_engine(&config)?;
            dispatch(&engine, command).await
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("info,sentineld=debug,sentinel=debug")
    });
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn open_engine(config: &SentinelConfig) -> anyhow::Result<HealthEngine> {
    let db_path = config.storage_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let engine = HealthEngine::from_config(config)?;
    info!(path = ?db_path, targets = config.targets.len(), "health engine ready");
    Ok(engine)
}

async fn dispatch(engine: &HealthEngine, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Run => run(engine).await,
        Command::Check { format } => check(engine, format).await,
        Command::History { limit, format } => {
            let history = engine.history(limit)?;
            if format == OutputFormat::Json {
                return print_json(&history);
            }
            if history.is_empty() {
                println!("no reports recorded yet");
            }
            for entry in history {
                println!(
                    "#{:<6} {:>15}  {:<4}  {:<9}  {} checks ({} warn, {} fail)  {}ms",
                    entry.id,
                    entry.timestamp_ms,
                    entry.overall_status,
                    entry.trigger,
                    entry.summary.total,
                    entry.summary.warned,
                    entry.summary.failed,
                    entry.cycle_duration_ms,
                );
            }
            Ok(())
        }
        Command::Trend {
            target,
            window,
            format,
        } => {
            let window = parse_duration(&window)
                .with_context(|| format!("invalid window '{window}'"))?;
            let trend = engine.trend(&target, window)?;
            if format == OutputFormat::Json {
                return print_json(&trend);
            }
            println!("Trend for {target} over {}", humanize(window));
            println!("  Samples:        {}", trend.samples);
            match trend.avg_response_time_ms {
                Some(avg) => println!("  Avg response:   {avg:.1}ms"),
                None => println!("  Avg response:   n/a"),
            }
            if let Some(peak) = trend.peak_response_time_ms {
                println!("  Peak response:  {peak}ms");
            }
            println!("  Failure rate:   {:.1}%", trend.failure_rate * 100.0);
            for point in &trend.status_over_time {
                println!(
                    "    #{:<6} {:>15}  {:<4} ({})",
                    point.report_id, point.timestamp_ms, point.status, point.score
                );
            }
            Ok(())
        }
        Command::Repairs { limit, format } => {
            let actions = engine.repair_history(limit)?;
            if format == OutputFormat::Json {
                return print_json(&actions);
            }
            if actions.is_empty() {
                println!("no repair actions recorded");
            }
            for action in actions {
                let origin = match action.triggering_report_id {
                    Some(id) => format!("report #{id}"),
                    None => "manual".to_string(),
                };
                println!(
                    "#{:<6} {:<16} {:<10} {:<9} {:<10} {}  {}",
                    action.id,
                    action.target,
                    action.issue_type,
                    action.strategy,
                    action.status,
                    origin,
                    action.message.unwrap_or_default(),
                );
            }
            Ok(())
        }
        Command::Policy { action } => policy(engine, action),
        Command::Repair { target, strategy } => {
            let strategy: RepairStrategy = strategy.parse()?;
            let action = engine.manual_repair(&target, strategy).await?;
            print_json(&action)
        }
        Command::Init { services, output } => init(&services, &output),
    }
}

async fn run(engine: &HealthEngine) -> anyhow::Result<()> {
    info!("Sentinel daemon starting");
    engine.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    engine.stop().await;
    Ok(())
}

async fn check(engine: &HealthEngine, format: OutputFormat) -> anyhow::Result<()> {
    let outcome = engine.trigger_cycle().await?;
    match format {
        OutputFormat::Json => println!("{}", format_json(&outcome.report.report)?),
        OutputFormat::Human => {
            print!("{}", format_human(&outcome.report.report));
            for action in &outcome.repairs {
                println!(
                    "repair {}: {} ({})",
                    action.target, action.strategy, action.status
                );
            }
        }
    }
    if outcome.report.report.overall_status == CheckStatus::Fail {
        anyhow::bail!("overall status: fail");
    }
    Ok(())
}

fn policy(engine: &HealthEngine, action: PolicyCommand) -> anyhow::Result<()> {
    match action {
        PolicyCommand::List { format } => {
            let policies = engine.policies()?;
            if format == OutputFormat::Json {
                return print_json(&policies);
            }
            println!(
                "{:<16} {:>8}  {:<11} {}",
                "TARGET", "MAX_MS", "AUTO_REPAIR", "STRATEGY"
            );
            for p in policies {
                println!(
                    "{:<16} {:>8}  {:<11} {}",
                    p.target, p.max_response_time_ms, p.auto_repair_enabled, p.repair_strategy
                );
            }
            Ok(())
        }
        PolicyCommand::Set {
            target,
            max_response_ms,
            auto_repair,
            strategy,
        } => {
            let mut policy = engine.policy(&target)?;
            if let Some(ms) = max_response_ms {
                policy.max_response_time_ms = ms;
            }
            if let Some(enabled) = auto_repair {
                policy.auto_repair_enabled = enabled;
            }
            if let Some(strategy) = strategy {
                policy.repair_strategy = strategy.parse()?;
            }
            print_json(&engine.update_policy(policy)?)
        }
        PolicyCommand::Reset { target } => print_json(&engine.reset_policy(&target)?),
    }
}

fn init(services: &[String], output: &Path) -> anyhow::Result<()> {
    let mut parsed = Vec::with_capacity(services.len());
    for entry in services {
        let (name, port) = entry
            .split_once(':')
            .with_context(|| format!("expected NAME:PORT, got '{entry}'"))?;
        let port: u16 = port
            .parse()
            .with_context(|| format!("invalid port in '{entry}'"))?;
        parsed.push((name, port));
    }
    if output.exists() {
        anyhow::bail!("{} already exists", output.display());
    }
    let config = SentinelConfig::scaffold(&parsed);
    std::fs::write(output, config.to_toml_string()?)?;
    println!("wrote {}", output.display());
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn humanize(window: Duration) -> String {
    let secs = window.as_secs();
    match secs {
        s if s >= 86_400 && s % 86_400 == 0 => format!("{}d", s / 86_400),
        s if s >= 3600 && s % 3600 == 0 => format!("{}h", s / 3600),
        s if s >= 60 && s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{s}s"),
    }
}
