//! cdnguard CLI
//!
//! Command-line entrypoint for the CDN traffic abuse detection pipeline.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use cdnguard::alerting::build_channel;
use cdnguard::clock::SystemClock;
use cdnguard::detection::{Collaborators, CycleReport, Scheduler};
use cdnguard::sources::HttpGateway;
use cdnguard::{store, telemetry, Config, Error};

/// cdnguard - CDN traffic abuse detection and alerting
#[derive(Parser)]
#[command(name = "cdnguard")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path (TOML, YAML or JSON)
    #[arg(short, long, global = true, env = "CDNGUARD_CONFIG")]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (for commands that support it)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run detection cycles on the configured interval until interrupted
    Run,

    /// Run a single detection cycle and print its report
    Once,

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Validate configuration and list every problem found
    Check,

    /// Print the effective configuration with secrets masked
    Show,
}

#[tokio::main]
async fn main() -> ExitCode {
    // .env is optional
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        generate_completions(shell);
        return ExitCode::SUCCESS;
    }

    // Load configuration
    let config = match Config::load(cli.config.as_deref().map(Path::new)) {
        Ok(config) => config,
        Err(Error::InvalidConfig(problems)) => {
            eprintln!("Invalid configuration ({} problem(s)):", problems.len());
            for problem in problems {
                eprintln!("  - {problem}");
            }
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = telemetry::init_logging(&config.logging, cli.verbose) {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::Run => run_loop(config).await,
        Commands::Once => run_once(config, cli.format).await,
        Commands::Config { command } => run_config(&config, command, cli.format),
        Commands::Completions { .. } => Ok(()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn build_scheduler(config: &Config) -> anyhow::Result<Scheduler> {
    let store = store::connect(&config.stores).await?;
    let gateway = Arc::new(HttpGateway::new(
        &config.gateway,
        &config.aws,
        config.schedule.call_timeout,
    )?);
    let channel = build_channel(&config.channel, config.schedule.call_timeout)?;

    let scheduler = Scheduler::from_config(
        config,
        Collaborators {
            store,
            organization: gateway.clone(),
            metrics: gateway,
            channel,
            clock: Arc::new(SystemClock),
        },
    )?;
    Ok(scheduler)
}

async fn run_loop(config: Config) -> anyhow::Result<()> {
    telemetry::init_metrics(&config.telemetry)?;
    let scheduler = build_scheduler(&config).await?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            trigger.cancel();
        }
    });

    scheduler.run(shutdown).await;
    Ok(())
}

async fn run_once(config: Config, format: OutputFormat) -> anyhow::Result<()> {
    let scheduler = build_scheduler(&config).await?;
    let report = scheduler.run_cycle().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report),
    }
    Ok(())
}

fn print_report(report: &CycleReport) {
    println!("Cycle {}", report.cycle_id);
    println!("  Started:        {}", report.started_at.to_rfc2822());
    println!("  Elapsed:        {} ms", report.elapsed_ms);
    println!(
        "  Accounts:       {} total, {} processed, {} failed",
        report.accounts_total,
        report.accounts_processed,
        report.failures.len()
    );
    println!(
        "  Groups:         {} total, {} completed, {} failed, {} abandoned",
        report.groups_total, report.groups_completed, report.groups_failed, report.groups_abandoned
    );
    println!("  Distributions:  {}", report.distributions_evaluated);
    println!(
        "  Alerts:         {} sent, {} suppressed, {} undelivered",
        report.alerts_dispatched, report.alerts_suppressed, report.alerts_failed
    );
    if report.deadline_exceeded {
        println!("  Deadline exceeded: unfinished groups were abandoned");
    }
    for failure in &report.failures {
        println!("  ! {}: {}", failure.account_id, failure.error);
    }
}

fn run_config(config: &Config, command: ConfigCommands, format: OutputFormat) -> anyhow::Result<()> {
    match command {
        ConfigCommands::Check => {
            // Config::load already rejected anything invalid
            println!("Configuration OK");
        }
        ConfigCommands::Show => {
            let shown = config.redacted();
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&shown)?),
                OutputFormat::Text => println!("{shown:#?}"),
            }
        }
    }
    Ok(())
}

fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "cdnguard", &mut io::stdout());
}
