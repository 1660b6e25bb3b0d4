//! Flowrelay CLI Binary
//!
//! Runs a scripted workflow end to end through the service, or prints the
//! effective configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flowrelay::config::{ConfigLoader, ServiceConfig};
use flowrelay::logging::{init_logging, LoggingConfig};
use flowrelay::orchestrator::{ScriptStep, ScriptedEngine};
use flowrelay::sessions::UserContext;
use flowrelay::Service;
use tracing::info;

#[derive(Parser)]
#[command(name = "flowrelay")]
#[command(about = "Session authority and event routing for long-running workflows")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Project root containing an optional config/ directory
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Load configuration from this file only
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable logging
    #[arg(long, short, global = true, default_value = "false")]
    verbose: bool,

    /// Log level override
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format override (text or json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a scripted workflow and print every outbound message as a JSON line
    Demo {
        /// Units to parse before generating
        #[arg(long, default_value = "5")]
        units: u64,

        /// Cancel the run after this many outbound messages
        #[arg(long)]
        cancel_after: Option<usize>,

        /// Make the run fail after generation
        #[arg(long)]
        fail: bool,

        #[arg(long, default_value = "demo")]
        workflow: String,

        #[arg(long, default_value = "demo-user")]
        user: String,

        /// Simulated work per processing unit
        #[arg(long, default_value = "20")]
        unit_delay_ms: u64,
    },
    /// Print the effective configuration as TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    init_logging(Some(&build_logging_config(&cli, &config)))
        .context("Failed to initialize logging")?;
    info!("flowrelay starting");

    match cli.command {
        Command::Config => {
            println!("{}", config.to_toml()?);
            Ok(())
        }
        Command::Demo {
            units,
            cancel_after,
            fail,
            ref workflow,
            ref user,
            unit_delay_ms,
        } => run_demo(config, units, cancel_after, fail, workflow, user, unit_delay_ms),
    }
}

fn load_config(cli: &Cli) -> Result<ServiceConfig> {
    match cli.config {
        Some(ref path) => ConfigLoader::load_from_file(path)
            .with_context(|| format!("Failed to load {}", path.display())),
        None => ConfigLoader::load(&cli.root)
            .with_context(|| format!("Failed to load configuration under {}", cli.root.display())),
    }
}

/// Logging stays off unless --verbose; CLI flags beat the config file.
fn build_logging_config(cli: &Cli, config: &ServiceConfig) -> LoggingConfig {
    let mut logging = config.logging.clone();
    if !cli.verbose {
        logging.level = "off".to_string();
        return logging;
    }
    if let Some(ref level) = cli.log_level {
        logging.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        logging.format = format.clone();
    }
    logging
}

fn run_demo(
    config: ServiceConfig,
    units: u64,
    cancel_after: Option<usize>,
    fail: bool,
    workflow: &str,
    user: &str,
    unit_delay_ms: u64,
) -> Result<()> {
    let mut steps = ScriptedEngine::demo(units).steps().to_vec();
    if fail {
        steps.push(ScriptStep::Fail("failure requested by --fail".to_string()));
    }
    let engine = ScriptedEngine::new(steps).with_unit_delay(Duration::from_millis(unit_delay_ms));

    let service = Service::builder(config, Arc::new(engine))
        .install_global()
        .start()
        .context("Failed to start service")?;
    let orchestrator = service.orchestrator().clone();
    let user = UserContext::new(user);

    // Open the connection before the run starts so no update is missed.
    let lease = service.authority().get_or_create(workflow, &user, false)?;
    let mut connection = orchestrator.connect(lease.session.session_id())?;
    let ticket = orchestrator.start_run(
        workflow,
        &user,
        serde_json::json!({ "units": units }),
        false,
    )?;

    let mut received = 0usize;
    while let Some(message) = connection.blocking_recv() {
        println!("{}", serde_json::to_string(&message)?);
        received += 1;
        if cancel_after == Some(received) {
            orchestrator.cancel(&ticket.session_id)?;
        }
    }

    service.shutdown(Duration::from_secs(2));
    Ok(())
}
