// src/main.rs - Peltier experiment host
use clap::{Parser, Subcommand};
use peltier_control::{Config, ExperimentController, RemoteFault, XmlRpcClient, load_config};
use std::process::ExitCode;
use tokio::sync::broadcast;

/// Remote controller for the thermoelectric experiment
#[derive(Parser, Debug)]
#[command(name = "peltier-host", about = "Drive a remote Peltier/thermocouple experiment over XML-RPC.")]
struct Cli {
    /// Path to a TOML config file (built-in local server defaults when omitted)
    #[arg(short, long)]
    config: Option<String>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the experiment, read the thermocouple once, and exit
    Probe,
    /// Run the proportional control loop until Ctrl-C
    Run {
        /// Stop after this many iterations
        #[arg(long)]
        max_ticks: Option<u64>,
        /// Override the poll interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the readings.
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return ExitCode::from(1);
        }
    };

    tracing::info!("Experiment server: {}", config.server.uri);
    let client = match XmlRpcClient::initialize(&config.server) {
        Ok(client) => client,
        Err(fault) => return fault_exit(&fault),
    };

    let result = match cli.command {
        Commands::Probe => probe(client, &config).await,
        Commands::Run { .. } => run(client, &config).await,
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(fault) => fault_exit(&fault),
    }
}

fn build_config(cli: &Cli) -> Result<Config, peltier_control::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path);
            load_config(path)?
        }
        None => Config::default(),
    };
    if let Commands::Run { max_ticks, interval_ms } = &cli.command {
        if max_ticks.is_some() {
            config.control.max_ticks = *max_ticks;
        }
        if let Some(interval_ms) = interval_ms {
            config.control.poll_interval_ms = *interval_ms;
        }
    }
    config.validate()?;
    Ok(config)
}

/// Init -> StartExperiment -> ReadOnce -> Teardown.
async fn probe(client: XmlRpcClient, config: &Config) -> Result<(), RemoteFault> {
    let mut controller = ExperimentController::new(client, &config.control);
    let signal = controller.probe().await?;
    println!("Thermocouple signal: {:.6} mV", signal);
    controller.into_transport().teardown();
    Ok(())
}

async fn run(client: XmlRpcClient, config: &Config) -> Result<(), RemoteFault> {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Ctrl-C received, stopping control loop");
                let _ = shutdown_tx.send(());
            }
            Err(e) => {
                tracing::warn!("Cannot listen for Ctrl-C: {}", e);
                // Keep the sender alive so the loop is not mistaken for shut down.
                std::future::pending::<()>().await;
                drop(shutdown_tx);
            }
        }
    });

    let mut controller = ExperimentController::new(client, &config.control);
    let summary = controller.run(shutdown_rx, |report| println!("{}", report)).await?;
    tracing::info!(
        "Control loop finished after {} ticks ({:?}), final current {:.4} A",
        summary.ticks,
        summary.reason,
        summary.final_current
    );
    controller.into_transport().teardown();
    Ok(())
}

fn fault_exit(fault: &RemoteFault) -> ExitCode {
    eprintln!("ERROR: {} ({})", fault.message, fault.code);
    ExitCode::from(1)
}
