//! CLI entry point for the local simulation server.

use clap::Parser;
use peltier_control::simulator::{self, Simulator, SimulatorConfig};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Simulation server CLI
#[derive(Parser, Debug)]
#[command(name = "sim-harness", about = "Local XML-RPC stand-in for the thermoelectric experiment.")]
pub struct Cli {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8999")]
    bind: String,

    /// Accepted experiment token (repeatable)
    #[arg(long = "token", default_value = "local_server_token")]
    tokens: Vec<String>,

    /// Ambient temperature in °C
    #[arg(long, default_value_t = 25.0)]
    ambient: f64,

    /// Peak-to-peak thermocouple noise in mV
    #[arg(long, default_value_t = 0.0)]
    noise: f64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();
    let config = SimulatorConfig {
        tokens: cli.tokens,
        ambient_c: cli.ambient,
        noise_mv: cli.noise,
        ..SimulatorConfig::default()
    };
    tracing::info!(
        "Simulating plate at {} °C ambient, {} token(s) accepted",
        config.ambient_c,
        config.tokens.len()
    );

    let listener = tokio::net::TcpListener::bind(&cli.bind).await?;
    let simulator = Arc::new(Mutex::new(Simulator::new(config)));
    simulator::serve(listener, simulator).await?;
    Ok(())
}
