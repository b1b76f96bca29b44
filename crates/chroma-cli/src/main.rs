//! Chroma CLI - command-line interface for the chroma audio server.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chroma")]
#[command(author, version, about = "Chroma real-time audio server CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the audio pipeline and telemetry server
    Serve(commands::serve::ServeArgs),

    /// List audio devices
    Devices(commands::devices::DevicesArgs),

    /// Measure round-trip latency through the loopback
    Calibrate(commands::calibrate::CalibrateArgs),

    /// Subscribe to a running server and print live metrics
    Monitor(commands::monitor::MonitorArgs),
}

fn main() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => commands::serve::run(args),
        Commands::Devices(args) => commands::devices::run(args),
        Commands::Calibrate(args) => commands::calibrate::run(args),
        Commands::Monitor(args) => commands::monitor::run(args),
    }
}
