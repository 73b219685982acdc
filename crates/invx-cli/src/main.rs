//! `invx`: turn invoice PDFs and scans into structured JSON or CSV.

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{batch, config, doctor, inspect, process};

/// Environment variable holding a tracing filter; overrides `-v`.
const LOG_ENV: &str = "INVX_LOG";

/// Invoice extraction - turn PDFs and scans into structured invoice data
#[derive(Parser)]
#[command(name = "invx")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// More log output on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Settings file (default: <config dir>/invx/config.json)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract one invoice
    Process(process::ProcessArgs),

    /// Extract every invoice matching a glob
    Batch(batch::BatchArgs),

    /// Show quality metrics and the preprocessing decision for a page
    Inspect(inspect::InspectArgs),

    /// Check OCR, rasterizer and model prerequisites
    Doctor(doctor::DoctorArgs),

    /// Read and edit the settings file
    Config(config::ConfigArgs),
}

impl Cli {
    /// Logs from this binary and `invx_core` only; HTTP and PDF crates stay quiet.
    fn log_filter(&self) -> EnvFilter {
        if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
            return filter;
        }
        let level = match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        EnvFilter::new(format!("warn,invx={level},invx_core={level}"))
    }
}

impl Commands {
    async fn run(self, config_path: Option<&str>) -> anyhow::Result<()> {
        match self {
            Commands::Process(args) => process::run(args, config_path).await,
            Commands::Batch(args) => batch::run(args, config_path).await,
            Commands::Inspect(args) => inspect::run(args, config_path).await,
            Commands::Doctor(args) => doctor::run(args, config_path).await,
            Commands::Config(args) => config::run(args, config_path).await,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries results; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(cli.log_filter())
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install logger: {}", e))?;

    cli.command.run(cli.config.as_deref()).await
}
