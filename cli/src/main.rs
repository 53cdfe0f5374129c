//! Erdstall CLI
//!
//! Command-line interface for running an Erdstall enclave and a development
//! network.
//!
//! # Usage
//!
//! ```bash
//! # Create a configuration and an enclave key
//! erdstall init --network local
//!
//! # Run chain, enclave and operator in one process
//! erdstall devnet --fund 0x70997970C51812dc3A010C7d01b50e0d17dc79C8
//!
//! # Serve the enclave on its own, then point a devnet at it
//! erdstall enclave --listen 127.0.0.1:8546
//! erdstall devnet --enclave-url ws://127.0.0.1:8546
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;
mod keystore;
mod logging;

use commands::{DevnetCommand, EnclaveCommand, InitCommand};

/// Erdstall rollup
#[derive(Parser)]
#[command(name = "erdstall")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Enclave-backed rollup with an on-chain dispute protocol", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "ERDSTALL_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory
    #[arg(short, long, global = true, env = "ERDSTALL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a configuration and an enclave key
    Init(InitCommand),

    /// Serve a local enclave over JSON-RPC
    Enclave(EnclaveCommand),

    /// Run a development network
    Devnet(DevnetCommand),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level, cli.json_logs)?;

    match cli.command {
        Commands::Init(cmd) => cmd.execute(cli.data_dir).await,
        Commands::Enclave(cmd) => cmd.execute(cli.config, cli.data_dir).await,
        Commands::Devnet(cmd) => cmd.execute(cli.config, cli.data_dir).await,
        Commands::Version => {
            println!("erdstall {}", env!("CARGO_PKG_VERSION"));
            println!("RPC: {}", erdstall_rpc::RPC_VERSION);
            Ok(())
        }
    }
}
