//! Init Command - Initialize a data directory

use std::fs;
use std::path::PathBuf;

use clap::Args;
use tracing::info;

use crate::config::{default_config_path, default_data_dir, ErdstallConfig};
use crate::keystore;

/// Write a configuration and a fresh enclave key
#[derive(Args)]
pub struct InitCommand {
    /// Network to initialize for (local, testnet)
    #[arg(short, long, default_value = "local")]
    network: String,

    /// Force overwrite existing configuration and key
    #[arg(short, long)]
    force: bool,
}

impl InitCommand {
    pub async fn execute(self, data_dir: Option<PathBuf>) -> anyhow::Result<()> {
        let data_dir = data_dir.unwrap_or_else(|| default_data_dir(&self.network));
        let config_path = default_config_path(&data_dir);

        info!(network = %self.network, data_dir = %data_dir.display(), "Initializing");

        if config_path.exists() && !self.force {
            anyhow::bail!(
                "Already initialized at {}. Use --force to overwrite.",
                data_dir.display()
            );
        }

        fs::create_dir_all(&data_dir)?;
        let config = ErdstallConfig::for_network(&self.network);
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Configuration saved");

        let signer = keystore::create(&data_dir, self.force)?;
        info!(tee = %signer.address(), "Enclave key created");

        println!();
        println!("Erdstall initialized.");
        println!();
        println!("Configuration:  {}", config_path.display());
        println!("Enclave key:    {}", keystore::key_path(&data_dir).display());
        println!("Enclave address: {}", signer.address());
        println!();
        println!("To run a development network:");
        println!("  erdstall devnet --data-dir {}", data_dir.display());
        println!();
        println!("To serve the enclave on its own:");
        println!("  erdstall enclave --data-dir {}", data_dir.display());

        Ok(())
    }
}
