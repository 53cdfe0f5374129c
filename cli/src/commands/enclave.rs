//! Enclave Command - Serve a local enclave over JSON-RPC

use std::path::PathBuf;

use clap::Args;
use erdstall_enclave::LocalEnclave;
use erdstall_rpc::RpcServer;
use tracing::info;

use super::wait_for_shutdown;
use crate::config;
use crate::keystore;

/// Serve the enclave API for a remote operator
#[derive(Args)]
pub struct EnclaveCommand {
    /// Network (local, testnet)
    #[arg(short, long, default_value = "local")]
    network: String,

    /// Enclave API bind address
    #[arg(long)]
    listen: Option<String>,
}

impl EnclaveCommand {
    pub async fn execute(
        self,
        config_path: Option<PathBuf>,
        data_dir: Option<PathBuf>,
    ) -> anyhow::Result<()> {
        let (mut config, data_dir) =
            config::resolve(config_path.as_deref(), data_dir.as_deref(), &self.network)?;
        if let Some(listen) = self.listen {
            config.rpc.enclave_addr = listen;
        }
        config.validate()?;

        let signer = keystore::load(&data_dir)?;
        let tee = signer.address();
        let enclave = LocalEnclave::with_signer(signer);
        let server = RpcServer::start_enclave(&config.enclave_rpc()?, enclave).await?;

        info!(%tee, addr = %server.local_addr(), "Enclave serving");
        println!();
        println!("Erdstall enclave is running.");
        println!();
        println!("Enclave address: {tee}");
        println!("RPC:             {}", server.ws_url());
        println!();
        println!("Press Ctrl+C to stop");

        wait_for_shutdown().await;

        info!("Shutting down...");
        server.stop()?;
        server.stopped().await;
        info!("Enclave stopped");
        Ok(())
    }
}
