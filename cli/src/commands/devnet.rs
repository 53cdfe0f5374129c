//! Devnet Command - Run a development network
//!
//! Starts a simulated chain with the Erdstall contract, an enclave (local,
//! or remote via `--enclave-url`), the operator, and the client-facing RPC
//! server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use erdstall_contracts::SimulatedChain;
use erdstall_core::{Address, U256};
use erdstall_enclave::{Enclave, LocalEnclave};
use erdstall_operator::Operator;
use erdstall_rpc::{RemoteEnclave, RpcClientConfig, RpcServer};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::wait_for_shutdown;
use crate::config;
use crate::keystore;

/// Run chain, enclave and operator in one process
#[derive(Args)]
pub struct DevnetCommand {
    /// Network (local, testnet)
    #[arg(short, long, default_value = "local")]
    network: String,

    /// Client-facing RPC bind address
    #[arg(long)]
    listen: Option<String>,

    /// Use the enclave served at this URL instead of a local one
    #[arg(long, env = "ERDSTALL_ENCLAVE_URL")]
    enclave_url: Option<String>,

    /// Credit an account with on-chain funds (repeatable)
    #[arg(long = "fund", value_name = "ADDRESS")]
    fund: Vec<Address>,

    /// Amount credited to each funded account, in wei
    #[arg(long, default_value = "1000000000000000000000")]
    funds: U256,

    /// Block time override in milliseconds
    #[arg(long)]
    block_interval_ms: Option<u64>,
}

impl DevnetCommand {
    pub async fn execute(
        self,
        config_path: Option<PathBuf>,
        data_dir: Option<PathBuf>,
    ) -> anyhow::Result<()> {
        let (mut config, data_dir) =
            config::resolve(config_path.as_deref(), data_dir.as_deref(), &self.network)?;
        if let Some(listen) = self.listen {
            config.rpc.operator_addr = listen;
        }
        if let Some(interval) = self.block_interval_ms {
            config.network.block_interval_ms = interval;
        }
        config.validate()?;

        let enclave: Arc<dyn Enclave> = match self.enclave_url {
            Some(url) => {
                let client = RpcClientConfig {
                    url,
                    request_timeout: Duration::from_millis(config.rpc.request_timeout_ms),
                    ..Default::default()
                };
                Arc::new(RemoteEnclave::connect(client).await?)
            }
            None => Arc::new(LocalEnclave::with_signer(keystore::load_or_create(&data_dir)?)),
        };
        let (tee, _attestation) = enclave.init().await?;

        let chain = SimulatedChain::deploy(tee, config.deployment())?;
        for account in &self.fund {
            chain.fund(*account, self.funds);
            info!(%account, funds = %self.funds, "Funded account");
        }
        let miner = CancellationToken::new();
        let mining = chain.spawn_miner(config.block_interval(), miner.clone());

        let operator = Arc::new(
            Operator::start(config.operator_config(), enclave, chain.clone()).await?,
        );
        let server = RpcServer::start_operator(&config.operator_rpc()?, operator.clone()).await?;

        let params = chain.params();
        println!();
        println!("Erdstall devnet is running.");
        println!();
        println!("Contract:        {}", params.contract);
        println!("Enclave address: {tee}");
        println!(
            "Phases:          {} blocks, {} block response window, {} confirmations",
            params.phase_duration, params.response_duration, params.pow_depth
        );
        println!("Block time:      {:?}", config.block_interval());
        println!("RPC:             {}", server.ws_url());
        println!();
        println!("Press Ctrl+C to stop");

        tokio::select! {
            _ = wait_for_shutdown() => {},
            _ = operator.stopped() => {
                anyhow::bail!("Operator stopped unexpectedly, see the log");
            }
        }

        info!("Shutting down...");
        server.stop()?;
        server.stopped().await;
        miner.cancel();
        let _ = mining.await;
        operator.shutdown().await;
        info!(head = chain.head(), "Devnet stopped");
        Ok(())
    }
}
