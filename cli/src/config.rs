//! Erdstall Configuration
//!
//! Handles loading and saving the TOML configuration shared by the enclave
//! server and the development network.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use erdstall_contracts::Deployment;
use erdstall_core::{Address, Parameters};
use erdstall_operator::OperatorConfig;
use erdstall_rpc::{RpcConfig, DEFAULT_RPC_PORT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Full configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErdstallConfig {
    /// Deployment and block timing
    #[serde(default)]
    pub network: NetworkSettings,

    /// RPC settings
    #[serde(default)]
    pub rpc: RpcSettings,

    /// Operator settings
    #[serde(default)]
    pub operator: OperatorSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl ErdstallConfig {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Create configuration for a specific network
    pub fn for_network(network: &str) -> Self {
        match network {
            "testnet" => Self::testnet(),
            _ => Self::local(),
        }
    }

    /// Local development configuration: short phases, fast blocks
    pub fn local() -> Self {
        Self {
            network: NetworkSettings {
                name: "local".to_string(),
                phase_duration: 10,
                response_duration: 3,
                pow_depth: 1,
                block_interval_ms: 1_000,
            },
            ..Default::default()
        }
    }

    /// Testnet configuration: servers reachable from other hosts
    pub fn testnet() -> Self {
        Self {
            network: NetworkSettings {
                name: "testnet".to_string(),
                ..Default::default()
            },
            rpc: RpcSettings {
                operator_addr: format!("0.0.0.0:{DEFAULT_RPC_PORT}"),
                enclave_addr: format!("0.0.0.0:{}", DEFAULT_RPC_PORT + 1),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.parameters(Address::ZERO, Address::ZERO)
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.network.block_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "Block interval must be greater than 0".to_string(),
            ));
        }

        let timeout = self.rpc.request_timeout_ms;
        if self.rpc.proof_batch_wait_ms >= timeout {
            return Err(ConfigError::Invalid(
                "Proof batch wait must be shorter than the request timeout".to_string(),
            ));
        }
        if self.operator.deposit_proof_wait_ms >= timeout {
            return Err(ConfigError::Invalid(
                "Deposit proof wait must be shorter than the request timeout".to_string(),
            ));
        }

        self.rpc.operator_socket()?;
        self.rpc.enclave_socket()?;
        Ok(())
    }

    /// Parameters of a deployment with these durations
    pub fn parameters(&self, tee: Address, contract: Address) -> Parameters {
        Parameters {
            tee,
            phase_duration: self.network.phase_duration,
            response_duration: self.network.response_duration,
            pow_depth: self.network.pow_depth,
            init_block: 1,
            contract,
        }
    }

    pub fn deployment(&self) -> Deployment {
        Deployment {
            phase_duration: self.network.phase_duration,
            response_duration: self.network.response_duration,
            pow_depth: self.network.pow_depth,
        }
    }

    pub fn block_interval(&self) -> Duration {
        Duration::from_millis(self.network.block_interval_ms)
    }

    pub fn operator_config(&self) -> OperatorConfig {
        OperatorConfig {
            deposit_proof_wait: Duration::from_millis(self.operator.deposit_proof_wait_ms),
            proof_retention: self.operator.proof_retention,
            respond_to_challenges: self.operator.respond_to_challenges,
        }
    }

    /// Server settings of the client-facing API
    pub fn operator_rpc(&self) -> Result<RpcConfig, ConfigError> {
        Ok(RpcConfig {
            addr: self.rpc.operator_socket()?,
            max_connections: self.rpc.max_connections,
            proof_batch_wait: Duration::from_millis(self.rpc.proof_batch_wait_ms),
            ..RpcConfig::default()
        })
    }

    /// Server settings of the enclave API
    pub fn enclave_rpc(&self) -> Result<RpcConfig, ConfigError> {
        Ok(RpcConfig {
            addr: self.rpc.enclave_socket()?,
            max_connections: self.rpc.max_connections,
            proof_batch_wait: Duration::from_millis(self.rpc.proof_batch_wait_ms),
            ..RpcConfig::default()
        })
    }
}

/// Deployment and block timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Network name (local, testnet)
    pub name: String,

    /// Blocks per phase
    pub phase_duration: u64,

    /// Blocks at the start of each phase reserved for operator responses
    pub response_duration: u64,

    /// Confirmations before a block counts as final
    pub pow_depth: u64,

    /// Block time of the development chain
    pub block_interval_ms: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            name: "local".to_string(),
            phase_duration: 20,
            response_duration: 5,
            pow_depth: 1,
            block_interval_ms: 2_000,
        }
    }
}

/// RPC settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcSettings {
    /// Client-facing operator API bind address
    pub operator_addr: String,

    /// Enclave API bind address
    pub enclave_addr: String,

    /// Maximum concurrent connections per server
    pub max_connections: u32,

    /// Request deadline clients use, retries included
    pub request_timeout_ms: u64,

    /// How long a proof-batch request waits before answering null
    pub proof_batch_wait_ms: u64,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            operator_addr: format!("127.0.0.1:{DEFAULT_RPC_PORT}"),
            enclave_addr: format!("127.0.0.1:{}", DEFAULT_RPC_PORT + 1),
            max_connections: 100,
            request_timeout_ms: 20_000,
            proof_batch_wait_ms: 10_000,
        }
    }
}

fn parse_socket(name: &str, addr: &str) -> Result<SocketAddr, ConfigError> {
    addr.parse()
        .map_err(|e| ConfigError::Invalid(format!("{name} address {addr:?}: {e}")))
}

impl RpcSettings {
    pub fn operator_socket(&self) -> Result<SocketAddr, ConfigError> {
        parse_socket("Operator", &self.operator_addr)
    }

    pub fn enclave_socket(&self) -> Result<SocketAddr, ConfigError> {
        parse_socket("Enclave", &self.enclave_addr)
    }
}

/// Operator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorSettings {
    /// How long a deposit proof request waits for the proof
    pub deposit_proof_wait_ms: u64,

    /// Epochs of proofs kept for lookups by epoch
    pub proof_retention: u64,

    /// Answer challenges on chain
    pub respond_to_challenges: bool,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        let defaults = OperatorConfig::default();
        Self {
            deposit_proof_wait_ms: defaults.deposit_proof_wait.as_millis() as u64,
            proof_retention: defaults.proof_retention,
            respond_to_challenges: defaults.respond_to_challenges,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level
    pub level: String,

    /// Output format (text, json)
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Get default data directory
pub fn default_data_dir(network: &str) -> PathBuf {
    let base = directories::ProjectDirs::from("network", "erdstall", "erdstall")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".erdstall"));

    base.join(network)
}

/// Get default config file path
pub fn default_config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.toml")
}

/// Resolve the configuration: an explicit file, else the data directory's
/// file, else the network preset
pub fn resolve(
    config_path: Option<&Path>,
    data_dir: Option<&Path>,
    network: &str,
) -> Result<(ErdstallConfig, PathBuf), ConfigError> {
    let data_dir = data_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_data_dir(network));
    if let Some(path) = config_path {
        return Ok((ErdstallConfig::load(path)?, data_dir));
    }

    let default_path = default_config_path(&data_dir);
    let config = if default_path.exists() {
        ErdstallConfig::load(&default_path)?
    } else {
        ErdstallConfig::for_network(network)
    };
    Ok((config, data_dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = ErdstallConfig::default();
        assert_eq!(config.network.name, "local");
        assert_eq!(config.network.phase_duration, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_local_config() {
        let config = ErdstallConfig::local();
        assert_eq!(config.network.phase_duration, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_testnet_config() {
        let config = ErdstallConfig::testnet();
        assert_eq!(config.network.name, "testnet");
        assert!(config.rpc.operator_socket().unwrap().ip().is_unspecified());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_load_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = ErdstallConfig::local();
        config.save(&path).unwrap();

        let loaded = ErdstallConfig::load(&path).unwrap();
        assert_eq!(loaded.network.phase_duration, 10);
        assert_eq!(loaded.rpc.operator_addr, config.rpc.operator_addr);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config: ErdstallConfig = toml::from_str(
            r#"
            [network]
            name = "local"
            phase_duration = 30
            response_duration = 5
            pow_depth = 2
            block_interval_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.network.phase_duration, 30);
        assert_eq!(config.rpc.request_timeout_ms, 20_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_pow_depth() {
        let config = ErdstallConfig {
            network: NetworkSettings {
                pow_depth: 5, // must stay below the response window
                response_duration: 5,
                ..Default::default()
            },
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_waits() {
        let config = ErdstallConfig {
            rpc: RpcSettings {
                proof_batch_wait_ms: 30_000,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ErdstallConfig {
            rpc: RpcSettings {
                operator_addr: "not an address".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_resolve_prefers_data_dir_file() {
        let dir = tempdir().unwrap();
        let mut stored = ErdstallConfig::local();
        stored.network.phase_duration = 40;
        stored.save(&default_config_path(dir.path())).unwrap();

        let (config, data_dir) = resolve(None, Some(dir.path()), "testnet").unwrap();
        assert_eq!(config.network.phase_duration, 40);
        assert_eq!(data_dir, dir.path());

        let empty = tempdir().unwrap();
        let (config, _) = resolve(None, Some(empty.path()), "testnet").unwrap();
        assert_eq!(config.network.name, "testnet");
    }
}
