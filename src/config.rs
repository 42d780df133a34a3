//! Configuration file support for the exchange tools.
//!
//! Settings are read from TOML. Contract addresses are resolved from the
//! environment first, then from the deployments recorded in the network
//! state, then from the fallback literals the front end ships with.

use crate::ethereum::parse_address;
use anyhow::{Context, Result};
use ethers::types::{Address, U256};
use ethers::utils::parse_ether;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the NFT contract.
pub const NFT_CONTRACT_ENV: &str = "NFT_CONTRACT_ADDRESS";
/// Environment variable naming the exchange contract.
pub const EXCHANGE_CONTRACT_ENV: &str = "ANONNFTEX_CONTRACT_ADDRESS";

/// Hardhat fallback literal the front end uses for the NFT contract. Only
/// consulted when neither the environment nor the network state names one.
pub const DEFAULT_NFT_ADDRESS: &str = "0x0165878a594ca255338adfa4d48449f69242eb8f";
/// Hardhat fallback literal the front end uses for the exchange. Local
/// deployments land elsewhere and are read from the network state.
pub const DEFAULT_EXCHANGE_ADDRESS: &str = "0x5fc8d32690cc91d4c39d9d3abcbd16989f875707";

const DEFAULT_STATE_FILE: &str = "network.json";
const DEFAULT_DENOMINATION_ETH: &str = "0.1";
const DEFAULT_GROUP: &str = "42";
const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
const DEFAULT_MAX_PROOF_FILE_SIZE: u64 = 1024 * 1024;
const DEFAULT_MAX_ZK_PROOF_SIZE: usize = 512 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub proof: ProofConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// JSON file holding the local network state.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Amount of every ETH deposit, in ether.
    #[serde(default = "default_denomination_eth")]
    pub denomination_eth: String,
    /// Base group id passed to the deploy step.
    #[serde(default = "default_group")]
    pub group: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub nft_address: Option<String>,
    #[serde(default)]
    pub exchange_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofConfig {
    #[serde(default = "default_max_proof_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_max_zk_proof_size")]
    pub max_zk_proof_size: usize,
    #[serde(default = "default_proof_output_file")]
    pub output_file: PathBuf,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            denomination_eth: default_denomination_eth(),
            group: default_group(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            nft_address: None,
            exchange_address: None,
        }
    }
}

impl Default for ProofConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_PROOF_FILE_SIZE,
            max_zk_proof_size: DEFAULT_MAX_ZK_PROOF_SIZE,
            output_file: default_proof_output_file(),
        }
    }
}

fn default_state_file() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_FILE)
}

fn default_denomination_eth() -> String {
    DEFAULT_DENOMINATION_ETH.to_string()
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_max_proof_file_size() -> u64 {
    DEFAULT_MAX_PROOF_FILE_SIZE
}

fn default_max_zk_proof_size() -> usize {
    DEFAULT_MAX_ZK_PROOF_SIZE
}

fn default_proof_output_file() -> PathBuf {
    PathBuf::from("proof.json")
}

impl ExchangeConfig {
    /// Deposit denomination in wei.
    pub fn denomination(&self) -> Result<U256> {
        let wei = parse_ether(self.denomination_eth.trim()).with_context(|| {
            format!("Invalid denomination '{}'", self.denomination_eth)
        })?;
        if wei.is_zero() {
            return Err(anyhow::anyhow!("Denomination must be greater than zero"));
        }
        Ok(wei)
    }
}

impl ClientConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn load_from_file_or_default(path: &PathBuf) -> Self {
        Self::load_from_file(path).unwrap_or_default()
    }

    pub fn save_to_file(&self, path: &PathBuf) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}

/// Resolves a contract address.
///
/// Order: the explicit value (command line, environment or config file), the
/// address recorded in the network state, then `fallback`.
pub fn resolve_address(
    explicit: Option<&str>,
    recorded: Option<Address>,
    fallback: &str,
) -> Result<Address> {
    if let Some(value) = explicit.filter(|v| !v.trim().is_empty()) {
        return parse_address(value);
    }
    if let Some(address) = recorded {
        return Ok(address);
    }
    parse_address(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.state_file, PathBuf::from(DEFAULT_STATE_FILE));
        assert_eq!(config.exchange.group, "42");
        assert_eq!(config.client.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.proof.max_file_size, DEFAULT_MAX_PROOF_FILE_SIZE);
        assert_eq!(config.exchange.denomination().unwrap(), U256::exp10(17));
    }

    #[test]
    fn test_serialize_deserialize_config() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.network.state_file, deserialized.network.state_file);
        assert_eq!(config.proof.output_file, deserialized.proof.output_file);
    }

    #[test]
    fn test_custom_config() {
        let config_toml = r#"
            [network]
            state_file = "state/dev.json"

            [exchange]
            denomination_eth = "0.5"
            group = "7"

            [client]
            poll_interval_ms = 250
        "#;

        let config: Config = toml::from_str(config_toml).unwrap();
        assert_eq!(config.network.state_file, PathBuf::from("state/dev.json"));
        assert_eq!(config.exchange.denomination().unwrap(), U256::exp10(17) * U256::from(5));
        assert_eq!(config.exchange.group, "7");
        assert_eq!(config.client.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.proof.max_zk_proof_size, DEFAULT_MAX_ZK_PROOF_SIZE);
    }

    #[test]
    fn test_invalid_denomination() {
        let exchange = ExchangeConfig {
            denomination_eth: "zero".to_string(),
            ..ExchangeConfig::default()
        };
        assert!(exchange.denomination().is_err());

        let exchange = ExchangeConfig {
            denomination_eth: "0".to_string(),
            ..ExchangeConfig::default()
        };
        assert!(exchange.denomination().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.client.poll_interval_ms = 1_000;
        config.save_to_file(&path).unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded.client.poll_interval_ms, 1_000);
        let missing = Config::load_from_file_or_default(&dir.path().join("absent.toml"));
        assert_eq!(missing.client.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
    }

    #[test]
    fn test_address_resolution_order() {
        let recorded = Address::from_low_u64_be(0x1234);
        let explicit = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e";

        let resolved = resolve_address(Some(explicit), Some(recorded), DEFAULT_NFT_ADDRESS).unwrap();
        assert_eq!(resolved, parse_address(explicit).unwrap());

        let resolved = resolve_address(Some("  "), Some(recorded), DEFAULT_NFT_ADDRESS).unwrap();
        assert_eq!(resolved, recorded);

        let resolved = resolve_address(None, None, DEFAULT_EXCHANGE_ADDRESS).unwrap();
        assert_eq!(resolved, parse_address(DEFAULT_EXCHANGE_ADDRESS).unwrap());

        assert!(resolve_address(Some("0x1234"), None, DEFAULT_NFT_ADDRESS).is_err());
    }

    #[test]
    fn test_fallbacks_are_not_local_deploy_addresses() {
        let nft = parse_address(DEFAULT_NFT_ADDRESS).unwrap();
        let exchange = parse_address(DEFAULT_EXCHANGE_ADDRESS).unwrap();
        assert_ne!(nft, exchange);

        let deployer = crate::ethereum::dev_address(0);
        for nonce in 0u64..4 {
            let deployed = ethers::utils::get_contract_address(deployer, nonce);
            assert_ne!(deployed, nft);
            assert_ne!(deployed, exchange);
        }

        let recorded = ethers::utils::get_contract_address(deployer, 1u64);
        let resolved = resolve_address(None, Some(recorded), DEFAULT_EXCHANGE_ADDRESS).unwrap();
        assert_eq!(resolved, recorded);
    }
}
