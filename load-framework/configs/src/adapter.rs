use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use load_framework_env as lf_env;
use num_bigint::BigUint;
use serde::Deserialize;
use serde_with::{DisplayFromStr, DurationMilliSeconds, DurationSeconds, serde_as};

use crate::{ConfigError, ProvisionConfig, timeouts};

pub const DEFAULT_CALL_GAS_LIMIT: u64 = 60_000;
pub const DEFAULT_TRANSFER_GAS_LIMIT: u64 = 22_000;
pub const DEFAULT_CONFIRMATION_BLOCKS: u64 = 1;

/// Top-level adapter configuration, usually read from a YAML file.
#[derive(Clone, Debug, Deserialize)]
pub struct AdapterConfig {
    pub rpc: RpcConfig,
    #[serde(default)]
    pub gas: GasConfig,
    pub workers: KeyfileConfig,
    #[serde(default)]
    pub donor: Option<KeyfileConfig>,
    #[serde(default)]
    pub registry: Option<RegistryConfig>,
    #[serde(default)]
    pub contracts: BTreeMap<String, ContractConfig>,
    #[serde(default)]
    pub provision: Option<ProvisionConfig>,
}

#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct RpcConfig {
    pub url: String,
    /// Blocks that must sit on top of (and including) the receipt's block
    /// before a transaction counts as confirmed.
    #[serde(default = "default_confirmation_blocks")]
    pub confirmation_blocks: u64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "timeouts::receipt_poll_interval")]
    pub poll_interval: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "timeouts::rpc_request_timeout")]
    pub request_timeout: Duration,
}

#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct GasConfig {
    #[serde(default = "default_call_gas_limit")]
    pub call_gas_limit: u64,
    #[serde(default = "default_transfer_gas_limit")]
    pub transfer_gas_limit: u64,
    /// Fixed gas price in the smallest unit; queried from the node when unset.
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub gas_price: Option<BigUint>,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            call_gas_limit: DEFAULT_CALL_GAS_LIMIT,
            transfer_gas_limit: DEFAULT_TRANSFER_GAS_LIMIT,
            gas_price: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct KeyfileConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub passphrase: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RegistryConfig {
    pub address: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ContractConfig {
    /// Path to the contract artifact (ABI and optional bytecode).
    pub path: PathBuf,
    /// Deployed address; resolved through the registry when absent.
    #[serde(default)]
    pub address: Option<String>,
    /// Deploy even when an address is already configured or registered.
    #[serde(default)]
    pub force_deploy: bool,
}

const fn default_confirmation_blocks() -> u64 {
    DEFAULT_CONFIRMATION_BLOCKS
}

const fn default_call_gas_limit() -> u64 {
    DEFAULT_CALL_GAS_LIMIT
}

const fn default_transfer_gas_limit() -> u64 {
    DEFAULT_TRANSFER_GAS_LIMIT
}

impl AdapterConfig {
    pub fn load_from_file(file_path: &Path) -> Result<Self, ConfigError> {
        let config_content = fs::read_to_string(file_path).map_err(|source| ConfigError::Read {
            path: file_path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml_str(&config_content)?;
        config.resolve_relative_paths(file_path.parent().unwrap_or_else(|| Path::new(".")));
        Ok(config)
    }

    /// Parses and validates a YAML document. `LOADGEN_RPC_URL` overrides the
    /// configured endpoint.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yaml::from_str(content)?;
        if let Some(url) = lf_env::loadgen_rpc_url() {
            config.rpc.url = url;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc.url.trim().is_empty() {
            return Err(ConfigError::Missing("rpc.url"));
        }
        if self.rpc.confirmation_blocks == 0 {
            return Err(ConfigError::invalid(
                "rpc.confirmation_blocks",
                "must be at least 1",
            ));
        }
        if self.gas.call_gas_limit == 0 {
            return Err(ConfigError::invalid("gas.call_gas_limit", "must be non-zero"));
        }
        if self.gas.transfer_gas_limit == 0 {
            return Err(ConfigError::invalid(
                "gas.transfer_gas_limit",
                "must be non-zero",
            ));
        }
        if let Some(provision) = &self.provision {
            provision.validate()?;
        }
        Ok(())
    }

    pub fn worker_passphrase(&self) -> Result<String, ConfigError> {
        self.workers
            .passphrase
            .clone()
            .or_else(lf_env::loadgen_worker_passphrase)
            .ok_or(ConfigError::Missing("workers.passphrase"))
    }

    pub fn donor(&self) -> Result<&KeyfileConfig, ConfigError> {
        self.donor.as_ref().ok_or(ConfigError::Missing("donor"))
    }

    pub fn donor_passphrase(&self) -> Result<String, ConfigError> {
        self.donor()?
            .passphrase
            .clone()
            .or_else(lf_env::loadgen_donor_passphrase)
            .ok_or(ConfigError::Missing("donor.passphrase"))
    }

    pub fn provision(&self) -> Result<&ProvisionConfig, ConfigError> {
        self.provision
            .as_ref()
            .ok_or(ConfigError::Missing("provision"))
    }

    fn resolve_relative_paths(&mut self, base: &Path) {
        let rebase = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        rebase(&mut self.workers.path);
        if let Some(donor) = &mut self.donor {
            rebase(&mut donor.path);
        }
        for contract in self.contracts.values_mut() {
            rebase(&mut contract.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
rpc:
  url: http://localhost:8545
workers:
  path: keys/workers.json
  passphrase: secret
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = AdapterConfig::from_yaml_str(MINIMAL).unwrap();

        assert_eq!(config.rpc.confirmation_blocks, DEFAULT_CONFIRMATION_BLOCKS);
        assert_eq!(config.gas.call_gas_limit, DEFAULT_CALL_GAS_LIMIT);
        assert_eq!(config.gas.transfer_gas_limit, DEFAULT_TRANSFER_GAS_LIMIT);
        assert!(config.gas.gas_price.is_none());
        assert!(config.contracts.is_empty());
        assert_eq!(config.worker_passphrase().unwrap(), "secret");
    }

    #[test]
    fn parses_contracts_gas_price_and_provisioning() {
        let yaml = r#"
rpc:
  url: http://localhost:8545
  confirmation_blocks: 2
  poll_interval: 50
gas:
  gas_price: "20000000000"
workers:
  path: keys/workers.json
donor:
  path: keys/donor.json
  passphrase: donor
contracts:
  simple:
    path: contracts/simple.json
    address: "0xabc"
  token:
    path: contracts/token.json
    force_deploy: true
provision:
  account_count: 500
  min_balance: "1000000000000000"
  parallelism: 5
"#;
        let config = AdapterConfig::from_yaml_str(yaml).unwrap();

        assert_eq!(config.rpc.poll_interval, Duration::from_millis(50));
        assert_eq!(
            config.gas.gas_price,
            Some(BigUint::from(20_000_000_000u64))
        );
        assert_eq!(
            config.contracts["simple"].address.as_deref(),
            Some("0xabc")
        );
        assert!(!config.contracts["simple"].force_deploy);
        assert!(config.contracts["token"].force_deploy);
        let params = config.provision().unwrap().validated().unwrap();
        assert_eq!(params.account_count.get(), 500);
        assert_eq!(params.parallelism.get(), 5);
    }

    #[test]
    fn rejects_zero_confirmation_blocks() {
        let yaml = format!("{MINIMAL}\n");
        let yaml = yaml.replace(
            "url: http://localhost:8545",
            "url: http://localhost:8545\n  confirmation_blocks: 0",
        );

        let err = AdapterConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "rpc.confirmation_blocks",
                ..
            }
        ));
    }

    #[test]
    fn missing_donor_is_reported() {
        let config = AdapterConfig::from_yaml_str(MINIMAL).unwrap();

        assert!(matches!(config.donor(), Err(ConfigError::Missing("donor"))));
        assert!(matches!(
            config.provision(),
            Err(ConfigError::Missing("provision"))
        ));
    }
}
