use std::{collections::BTreeMap, fs, path::Path, sync::Arc, time::Duration};

use load_framework_config::{AdapterConfig, ContractConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::{
    accounts::Account,
    chain::{Address, CallRequest, ChainClient, ChainError},
    submitter::{SubmissionError, TransactionSubmitter},
};

const REGISTRY_LOOKUP: &str = "lookup";
const REGISTRY_BIND: &str = "bind";
const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("failed to load artifact {path}: {reason}")]
    Artifact { path: String, reason: String },
    #[error("unknown contract `{0}`")]
    UnknownContract(String),
    #[error("contract `{contract}` has no function `{function}`")]
    UnknownFunction { contract: String, function: String },
    #[error("`{contract}.{function}` takes {expected} arguments, got {got}")]
    Arity {
        contract: String,
        function: String,
        expected: usize,
        got: usize,
    },
    #[error("contract `{0}` has no configured address and no registry entry")]
    Unresolved(String),
    #[error("registry lookup for `{contract}` failed: {source}")]
    Lookup {
        contract: String,
        #[source]
        source: ChainError,
    },
    #[error("failed to encode call data: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("artifact of `{0}` carries no bytecode")]
    MissingBytecode(String),
    #[error("bytecode of `{contract}` is not hex: {reason}")]
    Bytecode { contract: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("deploying `{contract}` failed: {source}")]
    Deploy {
        contract: String,
        #[source]
        source: SubmissionError,
    },
    #[error("binding `{contract}` in the registry failed: {source}")]
    Bind {
        contract: String,
        #[source]
        source: SubmissionError,
    },
    #[error("deployment of `{0}` confirmed without a contract address")]
    NoAddress(String),
}

/// What [`ContractRegistry::install`] did for one configured contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Installed {
    pub id: String,
    pub address: Address,
    /// False when an existing address was kept.
    pub deployed: bool,
}

/// Compiled contract description as emitted by the build tooling.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ContractArtifact {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub abi: Vec<AbiEntry>,
    #[serde(default)]
    pub bytecode: Option<String>,
    #[serde(default)]
    pub gas: Option<u64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AbiEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default = "default_entry_kind")]
    pub kind: String,
    #[serde(default)]
    pub inputs: Vec<AbiParam>,
    #[serde(rename = "stateMutability", default)]
    pub state_mutability: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AbiParam {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

fn default_entry_kind() -> String {
    "function".to_owned()
}

impl ContractArtifact {
    pub fn load(path: &Path) -> Result<Self, ContractError> {
        let artifact_error = |reason: String| ContractError::Artifact {
            path: path.display().to_string(),
            reason,
        };
        let content = fs::read_to_string(path).map_err(|err| artifact_error(err.to_string()))?;
        serde_json::from_str(&content).map_err(|err| artifact_error(err.to_string()))
    }

    /// Creation bytecode, `0x` prefix optional.
    pub fn code(&self, contract: &str) -> Result<Vec<u8>, ContractError> {
        let bytecode = self
            .bytecode
            .as_deref()
            .filter(|code| !code.is_empty())
            .ok_or_else(|| ContractError::MissingBytecode(contract.to_owned()))?;
        hex::decode(bytecode.strip_prefix("0x").unwrap_or(bytecode)).map_err(|err| {
            ContractError::Bytecode {
                contract: contract.to_owned(),
                reason: err.to_string(),
            }
        })
    }

    #[must_use]
    pub fn function(&self, name: &str) -> Option<&AbiEntry> {
        self.abi
            .iter()
            .find(|entry| entry.kind == "function" && entry.name.as_deref() == Some(name))
    }
}

/// Call data envelope: the function name and its positional arguments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallData {
    pub function: String,
    pub args: Vec<Value>,
}

impl CallData {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}

/// Interprets bytes returned by a call or carried in a receipt: JSON when the
/// bytes parse as JSON, a `0x` hex string otherwise.
#[must_use]
pub fn decode_return(raw: &[u8]) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(raw).unwrap_or_else(|_| Value::String(format!("0x{}", hex::encode(raw))))
}

/// A contract the adapter can call, bound to its deployed address.
#[derive(Clone, Debug)]
pub struct Contract {
    id: String,
    address: Address,
    artifact: ContractArtifact,
}

impl Contract {
    #[must_use]
    pub fn new(id: impl Into<String>, address: Address, artifact: ContractArtifact) -> Self {
        Self {
            id: id.into(),
            address,
            artifact,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn address(&self) -> &Address {
        &self.address
    }

    /// Gas limit declared by the artifact, if any.
    #[must_use]
    pub const fn gas_limit(&self) -> Option<u64> {
        self.artifact.gas
    }

    pub fn encode_call(&self, function: &str, args: &[Value]) -> Result<Vec<u8>, ContractError> {
        let entry =
            self.artifact
                .function(function)
                .ok_or_else(|| ContractError::UnknownFunction {
                    contract: self.id.clone(),
                    function: function.to_owned(),
                })?;
        if entry.inputs.len() != args.len() {
            return Err(ContractError::Arity {
                contract: self.id.clone(),
                function: function.to_owned(),
                expected: entry.inputs.len(),
                got: args.len(),
            });
        }
        Ok(CallData {
            function: function.to_owned(),
            args: args.to_vec(),
        }
        .encode()?)
    }
}

/// Named contracts of one context.
#[derive(Clone, Debug, Default)]
pub struct ContractRegistry {
    contracts: BTreeMap<String, Arc<Contract>>,
}

impl ContractRegistry {
    #[must_use]
    pub fn new(contracts: impl IntoIterator<Item = Contract>) -> Self {
        Self {
            contracts: contracts
                .into_iter()
                .map(|contract| (contract.id.clone(), Arc::new(contract)))
                .collect(),
        }
    }

    /// Loads every configured artifact and binds it to an address, asking
    /// the on-chain registry for contracts without a configured one.
    pub async fn resolve(
        config: &AdapterConfig,
        chain: &dyn ChainClient,
    ) -> Result<Self, ContractError> {
        let registry = config
            .registry
            .as_ref()
            .map(|registry| Address::new(registry.address.clone()));

        let mut contracts = Vec::with_capacity(config.contracts.len());
        for (id, contract_config) in &config.contracts {
            let contract = resolve_contract(id, contract_config, registry.as_ref(), chain).await?;
            info!(contract = %id, address = %contract.address, "contract resolved");
            contracts.push(contract);
        }

        Ok(Self::new(contracts))
    }

    /// Deploys every configured contract that has no address yet and binds
    /// it in the on-chain registry under its id. A contract with a
    /// configured or registered address is kept unless `force_deploy` is
    /// set. Deployments run one after another from `deployer`.
    pub async fn install(
        config: &AdapterConfig,
        submitter: &TransactionSubmitter,
        deployer: &Account,
        timeout: Duration,
    ) -> Result<Vec<Installed>, InstallError> {
        let registry = config
            .registry
            .as_ref()
            .map(|registry| registry_contract(Address::new(registry.address.clone())));

        let mut installed = Vec::with_capacity(config.contracts.len());
        for (id, contract_config) in &config.contracts {
            let artifact = ContractArtifact::load(&contract_config.path)?;
            if !contract_config.force_deploy {
                let existing = match (&contract_config.address, &registry) {
                    (Some(address), _) => Some(Address::new(address.clone())),
                    (None, Some(registry)) => {
                        registered_address(submitter.chain().as_ref(), registry.address(), id)
                            .await?
                    }
                    (None, None) => None,
                };
                if let Some(address) = existing {
                    info!(contract = %id, %address, "contract already installed");
                    installed.push(Installed {
                        id: id.clone(),
                        address,
                        deployed: false,
                    });
                    continue;
                }
            }

            let code = artifact.code(id)?;
            let gas_limit = artifact.gas.unwrap_or(submitter.settings().call_gas_limit);
            let confirmation = submitter
                .deploy(deployer, code, gas_limit, timeout)
                .await
                .map_err(|source| InstallError::Deploy {
                    contract: id.clone(),
                    source,
                })?;
            let address = confirmation
                .receipt
                .contract_address
                .ok_or_else(|| InstallError::NoAddress(id.clone()))?;
            info!(contract = %id, %address, tx_hash = %confirmation.tx_hash, "contract deployed");

            if let Some(registry) = &registry {
                submitter
                    .submit(
                        deployer,
                        registry,
                        REGISTRY_BIND,
                        &[json!(id), json!(address)],
                        timeout,
                    )
                    .await
                    .map_err(|source| InstallError::Bind {
                        contract: id.clone(),
                        source,
                    })?;
                info!(contract = %id, registry = %registry.address(), "contract bound");
            }

            installed.push(Installed {
                id: id.clone(),
                address,
                deployed: true,
            });
        }

        Ok(installed)
    }

    pub fn get(&self, id: &str) -> Result<Arc<Contract>, ContractError> {
        self.contracts
            .get(id)
            .cloned()
            .ok_or_else(|| ContractError::UnknownContract(id.to_owned()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}

async fn resolve_contract(
    id: &str,
    config: &ContractConfig,
    registry: Option<&Address>,
    chain: &dyn ChainClient,
) -> Result<Contract, ContractError> {
    let artifact = ContractArtifact::load(&config.path)?;

    let address = match (&config.address, registry) {
        (Some(address), _) => Address::new(address.clone()),
        (None, Some(registry)) => lookup_address(chain, registry, id).await?,
        (None, None) => return Err(ContractError::Unresolved(id.to_owned())),
    };

    Ok(Contract::new(id, address, artifact))
}

/// The name registry itself: `lookup(label)` and `bind(label, address)`.
fn registry_contract(address: Address) -> Contract {
    let param = |name: &str, kind: &str| AbiParam {
        name: name.to_owned(),
        kind: kind.to_owned(),
    };
    let function = |name: &str, inputs: Vec<AbiParam>| AbiEntry {
        name: Some(name.to_owned()),
        kind: default_entry_kind(),
        inputs,
        state_mutability: None,
    };
    let artifact = ContractArtifact {
        name: Some("registry".to_owned()),
        abi: vec![
            function(REGISTRY_LOOKUP, vec![param("label", "string")]),
            function(
                REGISTRY_BIND,
                vec![param("label", "string"), param("addr", "address")],
            ),
        ],
        ..ContractArtifact::default()
    };
    Contract::new("registry", address, artifact)
}

/// Registry entry for `label`, `None` when it is unbound.
async fn registered_address(
    chain: &dyn ChainClient,
    registry: &Address,
    label: &str,
) -> Result<Option<Address>, ContractError> {
    match lookup_address(chain, registry, label).await {
        Ok(address) => Ok(Some(address)),
        Err(ContractError::Unresolved(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

async fn lookup_address(
    chain: &dyn ChainClient,
    registry: &Address,
    label: &str,
) -> Result<Address, ContractError> {
    let data = CallData {
        function: REGISTRY_LOOKUP.to_owned(),
        args: vec![Value::String(label.to_owned())],
    }
    .encode()?;
    let request = CallRequest {
        from: None,
        to: registry.clone(),
        data,
    };

    let raw = chain
        .call(&request)
        .await
        .map_err(|source| ContractError::Lookup {
            contract: label.to_owned(),
            source,
        })?;
    debug!(contract = label, %registry, "registry lookup answered");

    match decode_return(&raw) {
        Value::String(address) if !address.is_empty() && address != ZERO_ADDRESS => {
            Ok(Address::new(address))
        }
        _ => Err(ContractError::Unresolved(label.to_owned())),
    }
}
