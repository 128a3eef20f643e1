#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod rpc_client;
pub mod transaction;

use std::fmt;

use async_trait::async_trait;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use rpc_client::RpcClient;
pub use transaction::{SignedTransaction, TransactionRequest};

/// Opaque account identity as understood by the network.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(String);

impl TxHash {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Receipt of an included transaction.
#[derive(Clone, Debug)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub success: bool,
    /// Set when the transaction created a contract.
    pub contract_address: Option<Address>,
    pub raw: Value,
}

/// Read-only contract call.
#[derive(Clone, Debug)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub data: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error("malformed `{method}` response: {reason}")]
    Decode {
        method: &'static str,
        reason: String,
    },
    #[error("transaction rejected: {0}")]
    Rejected(String),
    #[error("invalid rpc endpoint `{url}`: {reason}")]
    Endpoint { url: String, reason: String },
}

/// Black-box RPC boundary to the network. Retries and backoff, if any, belong
/// to the implementation.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_balance(&self, address: &Address) -> Result<BigUint, ChainError>;

    /// Next usable nonce for `address`, pending transactions included.
    async fn get_transaction_count(&self, address: &Address) -> Result<u64, ChainError>;

    async fn get_gas_price(&self) -> Result<BigUint, ChainError>;

    async fn get_block_number(&self) -> Result<u64, ChainError>;

    async fn send_signed_transaction(&self, raw: &[u8]) -> Result<TxHash, ChainError>;

    async fn get_transaction_receipt(&self, hash: &TxHash)
    -> Result<Option<Receipt>, ChainError>;

    async fn call(&self, request: &CallRequest) -> Result<Vec<u8>, ChainError>;
}
