use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use load_framework_config::RpcConfig;
use num_bigint::BigUint;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::{debug, error};

use super::{Address, CallRequest, ChainClient, ChainError, Receipt, TxHash};

const JSONRPC_VERSION: &str = "2.0";
const PENDING_BLOCK: &str = "pending";
const LATEST_BLOCK: &str = "latest";

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// JSON-RPC 2.0 client for an HTTP node endpoint.
///
/// Uses the `eth_*` method names, but the payload of
/// `eth_sendRawTransaction` is the hex of a JSON [`SignedTransaction`]
/// envelope signed with Ed25519, and addresses are derived from SHA-256 of
/// the public key. The node behind `url` must accept that envelope; stock
/// Ethereum clients expect RLP with secp256k1 signatures and will refuse it.
///
/// [`SignedTransaction`]: super::SignedTransaction
#[derive(Clone)]
pub struct RpcClient {
    url: Url,
    client: Client,
    next_id: Arc<AtomicU64>,
}

impl RpcClient {
    pub fn new(url: Url, request_timeout: Duration) -> Result<Self, ChainError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            url,
            client,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn from_config(config: &RpcConfig) -> Result<Self, ChainError> {
        let url = Url::parse(&config.url).map_err(|err| ChainError::Endpoint {
            url: config.url.clone(),
            reason: err.to_string(),
        })?;
        Self::new(url, config.request_timeout)
    }

    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    async fn request<R>(&self, method: &'static str, params: Value) -> Result<R, ChainError>
    where
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = RpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        };

        let response: RpcResponse = self
            .client
            .post(self.url.clone())
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = response.error {
            debug!(method, code = err.code, message = %err.message, "rpc returned an error");
            return Err(ChainError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        serde_json::from_value(response.result).map_err(|err| {
            error!(method, %err, "failed to decode rpc result");
            ChainError::Decode {
                method,
                reason: err.to_string(),
            }
        })
    }

    async fn quantity(&self, method: &'static str, params: Value) -> Result<BigUint, ChainError> {
        let raw: String = self.request(method, params).await?;
        parse_quantity(method, &raw)
    }
}

fn parse_quantity(method: &'static str, raw: &str) -> Result<BigUint, ChainError> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    if digits.is_empty() {
        return Ok(BigUint::default());
    }
    BigUint::parse_bytes(digits.as_bytes(), 16).ok_or_else(|| ChainError::Decode {
        method,
        reason: format!("`{raw}` is not a hex quantity"),
    })
}

fn quantity_to_u64(method: &'static str, value: &BigUint) -> Result<u64, ChainError> {
    u64::try_from(value).map_err(|_| ChainError::Decode {
        method,
        reason: format!("{value} does not fit in 64 bits"),
    })
}

fn decode_bytes(method: &'static str, raw: &str) -> Result<Vec<u8>, ChainError> {
    hex::decode(raw.strip_prefix("0x").unwrap_or(raw)).map_err(|err| ChainError::Decode {
        method,
        reason: err.to_string(),
    })
}

fn raw_transaction(raw: &[u8]) -> String {
    format!("0x{}", hex::encode(raw))
}

fn parse_receipt(raw: Value) -> Result<Receipt, ChainError> {
    const METHOD: &str = "eth_getTransactionReceipt";
    let field = |name: &str| raw.get(name).and_then(Value::as_str);

    let tx_hash = field("transactionHash")
        .map(TxHash::new)
        .ok_or_else(|| ChainError::Decode {
            method: METHOD,
            reason: "missing transactionHash".to_owned(),
        })?;
    let block_number = field("blockNumber").ok_or_else(|| ChainError::Decode {
        method: METHOD,
        reason: "missing blockNumber".to_owned(),
    })?;
    let block_number = quantity_to_u64(METHOD, &parse_quantity(METHOD, block_number)?)?;
    // Pre-byzantium receipts carry no status; treat inclusion as success.
    let success = field("status").is_none_or(|status| status != "0x0");
    let contract_address = field("contractAddress").map(Address::new);

    Ok(Receipt {
        tx_hash,
        block_number,
        success,
        contract_address,
        raw,
    })
}

#[async_trait]
impl ChainClient for RpcClient {
    async fn get_balance(&self, address: &Address) -> Result<BigUint, ChainError> {
        self.quantity("eth_getBalance", json!([address, LATEST_BLOCK]))
            .await
    }

    async fn get_transaction_count(&self, address: &Address) -> Result<u64, ChainError> {
        const METHOD: &str = "eth_getTransactionCount";
        let count = self.quantity(METHOD, json!([address, PENDING_BLOCK])).await?;
        quantity_to_u64(METHOD, &count)
    }

    async fn get_gas_price(&self) -> Result<BigUint, ChainError> {
        self.quantity("eth_gasPrice", json!([])).await
    }

    async fn get_block_number(&self) -> Result<u64, ChainError> {
        const METHOD: &str = "eth_blockNumber";
        let number = self.quantity(METHOD, json!([])).await?;
        quantity_to_u64(METHOD, &number)
    }

    async fn send_signed_transaction(&self, raw: &[u8]) -> Result<TxHash, ChainError> {
        let hash: String = self
            .request("eth_sendRawTransaction", json!([raw_transaction(raw)]))
            .await
            .map_err(|err| match err {
                ChainError::Rpc { message, .. } => ChainError::Rejected(message),
                other => other,
            })?;
        Ok(TxHash::new(hash))
    }

    async fn get_transaction_receipt(
        &self,
        hash: &TxHash,
    ) -> Result<Option<Receipt>, ChainError> {
        let raw: Value = self
            .request("eth_getTransactionReceipt", json!([hash]))
            .await?;
        if raw.is_null() {
            return Ok(None);
        }
        parse_receipt(raw).map(Some)
    }

    async fn call(&self, request: &CallRequest) -> Result<Vec<u8>, ChainError> {
        const METHOD: &str = "eth_call";
        let mut call = json!({
            "to": request.to,
            "data": format!("0x{}", hex::encode(&request.data)),
        });
        if let Some(from) = &request.from {
            call["from"] = json!(from);
        }
        let raw: String = self.request(METHOD, json!([call, LATEST_BLOCK])).await?;
        decode_bytes(METHOD, &raw)
    }
}
