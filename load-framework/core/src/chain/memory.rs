//! In-process chain with account balances, strict nonces, contract
//! creation and fault injection. Every accepted transaction is mined into
//! its own block.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use num_bigint::BigUint;
use serde_json::{Value, json};
use sha2::{Digest as _, Sha256};
use tokio::time::sleep;

use super::{Address, CallRequest, ChainClient, ChainError, Receipt, SignedTransaction, TxHash};
use crate::contracts::CallData;

/// Contract behaviour: receives the caller (if any) and the decoded call and
/// returns the result, or an error string to revert.
pub type ContractHandler =
    Arc<dyn Fn(Option<&Address>, &CallData) -> Result<Value, String> + Send + Sync>;

/// Transaction accepted by the chain.
#[derive(Clone, Debug)]
pub struct SentTransaction {
    pub hash: TxHash,
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub nonce: u64,
    pub value: BigUint,
    pub success: bool,
}

#[derive(Default)]
struct ChainState {
    block_number: u64,
    balances: HashMap<Address, BigUint>,
    nonces: HashMap<Address, u64>,
    receipts: HashMap<TxHash, Receipt>,
    rejected_senders: HashMap<Address, String>,
    rejected_recipients: HashMap<Address, String>,
    withheld_senders: HashSet<Address>,
    contracts: HashMap<Address, ContractHandler>,
    code: HashMap<Vec<u8>, ContractHandler>,
    sent: Vec<SentTransaction>,
}

pub struct InMemoryChain {
    state: Mutex<ChainState>,
    gas_price: BigUint,
    send_delay: Duration,
}

impl Default for InMemoryChain {
    fn default() -> Self {
        Self::new(BigUint::from(1u32))
    }
}

impl InMemoryChain {
    #[must_use]
    pub fn new(gas_price: BigUint) -> Self {
        Self {
            state: Mutex::new(ChainState::default()),
            gas_price,
            send_delay: Duration::ZERO,
        }
    }

    /// Delays every submission before its nonce is checked, widening the
    /// window in which two in-flight sends from one account would collide.
    #[must_use]
    pub const fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn fund(&self, address: &Address, balance: BigUint) {
        self.state().balances.insert(address.clone(), balance);
    }

    #[must_use]
    pub fn balance_of(&self, address: &Address) -> BigUint {
        self.state()
            .balances
            .get(address)
            .cloned()
            .unwrap_or_default()
    }

    /// Every later submission from `address` is refused with `reason`.
    pub fn reject_sender(&self, address: &Address, reason: impl Into<String>) {
        self.state()
            .rejected_senders
            .insert(address.clone(), reason.into());
    }

    /// Every later transaction addressed to `address` is refused with
    /// `reason`. Other transactions from the same sender are unaffected.
    pub fn reject_recipient(&self, address: &Address, reason: impl Into<String>) {
        self.state()
            .rejected_recipients
            .insert(address.clone(), reason.into());
    }

    /// Transactions from `address` execute but their receipts never show up.
    pub fn withhold_receipts(&self, address: &Address) {
        self.state().withheld_senders.insert(address.clone());
    }

    pub fn register_contract(&self, address: Address, handler: ContractHandler) {
        self.state().contracts.insert(address, handler);
    }

    /// Creation transactions carrying `bytecode` deploy a contract that runs
    /// `handler`. Unknown bytecode deploys a contract that answers `null`.
    pub fn register_code(&self, bytecode: impl Into<Vec<u8>>, handler: ContractHandler) {
        self.state().code.insert(bytecode.into(), handler);
    }

    #[must_use]
    pub fn has_contract(&self, address: &Address) -> bool {
        self.state().contracts.contains_key(address)
    }

    pub fn advance_blocks(&self, blocks: u64) {
        self.state().block_number += blocks;
    }

    #[must_use]
    pub fn sent(&self) -> Vec<SentTransaction> {
        self.state().sent.clone()
    }

    #[must_use]
    pub fn sent_from(&self, address: &Address) -> Vec<SentTransaction> {
        self.state()
            .sent
            .iter()
            .filter(|tx| &tx.from == address)
            .cloned()
            .collect()
    }

    fn apply(&self, signed: &SignedTransaction) -> Result<TxHash, ChainError> {
        let tx = &signed.tx;
        let hash = signed
            .hash()
            .map_err(|err| ChainError::Rejected(format!("unencodable transaction: {err}")))?;
        let mut state = self.state();

        if let Some(reason) = state.rejected_senders.get(&tx.from) {
            return Err(ChainError::Rejected(reason.clone()));
        }
        if let Some(reason) = tx
            .to
            .as_ref()
            .and_then(|to| state.rejected_recipients.get(to))
        {
            return Err(ChainError::Rejected(reason.clone()));
        }

        let expected = state.nonces.get(&tx.from).copied().unwrap_or_default();
        if tx.nonce < expected {
            return Err(ChainError::Rejected(format!(
                "nonce too low: next nonce {expected}, tx nonce {}",
                tx.nonce
            )));
        }
        if tx.nonce > expected {
            return Err(ChainError::Rejected(format!(
                "nonce too high: next nonce {expected}, tx nonce {}",
                tx.nonce
            )));
        }
        if tx.gas_price < self.gas_price {
            return Err(ChainError::Rejected("gas price below minimum".to_owned()));
        }

        let fee = tx.max_fee();
        let cost = &fee + &tx.value;
        let balance = state.balances.get(&tx.from).cloned().unwrap_or_default();
        if balance < cost {
            return Err(ChainError::Rejected(
                "insufficient funds for gas * price + value".to_owned(),
            ));
        }

        let (recipient, outcome, created) = match &tx.to {
            Some(to) => {
                let outcome = match state.contracts.get(to).cloned() {
                    Some(handler) => CallData::decode(&tx.data)
                        .map_err(|err| err.to_string())
                        .and_then(|call| handler(Some(&tx.from), &call)),
                    None => Ok(Value::Null),
                };
                (to.clone(), outcome, None)
            }
            None => {
                let address = created_address(&tx.from, tx.nonce);
                let handler = state.code.get(&tx.data).cloned().unwrap_or_else(inert);
                (address.clone(), Ok(Value::Null), Some((address, handler)))
            }
        };
        let success = outcome.is_ok();

        let charged = if success { cost } else { fee };
        state.balances.insert(tx.from.clone(), balance - charged);
        if success {
            *state.balances.entry(recipient).or_default() += &tx.value;
        }
        let contract_address = created.map(|(address, handler)| {
            state.contracts.insert(address.clone(), handler);
            address
        });
        state.nonces.insert(tx.from.clone(), expected + 1);
        state.block_number += 1;

        let block_number = state.block_number;
        if !state.withheld_senders.contains(&tx.from) {
            let mut output = match &outcome {
                Ok(value) => json!({ "output": value }),
                Err(reason) => json!({ "revertReason": reason }),
            };
            if let Some(address) = &contract_address {
                output["contractAddress"] = json!(address);
            }
            state.receipts.insert(
                hash.clone(),
                Receipt {
                    tx_hash: hash.clone(),
                    block_number,
                    success,
                    contract_address: contract_address.clone(),
                    raw: output,
                },
            );
        }
        state.sent.push(SentTransaction {
            hash: hash.clone(),
            from: tx.from.clone(),
            to: tx.to.clone(),
            nonce: tx.nonce,
            value: tx.value.clone(),
            success,
        });

        Ok(hash)
    }
}

/// Address of the contract created by `from` at `nonce`.
fn created_address(from: &Address, nonce: u64) -> Address {
    let mut hasher = Sha256::new();
    hasher.update(from.as_str().as_bytes());
    hasher.update(nonce.to_be_bytes());
    let digest = hasher.finalize();
    Address::new(format!("0x{}", hex::encode(&digest[digest.len() - 20..])))
}

fn inert() -> ContractHandler {
    Arc::new(|_: Option<&Address>, _: &CallData| Ok::<_, String>(Value::Null))
}

#[async_trait]
impl ChainClient for InMemoryChain {
    async fn get_balance(&self, address: &Address) -> Result<BigUint, ChainError> {
        Ok(self.balance_of(address))
    }

    async fn get_transaction_count(&self, address: &Address) -> Result<u64, ChainError> {
        Ok(self
            .state()
            .nonces
            .get(address)
            .copied()
            .unwrap_or_default())
    }

    async fn get_gas_price(&self) -> Result<BigUint, ChainError> {
        Ok(self.gas_price.clone())
    }

    async fn get_block_number(&self) -> Result<u64, ChainError> {
        Ok(self.state().block_number)
    }

    async fn send_signed_transaction(&self, raw: &[u8]) -> Result<TxHash, ChainError> {
        let signed = SignedTransaction::decode(raw)
            .map_err(|err| ChainError::Rejected(format!("malformed transaction: {err}")))?;
        if !signed.verify() {
            return Err(ChainError::Rejected("invalid signature".to_owned()));
        }
        if !self.send_delay.is_zero() {
            sleep(self.send_delay).await;
        }
        self.apply(&signed)
    }

    async fn get_transaction_receipt(
        &self,
        hash: &TxHash,
    ) -> Result<Option<Receipt>, ChainError> {
        Ok(self.state().receipts.get(hash).cloned())
    }

    async fn call(&self, request: &CallRequest) -> Result<Vec<u8>, ChainError> {
        let handler = self
            .state()
            .contracts
            .get(&request.to)
            .cloned()
            .ok_or_else(|| ChainError::Rpc {
                code: -32000,
                message: format!("no contract at {}", request.to),
            })?;
        let call = CallData::decode(&request.data).map_err(|err| ChainError::Rpc {
            code: -32602,
            message: err.to_string(),
        })?;
        let value = handler(request.from.as_ref(), &call).map_err(|reason| ChainError::Rpc {
            code: 3,
            message: format!("execution reverted: {reason}"),
        })?;
        serde_json::to_vec(&value).map_err(|err| ChainError::Rpc {
            code: -32603,
            message: err.to_string(),
        })
    }
}
