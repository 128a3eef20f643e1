//! One signed transaction or one read-only query at a time.
//!
//! A submission moves through `Built -> Signed -> Submitted` and ends in
//! exactly one of `Confirmed`, `Rejected` or `TimedOut`. The nonce is read
//! from the network right before signing; nothing is retried here.

use std::{future::Future, sync::Arc, time::Duration};

use load_framework_config::AdapterConfig;
use num_bigint::BigUint;
use serde_json::Value;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, warn};

use crate::{
    accounts::Account,
    chain::{Address, CallRequest, ChainClient, ChainError, Receipt, TransactionRequest, TxHash},
    contracts::{Contract, ContractError, ContractRegistry, decode_return},
    operation::{Operation, Outcome, OutcomeStatus},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxState {
    Built,
    Signed,
    Submitted,
    Confirmed,
    Rejected,
    TimedOut,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("failed to encode transaction: {0}")]
    Signing(#[from] serde_json::Error),
    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: TxHash, receipt: Value },
    #[error("no confirmation within {after:?}")]
    Timeout {
        after: Duration,
        tx_hash: Option<TxHash>,
    },
    #[error("cancelled before submission")]
    Cancelled,
}

impl SubmissionError {
    /// Terminal state a submission ends in when it fails with this error.
    #[must_use]
    pub const fn terminal_state(&self) -> TxState {
        match self {
            Self::Timeout { .. } => TxState::TimedOut,
            _ => TxState::Rejected,
        }
    }

    #[must_use]
    pub fn tx_hash(&self) -> Option<&TxHash> {
        match self {
            Self::Reverted { tx_hash, .. } => Some(tx_hash),
            Self::Timeout { tx_hash, .. } => tx_hash.as_ref(),
            _ => None,
        }
    }
}

/// A transaction that reached the requested confirmation depth.
#[derive(Clone, Debug)]
pub struct Confirmation {
    pub tx_hash: TxHash,
    pub nonce: u64,
    pub receipt: Receipt,
}

#[derive(Clone, Debug)]
pub struct SubmitterSettings {
    pub call_gas_limit: u64,
    pub transfer_gas_limit: u64,
    pub gas_price: BigUint,
    pub confirmation_blocks: u64,
    pub poll_interval: Duration,
}

impl SubmitterSettings {
    #[must_use]
    pub fn from_config(config: &AdapterConfig, gas_price: BigUint) -> Self {
        Self {
            call_gas_limit: config.gas.call_gas_limit,
            transfer_gas_limit: config.gas.transfer_gas_limit,
            gas_price,
            confirmation_blocks: config.rpc.confirmation_blocks,
            poll_interval: config.rpc.poll_interval,
        }
    }
}

struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    async fn run<F, T>(&self, tx_hash: Option<&TxHash>, fut: F) -> Result<T, SubmissionError>
    where
        F: Future<Output = Result<T, SubmissionError>>,
    {
        timeout_at(self.at, fut)
            .await
            .unwrap_or_else(|_| {
                Err(SubmissionError::Timeout {
                    after: self.budget,
                    tx_hash: tx_hash.cloned(),
                })
            })
    }
}

#[derive(Clone)]
pub struct TransactionSubmitter {
    chain: Arc<dyn ChainClient>,
    settings: Arc<SubmitterSettings>,
}

impl TransactionSubmitter {
    #[must_use]
    pub fn new(chain: Arc<dyn ChainClient>, settings: SubmitterSettings) -> Self {
        Self {
            chain,
            settings: Arc::new(settings),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &SubmitterSettings {
        &self.settings
    }

    #[must_use]
    pub fn chain(&self) -> &Arc<dyn ChainClient> {
        &self.chain
    }

    /// Gas fee charged for one plain value transfer.
    #[must_use]
    pub fn transfer_fee(&self) -> BigUint {
        &self.settings.gas_price * self.settings.transfer_gas_limit
    }

    /// Sends a state-changing contract call and waits for its confirmation.
    pub async fn submit(
        &self,
        account: &Account,
        contract: &Contract,
        function: &str,
        args: &[Value],
        timeout: Duration,
    ) -> Result<Confirmation, SubmissionError> {
        let data = contract.encode_call(function, args)?;
        let gas_limit = contract
            .gas_limit()
            .unwrap_or(self.settings.call_gas_limit);
        self.send(
            account,
            Some(contract.address().clone()),
            BigUint::default(),
            data,
            gas_limit,
            timeout,
        )
        .await
    }

    /// Moves `value` from `from` to `to` and waits for its confirmation.
    pub async fn transfer(
        &self,
        from: &Account,
        to: &Address,
        value: BigUint,
        timeout: Duration,
    ) -> Result<Confirmation, SubmissionError> {
        self.send(
            from,
            Some(to.clone()),
            value,
            Vec::new(),
            self.settings.transfer_gas_limit,
            timeout,
        )
        .await
    }

    /// Creates a contract from `bytecode` and waits for its confirmation.
    /// The receipt carries the new contract's address.
    pub async fn deploy(
        &self,
        account: &Account,
        bytecode: Vec<u8>,
        gas_limit: u64,
        timeout: Duration,
    ) -> Result<Confirmation, SubmissionError> {
        self.send(
            account,
            None,
            BigUint::default(),
            bytecode,
            gas_limit,
            timeout,
        )
        .await
    }

    /// Read-only call. Never signs and never touches a nonce.
    pub async fn query(
        &self,
        account: Option<&Account>,
        contract: &Contract,
        function: &str,
        args: &[Value],
    ) -> Result<Value, SubmissionError> {
        let request = CallRequest {
            from: account.map(|account| account.address().clone()),
            to: contract.address().clone(),
            data: contract.encode_call(function, args)?,
        };
        let raw = self.chain.call(&request).await?;
        Ok(decode_return(&raw))
    }

    async fn send(
        &self,
        account: &Account,
        to: Option<Address>,
        value: BigUint,
        data: Vec<u8>,
        gas_limit: u64,
        timeout: Duration,
    ) -> Result<Confirmation, SubmissionError> {
        let deadline = Deadline::after(timeout);
        let from = account.address();

        let nonce = deadline
            .run(None, async {
                self.chain
                    .get_transaction_count(from)
                    .await
                    .map_err(SubmissionError::from)
            })
            .await?;
        let request = TransactionRequest {
            from: from.clone(),
            to,
            nonce,
            gas_limit,
            gas_price: self.settings.gas_price.clone(),
            value,
            data,
        };
        debug!(%from, nonce, state = ?TxState::Built, "transaction built");

        let raw = account.key().sign(request)?.encode()?;
        debug!(%from, nonce, state = ?TxState::Signed, "transaction signed");

        let tx_hash = deadline
            .run(None, async {
                self.chain
                    .send_signed_transaction(&raw)
                    .await
                    .map_err(SubmissionError::from)
            })
            .await
            .inspect_err(|err| {
                debug!(%from, nonce, state = ?err.terminal_state(), %err, "transaction not accepted");
            })?;
        debug!(%from, nonce, %tx_hash, state = ?TxState::Submitted, "transaction submitted");

        let receipt = deadline
            .run(Some(&tx_hash), self.wait_for_confirmation(&tx_hash))
            .await
            .inspect_err(|err| {
                debug!(%from, nonce, %tx_hash, state = ?err.terminal_state(), %err, "transaction unconfirmed");
            })?;

        if !receipt.success {
            debug!(%from, nonce, %tx_hash, state = ?TxState::Rejected, "transaction reverted");
            return Err(SubmissionError::Reverted {
                tx_hash,
                receipt: receipt.raw,
            });
        }

        debug!(
            %from,
            nonce,
            %tx_hash,
            block = receipt.block_number,
            state = ?TxState::Confirmed,
            "transaction confirmed"
        );
        Ok(Confirmation {
            tx_hash,
            nonce,
            receipt,
        })
    }

    /// Polls until the receipt exists and sits `confirmation_blocks` deep.
    /// Polling errors are logged and retried; the caller's deadline bounds
    /// the wait.
    async fn wait_for_confirmation(&self, tx_hash: &TxHash) -> Result<Receipt, SubmissionError> {
        let depth = self.settings.confirmation_blocks.max(1);
        loop {
            match self.confirmed_receipt(tx_hash, depth).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                Err(err) => warn!(%tx_hash, %err, "receipt poll failed"),
            }
            sleep(self.settings.poll_interval).await;
        }
    }

    async fn confirmed_receipt(
        &self,
        tx_hash: &TxHash,
        depth: u64,
    ) -> Result<Option<Receipt>, ChainError> {
        let Some(receipt) = self.chain.get_transaction_receipt(tx_hash).await? else {
            return Ok(None);
        };
        if depth == 1 {
            return Ok(Some(receipt));
        }
        let head = self.chain.get_block_number().await?;
        let confirmations = (head + 1).saturating_sub(receipt.block_number);
        Ok((confirmations >= depth).then_some(receipt))
    }

    /// Runs one dispatched operation from `account` and folds the result into
    /// an [`Outcome`].
    pub async fn execute(
        &self,
        account: &Account,
        contracts: &ContractRegistry,
        operation: Operation,
        timeout: Duration,
    ) -> Outcome {
        let started = Instant::now();
        let result = match contracts.get(&operation.contract) {
            Ok(contract) => {
                self.submit(
                    account,
                    &contract,
                    &operation.function,
                    &operation.args,
                    timeout,
                )
                .await
            }
            Err(err) => Err(err.into()),
        };

        let sender = Some(account.address().clone());
        let elapsed = started.elapsed();
        match result {
            Ok(confirmation) => Outcome {
                operation,
                sender,
                status: OutcomeStatus::Success,
                tx_hash: Some(confirmation.tx_hash),
                nonce: Some(confirmation.nonce),
                payload: Some(confirmation.receipt.raw),
                error: None,
                elapsed,
            },
            Err(err) => failed_outcome(operation, sender, &err, elapsed),
        }
    }

    /// Runs a read-only operation and folds the result into an [`Outcome`].
    pub async fn query_outcome(
        &self,
        account: Option<&Account>,
        contracts: &ContractRegistry,
        operation: Operation,
    ) -> Outcome {
        let started = Instant::now();
        let result = match contracts.get(&operation.contract) {
            Ok(contract) => {
                self.query(account, &contract, &operation.function, &operation.args)
                    .await
            }
            Err(err) => Err(err.into()),
        };

        let sender = account.map(|account| account.address().clone());
        let elapsed = started.elapsed();
        match result {
            Ok(value) => Outcome {
                operation,
                sender,
                status: OutcomeStatus::Success,
                tx_hash: None,
                nonce: None,
                payload: Some(value),
                error: None,
                elapsed,
            },
            Err(err) => failed_outcome(operation, sender, &err, elapsed),
        }
    }
}

fn failed_outcome(
    operation: Operation,
    sender: Option<Address>,
    err: &SubmissionError,
    elapsed: Duration,
) -> Outcome {
    let status = match err.terminal_state() {
        TxState::TimedOut => OutcomeStatus::TimedOut,
        _ => OutcomeStatus::Failed,
    };
    let payload = match err {
        SubmissionError::Reverted { receipt, .. } => Some(receipt.clone()),
        _ => None,
    };
    Outcome {
        operation,
        sender,
        status,
        tx_hash: err.tx_hash().cloned(),
        nonce: None,
        payload,
        error: Some(err.to_string()),
        elapsed,
    }
}
