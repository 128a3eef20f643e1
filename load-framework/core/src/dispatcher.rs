use std::{collections::BTreeMap, sync::Arc, time::Duration};

use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::{
    accounts::{AccountPool, PoolError, PoolSlot},
    contracts::ContractRegistry,
    operation::{Operation, Outcome},
    submitter::{SubmissionError, TransactionSubmitter},
};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Operations assigned to one account, in assignment order, each tagged with
/// its position in the batch.
struct AccountChain {
    slot: PoolSlot,
    operations: Vec<(usize, Operation)>,
}

/// Spreads a batch over the pool round-robin and runs one sequential chain
/// per account, all chains concurrently. Overlapping batches on one pool
/// queue behind each other per account, never interleaving sends from it.
#[derive(Clone)]
pub struct Dispatcher {
    pool: Arc<AccountPool>,
    submitter: TransactionSubmitter,
    contracts: Arc<ContractRegistry>,
}

impl Dispatcher {
    #[must_use]
    pub const fn new(
        pool: Arc<AccountPool>,
        submitter: TransactionSubmitter,
        contracts: Arc<ContractRegistry>,
    ) -> Self {
        Self {
            pool,
            submitter,
            contracts,
        }
    }

    #[must_use]
    pub const fn pool(&self) -> &Arc<AccountPool> {
        &self.pool
    }

    #[must_use]
    pub const fn submitter(&self) -> &TransactionSubmitter {
        &self.submitter
    }

    #[must_use]
    pub const fn contracts(&self) -> &Arc<ContractRegistry> {
        &self.contracts
    }

    /// Returns one outcome per operation, in input order. Only an empty pool
    /// fails the call; every per-operation failure is an outcome.
    pub async fn dispatch(
        &self,
        batch: Vec<Operation>,
        timeout: Duration,
    ) -> Result<Vec<Outcome>, DispatchError> {
        self.run(batch, timeout, None).await
    }

    /// Like [`Self::dispatch`], but operations not yet sent when `cancel`
    /// turns `true` resolve to failed outcomes without touching the network.
    pub async fn dispatch_until(
        &self,
        batch: Vec<Operation>,
        timeout: Duration,
        cancel: watch::Receiver<bool>,
    ) -> Result<Vec<Outcome>, DispatchError> {
        self.run(batch, timeout, Some(cancel)).await
    }

    async fn run(
        &self,
        batch: Vec<Operation>,
        timeout: Duration,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<Vec<Outcome>, DispatchError> {
        let total = batch.len();
        let chains = self.assign(batch)?;
        info!(
            operations = total,
            chains = chains.len(),
            pool_size = self.pool.size(),
            timeout_secs = timeout.as_secs(),
            "dispatching batch"
        );

        let runs = chains
            .into_values()
            .map(|chain| self.run_chain(chain, timeout, cancel.clone()));
        let mut outcomes: Vec<(usize, Outcome)> =
            join_all(runs).await.into_iter().flatten().collect();
        outcomes.sort_by_key(|(position, _)| *position);

        let succeeded = outcomes.iter().filter(|(_, o)| o.is_success()).count();
        info!(
            operations = total,
            succeeded,
            failed = total - succeeded,
            "batch dispatched"
        );

        Ok(outcomes.into_iter().map(|(_, outcome)| outcome).collect())
    }

    fn assign(&self, batch: Vec<Operation>) -> Result<BTreeMap<usize, AccountChain>, PoolError> {
        let mut chains: BTreeMap<usize, AccountChain> = BTreeMap::new();
        for (position, operation) in batch.into_iter().enumerate() {
            let slot = self.pool.next()?;
            chains
                .entry(slot.index)
                .or_insert_with(|| AccountChain {
                    slot,
                    operations: Vec::new(),
                })
                .operations
                .push((position, operation));
        }
        Ok(chains)
    }

    async fn run_chain(
        &self,
        chain: AccountChain,
        timeout: Duration,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Vec<(usize, Outcome)> {
        let AccountChain { slot, operations } = chain;
        let _in_use = slot.acquire().await;
        let account = slot.account;
        debug!(
            sender = %account.address(),
            queued = operations.len(),
            "account chain started"
        );

        let mut outcomes = Vec::with_capacity(operations.len());
        for (position, operation) in operations {
            let cancelled = cancel.as_ref().is_some_and(|rx| *rx.borrow());
            let outcome = if cancelled {
                Outcome::not_sent(
                    operation,
                    Some(account.address().clone()),
                    SubmissionError::Cancelled,
                )
            } else {
                self.submitter
                    .execute(&account, &self.contracts, operation, timeout)
                    .await
            };
            outcomes.push((position, outcome));
        }
        outcomes
    }
}
