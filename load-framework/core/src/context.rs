//! Per-round setup and teardown, and the calls the harness drives.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use load_framework_config::{AdapterConfig, ConfigError, timeouts};
use serde_json::Value;
use tokio::sync::watch;
use tracing::info;

use crate::{
    accounts::{Account, AccountPool, FileKeyStore, KeyStore, KeyStoreError},
    chain::{ChainClient, ChainError, RpcClient},
    contracts::{ContractError, ContractRegistry},
    dispatcher::{DispatchError, Dispatcher},
    operation::{Operation, Outcome},
    submitter::{SubmitterSettings, TransactionSubmitter},
};

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to load worker keys: {0}")]
    KeyStore(#[from] KeyStoreError),
    #[error("network unavailable during setup: {0}")]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Contract(#[from] ContractError),
}

/// State of one benchmark round: its own account pool, submitter and
/// resolved contracts. Rounds never share a cursor.
pub struct Context {
    dispatcher: Dispatcher,
    dispatched: AtomicU64,
}

impl Context {
    /// Builds a context against the configured RPC endpoint and worker keyfile.
    pub async fn init(config: &AdapterConfig) -> Result<Self, ContextError> {
        let chain = Arc::new(RpcClient::from_config(&config.rpc)?);
        let keystore = FileKeyStore::new(&config.workers.path);
        Self::with_parts(config, chain, &keystore).await
    }

    pub async fn with_parts(
        config: &AdapterConfig,
        chain: Arc<dyn ChainClient>,
        keystore: &dyn KeyStore,
    ) -> Result<Self, ContextError> {
        let keys = keystore.load(&config.worker_passphrase()?)?;
        let gas_price = match &config.gas.gas_price {
            Some(price) => price.clone(),
            None => chain.get_gas_price().await?,
        };
        let contracts = ContractRegistry::resolve(config, chain.as_ref()).await?;
        let pool = AccountPool::new(keys.into_iter().map(Account::new).collect());

        info!(
            accounts = pool.size(),
            contracts = contracts.len(),
            %gas_price,
            "context initialized"
        );

        let submitter =
            TransactionSubmitter::new(chain, SubmitterSettings::from_config(config, gas_price));
        Ok(Self {
            dispatcher: Dispatcher::new(Arc::new(pool), submitter, Arc::new(contracts)),
            dispatched: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub fn pool(&self) -> &AccountPool {
        self.dispatcher.pool()
    }

    /// Dispatches a batch. A zero timeout falls back to the default
    /// confirmation timeout.
    pub async fn dispatch(
        &self,
        batch: Vec<Operation>,
        timeout_secs: u64,
    ) -> Result<Vec<Outcome>, DispatchError> {
        let timeout = confirmation_budget(timeout_secs);
        let outcomes = self.dispatcher.dispatch(batch, timeout).await?;
        self.dispatched
            .fetch_add(outcomes.len() as u64, Ordering::Relaxed);
        Ok(outcomes)
    }

    /// Cancellable variant of [`Self::dispatch`].
    pub async fn dispatch_until(
        &self,
        batch: Vec<Operation>,
        timeout_secs: u64,
        cancel: watch::Receiver<bool>,
    ) -> Result<Vec<Outcome>, DispatchError> {
        let timeout = confirmation_budget(timeout_secs);
        let outcomes = self
            .dispatcher
            .dispatch_until(batch, timeout, cancel)
            .await?;
        self.dispatched
            .fetch_add(outcomes.len() as u64, Ordering::Relaxed);
        Ok(outcomes)
    }

    /// Read-only lookup of `key` through `contract_id.function`. Reads are
    /// issued from the first pool account, when there is one.
    pub async fn query(&self, contract_id: &str, function: &str, key: Value) -> Outcome {
        let from = self.pool().accounts().first().map(Arc::as_ref);
        self.dispatcher
            .submitter()
            .query_outcome(
                from,
                self.dispatcher.contracts(),
                Operation::new(contract_id, function, vec![key]),
            )
            .await
    }

    /// Tears the round down. Consuming `self` drops the pool and its keys.
    pub fn release(self) {
        info!(
            accounts = self.pool().size(),
            dispatched = self.dispatched.load(Ordering::Relaxed),
            "context released"
        );
    }
}

fn confirmation_budget(timeout_secs: u64) -> Duration {
    if timeout_secs == 0 {
        timeouts::confirmation_timeout()
    } else {
        Duration::from_secs(timeout_secs)
    }
}

/// Calls the benchmark harness makes into an adapter.
#[async_trait]
pub trait Adapter: Send + Sync {
    type Context: Send + Sync;

    async fn init_context(&self, config: &AdapterConfig) -> Result<Self::Context, ContextError>;

    async fn dispatch(
        &self,
        context: &Self::Context,
        batch: Vec<Operation>,
        timeout_secs: u64,
    ) -> Result<Vec<Outcome>, DispatchError>;

    async fn query(
        &self,
        context: &Self::Context,
        contract_id: &str,
        function: &str,
        key: Value,
    ) -> Outcome;

    async fn release_context(&self, context: Self::Context);
}

/// [`Adapter`] over a JSON-RPC node, or over an injected client.
#[derive(Clone, Default)]
pub struct ChainAdapter {
    chain: Option<Arc<dyn ChainClient>>,
}

impl ChainAdapter {
    /// Adapter that connects to `rpc.url` from the config.
    #[must_use]
    pub fn rpc() -> Self {
        Self::default()
    }

    /// Adapter that sends through `chain` instead of opening an RPC client.
    #[must_use]
    pub fn with_chain(chain: Arc<dyn ChainClient>) -> Self {
        Self { chain: Some(chain) }
    }
}

#[async_trait]
impl Adapter for ChainAdapter {
    type Context = Context;

    async fn init_context(&self, config: &AdapterConfig) -> Result<Context, ContextError> {
        match &self.chain {
            Some(chain) => {
                let keystore = FileKeyStore::new(&config.workers.path);
                Context::with_parts(config, Arc::clone(chain), &keystore).await
            }
            None => Context::init(config).await,
        }
    }

    async fn dispatch(
        &self,
        context: &Context,
        batch: Vec<Operation>,
        timeout_secs: u64,
    ) -> Result<Vec<Outcome>, DispatchError> {
        context.dispatch(batch, timeout_secs).await
    }

    async fn query(
        &self,
        context: &Context,
        contract_id: &str,
        function: &str,
        key: Value,
    ) -> Outcome {
        context.query(contract_id, function, key).await
    }

    async fn release_context(&self, context: Context) {
        context.release();
    }
}
