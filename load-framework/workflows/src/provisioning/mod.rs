//! Worker account provisioning.
//!
//! A run loads (or grows) the worker keyfile, finds the workers whose balance
//! fell below the top-up cutoff, and funds them through a two-level tree:
//! the donor seeds a few funders, then the funders pay the rest
//! concurrently. The worker keyfile is written back exactly once at the end
//! of every run that got as far as loading it.

pub mod discovery;
pub mod plan;
pub mod waves;

use std::sync::Arc;

use load_framework_config::{AdapterConfig, ConfigError, ProvisionParams};
use load_framework_core::{
    Account, AccountKey, ChainClient, ChainError, SubmitterSettings, TransactionSubmitter,
    accounts::{FileKeyStore, KeyStore, KeyStoreError},
};
use num_bigint::BigUint;
use tracing::{error, info, warn};

pub use discovery::{Discovery, discover};
pub use plan::FundingPlan;
pub use waves::{TransferFailure, Wave};

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),
    #[error("network error during provisioning: {0}")]
    Chain(#[from] ChainError),
    #[error("donor keyfile holds no key")]
    MissingDonorKey,
    #[error("donor holds {available} but wave 1 needs {required}")]
    InsufficientDonorBalance {
        required: BigUint,
        available: BigUint,
    },
    #[error("{failed} of {total} transfers failed; re-run to top up the rest")]
    PartialFailure { failed: usize, total: usize },
}

/// Summary of one provisioning run.
#[derive(Debug, Default)]
pub struct ProvisionReport {
    pub accounts: usize,
    pub top_up: usize,
    pub funders: usize,
    pub txns_per_funder: usize,
    pub initial_value: BigUint,
    pub transfers: usize,
    pub failures: Vec<TransferFailure>,
}

impl ProvisionReport {
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.transfers + self.failures.len()
    }

    /// `Some` when any transfer failed. Targets it left short are picked up
    /// by the next run's discovery.
    #[must_use]
    pub fn partial_failure(&self) -> Option<ProvisionError> {
        (!self.failures.is_empty()).then(|| ProvisionError::PartialFailure {
            failed: self.failures.len(),
            total: self.attempted(),
        })
    }
}

pub struct Provisioner {
    submitter: TransactionSubmitter,
    params: ProvisionParams,
    workers: Arc<dyn KeyStore>,
    worker_passphrase: String,
    donor: Account,
}

impl Provisioner {
    /// Uses the worker and donor keyfiles named in the config.
    pub async fn from_config(
        config: &AdapterConfig,
        chain: Arc<dyn ChainClient>,
    ) -> Result<Self, ProvisionError> {
        let donor_store = FileKeyStore::new(&config.donor()?.path);
        let workers = Arc::new(FileKeyStore::new(&config.workers.path));
        Self::with_keystores(config, chain, workers, &donor_store).await
    }

    pub async fn with_keystores(
        config: &AdapterConfig,
        chain: Arc<dyn ChainClient>,
        workers: Arc<dyn KeyStore>,
        donor_store: &dyn KeyStore,
    ) -> Result<Self, ProvisionError> {
        let params = config.provision()?.validated()?;
        let worker_passphrase = config.worker_passphrase()?;
        let donor = donor_store
            .load(&config.donor_passphrase()?)?
            .into_iter()
            .next()
            .ok_or(ProvisionError::MissingDonorKey)?;

        let gas_price = match &config.gas.gas_price {
            Some(price) => price.clone(),
            None => chain.get_gas_price().await?,
        };
        let submitter =
            TransactionSubmitter::new(chain, SubmitterSettings::from_config(config, gas_price));

        Ok(Self {
            submitter,
            params,
            workers,
            worker_passphrase,
            donor: Account::new(donor),
        })
    }

    #[must_use]
    pub const fn params(&self) -> &ProvisionParams {
        &self.params
    }

    #[must_use]
    pub const fn donor(&self) -> &Account {
        &self.donor
    }

    /// Submitter the waves send through, also used for contract installs.
    #[must_use]
    pub const fn submitter(&self) -> &TransactionSubmitter {
        &self.submitter
    }

    /// Runs discovery, both waves, and persists the worker keys whatever the
    /// funding outcome.
    pub async fn run(&self) -> Result<ProvisionReport, ProvisionError> {
        let keys = self.worker_keys()?;
        let funded = self.fund(&keys).await;
        let persisted = self.workers.save(&keys, &self.worker_passphrase);

        match (funded, persisted) {
            (Ok(report), Ok(())) => {
                info!(keys = keys.len(), "worker keys persisted");
                Ok(report)
            }
            (Ok(_), Err(err)) => Err(err.into()),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(save_err)) => {
                error!(%save_err, "failed to persist worker keys");
                Err(err)
            }
        }
    }

    /// Discovery and planning only. Nothing is sent or written.
    pub async fn plan(&self) -> Result<(Discovery, FundingPlan), ProvisionError> {
        let keys = self.worker_keys()?;
        let discovery = self.discover(&keys).await?;
        let plan = self.plan_for(&discovery);
        Ok((discovery, plan))
    }

    async fn fund(&self, keys: &[AccountKey]) -> Result<ProvisionReport, ProvisionError> {
        let discovery = self.discover(keys).await?;
        let mut report = ProvisionReport {
            accounts: discovery.accounts.len(),
            top_up: discovery.top_up.len(),
            ..ProvisionReport::default()
        };
        if discovery.top_up.is_empty() {
            info!(accounts = report.accounts, "every worker is funded");
            return Ok(report);
        }

        let plan = self.plan_for(&discovery);
        report.funders = plan.funder_count();
        report.txns_per_funder = plan.txns_per_funder();
        report.initial_value = plan.initial_value().clone();
        info!(
            top_up = report.top_up,
            funders = report.funders,
            txns_per_funder = report.txns_per_funder,
            initial_value = %report.initial_value,
            "funding plan ready"
        );

        self.check_donor(&plan).await?;

        let timeout = self.params.transfer_timeout;
        let (seeded, mut sent) =
            waves::seed_funders(&self.submitter, &self.donor, &plan, timeout).await;
        sent.merge(waves::spread(&self.submitter, &plan, &seeded, timeout).await);

        report.transfers = sent.transfers;
        report.failures = sent.failures;
        if let Some(partial) = report.partial_failure() {
            warn!(%partial, "provisioning finished with failures");
        } else {
            info!(transfers = report.transfers, "provisioning finished");
        }
        Ok(report)
    }

    async fn discover(&self, keys: &[AccountKey]) -> Result<Discovery, ProvisionError> {
        let count = self.params.account_count.get().min(keys.len());
        let discovery = discover(
            self.submitter.chain().as_ref(),
            &keys[..count],
            &self.params.min_balance,
            self.params.top_up,
        )
        .await?;
        info!(
            accounts = discovery.accounts.len(),
            top_up = discovery.top_up.len(),
            "discovery finished"
        );
        Ok(discovery)
    }

    fn plan_for(&self, discovery: &Discovery) -> FundingPlan {
        FundingPlan::new(
            discovery.top_up.clone(),
            self.params.parallelism,
            self.params.min_balance.clone(),
            self.submitter.transfer_fee(),
        )
    }

    async fn check_donor(&self, plan: &FundingPlan) -> Result<(), ProvisionError> {
        let required = plan.donor_requirement();
        let available = self
            .submitter
            .chain()
            .get_balance(self.donor.address())
            .await?;
        if available < required {
            return Err(ProvisionError::InsufficientDonorBalance {
                required,
                available,
            });
        }
        Ok(())
    }

    /// Loads the worker keys, dropping the donor if it slipped in, and
    /// generates keys until there are `account_count` of them.
    fn worker_keys(&self) -> Result<Vec<AccountKey>, ProvisionError> {
        let mut keys = if self.workers.exists() {
            self.workers.load(&self.worker_passphrase)?
        } else {
            Vec::new()
        };

        let donor = self.donor.address();
        let before = keys.len();
        keys.retain(|key| &key.address() != donor);
        if keys.len() != before {
            warn!(%donor, "removed donor key from worker keys");
        }

        let wanted = self.params.account_count.get();
        if keys.len() < wanted {
            let missing = wanted - keys.len();
            keys.extend((0..missing).map(|_| AccountKey::generate()));
            info!(generated = missing, total = keys.len(), "generated worker keys");
        }
        Ok(keys)
    }
}
