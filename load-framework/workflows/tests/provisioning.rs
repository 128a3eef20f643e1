use std::{path::Path, sync::Arc};

use load_framework_config::AdapterConfig;
use load_framework_core::{
    AccountKey, Address,
    accounts::{FileKeyStore, KeyStore as _},
    chain::memory::InMemoryChain,
};
use load_framework_workflows::{
    ProvisionError, Provisioner, Wave, provisioning::discover,
};
use num_bigint::BigUint;
use tempfile::TempDir;

const WORKER_PASSPHRASE: &str = "workers";
const DONOR_PASSPHRASE: &str = "donor";
const GAS_PRICE: u32 = 30;
const MIN_BALANCE: u32 = 1_000;

struct Fixture {
    _dir: TempDir,
    chain: Arc<InMemoryChain>,
    workers: FileKeyStore,
    donor: AccountKey,
    config: AdapterConfig,
}

impl Fixture {
    /// Workers keyfile with `workers` fresh keys (none when zero), a funded
    /// donor, and a transfer fee of exactly 30.
    fn new(workers: usize, account_count: usize, parallelism: usize, donor_balance: u32) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let workers_path = dir.path().join("workers.json");
        let donor_path = dir.path().join("donor.json");

        let workers_store = FileKeyStore::new(&workers_path);
        if workers > 0 {
            let keys: Vec<_> = (0..workers).map(|_| AccountKey::generate()).collect();
            workers_store.save(&keys, WORKER_PASSPHRASE).unwrap();
        }
        let donor = AccountKey::generate();
        FileKeyStore::new(&donor_path)
            .save(std::slice::from_ref(&donor), DONOR_PASSPHRASE)
            .unwrap();

        let chain = Arc::new(InMemoryChain::new(BigUint::from(GAS_PRICE)));
        chain.fund(&donor.address(), BigUint::from(donor_balance));

        let config = config(
            &workers_path,
            &donor_path,
            account_count,
            parallelism,
        );

        Self {
            _dir: dir,
            chain,
            workers: workers_store,
            donor,
            config,
        }
    }

    fn worker_keys(&self) -> Vec<AccountKey> {
        self.workers.load(WORKER_PASSPHRASE).unwrap()
    }

    fn addresses(&self) -> Vec<Address> {
        self.worker_keys().iter().map(AccountKey::address).collect()
    }

    async fn provisioner(&self) -> Provisioner {
        Provisioner::from_config(&self.config, self.chain.clone())
            .await
            .unwrap()
    }
}

fn config(workers: &Path, donor: &Path, account_count: usize, parallelism: usize) -> AdapterConfig {
    let yaml = format!(
        r#"
rpc:
  url: http://localhost:8545
  poll_interval: 1
gas:
  transfer_gas_limit: 1
workers:
  path: {workers}
  passphrase: {WORKER_PASSPHRASE}
donor:
  path: {donor}
  passphrase: {DONOR_PASSPHRASE}
provision:
  account_count: {account_count}
  min_balance: "{MIN_BALANCE}"
  parallelism: {parallelism}
  transfer_timeout: 5
"#,
        workers = workers.display(),
        donor = donor.display(),
    );
    AdapterConfig::from_yaml_str(&yaml).unwrap()
}

fn min_balance() -> BigUint {
    BigUint::from(MIN_BALANCE)
}

#[tokio::test]
async fn ten_targets_are_funded_through_five_funders() {
    let fixture = Fixture::new(10, 10, 5, 5 * 2_090);
    let addresses = fixture.addresses();

    let report = fixture.provisioner().await.run().await.unwrap();

    assert_eq!(report.top_up, 10);
    assert_eq!(report.funders, 5);
    assert_eq!(report.txns_per_funder, 1);
    assert_eq!(report.initial_value, BigUint::from(2_060u32));
    assert_eq!(report.transfers, 10);
    assert!(report.partial_failure().is_none());

    assert_eq!(fixture.chain.sent_from(&fixture.donor.address()).len(), 5);
    for funder in &addresses[..5] {
        assert_eq!(fixture.chain.sent_from(funder).len(), 1);
        assert_eq!(fixture.chain.balance_of(funder), BigUint::from(1_030u32));
    }
    for target in &addresses[5..] {
        assert_eq!(fixture.chain.balance_of(target), min_balance());
    }
    assert_eq!(
        fixture.chain.balance_of(&fixture.donor.address()),
        BigUint::default()
    );
}

#[tokio::test]
async fn as_many_targets_as_funders_needs_only_the_first_wave() {
    let fixture = Fixture::new(5, 5, 5, 100_000);
    let addresses = fixture.addresses();

    let report = fixture.provisioner().await.run().await.unwrap();

    assert_eq!(report.txns_per_funder, 0);
    assert_eq!(report.transfers, 5);
    for worker in &addresses {
        assert!(fixture.chain.sent_from(worker).is_empty());
        assert!(fixture.chain.balance_of(worker) >= min_balance());
    }
}

#[tokio::test]
async fn funded_workers_are_left_alone_and_keys_are_kept() {
    let fixture = Fixture::new(4, 4, 2, 100_000);
    let before = fixture.addresses();
    for worker in &before {
        // 850 sits above the default 80% cutoff of 1000.
        fixture.chain.fund(worker, BigUint::from(850u32));
    }
    let keyfile = std::fs::read(&fixture.config.workers.path).unwrap();

    let report = fixture.provisioner().await.run().await.unwrap();

    assert_eq!(report.top_up, 0);
    assert_eq!(report.attempted(), 0);
    assert!(fixture.chain.sent().is_empty());
    // Each save draws a fresh salt, so changed bytes mean the file was rewritten.
    assert_ne!(std::fs::read(&fixture.config.workers.path).unwrap(), keyfile);
    assert_eq!(fixture.addresses(), before);
}

#[tokio::test]
async fn discovery_is_repeatable() {
    let fixture = Fixture::new(6, 6, 2, 0);
    let keys = fixture.worker_keys();
    fixture.chain.fund(&keys[1].address(), BigUint::from(5_000u32));
    fixture.chain.fund(&keys[4].address(), BigUint::from(799u32));
    let policy = fixture.config.provision().unwrap().top_up;

    let first = discover(fixture.chain.as_ref(), &keys, &min_balance(), policy)
        .await
        .unwrap();
    let second = discover(fixture.chain.as_ref(), &keys, &min_balance(), policy)
        .await
        .unwrap();

    let selected = |d: &load_framework_workflows::Discovery| {
        d.top_up
            .iter()
            .map(|a| a.address().clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(selected(&first), selected(&second));
    assert_eq!(first.top_up.len(), 5);
    assert!(!selected(&first).contains(&keys[1].address()));
    assert!(selected(&first).contains(&keys[4].address()));
}

#[tokio::test]
async fn failing_funder_only_loses_its_own_slice() {
    let fixture = Fixture::new(10, 10, 5, 5 * 2_090);
    let addresses = fixture.addresses();
    fixture
        .chain
        .reject_sender(&addresses[0], "insufficient funds for gas * price + value");

    let report = fixture.provisioner().await.run().await.unwrap();

    assert_eq!(report.transfers, 9);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].wave, Wave::Spread);
    assert_eq!(report.failures[0].to, addresses[5]);
    assert!(matches!(
        report.partial_failure(),
        Some(ProvisionError::PartialFailure {
            failed: 1,
            total: 10
        })
    ));
    assert_eq!(fixture.chain.balance_of(&addresses[5]), BigUint::default());
    for target in &addresses[6..] {
        assert_eq!(fixture.chain.balance_of(target), min_balance());
    }
}

#[tokio::test]
async fn refused_target_does_not_stop_its_funder() {
    // Two funders, three transfers each: funder 0 pays workers 2, 3 and 4.
    let fixture = Fixture::new(7, 7, 2, 100_000);
    let addresses = fixture.addresses();
    fixture
        .chain
        .reject_recipient(&addresses[2], "recipient refused");

    let report = fixture.provisioner().await.run().await.unwrap();

    assert_eq!(report.funders, 2);
    assert_eq!(report.txns_per_funder, 3);
    assert_eq!(report.transfers, 6);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].wave, Wave::Spread);
    assert_eq!(report.failures[0].from, addresses[0]);
    assert_eq!(report.failures[0].to, addresses[2]);

    let paid: Vec<_> = fixture
        .chain
        .sent_from(&addresses[0])
        .into_iter()
        .map(|tx| (tx.nonce, tx.to))
        .collect();
    assert_eq!(
        paid,
        vec![(0, Some(addresses[3].clone())), (1, Some(addresses[4].clone()))]
    );
    assert_eq!(fixture.chain.balance_of(&addresses[2]), BigUint::default());
    for target in &addresses[3..] {
        assert_eq!(fixture.chain.balance_of(target), min_balance());
    }
}

#[tokio::test]
async fn short_donor_aborts_before_sending_but_keys_are_written() {
    let fixture = Fixture::new(0, 3, 2, 100);

    let err = fixture.provisioner().await.run().await.unwrap_err();

    assert!(matches!(
        err,
        ProvisionError::InsufficientDonorBalance { .. }
    ));
    assert!(fixture.chain.sent().is_empty());
    assert_eq!(fixture.worker_keys().len(), 3);
}

#[tokio::test]
async fn keyfile_grows_to_the_account_count_without_the_donor() {
    let fixture = Fixture::new(3, 6, 2, 1_000_000);
    let mut seeded = fixture.worker_keys();
    seeded.push(fixture.donor.clone());
    fixture.workers.save(&seeded, WORKER_PASSPHRASE).unwrap();
    let original: Vec<_> = seeded[..3].iter().map(AccountKey::address).collect();

    let report = fixture.provisioner().await.run().await.unwrap();

    let after = fixture.addresses();
    assert_eq!(after.len(), 6);
    assert_eq!(&after[..3], original.as_slice());
    assert!(!after.contains(&fixture.donor.address()));
    assert_eq!(report.accounts, 6);
    assert!(after
        .iter()
        .all(|worker| fixture.chain.balance_of(worker) >= min_balance()));
}

#[tokio::test]
async fn plan_only_sends_and_writes_nothing() {
    let fixture = Fixture::new(0, 7, 3, 1_000_000);

    let (discovery, plan) = fixture.provisioner().await.plan().await.unwrap();

    assert_eq!(discovery.top_up.len(), 7);
    assert_eq!(plan.funder_count(), 3);
    assert_eq!(plan.txns_per_funder(), 2);
    assert!(fixture.chain.sent().is_empty());
    assert!(!fixture.workers.exists());
}
