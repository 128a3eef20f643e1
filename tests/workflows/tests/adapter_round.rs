use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use load_framework_config::AdapterConfig;
use load_framework_core::{
    Adapter as _, AccountKey, Address, ChainAdapter, ContextError, Operation, OutcomeStatus,
    accounts::{FileKeyStore, KeyStore as _},
    chain::memory::{ContractHandler, InMemoryChain},
    contracts::{CallData, ContractError, ContractRegistry},
};
use load_framework_workflows::Provisioner;
use num_bigint::BigUint;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::watch;

const REGISTRY: &str = "0x00000000000000000000000000000000000000aa";
const SIMPLE: &str = "0x00000000000000000000000000000000000000bb";
const ZERO: &str = "0x0000000000000000000000000000000000000000";
const PASSPHRASE: &str = "round";
const SIMPLE_CODE: &str = "0x6080604052";

/// A node with a name registry and a key/value "simple" contract.
fn network(register_simple: bool) -> Arc<InMemoryChain> {
    let chain = Arc::new(InMemoryChain::default());

    chain.register_contract(
        Address::new(REGISTRY),
        Arc::new(move |_caller: Option<&Address>, call: &CallData| -> Result<Value, String> {
            let known = call.function == "lookup" && call.args == [json!("simple")];
            Ok(json!(if known && register_simple { SIMPLE } else { ZERO }))
        }),
    );

    chain.register_contract(Address::new(SIMPLE), simple_store());

    chain
}

/// Key/value contract: `open(key, value)` stores, `query(key)` reads.
fn simple_store() -> ContractHandler {
    let store: Arc<Mutex<BTreeMap<String, Value>>> = Arc::default();
    Arc::new(move |_caller: Option<&Address>, call: &CallData| -> Result<Value, String> {
        let mut store = store.lock().map_err(|err| err.to_string())?;
        let key = call.args[0].as_str().unwrap_or_default().to_owned();
        match call.function.as_str() {
            "open" => {
                store.insert(key, call.args[1].clone());
                Ok(Value::Null)
            }
            "query" => Ok(store.get(&key).cloned().unwrap_or(Value::Null)),
            other => Err(format!("unknown function {other}")),
        }
    })
}

/// A node whose registry starts empty and accepts `bind`, with the simple
/// contract's code ready to deploy.
fn bare_network() -> Arc<InMemoryChain> {
    let chain = Arc::new(InMemoryChain::default());
    let names: Arc<Mutex<BTreeMap<String, Value>>> = Arc::default();
    chain.register_contract(
        Address::new(REGISTRY),
        Arc::new(move |_caller: Option<&Address>, call: &CallData| -> Result<Value, String> {
            let mut names = names.lock().map_err(|err| err.to_string())?;
            let label = call.args[0].as_str().unwrap_or_default().to_owned();
            match call.function.as_str() {
                "lookup" => Ok(names.get(&label).cloned().unwrap_or(json!(ZERO))),
                "bind" => {
                    names.insert(label, call.args[1].clone());
                    Ok(Value::Null)
                }
                other => Err(format!("unknown function {other}")),
            }
        }),
    );
    chain.register_code(vec![0x60, 0x80, 0x60, 0x40, 0x52], simple_store());
    chain
}

fn write_artifact(dir: &Path) -> PathBuf {
    let path = dir.join("simple.json");
    let artifact = json!({
        "name": "simple",
        "bytecode": SIMPLE_CODE,
        "abi": [
            { "name": "open", "type": "function",
              "inputs": [{ "name": "account", "type": "string" }, { "name": "money", "type": "uint256" }] },
            { "name": "query", "type": "function", "stateMutability": "view",
              "inputs": [{ "name": "account", "type": "string" }] }
        ]
    });
    std::fs::write(&path, artifact.to_string()).unwrap();
    path
}

fn round_config(dir: &Path, extra: &str) -> AdapterConfig {
    let artifact = write_artifact(dir);
    let yaml = format!(
        r#"
rpc:
  url: http://localhost:8545
  poll_interval: 1
gas:
  call_gas_limit: 100
  transfer_gas_limit: 21
workers:
  path: {workers}
  passphrase: {PASSPHRASE}
registry:
  address: "{REGISTRY}"
contracts:
  simple:
    path: {artifact}
{extra}"#,
        workers = dir.join("workers.json").display(),
        artifact = artifact.display(),
    );
    AdapterConfig::from_yaml_str(&yaml).unwrap()
}

fn seed_workers(chain: &InMemoryChain, dir: &Path, count: usize) -> Vec<Address> {
    let keys: Vec<_> = (0..count).map(|_| AccountKey::generate()).collect();
    FileKeyStore::new(dir.join("workers.json"))
        .save(&keys, PASSPHRASE)
        .unwrap();
    keys.iter()
        .map(|key| {
            chain.fund(&key.address(), BigUint::from(1_000_000u32));
            key.address()
        })
        .collect()
}

fn opens(count: usize) -> Vec<Operation> {
    (0..count)
        .map(|n| Operation::new("simple", "open", vec![json!(format!("acct{n}")), json!(n)]))
        .collect()
}

#[tokio::test]
async fn a_round_dispatches_queries_and_releases() {
    let dir = TempDir::new().unwrap();
    let chain = network(true);
    let workers = seed_workers(&chain, dir.path(), 4);
    let config = round_config(dir.path(), "");
    let adapter = ChainAdapter::with_chain(chain.clone());

    let context = adapter.init_context(&config).await.unwrap();
    assert_eq!(context.pool().size(), 4);

    let outcomes = adapter.dispatch(&context, opens(8), 5).await.unwrap();

    assert_eq!(outcomes.len(), 8);
    for (position, outcome) in outcomes.iter().enumerate() {
        assert_eq!(outcome.status, OutcomeStatus::Success, "{outcome:?}");
        assert_eq!(outcome.operation.args[0], json!(format!("acct{position}")));
        assert_eq!(outcome.sender.as_ref(), Some(&workers[position % 4]));
        assert!(outcome.tx_hash.is_some());
    }
    for worker in &workers {
        let nonces: Vec<_> = chain.sent_from(worker).iter().map(|tx| tx.nonce).collect();
        assert_eq!(nonces, vec![0, 1]);
    }

    let sent_before = chain.sent().len();
    let answer = adapter
        .query(&context, "simple", "query", json!("acct3"))
        .await;
    assert!(answer.is_success());
    assert_eq!(answer.payload, Some(json!(3)));
    assert_eq!(chain.sent().len(), sent_before);

    adapter.release_context(context).await;
}

#[tokio::test]
async fn rounds_do_not_share_a_cursor() {
    let dir = TempDir::new().unwrap();
    let chain = network(true);
    let workers = seed_workers(&chain, dir.path(), 3);
    let config = round_config(dir.path(), "");
    let adapter = ChainAdapter::with_chain(chain.clone());

    let first = adapter.init_context(&config).await.unwrap();
    adapter.dispatch(&first, opens(2), 5).await.unwrap();
    adapter.release_context(first).await;

    let second = adapter.init_context(&config).await.unwrap();
    let outcomes = adapter.dispatch(&second, opens(1), 5).await.unwrap();

    assert_eq!(outcomes[0].sender.as_ref(), Some(&workers[0]));
    adapter.release_context(second).await;
}

#[tokio::test]
async fn unregistered_contract_fails_context_setup() {
    let dir = TempDir::new().unwrap();
    let chain = network(false);
    seed_workers(&chain, dir.path(), 2);
    let config = round_config(dir.path(), "");

    let result = ChainAdapter::with_chain(chain).init_context(&config).await;

    assert!(matches!(
        result,
        Err(ContextError::Contract(ContractError::Unresolved(id))) if id == "simple"
    ));
}

#[tokio::test]
async fn missing_keyfile_fails_context_setup() {
    let dir = TempDir::new().unwrap();
    let config = round_config(dir.path(), "");

    let result = ChainAdapter::with_chain(network(true))
        .init_context(&config)
        .await;

    assert!(matches!(result, Err(ContextError::KeyStore(_))));
}

#[tokio::test]
async fn cancelled_round_reports_every_operation_unsent() {
    let dir = TempDir::new().unwrap();
    let chain = network(true);
    seed_workers(&chain, dir.path(), 2);
    let config = round_config(dir.path(), "");
    let context = ChainAdapter::with_chain(chain.clone())
        .init_context(&config)
        .await
        .unwrap();
    let (cancel, cancelled) = watch::channel(true);

    let outcomes = context.dispatch_until(opens(4), 5, cancelled).await.unwrap();

    assert_eq!(outcomes.len(), 4);
    assert!(outcomes.iter().all(|o| o.status == OutcomeStatus::Failed));
    assert!(chain.sent().is_empty());
    drop(cancel);
    context.release();
}

#[tokio::test]
async fn provisioned_workers_carry_a_round() {
    let dir = TempDir::new().unwrap();
    let chain = network(true);
    let donor = AccountKey::generate();
    let donor_path = dir.path().join("donor.json");
    FileKeyStore::new(&donor_path)
        .save(std::slice::from_ref(&donor), "donor")
        .unwrap();
    chain.fund(&donor.address(), BigUint::from(1_000_000u32));

    let provision = format!(
        r#"donor:
  path: {donor}
  passphrase: donor
provision:
  account_count: 6
  min_balance: "10000"
  parallelism: 2
  transfer_timeout: 5
"#,
        donor = donor_path.display(),
    );
    let config = round_config(dir.path(), &provision);

    let report = Provisioner::from_config(&config, chain.clone())
        .await
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(report.top_up, 6);
    assert!(report.partial_failure().is_none());

    let adapter = ChainAdapter::with_chain(chain.clone());
    let context = adapter.init_context(&config).await.unwrap();
    assert_eq!(context.pool().size(), 6);

    let outcomes = adapter.dispatch(&context, opens(12), 5).await.unwrap();

    assert!(outcomes.iter().all(|o| o.is_success()));
    assert!(!context
        .pool()
        .accounts()
        .iter()
        .any(|account| account.address() == &donor.address()));
    adapter.release_context(context).await;
}

#[tokio::test]
async fn installed_contract_carries_a_round() {
    let dir = TempDir::new().unwrap();
    let chain = bare_network();
    seed_workers(&chain, dir.path(), 2);
    let donor = AccountKey::generate();
    let donor_path = dir.path().join("donor.json");
    FileKeyStore::new(&donor_path)
        .save(std::slice::from_ref(&donor), "donor")
        .unwrap();
    chain.fund(&donor.address(), BigUint::from(1_000_000u32));
    let provision = format!(
        r#"donor:
  path: {donor}
  passphrase: donor
provision:
  account_count: 2
  min_balance: "10000"
"#,
        donor = donor_path.display(),
    );
    let config = round_config(dir.path(), &provision);
    let adapter = ChainAdapter::with_chain(chain.clone());
    assert!(matches!(
        adapter.init_context(&config).await,
        Err(ContextError::Contract(ContractError::Unresolved(_)))
    ));

    let provisioner = Provisioner::from_config(&config, chain.clone())
        .await
        .unwrap();
    let installed = ContractRegistry::install(
        &config,
        provisioner.submitter(),
        provisioner.donor(),
        std::time::Duration::from_secs(5),
    )
    .await
    .unwrap();
    assert!(installed[0].deployed);

    let context = adapter.init_context(&config).await.unwrap();
    let outcomes = adapter.dispatch(&context, opens(2), 5).await.unwrap();
    assert!(outcomes.iter().all(|o| o.is_success()));
    let answer = adapter
        .query(&context, "simple", "query", json!("acct1"))
        .await;
    assert_eq!(answer.payload, Some(json!(1)));
    adapter.release_context(context).await;
}
