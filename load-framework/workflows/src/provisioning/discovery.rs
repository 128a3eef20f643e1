use std::sync::Arc;

use futures::future::try_join_all;
use load_framework_config::TopUpPolicy;
use load_framework_core::{Account, AccountKey, ChainClient, ChainError};
use num_bigint::BigUint;
use tracing::debug;

/// Balances of every target at discovery time and the subset that needs
/// funding, in key order.
#[derive(Clone, Debug)]
pub struct Discovery {
    pub accounts: Vec<Arc<Account>>,
    pub top_up: Vec<Arc<Account>>,
}

/// Reads every balance and keeps the accounts the policy considers low.
/// Read-only, so repeating it without funding in between selects the same
/// set.
pub async fn discover(
    chain: &dyn ChainClient,
    keys: &[AccountKey],
    min_balance: &BigUint,
    policy: TopUpPolicy,
) -> Result<Discovery, ChainError> {
    let accounts = try_join_all(keys.iter().cloned().map(|key| async move {
        let mut account = Account::new(key);
        let balance = chain.get_balance(account.address()).await?;
        account.set_balance(balance);
        Ok::<_, ChainError>(Arc::new(account))
    }))
    .await?;

    let top_up: Vec<_> = accounts
        .iter()
        .filter(|account| {
            let balance = account.balance().cloned().unwrap_or_default();
            let low = policy.needs_top_up(&balance, min_balance);
            debug!(address = %account.address(), %balance, low, "balance checked");
            low
        })
        .cloned()
        .collect();

    Ok(Discovery { accounts, top_up })
}
