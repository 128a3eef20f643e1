use std::{num::NonZeroUsize, sync::Arc};

use load_framework_core::Account;
use num_bigint::BigUint;

/// Two-level funding tree: the donor seeds `K` funders taken from the front
/// of the top-up list, and funder `i` forwards `min_balance` to its slice of
/// the remaining targets.
#[derive(Clone, Debug)]
pub struct FundingPlan {
    min_balance: BigUint,
    transfer_fee: BigUint,
    txns_per_funder: usize,
    initial_value: BigUint,
    funders: Vec<Arc<Account>>,
    slices: Vec<Vec<Arc<Account>>>,
}

/// Transfers each funder makes in wave 2: `ceil((targets - K) / K)`, zero
/// when the funders are all the targets there are.
#[must_use]
pub fn txns_per_funder(targets: usize, funders: usize) -> usize {
    if funders == 0 || targets <= funders {
        return 0;
    }
    (targets - funders).div_ceil(funders)
}

/// Amount the donor sends each funder: enough to keep `min_balance` itself
/// and forward `min_balance` to each of its targets, gas included for every
/// hop.
#[must_use]
pub fn initial_value(min_balance: &BigUint, transfer_fee: &BigUint, txns: usize) -> BigUint {
    (min_balance + transfer_fee) * (txns + 1)
}

impl FundingPlan {
    #[must_use]
    pub fn new(
        top_up: Vec<Arc<Account>>,
        parallelism: NonZeroUsize,
        min_balance: BigUint,
        transfer_fee: BigUint,
    ) -> Self {
        let funder_count = parallelism.get().min(top_up.len());
        let txns = txns_per_funder(top_up.len(), funder_count);
        let initial_value = initial_value(&min_balance, &transfer_fee, txns);

        let mut remaining = top_up;
        let targets = remaining.split_off(funder_count);
        let funders = remaining;
        let slices = (0..funder_count)
            .map(|i| {
                let start = (i * txns).min(targets.len());
                let end = ((i + 1) * txns).min(targets.len());
                targets[start..end].to_vec()
            })
            .collect();

        Self {
            min_balance,
            transfer_fee,
            txns_per_funder: txns,
            initial_value,
            funders,
            slices,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.funders.is_empty()
    }

    #[must_use]
    pub fn funders(&self) -> &[Arc<Account>] {
        &self.funders
    }

    /// Targets funder `index` forwards to in wave 2.
    #[must_use]
    pub fn slice(&self, index: usize) -> &[Arc<Account>] {
        self.slices
            .get(index)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn funder_count(&self) -> usize {
        self.funders.len()
    }

    /// Accounts topped up by the plan, funders included.
    #[must_use]
    pub fn account_count(&self) -> usize {
        self.funders.len() + self.slices.iter().map(Vec::len).sum::<usize>()
    }

    #[must_use]
    pub const fn txns_per_funder(&self) -> usize {
        self.txns_per_funder
    }

    #[must_use]
    pub const fn initial_value(&self) -> &BigUint {
        &self.initial_value
    }

    #[must_use]
    pub const fn min_balance(&self) -> &BigUint {
        &self.min_balance
    }

    #[must_use]
    pub const fn transfer_fee(&self) -> &BigUint {
        &self.transfer_fee
    }

    /// What wave 1 costs the donor: `K * (initial_value + fee)`.
    #[must_use]
    pub fn donor_requirement(&self) -> BigUint {
        (&self.initial_value + &self.transfer_fee) * self.funders.len()
    }
}
