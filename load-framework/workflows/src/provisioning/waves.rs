use std::{fmt, sync::Arc, time::Duration};

use futures::future::join_all;
use load_framework_core::{Account, Address, TransactionSubmitter};
use tracing::{info, warn};

use super::plan::FundingPlan;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wave {
    /// Donor to funders.
    Seed,
    /// Funders to the remaining targets.
    Spread,
}

impl fmt::Display for Wave {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seed => f.write_str("seed"),
            Self::Spread => f.write_str("spread"),
        }
    }
}

/// A transfer that did not land; the target stays short until the next run.
#[derive(Clone, Debug)]
pub struct TransferFailure {
    pub wave: Wave,
    pub from: Address,
    pub to: Address,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct WaveReport {
    pub transfers: usize,
    pub failures: Vec<TransferFailure>,
}

impl WaveReport {
    pub(crate) fn merge(&mut self, other: Self) {
        self.transfers += other.transfers;
        self.failures.extend(other.failures);
    }
}

/// Wave 1: the donor pays `initial_value` to each funder, one confirmed
/// transfer at a time from its single nonce stream. Returns which funders
/// were seeded, by plan index.
pub async fn seed_funders(
    submitter: &TransactionSubmitter,
    donor: &Account,
    plan: &FundingPlan,
    timeout: Duration,
) -> (Vec<bool>, WaveReport) {
    let mut seeded = Vec::with_capacity(plan.funder_count());
    let mut report = WaveReport::default();

    for funder in plan.funders() {
        match submitter
            .transfer(donor, funder.address(), plan.initial_value().clone(), timeout)
            .await
        {
            Ok(confirmation) => {
                info!(
                    funder = %funder.address(),
                    tx_hash = %confirmation.tx_hash,
                    value = %plan.initial_value(),
                    "funder seeded"
                );
                report.transfers += 1;
                seeded.push(true);
            }
            Err(err) => {
                warn!(funder = %funder.address(), %err, "failed to seed funder");
                report.failures.push(TransferFailure {
                    wave: Wave::Seed,
                    from: donor.address().clone(),
                    to: funder.address().clone(),
                    reason: err.to_string(),
                });
                seeded.push(false);
            }
        }
    }

    (seeded, report)
}

/// Wave 2: every seeded funder forwards `min_balance` to its slice, funders
/// concurrently, each funder's sends in order. Slices of unseeded funders are
/// recorded as failures without sending.
pub async fn spread(
    submitter: &TransactionSubmitter,
    plan: &FundingPlan,
    seeded: &[bool],
    timeout: Duration,
) -> WaveReport {
    let runs = plan
        .funders()
        .iter()
        .enumerate()
        .map(|(index, funder)| {
            let is_seeded = seeded.get(index).copied().unwrap_or(false);
            forward(submitter, plan, funder, plan.slice(index), is_seeded, timeout)
        });

    let mut report = WaveReport::default();
    for funder_report in join_all(runs).await {
        report.merge(funder_report);
    }
    report
}

async fn forward(
    submitter: &TransactionSubmitter,
    plan: &FundingPlan,
    funder: &Arc<Account>,
    targets: &[Arc<Account>],
    seeded: bool,
    timeout: Duration,
) -> WaveReport {
    let mut report = WaveReport::default();

    if !seeded {
        report.failures = targets
            .iter()
            .map(|target| TransferFailure {
                wave: Wave::Spread,
                from: funder.address().clone(),
                to: target.address().clone(),
                reason: "funder was not seeded".to_owned(),
            })
            .collect();
        return report;
    }

    for target in targets {
        match submitter
            .transfer(funder, target.address(), plan.min_balance().clone(), timeout)
            .await
        {
            Ok(_) => report.transfers += 1,
            Err(err) => {
                warn!(
                    funder = %funder.address(),
                    target = %target.address(),
                    %err,
                    "transfer failed, skipping target"
                );
                report.failures.push(TransferFailure {
                    wave: Wave::Spread,
                    from: funder.address().clone(),
                    to: target.address().clone(),
                    reason: err.to_string(),
                });
            }
        }
    }

    info!(
        funder = %funder.address(),
        sent = report.transfers,
        failed = report.failures.len(),
        "funder finished"
    );
    report
}
