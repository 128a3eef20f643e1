use std::{path::PathBuf, sync::Arc};

use anyhow::{Context as _, bail};
use clap::Parser;
use load_framework_config::{AdapterConfig, timeouts};
use load_framework_core::{
    chain::RpcClient,
    contracts::{ContractRegistry, Installed},
};
use load_framework_env as lf_env;
use load_framework_workflows::{Discovery, FundingPlan, ProvisionReport, Provisioner};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Generate, discover and fund load-generation worker accounts")]
struct Args {
    /// Adapter config (YAML) with `workers`, `donor` and `provision` sections.
    #[arg(long, short)]
    config: PathBuf,
    /// Overrides `provision.account_count`.
    #[arg(long)]
    accounts: Option<usize>,
    /// Overrides `provision.parallelism`.
    #[arg(long)]
    parallelism: Option<usize>,
    /// Print the funding plan without sending anything.
    #[arg(long)]
    plan_only: bool,
    /// Deploy configured contracts that are not registered yet, from the
    /// donor account, before funding workers.
    #[arg(long, conflicts_with = "plan_only")]
    install_contracts: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = load_config(&args)?;
    let chain = RpcClient::from_config(&config.rpc)
        .with_context(|| format!("connecting to {}", config.rpc.url))?;
    let provisioner = Provisioner::from_config(&config, Arc::new(chain))
        .await
        .context("preparing provisioner")?;

    if args.plan_only {
        let (discovery, plan) = provisioner.plan().await.context("planning top-ups")?;
        print_plan(&discovery, &plan);
        return Ok(());
    }

    if args.install_contracts {
        let installed = ContractRegistry::install(
            &config,
            provisioner.submitter(),
            provisioner.donor(),
            timeouts::confirmation_timeout(),
        )
        .await
        .context("installing contracts")?;
        print_installed(&installed);
    }

    let report = provisioner.run().await.context("provisioning workers")?;
    print_report(&report);
    if let Some(partial) = report.partial_failure() {
        bail!(partial);
    }
    Ok(())
}

fn init_tracing() {
    let directives = lf_env::rust_log()
        .or_else(lf_env::loadgen_log_level)
        .unwrap_or_else(|| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directives))
        .with_target(false)
        .init();
}

fn load_config(args: &Args) -> anyhow::Result<AdapterConfig> {
    let mut config = AdapterConfig::load_from_file(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;

    let Some(provision) = config.provision.as_mut() else {
        bail!("{} has no `provision` section", args.config.display());
    };
    if let Some(accounts) = args.accounts {
        provision.account_count = Some(accounts);
    }
    if let Some(parallelism) = args.parallelism {
        provision.parallelism = parallelism;
    }
    config.validate().context("applying command line overrides")?;

    info!(config = %args.config.display(), rpc = %config.rpc.url, "config loaded");
    Ok(config)
}

fn print_plan(discovery: &Discovery, plan: &FundingPlan) {
    println!("workers:          {}", discovery.accounts.len());
    println!("below cutoff:     {}", discovery.top_up.len());
    if plan.is_empty() {
        println!("nothing to fund");
        return;
    }
    println!("funders:          {}", plan.funder_count());
    println!("txns per funder:  {}", plan.txns_per_funder());
    println!("initial value:    {}", plan.initial_value());
    println!("donor needs:      {}", plan.donor_requirement());
}

fn print_installed(installed: &[Installed]) {
    for contract in installed {
        let action = if contract.deployed { "deployed" } else { "kept" };
        println!("{action:<9} {} at {}", contract.id, contract.address);
    }
}

fn print_report(report: &ProvisionReport) {
    println!(
        "funded {} of {} workers below cutoff ({} transfers, {} failed)",
        report.top_up.saturating_sub(report.failures.len()),
        report.top_up,
        report.transfers,
        report.failures.len(),
    );
    for failure in &report.failures {
        println!(
            "  [{}] {} -> {}: {}",
            failure.wave, failure.from, failure.to, failure.reason
        );
    }
}
