pub mod provisioning;

pub use provisioning::{
    Discovery, FundingPlan, ProvisionError, ProvisionReport, Provisioner, TransferFailure, Wave,
};
