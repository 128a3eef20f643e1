use std::{num::NonZeroUsize, time::Duration};

use num_bigint::BigUint;
use serde::Deserialize;
use serde_with::{DisplayFromStr, DurationSeconds, serde_as};

use crate::{ConfigError, timeouts};

pub const BASIS_POINTS_SCALE: u32 = 10_000;
pub const DEFAULT_TOP_UP_BASIS_POINTS: u32 = 8_000;
pub const DEFAULT_PARALLELISM: usize = 5;

#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct ProvisionConfig {
    #[serde(default)]
    pub account_count: Option<usize>,
    /// Balance every worker should hold, in the smallest unit.
    #[serde_as(as = "DisplayFromStr")]
    pub min_balance: BigUint,
    #[serde(default)]
    pub top_up: TopUpPolicy,
    /// Number of funders seeded by the donor.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "timeouts::transfer_timeout")]
    pub transfer_timeout: Duration,
}

/// Validated provisioning parameters.
#[derive(Clone, Debug)]
pub struct ProvisionParams {
    pub account_count: NonZeroUsize,
    pub min_balance: BigUint,
    pub top_up: TopUpPolicy,
    pub parallelism: NonZeroUsize,
    pub transfer_timeout: Duration,
}

const fn default_parallelism() -> usize {
    DEFAULT_PARALLELISM
}

impl ProvisionConfig {
    /// Checks every field that is set. A missing `account_count` is allowed
    /// here since callers may supply it later.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.account_count == Some(0) {
            return Err(ConfigError::invalid(
                "provision.account_count",
                "must be at least 1",
            ));
        }
        if self.parallelism == 0 {
            return Err(ConfigError::invalid(
                "provision.parallelism",
                "must be at least 1",
            ));
        }
        if self.min_balance == BigUint::default() {
            return Err(ConfigError::invalid(
                "provision.min_balance",
                "must be greater than zero",
            ));
        }
        self.top_up.validate()
    }

    pub fn validated(&self) -> Result<ProvisionParams, ConfigError> {
        self.validate()?;
        let account_count = self
            .account_count
            .and_then(NonZeroUsize::new)
            .ok_or(ConfigError::Missing("provision.account_count"))?;
        let parallelism = NonZeroUsize::new(self.parallelism)
            .ok_or_else(|| ConfigError::invalid("provision.parallelism", "must be at least 1"))?;

        Ok(ProvisionParams {
            account_count,
            min_balance: self.min_balance.clone(),
            top_up: self.top_up,
            parallelism,
            transfer_timeout: self.transfer_timeout,
        })
    }
}

/// Decides which accounts are low enough to be refunded.
///
/// `Threshold` refunds accounts strictly below `min_balance * basis_points /
/// 10_000`, so accounts that merely drifted close to the minimum are left
/// alone. `BelowMinimum` refunds anything strictly below `min_balance`.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum TopUpPolicy {
    Threshold { basis_points: u32 },
    BelowMinimum,
}

impl Default for TopUpPolicy {
    fn default() -> Self {
        Self::Threshold {
            basis_points: DEFAULT_TOP_UP_BASIS_POINTS,
        }
    }
}

impl TopUpPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            Self::Threshold { basis_points } if basis_points == 0 => Err(ConfigError::invalid(
                "provision.top_up.basis_points",
                "must be greater than zero",
            )),
            Self::Threshold { basis_points } if basis_points >= BASIS_POINTS_SCALE => {
                Err(ConfigError::invalid(
                    "provision.top_up.basis_points",
                    format!("must be below {BASIS_POINTS_SCALE}; use `below_minimum` instead"),
                ))
            }
            _ => Ok(()),
        }
    }

    #[must_use]
    pub fn cutoff(&self, min_balance: &BigUint) -> BigUint {
        match *self {
            Self::Threshold { basis_points } => min_balance * basis_points / BASIS_POINTS_SCALE,
            Self::BelowMinimum => min_balance.clone(),
        }
    }

    #[must_use]
    pub fn needs_top_up(&self, balance: &BigUint, min_balance: &BigUint) -> bool {
        *balance < self.cutoff(min_balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> ProvisionConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn missing_account_count_is_a_config_error() {
        let err = config("min_balance: \"1000\"").validated().unwrap_err();

        assert!(matches!(
            err,
            ConfigError::Missing("provision.account_count")
        ));
    }

    #[test]
    fn account_count_may_be_supplied_later() {
        let config = config("min_balance: \"1000\"");

        assert!(config.validate().is_ok());
        assert!(config.validated().is_err());
    }

    #[test]
    fn threshold_policy_leaves_nearly_funded_accounts_alone() {
        let policy = TopUpPolicy::default();
        let min = BigUint::from(1_000u32);

        assert_eq!(policy.cutoff(&min), BigUint::from(800u32));
        assert!(policy.needs_top_up(&BigUint::from(799u32), &min));
        assert!(!policy.needs_top_up(&BigUint::from(800u32), &min));
        assert!(!policy.needs_top_up(&BigUint::from(950u32), &min));
    }

    #[test]
    fn below_minimum_policy_refunds_anything_short() {
        let policy = TopUpPolicy::BelowMinimum;
        let min = BigUint::from(1_000u32);

        assert!(policy.needs_top_up(&BigUint::from(950u32), &min));
        assert!(!policy.needs_top_up(&min, &min));
    }

    #[test]
    fn parses_tagged_policies() {
        let params = config(
            r#"
account_count: 10
min_balance: "1000"
top_up:
  policy: below_minimum
"#,
        )
        .validated()
        .unwrap();
        assert_eq!(params.top_up, TopUpPolicy::BelowMinimum);

        let params = config(
            r#"
account_count: 10
min_balance: "1000"
top_up:
  policy: threshold
  basis_points: 9000
"#,
        )
        .validated()
        .unwrap();
        assert_eq!(
            params.top_up,
            TopUpPolicy::Threshold { basis_points: 9000 }
        );
        assert_eq!(params.parallelism.get(), DEFAULT_PARALLELISM);
    }

    #[test]
    fn rejects_threshold_at_or_above_one() {
        let err = TopUpPolicy::Threshold {
            basis_points: BASIS_POINTS_SCALE,
        }
        .validate()
        .unwrap_err();

        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn rejects_zero_parallelism() {
        let err = config(
            r#"
account_count: 10
min_balance: "1000"
parallelism: 0
"#,
        )
        .validated()
        .unwrap_err();

        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "provision.parallelism",
                ..
            }
        ));
    }
}
