use std::{ops::Mul as _, sync::LazyLock, time::Duration};

use load_framework_env as lf_env;

pub mod adapter;
pub mod error;
pub mod provision;
pub mod timeouts;

pub use adapter::{AdapterConfig, ContractConfig, GasConfig, KeyfileConfig, RegistryConfig, RpcConfig};
pub use error::ConfigError;
pub use provision::{ProvisionConfig, ProvisionParams, TopUpPolicy};

static IS_SLOW_TEST_ENV: LazyLock<bool> = LazyLock::new(lf_env::slow_test_env);

const SLOW_ENV_TIMEOUT_MULTIPLIER: u32 = 2;

/// In slow test environments like Codecov, use 2x timeout.
#[must_use]
pub fn adjust_timeout(d: Duration) -> Duration {
    if *IS_SLOW_TEST_ENV {
        d.mul(SLOW_ENV_TIMEOUT_MULTIPLIER)
    } else {
        d
    }
}
