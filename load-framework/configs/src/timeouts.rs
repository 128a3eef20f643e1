use std::time::Duration;

use load_framework_env as lf_env;

use crate::adjust_timeout;

pub const CONFIRMATION_TIMEOUT_SECS: u64 = 100;
pub const RPC_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const TRANSFER_TIMEOUT_SECS: u64 = 120;
pub const RECEIPT_POLL_INTERVAL_MILLIS: u64 = 500;

fn env_duration(key: &str, default: u64) -> Duration {
    lf_env::loadgen_secs(key)
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default))
}

/// Upper bound for a dispatched operation to reach its receipt when the
/// harness does not pass one.
pub fn confirmation_timeout() -> Duration {
    adjust_timeout(env_duration(
        "LOADGEN_CONFIRMATION_TIMEOUT_SECS",
        CONFIRMATION_TIMEOUT_SECS,
    ))
}

pub fn rpc_request_timeout() -> Duration {
    env_duration("LOADGEN_RPC_REQUEST_TIMEOUT_SECS", RPC_REQUEST_TIMEOUT_SECS)
}

pub fn transfer_timeout() -> Duration {
    adjust_timeout(env_duration(
        "LOADGEN_TRANSFER_TIMEOUT_SECS",
        TRANSFER_TIMEOUT_SECS,
    ))
}

#[must_use]
pub const fn receipt_poll_interval() -> Duration {
    Duration::from_millis(RECEIPT_POLL_INTERVAL_MILLIS)
}
