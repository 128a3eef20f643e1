use std::env;

#[must_use]
pub fn slow_test_env() -> bool {
    env::var("SLOW_TEST_ENV").is_ok_and(|s| s == "true")
}

#[must_use]
pub fn rust_log() -> Option<String> {
    env::var("RUST_LOG").ok()
}

#[must_use]
pub fn loadgen_log_level() -> Option<String> {
    env::var("LOADGEN_LOG_LEVEL").ok()
}

#[must_use]
pub fn loadgen_rpc_url() -> Option<String> {
    env::var("LOADGEN_RPC_URL").ok()
}

#[must_use]
pub fn loadgen_worker_passphrase() -> Option<String> {
    env::var("LOADGEN_WORKER_PASSPHRASE").ok()
}

#[must_use]
pub fn loadgen_donor_passphrase() -> Option<String> {
    env::var("LOADGEN_DONOR_PASSPHRASE").ok()
}

#[must_use]
pub fn loadgen_secs(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|v| v.parse::<u64>().ok())
}
