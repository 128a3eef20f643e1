use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{DurationMilliSeconds, serde_as};

use crate::chain::{Address, TxHash};

/// One logical contract call submitted for dispatch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub contract: String,
    pub function: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Operation {
    #[must_use]
    pub fn new(contract: impl Into<String>, function: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            contract: contract.into(),
            function: function.into(),
            args,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failed,
    TimedOut,
}

/// Normalized result of one operation. Built once by the submitter and never
/// changed afterwards.
#[serde_as]
#[derive(Clone, Debug, Serialize)]
pub struct Outcome {
    pub operation: Operation,
    pub sender: Option<Address>,
    pub status: OutcomeStatus,
    pub tx_hash: Option<TxHash>,
    pub nonce: Option<u64>,
    pub payload: Option<Value>,
    pub error: Option<String>,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub elapsed: Duration,
}

impl Outcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    /// Failed outcome for an operation that never reached the network.
    #[must_use]
    pub fn not_sent(operation: Operation, sender: Option<Address>, error: impl ToString) -> Self {
        Self {
            operation,
            sender,
            status: OutcomeStatus::Failed,
            tx_hash: None,
            nonce: None,
            payload: None,
            error: Some(error.to_string()),
            elapsed: Duration::ZERO,
        }
    }
}
