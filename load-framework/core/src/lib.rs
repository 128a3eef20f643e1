pub mod accounts;
pub mod chain;
pub mod context;
pub mod contracts;
pub mod dispatcher;
pub mod operation;
pub mod submitter;

pub use accounts::{Account, AccountKey, AccountPool, PoolError};
pub use chain::{Address, ChainClient, ChainError, TxHash};
pub use context::{Adapter, ChainAdapter, Context, ContextError};
pub use dispatcher::{DispatchError, Dispatcher};
pub use operation::{Operation, Outcome, OutcomeStatus};
pub use submitter::{SubmissionError, SubmitterSettings, TransactionSubmitter, TxState};
