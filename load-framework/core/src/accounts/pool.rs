use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use tokio::sync::{Mutex, OwnedMutexGuard};

use super::Account;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("account pool is empty")]
    Exhausted,
}

/// An account handed out by [`AccountPool::next`] together with its position
/// in the pool.
#[derive(Clone, Debug)]
pub struct PoolSlot {
    pub index: usize,
    pub account: Arc<Account>,
    lock: Arc<Mutex<()>>,
}

impl PoolSlot {
    /// Exclusive use of the account's nonce stream. Held for as long as
    /// anything signs from the account, across concurrent batches.
    pub async fn acquire(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.lock).lock_owned().await
    }
}

/// Sender accounts of one benchmark round, handed out round-robin.
///
/// The cursor is the only state shared between concurrent callers; each
/// `next()` reads and advances it in one atomic step, so a full cycle of `N`
/// calls visits every account exactly once regardless of interleaving.
#[derive(Debug)]
pub struct AccountPool {
    accounts: Vec<Arc<Account>>,
    locks: Vec<Arc<Mutex<()>>>,
    cursor: AtomicUsize,
}

impl AccountPool {
    #[must_use]
    pub fn new(accounts: Vec<Account>) -> Self {
        let locks = accounts.iter().map(|_| Arc::default()).collect();
        Self {
            accounts: accounts.into_iter().map(Arc::new).collect(),
            locks,
            cursor: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.accounts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    #[must_use]
    pub fn accounts(&self) -> &[Arc<Account>] {
        &self.accounts
    }

    /// Position the next call to [`Self::next`] will hand out.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn next(&self) -> Result<PoolSlot, PoolError> {
        let size = self.size();
        if size == 0 {
            return Err(PoolError::Exhausted);
        }

        let index = match self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some((current + 1) % size)
            }) {
            Ok(previous) | Err(previous) => previous,
        };

        Ok(PoolSlot {
            index,
            account: Arc::clone(&self.accounts[index]),
            lock: Arc::clone(&self.locks[index]),
        })
    }
}
