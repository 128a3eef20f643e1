pub mod keystore;
mod pool;

use std::fmt;

use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use num_bigint::BigUint;
use sha2::{Digest as _, Sha256};

pub use keystore::{FileKeyStore, KeyStore, KeyStoreError};
pub use pool::{AccountPool, PoolError, PoolSlot};

use crate::chain::{Address, SignedTransaction, TransactionRequest};

const ADDRESS_BYTES: usize = 20;

/// Derives the account address: the trailing 20 bytes of the SHA-256 of the
/// public key, hex encoded with a `0x` prefix.
#[must_use]
pub fn address_of(key: &VerifyingKey) -> Address {
    let digest = Sha256::digest(key.as_bytes());
    Address::new(format!(
        "0x{}",
        hex::encode(&digest[digest.len() - ADDRESS_BYTES..])
    ))
}

/// Signing capability of one account.
#[derive(Clone)]
pub struct AccountKey {
    signing: SigningKey,
}

impl AccountKey {
    #[must_use]
    pub fn generate() -> Self {
        Self::from_secret(rand::random::<[u8; 32]>())
    }

    #[must_use]
    pub fn from_secret(secret: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&secret),
        }
    }

    #[must_use]
    pub fn secret(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    #[must_use]
    pub fn address(&self) -> Address {
        address_of(&self.signing.verifying_key())
    }

    pub fn sign(&self, tx: TransactionRequest) -> Result<SignedTransaction, serde_json::Error> {
        let signature = self.signing.sign(&tx.signing_payload()?);
        Ok(SignedTransaction {
            tx,
            public_key: self.signing.verifying_key().to_bytes(),
            signature: signature.to_bytes().to_vec(),
        })
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountKey")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Keyed identity able to sign and send.
#[derive(Clone, Debug)]
pub struct Account {
    address: Address,
    key: AccountKey,
    balance: Option<BigUint>,
}

impl Account {
    #[must_use]
    pub fn new(key: AccountKey) -> Self {
        Self {
            address: key.address(),
            key,
            balance: None,
        }
    }

    #[must_use]
    pub const fn address(&self) -> &Address {
        &self.address
    }

    #[must_use]
    pub const fn key(&self) -> &AccountKey {
        &self.key
    }

    /// Last balance observed for this account, if any.
    #[must_use]
    pub const fn balance(&self) -> Option<&BigUint> {
        self.balance.as_ref()
    }

    pub fn set_balance(&mut self, balance: BigUint) {
        self.balance = Some(balance);
    }
}

impl From<AccountKey> for Account {
    fn from(key: AccountKey) -> Self {
        Self::new(key)
    }
}
