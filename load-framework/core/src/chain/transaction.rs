use ed25519_dalek::{Signature, Verifier as _, VerifyingKey};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, hex::Hex, serde_as};
use sha2::{Digest as _, Sha256};

use super::{Address, TxHash};
use crate::accounts::address_of;

/// Unsigned transaction as built by the submitter.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub from: Address,
    /// `None` creates a contract from `data`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    pub nonce: u64,
    pub gas_limit: u64,
    #[serde_as(as = "DisplayFromStr")]
    pub gas_price: BigUint,
    #[serde_as(as = "DisplayFromStr")]
    pub value: BigUint,
    #[serde_as(as = "Hex")]
    pub data: Vec<u8>,
}

impl TransactionRequest {
    /// Most the sender can be charged for gas.
    #[must_use]
    pub fn max_fee(&self) -> BigUint {
        &self.gas_price * self.gas_limit
    }

    pub fn signing_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Wire envelope: the request plus the sender's ed25519 public key and the
/// signature over [`TransactionRequest::signing_payload`].
#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub tx: TransactionRequest,
    #[serde_as(as = "Hex")]
    pub public_key: [u8; 32],
    #[serde_as(as = "Hex")]
    pub signature: Vec<u8>,
}

impl SignedTransaction {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    pub fn hash(&self) -> Result<TxHash, serde_json::Error> {
        let digest = Sha256::digest(self.encode()?);
        Ok(TxHash::new(format!("0x{}", hex::encode(digest))))
    }

    /// True when the key matches `tx.from` and the signature covers the
    /// request.
    #[must_use]
    pub fn verify(&self) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.public_key) else {
            return false;
        };
        if address_of(&key) != self.tx.from {
            return false;
        }
        let Ok(bytes) = <[u8; 64]>::try_from(self.signature.as_slice()) else {
            return false;
        };
        let Ok(payload) = self.tx.signing_payload() else {
            return false;
        };
        key.verify(&payload, &Signature::from_bytes(&bytes)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::AccountKey;

    fn request(from: Address) -> TransactionRequest {
        TransactionRequest {
            from,
            to: Some(Address::new("0x00000000000000000000000000000000000000aa")),
            nonce: 3,
            gas_limit: 22_000,
            gas_price: BigUint::from(7u32),
            value: BigUint::from(1_000u32),
            data: vec![1, 2, 3],
        }
    }

    #[test]
    fn signed_envelope_verifies_and_survives_the_wire() {
        let key = AccountKey::generate();
        let signed = key.sign(request(key.address())).unwrap();

        let decoded = SignedTransaction::decode(&signed.encode().unwrap()).unwrap();

        assert!(decoded.verify());
        assert_eq!(decoded.tx, signed.tx);
        assert_eq!(decoded.hash().unwrap(), signed.hash().unwrap());
    }

    #[test]
    fn tampered_request_fails_verification() {
        let key = AccountKey::generate();
        let mut signed = key.sign(request(key.address())).unwrap();
        signed.tx.value = BigUint::from(1_000_000u32);

        assert!(!signed.verify());
    }

    #[test]
    fn signature_from_another_key_fails_verification() {
        let owner = AccountKey::generate();
        let impostor = AccountKey::generate();

        let signed = impostor.sign(request(owner.address())).unwrap();

        assert!(!signed.verify());
    }

    #[test]
    fn max_fee_is_gas_limit_times_price() {
        let key = AccountKey::generate();

        assert_eq!(
            request(key.address()).max_fee(),
            BigUint::from(154_000u32)
        );
    }
}
