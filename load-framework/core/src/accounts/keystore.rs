//! Encrypted keyfile storage for worker and donor keys.
//!
//! The keyfile is a JSON envelope holding a random salt, a ChaCha20-Poly1305
//! nonce and the ciphertext of the hex encoded secrets. The symmetric key is
//! derived from the passphrase with HKDF-SHA256.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use chacha20poly1305::{
    ChaCha20Poly1305, KeyInit as _, Nonce,
    aead::{Aead as _, AeadCore as _, OsRng},
};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

use super::AccountKey;

const KEYFILE_VERSION: u32 = 1;
const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;
const HKDF_INFO: &[u8] = b"load-framework-keystore-v1";

#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("keyfile {path} not found")]
    NotFound { path: PathBuf },
    #[error("keyfile {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("keyfile {path} is malformed: {reason}")]
    Malformed { path: PathBuf, reason: String },
    #[error("unsupported keyfile version {0}")]
    UnsupportedVersion(u32),
    #[error("failed to decrypt keyfile (wrong passphrase?)")]
    Decrypt,
    #[error("keystore crypto failure: {0}")]
    Crypto(String),
}

/// Loads and persists account keys. Implementations own the file format and
/// the encryption scheme.
pub trait KeyStore: Send + Sync {
    fn exists(&self) -> bool;

    fn load(&self, passphrase: &str) -> Result<Vec<AccountKey>, KeyStoreError>;

    fn save(&self, keys: &[AccountKey], passphrase: &str) -> Result<(), KeyStoreError>;
}

#[derive(Serialize, Deserialize)]
struct KeyfileEnvelope {
    version: u32,
    salt: String,
    nonce: String,
    ciphertext: String,
}

/// [`KeyStore`] backed by a single encrypted file.
#[derive(Clone, Debug)]
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn malformed(&self, reason: impl Into<String>) -> KeyStoreError {
        KeyStoreError::Malformed {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    fn decode_hex(&self, field: &str, value: &str) -> Result<Vec<u8>, KeyStoreError> {
        hex::decode(value).map_err(|err| self.malformed(format!("{field}: {err}")))
    }
}

fn derive_cipher(passphrase: &str, salt: &[u8]) -> Result<ChaCha20Poly1305, KeyStoreError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), passphrase.as_bytes());
    let mut symmetric_key = [0u8; 32];
    hk.expand(HKDF_INFO, &mut symmetric_key)
        .map_err(|_| KeyStoreError::Crypto("HKDF expansion failed".to_owned()))?;
    ChaCha20Poly1305::new_from_slice(&symmetric_key)
        .map_err(|err| KeyStoreError::Crypto(format!("cipher init failed: {err}")))
}

impl KeyStore for FileKeyStore {
    fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn load(&self, passphrase: &str) -> Result<Vec<AccountKey>, KeyStoreError> {
        let content = fs::read_to_string(&self.path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                KeyStoreError::NotFound {
                    path: self.path.clone(),
                }
            } else {
                KeyStoreError::Io {
                    path: self.path.clone(),
                    source,
                }
            }
        })?;
        let envelope: KeyfileEnvelope =
            serde_json::from_str(&content).map_err(|err| self.malformed(err.to_string()))?;
        if envelope.version != KEYFILE_VERSION {
            return Err(KeyStoreError::UnsupportedVersion(envelope.version));
        }

        let salt = self.decode_hex("salt", &envelope.salt)?;
        let nonce = self.decode_hex("nonce", &envelope.nonce)?;
        if nonce.len() != NONCE_SIZE {
            return Err(self.malformed(format!("nonce must be {NONCE_SIZE} bytes")));
        }
        let ciphertext = self.decode_hex("ciphertext", &envelope.ciphertext)?;

        let plaintext = derive_cipher(passphrase, &salt)?
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| KeyStoreError::Decrypt)?;

        let secrets: Vec<String> =
            serde_json::from_slice(&plaintext).map_err(|err| self.malformed(err.to_string()))?;
        let keys = secrets
            .iter()
            .map(|secret| {
                let bytes = self.decode_hex("secret", secret)?;
                let secret = <[u8; 32]>::try_from(bytes.as_slice())
                    .map_err(|_| self.malformed("secret keys must be 32 bytes"))?;
                Ok(AccountKey::from_secret(secret))
            })
            .collect::<Result<Vec<_>, KeyStoreError>>()?;

        debug!(path = %self.path.display(), keys = keys.len(), "loaded keyfile");
        Ok(keys)
    }

    fn save(&self, keys: &[AccountKey], passphrase: &str) -> Result<(), KeyStoreError> {
        let secrets: Vec<String> = keys.iter().map(|key| hex::encode(key.secret())).collect();
        let plaintext =
            serde_json::to_vec(&secrets).map_err(|err| KeyStoreError::Crypto(err.to_string()))?;

        let salt = rand::random::<[u8; SALT_SIZE]>();
        let cipher = derive_cipher(passphrase, &salt)?;
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|err| KeyStoreError::Crypto(format!("encryption failed: {err}")))?;

        let envelope = KeyfileEnvelope {
            version: KEYFILE_VERSION,
            salt: hex::encode(salt),
            nonce: hex::encode(nonce.as_slice()),
            ciphertext: hex::encode(ciphertext),
        };
        let content = serde_json::to_string_pretty(&envelope)
            .map_err(|err| KeyStoreError::Crypto(err.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| KeyStoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&self.path, content).map_err(|source| KeyStoreError::Io {
            path: self.path.clone(),
            source,
        })?;

        debug!(path = %self.path.display(), keys = keys.len(), "saved keyfile");
        Ok(())
    }
}
