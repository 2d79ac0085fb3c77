//! Encrypted key storage.
//!
//! Private keys are sealed with AES-256-GCM under entropy produced either by
//! a passkey ceremony or by stretching a password. AEAD authentication is the
//! only correctness check: a wrong passkey and a corrupted record are
//! indistinguishable by design, both surfacing as `DecryptionFailed`.

use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

use crate::error::{KeystoreError, Result};
use crate::wallet::derive::MIN_ENTROPY_BYTES;

const NONCE_BYTES: usize = 12;
const PASSWORD_STRETCH_INFO: &[u8] = b"injpass-keystore-password-v1";

/// An AES-256-GCM sealed private key, as embedded in the keystore record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedKey {
    /// Base64 ciphertext, GCM tag appended.
    pub ciphertext: String,
    /// Base64 96-bit nonce, fresh per encryption.
    pub nonce: String,
    pub algorithm: String,
}

/// How a wallet's key originally entered the keystore.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeySource {
    Passkey,
    Import,
}

/// The single persisted wallet record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeystoreRecord {
    pub address: String,
    pub encrypted_private_key: EncryptedKey,
    pub source: KeySource,
    /// Base64 credential id; present iff `source` is `Passkey`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_name: Option<String>,
    /// Milliseconds since the UNIX epoch.
    pub created_at: i64,
}

/// Seal a 32-byte private key under the given entropy.
///
/// The first 32 entropy bytes are used directly as the AES key, matching how
/// the unlock entropy is produced (already uniform, already 32 bytes).
pub fn encrypt_private_key(private_key: &[u8; 32], entropy: &[u8]) -> Result<EncryptedKey> {
    let key = entropy_to_key(entropy)?;
    let cipher = Aes256Gcm::new(&key);
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, private_key.as_slice())
        .map_err(|_| KeystoreError::DecryptionFailed)?;

    Ok(EncryptedKey {
        ciphertext: BASE64.encode(ciphertext),
        nonce: BASE64.encode(nonce),
        algorithm: "AES-256-GCM".to_string(),
    })
}

/// Seal a derived keypair's private scalar. The only path from a live
/// [`Keypair`] to persistable ciphertext; raw scalar bytes never cross the
/// module boundary.
pub fn seal_keypair(keypair: &crate::wallet::derive::Keypair, entropy: &[u8]) -> Result<EncryptedKey> {
    encrypt_private_key(&keypair.secret_bytes(), entropy)
}

/// Open a sealed private key. Wrong entropy and tampered ciphertext both
/// produce `KeystoreError::DecryptionFailed`.
pub fn decrypt_private_key(encrypted: &EncryptedKey, entropy: &[u8]) -> Result<[u8; 32]> {
    let key = entropy_to_key(entropy)?;
    let cipher = Aes256Gcm::new(&key);

    let nonce_bytes = BASE64
        .decode(&encrypted.nonce)
        .map_err(|_| KeystoreError::DecryptionFailed)?;
    if nonce_bytes.len() != NONCE_BYTES {
        return Err(KeystoreError::DecryptionFailed.into());
    }
    let ciphertext = BASE64
        .decode(&encrypted.ciphertext)
        .map_err(|_| KeystoreError::DecryptionFailed)?;

    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
        .map_err(|_| KeystoreError::DecryptionFailed)?;

    plaintext
        .try_into()
        .map_err(|_| KeystoreError::DecryptionFailed.into())
}

/// Stretch a user password into 32 bytes of cipher entropy via HKDF-SHA256
/// with a fixed domain-separation string.
pub fn stretch_password(password: &str) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, password.as_bytes());
    let mut okm = [0u8; 32];
    // Infallible for a 32-byte output length.
    hk.expand(PASSWORD_STRETCH_INFO, &mut okm)
        .unwrap_or_else(|_| unreachable!("32 bytes is within HKDF-SHA256 output bounds"));
    okm
}

fn entropy_to_key(entropy: &[u8]) -> Result<Key<Aes256Gcm>> {
    if entropy.len() < MIN_ENTROPY_BYTES {
        return Err(KeystoreError::EntropyTooShort {
            needed: MIN_ENTROPY_BYTES,
            got: entropy.len(),
        }
        .into());
    }
    Ok(*Key::<Aes256Gcm>::from_slice(&entropy[..32]))
}

/// Persistence for the single active keystore record. Last write wins.
pub trait KeystoreStore: Send + Sync {
    fn save(&self, record: &KeystoreRecord) -> Result<()>;
    fn load(&self) -> Result<KeystoreRecord>;
    fn exists(&self) -> bool;
    fn delete(&self) -> Result<()>;
}

/// JSON-file store, `0o600` on unix.
pub struct FileKeystoreStore {
    path: PathBuf,
}

impl FileKeystoreStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeystoreStore for FileKeystoreStore {
    fn save(&self, record: &KeystoreRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(KeystoreError::Io)?;
        }
        let json = serde_json::to_string_pretty(record).map_err(KeystoreError::Serialization)?;
        std::fs::write(&self.path, json).map_err(KeystoreError::Io)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.path, perms).map_err(KeystoreError::Io)?;
        }

        debug!(path = %self.path.display(), address = %record.address, "Keystore record saved");
        Ok(())
    }

    fn load(&self) -> Result<KeystoreRecord> {
        if !self.path.exists() {
            return Err(KeystoreError::NoWallet.into());
        }
        let json = std::fs::read_to_string(&self.path).map_err(KeystoreError::Io)?;
        let record = serde_json::from_str(&json).map_err(KeystoreError::Serialization)?;
        Ok(record)
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn delete(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(KeystoreError::Io)?;
            debug!(path = %self.path.display(), "Keystore record deleted");
        }
        Ok(())
    }
}
