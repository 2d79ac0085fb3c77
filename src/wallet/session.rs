//! In-memory wallet session state.
//!
//! A session is one of three states: no keystore on this device, a keystore
//! present but locked, or an unlocked key held in memory. Locking drops the
//! key; keystore metadata survives so the wallet stays recognizable.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{KeystoreError, Result, ToolError};
use crate::wallet::derive::Keypair;
use crate::wallet::keystore::{KeystoreRecord, KeystoreStore, decrypt_private_key};

/// Observable session state, safe to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletStatus {
    /// No keystore record on this device.
    None,
    /// A record exists but the key is not in memory.
    Locked { address: String },
    /// Key material is live in memory.
    Unlocked { address: String },
}

pub struct WalletSession<S: KeystoreStore> {
    store: S,
    record: Option<KeystoreRecord>,
    unlocked: Option<Keypair>,
    /// Set when a transaction was authorized; drives the re-auth grace
    /// window so back-to-back transactions skip a second ceremony.
    last_tx_auth: Option<Instant>,
    /// Set while key material is in memory; idle past the window relocks.
    unlocked_at: Option<Instant>,
    reauth_window: Duration,
}

impl<S: KeystoreStore> WalletSession<S> {
    pub fn new(store: S, reauth_window: Duration) -> Self {
        let record = store.load().ok();
        Self {
            store,
            record,
            unlocked: None,
            last_tx_auth: None,
            unlocked_at: None,
            reauth_window,
        }
    }

    pub fn status(&self) -> WalletStatus {
        match (&self.unlocked, &self.record) {
            (Some(keypair), _) => WalletStatus::Unlocked {
                address: keypair.address().to_string(),
            },
            (None, Some(record)) => WalletStatus::Locked {
                address: record.address.clone(),
            },
            (None, None) => WalletStatus::None,
        }
    }

    pub fn record(&self) -> Option<&KeystoreRecord> {
        self.record.as_ref()
    }

    /// Persist a new record and immediately unlock with the given keypair.
    /// Last write wins; any prior record is replaced.
    pub fn install(&mut self, record: KeystoreRecord, keypair: Keypair) -> Result<()> {
        self.store.save(&record)?;
        info!(address = %record.address, "Wallet installed");
        self.record = Some(record);
        self.unlocked = Some(keypair);
        self.unlocked_at = Some(Instant::now());
        Ok(())
    }

    /// Unlock the persisted record with decryption entropy.
    pub fn unlock(&mut self, entropy: &[u8]) -> Result<&Keypair> {
        let record = self.record.as_ref().ok_or(KeystoreError::NoWallet)?;
        let secret = decrypt_private_key(&record.encrypted_private_key, entropy)?;
        let keypair = Keypair::from_secret_bytes(&secret)?;
        debug!(address = %keypair.address(), "Wallet unlocked");
        self.unlocked = Some(keypair);
        self.unlocked_at = Some(Instant::now());
        Ok(self.unlocked.as_ref().unwrap_or_else(|| unreachable!()))
    }

    /// Drop key material. Keystore metadata is untouched.
    pub fn lock(&mut self) {
        if self.unlocked.take().is_some() {
            debug!("Wallet locked");
        }
        self.last_tx_auth = None;
        self.unlocked_at = None;
    }

    /// Delete the keystore record and drop all state.
    pub fn forget(&mut self) -> Result<()> {
        self.store.delete()?;
        self.record = None;
        self.lock();
        Ok(())
    }

    /// The unlocked keypair, or `ToolError::WalletLocked` when the key is
    /// not in memory. A key idle past the re-auth window is dropped here
    /// before the lookup, so an expired session demands a fresh ceremony.
    pub fn keypair(&mut self) -> Result<&Keypair> {
        if self.unlocked.is_some() && self.auth_anchor_expired() {
            info!("Re-auth window expired, relocking");
            self.lock();
        }
        match &self.unlocked {
            Some(keypair) => Ok(keypair),
            None if self.record.is_some() => Err(ToolError::WalletLocked.into()),
            None => Err(ToolError::WalletNotConnected.into()),
        }
    }

    /// Idle time since the last unlock or transaction authorization,
    /// whichever is more recent, measured against the re-auth window.
    fn auth_anchor_expired(&self) -> bool {
        let anchor = match (self.unlocked_at, self.last_tx_auth) {
            (Some(unlocked), Some(tx)) => unlocked.max(tx),
            (Some(at), None) | (None, Some(at)) => at,
            (None, None) => return true,
        };
        anchor.elapsed() >= self.reauth_window
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.is_some()
    }

    /// Mark a transaction as freshly authorized.
    pub fn record_tx_auth(&mut self) {
        self.last_tx_auth = Some(Instant::now());
    }

    /// Whether a transaction may proceed without a new ceremony.
    pub fn within_reauth_window(&self) -> bool {
        match self.last_tx_auth {
            Some(at) => at.elapsed() < self.reauth_window,
            None => false,
        }
    }
}
