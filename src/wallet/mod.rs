//! Key derivation, encrypted storage, and session state.

pub mod derive;
pub mod keystore;
pub mod session;

pub use derive::{Keypair, addresses_match, checksum_address};
pub use keystore::{
    EncryptedKey, FileKeystoreStore, KeySource, KeystoreRecord, KeystoreStore,
    decrypt_private_key, encrypt_private_key, seal_keypair, stretch_password,
};
pub use session::{WalletSession, WalletStatus};
