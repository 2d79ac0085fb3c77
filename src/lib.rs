//! Passkey-gated non-custodial wallet runtime.
//!
//! A platform passkey is the only unlock factor: its credential id
//! deterministically derives the wallet key, an AES-GCM keystore seals it at
//! rest, and a cross-origin bridge lets third-party pages request connects
//! and signatures without ever seeing key material. On top sits a
//! conversational agent whose destructive tools are gated behind explicit
//! user confirmation.

pub mod agent;
pub mod bridge;
pub mod chain;
pub mod config;
pub mod error;
pub mod passkey;
pub mod wallet;

pub use config::Config;
pub use error::{Error, Result};
