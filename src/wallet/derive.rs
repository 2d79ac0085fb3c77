//! Deterministic key derivation and EVM addressing.
//!
//! The same 32 bytes of entropy always produce the same secp256k1 keypair,
//! and therefore the same address. That determinism is what makes passkey
//! recovery possible at all: re-deriving on a new device must land on the
//! key that was originally registered.

use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use secrecy::{ExposeSecret, SecretBox};
use sha2::{Digest, Sha256};
use sha3::Keccak256;

use crate::error::{KeystoreError, Result};

/// Minimum entropy accepted by derivation and keystore encryption.
pub const MIN_ENTROPY_BYTES: usize = 32;

/// A derived signing keypair. The private scalar lives behind `SecretBox`
/// and never appears in `Debug` output or serialized forms.
pub struct Keypair {
    secret: SecretBox<[u8; 32]>,
    address: String,
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl Keypair {
    /// Derive a keypair from entropy.
    ///
    /// The first 32 entropy bytes are the scalar candidate. In the
    /// astronomically unlikely case the candidate is not a valid secp256k1
    /// scalar, it is rehashed with SHA-256 until one is.
    pub fn derive(entropy: &[u8]) -> Result<Self> {
        if entropy.len() < MIN_ENTROPY_BYTES {
            return Err(KeystoreError::EntropyTooShort {
                needed: MIN_ENTROPY_BYTES,
                got: entropy.len(),
            }
            .into());
        }

        let mut candidate = [0u8; 32];
        candidate.copy_from_slice(&entropy[..32]);
        let signing_key = loop {
            match SigningKey::from_bytes(&candidate.into()) {
                Ok(key) => break key,
                Err(_) => candidate = Sha256::digest(candidate).into(),
            }
        };

        let address = checksum_address(signing_key.verifying_key());
        Ok(Self {
            secret: SecretBox::new(Box::new(candidate)),
            address,
        })
    }

    /// Reconstruct a keypair from a raw 32-byte private scalar, as stored in
    /// the keystore plaintext.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let signing_key =
            SigningKey::from_slice(bytes).map_err(|_| KeystoreError::DecryptionFailed)?;
        let scalar: [u8; 32] = signing_key.to_bytes().into();
        let address = checksum_address(signing_key.verifying_key());
        Ok(Self {
            secret: SecretBox::new(Box::new(scalar)),
            address,
        })
    }

    /// The EIP-55 checksummed address for this keypair.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Raw private scalar bytes, for keystore encryption only.
    pub(crate) fn secret_bytes(&self) -> [u8; 32] {
        *self.secret.expose_secret()
    }

    fn signing_key(&self) -> SigningKey {
        // Infallible: the scalar was validated when the keypair was built.
        SigningKey::from_slice(self.secret.expose_secret())
            .unwrap_or_else(|_| unreachable!("stored scalar was validated at construction"))
    }

    /// Sign arbitrary message text: SHA-256 of the UTF-8 bytes, then ECDSA
    /// over the digest. Returns the 64-byte compact (r || s) signature.
    pub fn sign_message(&self, message: &str) -> Result<[u8; 64]> {
        let digest: [u8; 32] = Sha256::digest(message.as_bytes()).into();
        let signature: Signature = self
            .signing_key()
            .sign_prehash(&digest)
            .map_err(|e| KeystoreError::Io(std::io::Error::other(e.to_string())))?;
        Ok(signature.to_bytes().into())
    }
}

/// Compute the EIP-55 checksummed address for a public key: Keccak-256 over
/// the uncompressed point minus its 0x04 prefix, last 20 bytes, then
/// per-nibble casing from a second Keccak pass over the lowercase hex.
pub fn checksum_address(verifying_key: &VerifyingKey) -> String {
    let uncompressed = verifying_key.to_encoded_point(false);
    let hash = Keccak256::digest(&uncompressed.as_bytes()[1..]);
    let raw = hex::encode(&hash[12..]);

    let casing = Keccak256::digest(raw.as_bytes());
    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, ch) in raw.chars().enumerate() {
        let nibble = (casing[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
        if ch.is_ascii_alphabetic() && nibble >= 8 {
            out.push(ch.to_ascii_uppercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Case-insensitive address equality. EIP-55 casing is a display property,
/// never an identity property.
pub fn addresses_match(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
