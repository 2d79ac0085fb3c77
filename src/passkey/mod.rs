//! Passkey ceremonies and credential-derived entropy.
//!
//! The platform authenticator sits behind the [`Authenticator`] trait so the
//! rest of the crate never touches WebAuthn plumbing directly. Ceremony
//! failures surface as [`AuthenticationError`] with a human-readable cause
//! and are never silently retried.

pub mod recovery;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{AuthenticationError, Result};

/// A newly registered discoverable credential.
#[derive(Debug, Clone)]
pub struct CreatedCredential {
    /// Base64 credential id, the wallet's stable identity handle.
    pub credential_id: String,
}

/// A user-presence assertion produced by the authenticator.
#[derive(Debug, Clone)]
pub struct Assertion {
    /// Base64 credential id of the passkey that answered.
    pub credential_id: String,
    pub signature: Vec<u8>,
    pub authenticator_data: Vec<u8>,
    pub client_data_json: Vec<u8>,
}

/// Platform WebAuthn ceremony surface.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Register a discoverable platform credential labeled for the user.
    async fn create_credential(
        &self,
        label: &str,
    ) -> std::result::Result<CreatedCredential, AuthenticationError>;

    /// Assert user presence. With `credential_id` set the ceremony is pinned
    /// to that passkey; with `None` it is discoverable and any resident
    /// credential may answer.
    async fn get_assertion(
        &self,
        challenge: &[u8],
        credential_id: Option<&str>,
    ) -> std::result::Result<Assertion, AuthenticationError>;
}

/// Derive keystore entropy from a credential id.
///
/// Hashes the UTF-8 bytes of the base64 *string*, not the decoded id bytes.
/// The encoding is part of the derivation: changing it would change every
/// wallet address ever derived.
pub fn entropy_from_credential_id(credential_id: &str) -> [u8; 32] {
    Sha256::digest(credential_id.as_bytes()).into()
}

/// Decode a credential id for ceremonies that need the raw bytes.
pub fn decode_credential_id(credential_id: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(credential_id)
        .map_err(|e| AuthenticationError::Failed(format!("invalid credential id: {e}")).into())
}

/// Passkey-gated entropy source for wallet creation and unlock.
pub struct PasskeyUnlock<A: Authenticator> {
    authenticator: A,
}

impl<A: Authenticator> PasskeyUnlock<A> {
    pub fn new(authenticator: A) -> Self {
        Self { authenticator }
    }

    pub fn authenticator(&self) -> &A {
        &self.authenticator
    }

    /// Register a new passkey and derive its entropy.
    pub async fn create(&self, label: &str) -> Result<(String, [u8; 32])> {
        let created = self.authenticator.create_credential(label).await?;
        debug!(credential_id = %created.credential_id, "Passkey registered");
        let entropy = entropy_from_credential_id(&created.credential_id);
        Ok((created.credential_id, entropy))
    }

    /// Assert user presence against a known credential and reproduce the
    /// exact entropy `create` returned for it. A malformed id fails here,
    /// before any platform ceremony is started.
    pub async fn unlock(&self, credential_id: &str) -> Result<[u8; 32]> {
        decode_credential_id(credential_id)?;
        let challenge = rand::random::<[u8; 32]>();
        let assertion = self
            .authenticator
            .get_assertion(&challenge, Some(credential_id))
            .await?;
        debug!(credential_id = %assertion.credential_id, "Passkey asserted");
        Ok(entropy_from_credential_id(&assertion.credential_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use pretty_assertions::assert_eq;

    pub(crate) struct StaticAuthenticator {
        pub credential_id: String,
        pub fail_with: Option<AuthenticationError>,
    }

    #[async_trait]
    impl Authenticator for StaticAuthenticator {
        async fn create_credential(
            &self,
            _label: &str,
        ) -> std::result::Result<CreatedCredential, AuthenticationError> {
            if let Some(err) = &self.fail_with {
                return Err(clone_auth_error(err));
            }
            Ok(CreatedCredential {
                credential_id: self.credential_id.clone(),
            })
        }

        async fn get_assertion(
            &self,
            _challenge: &[u8],
            credential_id: Option<&str>,
        ) -> std::result::Result<Assertion, AuthenticationError> {
            if let Some(err) = &self.fail_with {
                return Err(clone_auth_error(err));
            }
            let id = credential_id.unwrap_or(&self.credential_id).to_string();
            Ok(Assertion {
                credential_id: id,
                signature: vec![1, 2, 3],
                authenticator_data: vec![4, 5],
                client_data_json: b"{}".to_vec(),
            })
        }
    }

    fn clone_auth_error(err: &AuthenticationError) -> AuthenticationError {
        match err {
            AuthenticationError::Cancelled => AuthenticationError::Cancelled,
            AuthenticationError::NoAuthenticator => AuthenticationError::NoAuthenticator,
            AuthenticationError::Unsupported => AuthenticationError::Unsupported,
            AuthenticationError::Failed(s) => AuthenticationError::Failed(s.clone()),
        }
    }

    #[test]
    fn entropy_hashes_the_encoded_string() {
        let id = BASE64.encode(b"credential-bytes");
        let expected: [u8; 32] = Sha256::digest(id.as_bytes()).into();
        assert_eq!(entropy_from_credential_id(&id), expected);

        // Hashing the decoded bytes would give a different value.
        let raw_hash: [u8; 32] = Sha256::digest(b"credential-bytes").into();
        assert_ne!(entropy_from_credential_id(&id), raw_hash);
    }

    #[tokio::test]
    async fn create_and_unlock_agree_on_entropy() {
        let unlock = PasskeyUnlock::new(StaticAuthenticator {
            credential_id: BASE64.encode(b"stable-id"),
            fail_with: None,
        });

        let (credential_id, created_entropy) = unlock.create("Main wallet").await.expect("create");
        let unlocked_entropy = unlock.unlock(&credential_id).await.expect("unlock");
        assert_eq!(created_entropy, unlocked_entropy);
    }

    #[tokio::test]
    async fn cancelled_ceremony_surfaces_as_authentication_error() {
        let unlock = PasskeyUnlock::new(StaticAuthenticator {
            credential_id: "unused".to_string(),
            fail_with: Some(AuthenticationError::Cancelled),
        });

        let err = unlock.unlock("c29tZS1pZA==").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Authentication(AuthenticationError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn malformed_credential_id_fails_before_any_ceremony() {
        // The authenticator would answer NoAuthenticator if consulted; the
        // shape check must reject first.
        let unlock = PasskeyUnlock::new(StaticAuthenticator {
            credential_id: "unused".to_string(),
            fail_with: Some(AuthenticationError::NoAuthenticator),
        });

        let err = unlock.unlock("not base64 !!!").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Authentication(AuthenticationError::Failed(_))
        ));
    }

    #[test]
    fn decode_rejects_invalid_base64() {
        let err = decode_credential_id("not base64 !!!").unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }
}
