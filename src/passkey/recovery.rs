//! Wallet recovery from a resident passkey.
//!
//! Recovery runs a discoverable assertion against the credential registry,
//! re-derives the key locally from the answering credential id, and checks
//! the derived address against the registry record before anything touches
//! disk. Persistence is the final step; every failure before it leaves the
//! device exactly as it was.

use async_trait::async_trait;
use chrono::Utc;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{RecoveryError, Result};
use crate::passkey::{Assertion, Authenticator, entropy_from_credential_id};
use crate::wallet::derive::{Keypair, addresses_match};
use crate::wallet::keystore::{
    KeySource, KeystoreRecord, KeystoreStore, encrypt_private_key,
};

/// Where a recovery run currently stands. `Failed` is terminal from any
/// stage; `Persisted` is the only successful terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStage {
    Idle,
    Authenticating,
    AddressFetched,
    Rederived,
    Verified,
    Persisted,
    Failed,
}

/// Registry verdict for an assertion.
#[derive(Debug)]
pub struct VerifiedCredential {
    pub verified: bool,
    pub wallet_address: Option<String>,
    pub wallet_name: Option<String>,
    pub auth_token: Option<SecretString>,
}

/// Backend credential registry.
#[async_trait]
pub trait CredentialRegistry: Send + Sync {
    async fn request_challenge(&self) -> std::result::Result<Vec<u8>, RecoveryError>;

    async fn verify_assertion(
        &self,
        challenge: &[u8],
        assertion: &Assertion,
    ) -> std::result::Result<VerifiedCredential, RecoveryError>;
}

/// Everything a successful recovery produces. The record is already
/// persisted; the keypair is live for immediate use.
pub struct RecoveryOutcome {
    pub record: KeystoreRecord,
    pub keypair: Keypair,
    pub entropy: [u8; 32],
    /// Backend session token from assertion verification, when issued.
    pub auth_token: Option<SecretString>,
}

impl std::fmt::Debug for RecoveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryOutcome")
            .field("record", &self.record)
            .field("keypair", &self.keypair)
            .finish_non_exhaustive()
    }
}

pub struct RecoveryProtocol<'a, A, R, S> {
    authenticator: &'a A,
    registry: &'a R,
    store: &'a S,
    stage: RecoveryStage,
}

impl<'a, A, R, S> RecoveryProtocol<'a, A, R, S>
where
    A: Authenticator,
    R: CredentialRegistry,
    S: KeystoreStore,
{
    pub fn new(authenticator: &'a A, registry: &'a R, store: &'a S) -> Self {
        Self {
            authenticator,
            registry,
            store,
            stage: RecoveryStage::Idle,
        }
    }

    pub fn stage(&self) -> RecoveryStage {
        self.stage
    }

    pub async fn run(&mut self) -> Result<RecoveryOutcome> {
        match self.run_inner().await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.stage = RecoveryStage::Failed;
                warn!(error = %e, "Wallet recovery failed");
                Err(e)
            }
        }
    }

    async fn run_inner(&mut self) -> Result<RecoveryOutcome> {
        self.stage = RecoveryStage::Authenticating;
        let challenge = self.registry.request_challenge().await?;
        // Discoverable: no credential-id constraint, any resident passkey
        // for this relying party may answer.
        let assertion = self.authenticator.get_assertion(&challenge, None).await?;

        let verdict = self.registry.verify_assertion(&challenge, &assertion).await?;
        if !verdict.verified {
            return Err(RecoveryError::VerificationRejected.into());
        }
        let expected_address = verdict
            .wallet_address
            .ok_or(RecoveryError::NoWalletAddress)?;
        self.stage = RecoveryStage::AddressFetched;

        let entropy = entropy_from_credential_id(&assertion.credential_id);
        let keypair = Keypair::derive(&entropy)?;
        self.stage = RecoveryStage::Rederived;

        if !addresses_match(keypair.address(), &expected_address) {
            return Err(RecoveryError::AddressMismatch {
                derived: keypair.address().to_string(),
                expected: expected_address,
            }
            .into());
        }
        self.stage = RecoveryStage::Verified;

        let record = KeystoreRecord {
            address: keypair.address().to_string(),
            encrypted_private_key: encrypt_private_key(&keypair.secret_bytes(), &entropy)?,
            source: KeySource::Passkey,
            credential_id: Some(assertion.credential_id.clone()),
            wallet_name: verdict.wallet_name.clone(),
            created_at: Utc::now().timestamp_millis(),
        };
        self.store.save(&record)?;
        self.stage = RecoveryStage::Persisted;
        info!(address = %record.address, "Wallet recovered from passkey");

        Ok(RecoveryOutcome {
            record,
            keypair,
            entropy,
            auth_token: verdict.auth_token,
        })
    }
}

/// HTTP credential registry.
pub struct HttpCredentialRegistry {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ChallengeResponse {
    challenge: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequest<'a> {
    challenge: &'a str,
    credential_id: &'a str,
    signature: &'a str,
    authenticator_data: &'a str,
    client_data_json: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponse {
    verified: bool,
    wallet_address: Option<String>,
    wallet_name: Option<String>,
    auth_token: Option<String>,
}

impl HttpCredentialRegistry {
    pub fn new(config: &crate::config::RegistryConfig) -> std::result::Result<Self, RecoveryError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RecoveryError::Registry(redact(&e.to_string())))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CredentialRegistry for HttpCredentialRegistry {
    async fn request_challenge(&self) -> std::result::Result<Vec<u8>, RecoveryError> {
        let url = format!("{}/auth/challenge", self.base_url);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| RecoveryError::Registry(redact(&e.to_string())))?;
        if !response.status().is_success() {
            return Err(RecoveryError::Registry(format!(
                "challenge request returned {}",
                response.status()
            )));
        }
        let body: ChallengeResponse = response
            .json()
            .await
            .map_err(|e| RecoveryError::Registry(redact(&e.to_string())))?;
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(&body.challenge)
            .map_err(|e| RecoveryError::Registry(format!("malformed challenge: {e}")))
    }

    async fn verify_assertion(
        &self,
        challenge: &[u8],
        assertion: &Assertion,
    ) -> std::result::Result<VerifiedCredential, RecoveryError> {
        use base64::Engine;
        let b64 = base64::engine::general_purpose::STANDARD;

        let url = format!("{}/auth/verify", self.base_url);
        let request = VerifyRequest {
            challenge: &b64.encode(challenge),
            credential_id: &assertion.credential_id,
            signature: &b64.encode(&assertion.signature),
            authenticator_data: &b64.encode(&assertion.authenticator_data),
            client_data_json: &b64.encode(&assertion.client_data_json),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RecoveryError::Registry(redact(&e.to_string())))?;
        if !response.status().is_success() {
            return Err(RecoveryError::Registry(format!(
                "verify request returned {}",
                response.status()
            )));
        }
        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|e| RecoveryError::Registry(redact(&e.to_string())))?;

        Ok(VerifiedCredential {
            verified: body.verified,
            wallet_address: body.wallet_address,
            wallet_name: body.wallet_name,
            auth_token: body.auth_token.map(SecretString::from),
        })
    }
}

fn redact(detail: &str) -> String {
    crate::error::redact_sensitive_detail(detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthenticationError, Error};
    use crate::passkey::CreatedCredential;
    use crate::wallet::keystore::FileKeystoreStore;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    struct FixedAuthenticator {
        credential_id: String,
    }

    #[async_trait]
    impl Authenticator for FixedAuthenticator {
        async fn create_credential(
            &self,
            _label: &str,
        ) -> std::result::Result<CreatedCredential, AuthenticationError> {
            Ok(CreatedCredential {
                credential_id: self.credential_id.clone(),
            })
        }

        async fn get_assertion(
            &self,
            _challenge: &[u8],
            _credential_id: Option<&str>,
        ) -> std::result::Result<Assertion, AuthenticationError> {
            Ok(Assertion {
                credential_id: self.credential_id.clone(),
                signature: vec![9; 64],
                authenticator_data: vec![1],
                client_data_json: b"{}".to_vec(),
            })
        }
    }

    struct StubRegistry {
        verdict_address: Option<String>,
        verified: bool,
        token: Option<&'static str>,
    }

    #[async_trait]
    impl CredentialRegistry for StubRegistry {
        async fn request_challenge(&self) -> std::result::Result<Vec<u8>, RecoveryError> {
            Ok(vec![7; 32])
        }

        async fn verify_assertion(
            &self,
            _challenge: &[u8],
            _assertion: &Assertion,
        ) -> std::result::Result<VerifiedCredential, RecoveryError> {
            Ok(VerifiedCredential {
                verified: self.verified,
                wallet_address: self.verdict_address.clone(),
                wallet_name: Some("Recovered".to_string()),
                auth_token: self.token.map(SecretString::from),
            })
        }
    }

    fn expected_address(credential_id: &str) -> String {
        let entropy = entropy_from_credential_id(credential_id);
        Keypair::derive(&entropy).expect("derive").address().to_string()
    }

    #[tokio::test]
    async fn happy_path_persists_and_returns_live_key() {
        let credential_id = BASE64.encode(b"resident-cred");
        let authenticator = FixedAuthenticator {
            credential_id: credential_id.clone(),
        };
        let registry = StubRegistry {
            verdict_address: Some(expected_address(&credential_id).to_lowercase()),
            verified: true,
            token: Some("session-token"),
        };
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileKeystoreStore::new(dir.path().join("keystore.json"));

        let mut protocol = RecoveryProtocol::new(&authenticator, &registry, &store);
        let outcome = protocol.run().await.expect("recovery");

        assert_eq!(protocol.stage(), RecoveryStage::Persisted);
        assert_eq!(outcome.record.source, KeySource::Passkey);
        assert_eq!(outcome.record.credential_id.as_deref(), Some(credential_id.as_str()));
        assert_eq!(outcome.record.wallet_name.as_deref(), Some("Recovered"));
        assert_eq!(
            outcome.auth_token.as_ref().map(|t| t.expose_secret()),
            Some("session-token")
        );
        assert!(store.exists());

        // The persisted record decrypts under the ceremony entropy.
        let loaded = store.load().expect("load");
        let secret = crate::wallet::keystore::decrypt_private_key(
            &loaded.encrypted_private_key,
            &outcome.entropy,
        )
        .expect("decrypt");
        assert_eq!(secret, outcome.keypair.secret_bytes());
    }

    #[tokio::test]
    async fn address_mismatch_aborts_without_persisting() {
        let credential_id = BASE64.encode(b"resident-cred");
        let authenticator = FixedAuthenticator {
            credential_id: credential_id.clone(),
        };
        let registry = StubRegistry {
            verdict_address: Some("0x000000000000000000000000000000000000dEaD".to_string()),
            verified: true,
            token: None,
        };
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileKeystoreStore::new(dir.path().join("keystore.json"));

        let mut protocol = RecoveryProtocol::new(&authenticator, &registry, &store);
        let err = protocol.run().await.unwrap_err();

        assert!(matches!(
            err,
            Error::Recovery(RecoveryError::AddressMismatch { .. })
        ));
        assert_eq!(protocol.stage(), RecoveryStage::Failed);
        assert!(!store.exists());
    }

    #[tokio::test]
    async fn rejected_verification_aborts_without_persisting() {
        let credential_id = BASE64.encode(b"resident-cred");
        let authenticator = FixedAuthenticator {
            credential_id: credential_id.clone(),
        };
        let registry = StubRegistry {
            verdict_address: Some(expected_address(&credential_id)),
            verified: false,
            token: None,
        };
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileKeystoreStore::new(dir.path().join("keystore.json"));

        let mut protocol = RecoveryProtocol::new(&authenticator, &registry, &store);
        let err = protocol.run().await.unwrap_err();

        assert!(matches!(
            err,
            Error::Recovery(RecoveryError::VerificationRejected)
        ));
        assert!(!store.exists());
    }

    #[tokio::test]
    async fn missing_wallet_address_is_its_own_failure() {
        let authenticator = FixedAuthenticator {
            credential_id: BASE64.encode(b"unbound-cred"),
        };
        let registry = StubRegistry {
            verdict_address: None,
            verified: true,
            token: None,
        };
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileKeystoreStore::new(dir.path().join("keystore.json"));

        let mut protocol = RecoveryProtocol::new(&authenticator, &registry, &store);
        let err = protocol.run().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Recovery(RecoveryError::NoWalletAddress)
        ));
    }

    #[tokio::test]
    async fn address_comparison_ignores_checksum_casing() {
        let credential_id = BASE64.encode(b"cased-cred");
        let authenticator = FixedAuthenticator {
            credential_id: credential_id.clone(),
        };
        let registry = StubRegistry {
            verdict_address: Some(expected_address(&credential_id).to_uppercase().replace("0X", "0x")),
            verified: true,
            token: None,
        };
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileKeystoreStore::new(dir.path().join("keystore.json"));

        let mut protocol = RecoveryProtocol::new(&authenticator, &registry, &store);
        protocol.run().await.expect("recovery tolerates casing");
        assert_eq!(protocol.stage(), RecoveryStage::Persisted);
    }
}
