//! Authorization window: the popup side of the bridge.
//!
//! The window announces readiness, waits for exactly one request matching
//! the id it was opened with, runs the passkey ceremony and key handling
//! entirely locally, and posts a typed response to the exact caller origin.
//! Failures travel the same path as successes, as a response with `error`
//! set; the caller never learns more than that string.

use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, KeystoreError, Result};
use crate::passkey::{Authenticator, PasskeyUnlock};
use crate::wallet::derive::Keypair;
use crate::wallet::keystore::{KeystoreStore, decrypt_private_key};

use super::{BridgeMessage, Envelope, MessageSender, accept_origin};

/// The exchange parameters the window was opened with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthWindowParams {
    pub request_id: String,
    pub caller_origin: String,
}

impl AuthWindowParams {
    /// Extract `requestId` and `origin` from the window's own URL.
    pub fn from_url(url: &Url) -> Result<Self> {
        let mut request_id = None;
        let mut caller_origin = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "requestId" => request_id = Some(value.into_owned()),
                "origin" => caller_origin = Some(value.into_owned()),
                _ => {}
            }
        }
        match (request_id, caller_origin) {
            (Some(request_id), Some(caller_origin)) => Ok(Self {
                request_id,
                caller_origin,
            }),
            _ => Err(BridgeError::InvalidResponse.into()),
        }
    }
}

pub struct AuthWindow<'a, A: Authenticator, S: KeystoreStore> {
    config: &'a BridgeConfig,
    params: AuthWindowParams,
    unlock: &'a PasskeyUnlock<A>,
    store: &'a S,
}

impl<'a, A: Authenticator, S: KeystoreStore> AuthWindow<'a, A, S> {
    pub fn new(
        config: &'a BridgeConfig,
        params: AuthWindowParams,
        unlock: &'a PasskeyUnlock<A>,
        store: &'a S,
    ) -> Self {
        Self {
            config,
            params,
            unlock,
            store,
        }
    }

    /// Serve the exchange: announce readiness, answer the one matching
    /// request, and return once a terminal response has been posted.
    pub async fn run(
        &self,
        mut inbound: mpsc::UnboundedReceiver<Envelope>,
        sender: &dyn MessageSender,
    ) -> Result<()> {
        sender.post(
            &self.params.caller_origin,
            BridgeMessage::AuthWindowReady {
                request_id: self.params.request_id.clone(),
            }
            .to_value(),
        )?;
        debug!(request_id = %self.params.request_id, "Authorization window ready");

        // Resent requests arrive after processing has already started; only
        // the first one is acted on.
        let mut processing = false;

        while let Some(envelope) = inbound.recv().await {
            if !accept_origin(
                &envelope.origin,
                &self.params.caller_origin,
                &self.config.allowed_origins,
                self.config.build_mode,
            ) {
                continue;
            }
            let Some(message) = BridgeMessage::parse(&envelope.payload) else {
                continue;
            };
            if message.request_id() != self.params.request_id {
                warn!(
                    got = %message.request_id(),
                    expected = %self.params.request_id,
                    "Ignoring request for a different exchange"
                );
                continue;
            }
            if processing {
                continue;
            }

            match message {
                BridgeMessage::WalletConnect { request_id, .. } => {
                    processing = true;
                    let response = match self.handle_connect().await {
                        Ok((address, wallet_name)) => BridgeMessage::WalletConnectResponse {
                            request_id,
                            address: Some(address),
                            wallet_name,
                            error: None,
                        },
                        Err(e) => BridgeMessage::WalletConnectResponse {
                            request_id,
                            address: None,
                            wallet_name: None,
                            error: Some(e.to_string()),
                        },
                    };
                    sender.post(&self.params.caller_origin, response.to_value())?;
                    return Ok(());
                }
                BridgeMessage::PasskeySign {
                    request_id,
                    message,
                    ..
                } => {
                    processing = true;
                    let response = match self.handle_sign(&message).await {
                        Ok((signature, address)) => BridgeMessage::PasskeySignResponse {
                            request_id,
                            signature: Some(signature.to_vec()),
                            address: Some(address),
                            error: None,
                        },
                        Err(e) => BridgeMessage::PasskeySignResponse {
                            request_id,
                            signature: None,
                            address: None,
                            error: Some(e.to_string()),
                        },
                    };
                    sender.post(&self.params.caller_origin, response.to_value())?;
                    return Ok(());
                }
                // Responses and readiness announcements are ours to send,
                // not to receive.
                _ => {}
            }
        }

        Err(BridgeError::ChannelClosed.into())
    }

    /// Unlock via passkey and report the wallet identity.
    async fn handle_connect(&self) -> Result<(String, Option<String>)> {
        let record = self.store.load()?;
        let keypair = self.unlock_key(&record).await?;
        Ok((keypair.address().to_string(), record.wallet_name.clone()))
    }

    /// Unlock via passkey and sign the message text.
    async fn handle_sign(&self, message: &str) -> Result<([u8; 64], String)> {
        let record = self.store.load()?;
        let keypair = self.unlock_key(&record).await?;
        let signature = keypair.sign_message(message)?;
        Ok((signature, keypair.address().to_string()))
    }

    async fn unlock_key(
        &self,
        record: &crate::wallet::keystore::KeystoreRecord,
    ) -> Result<Keypair> {
        let credential_id = record
            .credential_id
            .as_deref()
            .ok_or(KeystoreError::NoWallet)?;
        let entropy = self.unlock.unlock(credential_id).await?;
        let secret = decrypt_private_key(&record.encrypted_private_key, &entropy)?;
        Keypair::from_secret_bytes(&secret)
    }
}
