//! Connector protocol: the embeddable wallet surface for third-party pages.
//!
//! A host page embeds the wallet in an iframe and talks to it with the
//! `INJPASS_*` vocabulary. The host side ([`Connector`]) accepts events from
//! the embed origin only; the embed side ([`EmbedWallet`]) accepts events
//! from its host origin only. Request ids are `sign_{counter}_{millis}`,
//! unique per connector instance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};
use crate::wallet::derive::Keypair;

use super::{Envelope, MessageSender};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
pub const SIGN_TIMEOUT: Duration = Duration::from_secs(30);

/// Host <-> embed message vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ConnectorMessage {
    #[serde(rename = "INJPASS_SIGN_REQUEST", rename_all = "camelCase")]
    SignRequest { request_id: String, message: String },

    #[serde(rename = "INJPASS_SIGN_RESPONSE", rename_all = "camelCase")]
    SignResponse {
        request_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<Vec<u8>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "INJPASS_CONNECTED", rename_all = "camelCase")]
    Connected {
        address: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        wallet_name: Option<String>,
    },

    #[serde(rename = "INJPASS_ERROR", rename_all = "camelCase")]
    Error { message: String },

    #[serde(rename = "INJPASS_DISCONNECT")]
    Disconnect,

    #[serde(rename = "INJPASS_DISCONNECTED")]
    Disconnected,
}

impl ConnectorMessage {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Unknown types and malformed bodies are ignored by both sides.
    pub fn parse(payload: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(payload.clone()).ok()
    }
}

/// The wallet identity a connect handshake yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedWallet {
    pub address: String,
    pub wallet_name: Option<String>,
}

/// Host-page side of the connector protocol.
pub struct Connector {
    embed_origin: String,
    to_embed: Box<dyn MessageSender>,
    inbound: mpsc::UnboundedReceiver<Envelope>,
    counter: AtomicU64,
    connect_timeout: Duration,
    sign_timeout: Duration,
}

impl Connector {
    pub fn new(
        embed_origin: impl Into<String>,
        to_embed: Box<dyn MessageSender>,
        inbound: mpsc::UnboundedReceiver<Envelope>,
    ) -> Self {
        Self {
            embed_origin: embed_origin.into(),
            to_embed,
            inbound,
            counter: AtomicU64::new(0),
            connect_timeout: CONNECT_TIMEOUT,
            sign_timeout: SIGN_TIMEOUT,
        }
    }

    /// Wait for the embedded wallet to announce itself.
    pub async fn connect(&mut self) -> Result<ConnectedWallet> {
        let timeout = self.connect_timeout;
        let waited = tokio::time::timeout(timeout, async {
            loop {
                let Some(envelope) = self.inbound.recv().await else {
                    return Err(crate::error::Error::from(BridgeError::ChannelClosed));
                };
                let Some(message) = self.from_embed(&envelope) else {
                    continue;
                };
                match message {
                    ConnectorMessage::Connected {
                        address,
                        wallet_name,
                    } => {
                        debug!(%address, "Embedded wallet connected");
                        return Ok(ConnectedWallet {
                            address,
                            wallet_name,
                        });
                    }
                    ConnectorMessage::Error { message } => {
                        return Err(BridgeError::Rejected { reason: message }.into());
                    }
                    _ => {}
                }
            }
        })
        .await;

        match waited {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Timeout { elapsed: timeout }.into()),
        }
    }

    /// Ask the embedded wallet to sign message text.
    pub async fn sign_message(&mut self, message: &str) -> Result<Vec<u8>> {
        let request_id = self.next_request_id();
        self.to_embed.post(
            &self.embed_origin,
            ConnectorMessage::SignRequest {
                request_id: request_id.clone(),
                message: message.to_string(),
            }
            .to_value(),
        )?;

        let timeout = self.sign_timeout;
        let waited = tokio::time::timeout(timeout, async {
            loop {
                let Some(envelope) = self.inbound.recv().await else {
                    return Err(crate::error::Error::from(BridgeError::ChannelClosed));
                };
                let Some(message) = self.from_embed(&envelope) else {
                    continue;
                };
                match message {
                    ConnectorMessage::SignResponse {
                        request_id: got,
                        signature,
                        error,
                    } if got == request_id => {
                        if let Some(reason) = error {
                            return Err(BridgeError::Rejected { reason }.into());
                        }
                        return signature.ok_or_else(|| BridgeError::InvalidResponse.into());
                    }
                    _ => {}
                }
            }
        })
        .await;

        match waited {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Timeout { elapsed: timeout }.into()),
        }
    }

    /// Tell the embedded wallet to drop its key and wait for the
    /// acknowledgement.
    pub async fn disconnect(&mut self) -> Result<()> {
        self.to_embed
            .post(&self.embed_origin, ConnectorMessage::Disconnect.to_value())?;

        let timeout = self.sign_timeout;
        let waited = tokio::time::timeout(timeout, async {
            loop {
                let Some(envelope) = self.inbound.recv().await else {
                    return Err(crate::error::Error::from(BridgeError::ChannelClosed));
                };
                if let Some(ConnectorMessage::Disconnected) = self.from_embed(&envelope) {
                    return Ok(());
                }
            }
        })
        .await;

        match waited {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Timeout { elapsed: timeout }.into()),
        }
    }

    /// Exact-origin event filter: the embed origin and nothing else.
    fn from_embed(&self, envelope: &Envelope) -> Option<ConnectorMessage> {
        if envelope.origin != self.embed_origin {
            warn!(origin = %envelope.origin, "Ignoring connector event from non-embed origin");
            return None;
        }
        ConnectorMessage::parse(&envelope.payload)
    }

    fn next_request_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("sign_{}_{}", n, Utc::now().timestamp_millis())
    }
}

/// Embed-iframe side: holds the unlocked key and answers the host.
pub struct EmbedWallet {
    host_origin: String,
    keypair: Option<Keypair>,
    wallet_name: Option<String>,
}

impl EmbedWallet {
    pub fn new(
        host_origin: impl Into<String>,
        keypair: Option<Keypair>,
        wallet_name: Option<String>,
    ) -> Self {
        Self {
            host_origin: host_origin.into(),
            keypair,
            wallet_name,
        }
    }

    /// Serve the host: announce the wallet when unlocked, then answer sign
    /// and disconnect requests until the host goes away.
    pub async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<Envelope>,
        sender: &dyn MessageSender,
    ) -> Result<()> {
        if let Some(keypair) = &self.keypair {
            sender.post(
                &self.host_origin,
                ConnectorMessage::Connected {
                    address: keypair.address().to_string(),
                    wallet_name: self.wallet_name.clone(),
                }
                .to_value(),
            )?;
        }

        while let Some(envelope) = inbound.recv().await {
            if envelope.origin != self.host_origin {
                warn!(origin = %envelope.origin, "Ignoring connector event from non-host origin");
                continue;
            }
            let Some(message) = ConnectorMessage::parse(&envelope.payload) else {
                continue;
            };
            match message {
                ConnectorMessage::SignRequest {
                    request_id,
                    message,
                } => {
                    let response = match &self.keypair {
                        Some(keypair) => match keypair.sign_message(&message) {
                            Ok(signature) => ConnectorMessage::SignResponse {
                                request_id,
                                signature: Some(signature.to_vec()),
                                error: None,
                            },
                            Err(e) => ConnectorMessage::SignResponse {
                                request_id,
                                signature: None,
                                error: Some(e.to_string()),
                            },
                        },
                        None => ConnectorMessage::SignResponse {
                            request_id,
                            signature: None,
                            error: Some("Wallet not connected".to_string()),
                        },
                    };
                    sender.post(&self.host_origin, response.to_value())?;
                }
                ConnectorMessage::Disconnect => {
                    self.keypair = None;
                    sender.post(&self.host_origin, ConnectorMessage::Disconnected.to_value())?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}
