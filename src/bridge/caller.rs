//! Caller side of the authorization bridge.
//!
//! One exchange: mint a request id, open the popup, push the request at it
//! until it announces readiness, and wait for the matching typed response.
//! Every terminal outcome tears the exchange down completely (popup closed,
//! listener dropped) so a stale window can never answer a later request.

use tokio::time::MissedTickBehavior;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Error, Result};

use super::{BridgeMessage, WindowOpener, accept_origin, auth_window_url};

const CLOSED_POLL_INTERVAL_MS: u64 = 500;

/// What a successful connect exchange yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedWalletInfo {
    pub address: String,
    pub wallet_name: Option<String>,
}

pub struct AuthBridgeCaller<W: WindowOpener> {
    config: BridgeConfig,
    opener: W,
    /// This window's own origin, sent to the popup and used by the popup to
    /// address its responses.
    origin: String,
}

impl<W: WindowOpener> AuthBridgeCaller<W> {
    pub fn new(config: BridgeConfig, opener: W, origin: impl Into<String>) -> Self {
        Self {
            config,
            opener,
            origin: origin.into(),
        }
    }

    /// Ask the authorization window for the wallet identity.
    pub async fn connect(&self) -> Result<ConnectedWalletInfo> {
        let request_id = Uuid::new_v4().to_string();
        let request = BridgeMessage::WalletConnect {
            request_id: request_id.clone(),
            origin: self.origin.clone(),
        };
        match self.exchange("connect", request).await? {
            BridgeMessage::WalletConnectResponse {
                address,
                wallet_name,
                error,
                ..
            } => {
                if let Some(reason) = error {
                    return Err(BridgeError::Rejected { reason }.into());
                }
                let address = address.ok_or(BridgeError::InvalidResponse)?;
                Ok(ConnectedWalletInfo {
                    address,
                    wallet_name,
                })
            }
            _ => Err(BridgeError::InvalidResponse.into()),
        }
    }

    /// Ask the authorization window to sign message text with the unlocked
    /// wallet key. Returns the 64-byte compact signature.
    pub async fn sign(&self, message: &str) -> Result<[u8; 64]> {
        let request_id = Uuid::new_v4().to_string();
        let request = BridgeMessage::PasskeySign {
            request_id: request_id.clone(),
            message: message.to_string(),
            origin: self.origin.clone(),
        };
        match self.exchange("sign", request).await? {
            BridgeMessage::PasskeySignResponse {
                signature, error, ..
            } => {
                if let Some(reason) = error {
                    return Err(BridgeError::Rejected { reason }.into());
                }
                let bytes = signature.ok_or(BridgeError::InvalidResponse)?;
                let compact: [u8; 64] = bytes
                    .try_into()
                    .map_err(|_| BridgeError::InvalidResponse)?;
                Ok(compact)
            }
            _ => Err(BridgeError::InvalidResponse.into()),
        }
    }

    async fn exchange(&self, action: &str, request: BridgeMessage) -> Result<BridgeMessage> {
        let request_id = request.request_id().to_string();
        let url = auth_window_url(&self.config, &request_id, &self.origin, action)?;
        let auth_origin = origin_of(&self.config.auth_url)?;

        let mut conn = self.opener.open(url).await.map_err(Error::from)?;
        debug!(%request_id, %action, "Authorization window opened");

        let payload = request.to_value();
        let mut attempts: u32 = 0;
        let mut ready = false;

        let deadline = tokio::time::sleep(self.config.response_timeout);
        tokio::pin!(deadline);

        let mut resend = tokio::time::interval(self.config.resend_interval);
        resend.set_missed_tick_behavior(MissedTickBehavior::Skip);
        resend.tick().await;

        let mut closed_poll =
            tokio::time::interval(std::time::Duration::from_millis(CLOSED_POLL_INTERVAL_MS));
        closed_poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        closed_poll.tick().await;

        if let Err(e) = conn.sender.post(&auth_origin, payload.clone()) {
            conn.handle.close();
            return Err(e.into());
        }

        let result: Result<BridgeMessage> = loop {
            tokio::select! {
                _ = &mut deadline => {
                    break Err(BridgeError::Timeout {
                        elapsed: self.config.response_timeout,
                    }
                    .into());
                }
                _ = closed_poll.tick() => {
                    if conn.handle.is_closed() {
                        break Err(BridgeError::WindowClosed.into());
                    }
                }
                _ = resend.tick(), if !ready && attempts < self.config.max_resend_attempts => {
                    if let Err(e) = conn.sender.post(&auth_origin, payload.clone()) {
                        break Err(e.into());
                    }
                    attempts += 1;
                }
                received = conn.inbound.recv() => {
                    let Some(envelope) = received else {
                        break Err(BridgeError::ChannelClosed.into());
                    };
                    if !accept_origin(
                        &envelope.origin,
                        &auth_origin,
                        &self.config.allowed_origins,
                        self.config.build_mode,
                    ) {
                        continue;
                    }
                    let Some(message) = BridgeMessage::parse(&envelope.payload) else {
                        continue;
                    };
                    if message.request_id() != request_id {
                        continue;
                    }
                    match message {
                        BridgeMessage::AuthWindowReady { .. } => {
                            if !ready {
                                ready = true;
                                if let Err(e) = conn.sender.post(&auth_origin, payload.clone()) {
                                    break Err(e.into());
                                }
                            }
                        }
                        response @ (BridgeMessage::WalletConnectResponse { .. }
                        | BridgeMessage::PasskeySignResponse { .. }) => {
                            break Ok(response);
                        }
                        // Our own request echoed back: not possible through
                        // the listener, but harmless to skip.
                        _ => {}
                    }
                }
            }
        };

        conn.handle.close();
        result
    }
}

fn origin_of(raw: &str) -> Result<String> {
    Url::parse(raw)
        .map(|u| u.origin().ascii_serialization())
        .map_err(|_| BridgeError::InvalidResponse.into())
}
