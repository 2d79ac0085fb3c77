//! Cross-window authorization bridge.
//!
//! Two browser windows on the same machine cooperate through postMessage:
//! the caller (dapp or host page) opens the internal authorization window as
//! a popup, and the two exchange a small `type`-tagged JSON vocabulary. This
//! module models that transport with channels carrying [`Envelope`]s so the
//! caller side, the popup side, and the connector SDK all run against the
//! same abstraction.
//!
//! Security posture, identical on every receiving side: a message is
//! processed only when its origin is allowed, final responses are posted to
//! the exact peer origin and never wildcard, and request ids are the sole
//! correlation mechanism.

pub mod auth_window;
pub mod caller;
pub mod connector;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use crate::config::{BridgeConfig, BuildMode};
use crate::error::BridgeError;

/// The caller <-> auth-window message vocabulary. Serialized as a
/// `type`-tagged JSON union with camelCase fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum BridgeMessage {
    #[serde(rename = "WALLET_CONNECT", rename_all = "camelCase")]
    WalletConnect {
        request_id: String,
        /// Caller's self-declared origin. Informational; trust decisions use
        /// the transport-reported origin on the envelope.
        origin: String,
    },

    #[serde(rename = "WALLET_CONNECT_RESPONSE", rename_all = "camelCase")]
    WalletConnectResponse {
        request_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        address: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        wallet_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "PASSKEY_SIGN", rename_all = "camelCase")]
    PasskeySign {
        request_id: String,
        message: String,
        origin: String,
    },

    #[serde(rename = "PASSKEY_SIGN_RESPONSE", rename_all = "camelCase")]
    PasskeySignResponse {
        request_id: String,
        /// 64-byte compact signature as a JSON byte array.
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<Vec<u8>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        address: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "AUTH_WINDOW_READY", rename_all = "camelCase")]
    AuthWindowReady { request_id: String },
}

impl BridgeMessage {
    pub fn request_id(&self) -> &str {
        match self {
            Self::WalletConnect { request_id, .. }
            | Self::WalletConnectResponse { request_id, .. }
            | Self::PasskeySign { request_id, .. }
            | Self::PasskeySignResponse { request_id, .. }
            | Self::AuthWindowReady { request_id } => request_id,
        }
    }

    pub fn to_value(&self) -> Value {
        // Infallible: every variant is plain strings and byte arrays.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Parse a received payload. Unknown `type` values and malformed bodies
    /// come back as `None` and are ignored by every receiver.
    pub fn parse(payload: &Value) -> Option<Self> {
        serde_json::from_value(payload.clone()).ok()
    }
}

/// One received cross-window message: the sender's origin as the browser
/// would report it, plus the raw payload.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub origin: String,
    pub payload: Value,
}

/// Posting side of a window's message channel. `target_origin` carries
/// postMessage delivery semantics: the message reaches the peer only when
/// the peer's origin matches (or the target is `"*"`).
pub trait MessageSender: Send + Sync {
    fn post(&self, target_origin: &str, payload: Value) -> Result<(), BridgeError>;
}

/// Channel-backed [`MessageSender`]: the in-process rendition of
/// `peer.postMessage(payload, targetOrigin)`.
pub struct ChannelSender {
    own_origin: String,
    peer_origin: String,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl ChannelSender {
    pub fn new(
        own_origin: impl Into<String>,
        peer_origin: impl Into<String>,
        tx: mpsc::UnboundedSender<Envelope>,
    ) -> Self {
        Self {
            own_origin: own_origin.into(),
            peer_origin: peer_origin.into(),
            tx,
        }
    }
}

impl MessageSender for ChannelSender {
    fn post(&self, target_origin: &str, payload: Value) -> Result<(), BridgeError> {
        if target_origin != "*" && target_origin != self.peer_origin {
            // Browser behavior: a targetOrigin mismatch drops the message
            // without notifying the sender.
            debug!(target = %target_origin, peer = %self.peer_origin, "Dropping message for mismatched target origin");
            return Ok(());
        }
        self.tx
            .send(Envelope {
                origin: self.own_origin.clone(),
                payload,
            })
            .map_err(|_| BridgeError::ChannelClosed)
    }
}

/// Liveness handle for an opened popup window.
pub trait PopupHandle: Send + Sync {
    fn is_closed(&self) -> bool;
    fn close(&self);
}

/// Shared closed-flag popup handle; the window side flips it on close.
#[derive(Clone, Default)]
pub struct WindowFlag(Arc<AtomicBool>);

impl WindowFlag {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PopupHandle for WindowFlag {
    fn is_closed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Everything the caller holds after opening the authorization popup.
pub struct PopupConnection {
    pub handle: Box<dyn PopupHandle>,
    /// Posts into the popup.
    pub sender: Box<dyn MessageSender>,
    /// The caller window's own message listener.
    pub inbound: mpsc::UnboundedReceiver<Envelope>,
}

/// Opens the authorization window. The URL carries `requestId`, `origin`,
/// and `action` query parameters.
#[async_trait]
pub trait WindowOpener: Send + Sync {
    async fn open(&self, url: Url) -> Result<PopupConnection, BridgeError>;
}

/// Whether `origin` passes validation against the origin captured when the
/// exchange started. Loopback development origins always pass; a non-empty
/// allowlist replaces the exact-match rule entirely.
pub fn origin_allowed(origin: &str, captured: &str, allowlist: &[String]) -> bool {
    if origin.starts_with("http://localhost:") || origin.starts_with("http://127.0.0.1:") {
        return true;
    }
    if !allowlist.is_empty() {
        return allowlist.iter().any(|allowed| allowed == origin);
    }
    origin == captured
}

/// Gate an incoming envelope on its origin. Returns `true` when the message
/// should be processed. Production drops mismatches silently; development
/// logs them and lets them through.
pub(crate) fn accept_origin(
    origin: &str,
    captured: &str,
    allowlist: &[String],
    mode: BuildMode,
) -> bool {
    if origin_allowed(origin, captured, allowlist) {
        return true;
    }
    let rejection = BridgeError::OriginRejected {
        origin: origin.to_string(),
    };
    match mode {
        BuildMode::Production => {
            debug!(error = %rejection, "Dropping message from unexpected origin");
            false
        }
        BuildMode::Development => {
            warn!(error = %rejection, expected = %captured, "Tolerating message from unexpected origin");
            true
        }
    }
}

/// Build the popup URL for an authorization exchange.
pub(crate) fn auth_window_url(
    config: &BridgeConfig,
    request_id: &str,
    caller_origin: &str,
    action: &str,
) -> Result<Url, BridgeError> {
    let mut url = Url::parse(&config.auth_url).map_err(|_| BridgeError::InvalidResponse)?;
    url.query_pairs_mut()
        .append_pair("requestId", request_id)
        .append_pair("origin", caller_origin)
        .append_pair("action", action);
    Ok(url)
}
