//! Error types for the injpass wallet runtime.

use std::time::Duration;

/// Top-level error type for the wallet runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication error: {0}")]
    Authentication(#[from] AuthenticationError),

    #[error("Keystore error: {0}")]
    Keystore(#[from] KeystoreError),

    #[error("Recovery error: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Passkey ceremony failures.
///
/// Every platform-authenticator failure surfaces here with a human-readable
/// cause; ceremonies are never silently retried.
#[derive(Debug, thiserror::Error)]
pub enum AuthenticationError {
    #[error("Passkey ceremony was cancelled by the user")]
    Cancelled,

    #[error("No platform authenticator is available on this device")]
    NoAuthenticator,

    #[error("The platform does not support passkey credentials")]
    Unsupported,

    #[error("Passkey ceremony failed: {0}")]
    Failed(String),
}

/// Keystore encryption, decryption, and persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum KeystoreError {
    /// Wrong entropy or corrupted ciphertext. The two causes are deliberately
    /// indistinguishable: AEAD authentication is the only signal the caller
    /// gets, so "incorrect password" and "tampered record" look identical.
    #[error("Decryption failed: incorrect key or corrupted data")]
    DecryptionFailed,

    #[error("Entropy too short: need at least {needed} bytes, got {got}")]
    EntropyTooShort { needed: usize, got: usize },

    #[error("No wallet keystore found on this device")]
    NoWallet,

    #[error("Keystore serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Keystore IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wallet recovery failures.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// The locally re-derived address disagrees with the registry record.
    /// Fatal: either the derivation method changed or the backend response is
    /// forged, and signing with the wrong key identity must not happen.
    #[error("Derived address {derived} does not match registry record {expected}")]
    AddressMismatch { derived: String, expected: String },

    #[error("Credential registry rejected the assertion")]
    VerificationRejected,

    #[error("Registry record has no wallet address bound to this credential")]
    NoWalletAddress,

    #[error("Credential registry request failed: {0}")]
    Registry(String),
}

/// Cross-origin authorization bridge errors.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Authorization timed out after {elapsed:?}. Please try again")]
    Timeout { elapsed: Duration },

    #[error("Authorization window was closed before responding")]
    WindowClosed,

    #[error("Popup blocked. Please allow popups for this site")]
    PopupBlocked,

    #[error("Message from disallowed origin {origin} was rejected")]
    OriginRejected { origin: String },

    #[error("Authorization rejected: {reason}")]
    Rejected { reason: String },

    #[error("Invalid response from authorization window")]
    InvalidResponse,

    #[error("Bridge channel closed unexpectedly")]
    ChannelClosed,
}

/// Chain RPC and transaction errors.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("RPC request {method} failed: {reason}")]
    RpcFailed { method: String, reason: String },

    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Model endpoint errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Model request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Invalid response from model endpoint: {reason}")]
    InvalidResponse { reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Tool execution errors.
///
/// These never abort an agent turn: the loop folds them into a structured
/// `{"error": …}` tool result so the model can react to the failure.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool {name} not found")]
    NotFound { name: String },

    #[error("Invalid parameters for tool {name}: {reason}")]
    InvalidParameters { name: String, reason: String },

    #[error("Tool {name} execution failed: {reason}")]
    ExecutionFailed { name: String, reason: String },

    #[error("Wallet locked")]
    WalletLocked,

    #[error("Wallet not connected")]
    WalletNotConnected,
}

/// Result type alias for the wallet runtime.
pub type Result<T> = std::result::Result<T, Error>;

/// Redact bearer tokens, API keys, and similar material from a detail string
/// before it is logged or surfaced to the user.
pub(crate) fn redact_sensitive_detail(raw: &str) -> String {
    let mut value = raw.to_string();
    let patterns = [
        (r"(?i)\b(bearer)\s+[a-z0-9._\-~+/]+=*", "$1 [REDACTED]"),
        (
            r"(?i)\b(token|api[_\-]?key|secret|password)\b(\s*[:=]\s*)([^,\s]+)",
            "$1$2[REDACTED]",
        ),
    ];

    for (pattern, replacement) in patterns {
        if let Ok(re) = regex::Regex::new(pattern) {
            value = re.replace_all(&value, replacement).to_string();
        }
    }

    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decryption_error_does_not_name_a_cause() {
        let msg = KeystoreError::DecryptionFailed.to_string();
        assert!(!msg.contains("password"));
        assert!(!msg.contains("entropy"));
    }

    #[test]
    fn bridge_errors_carry_human_readable_messages() {
        let err = BridgeError::Timeout {
            elapsed: Duration::from_secs(60),
        };
        assert!(err.to_string().contains("try again"));

        let err = BridgeError::WindowClosed;
        assert!(err.to_string().contains("closed"));
    }

    #[test]
    fn redacts_tokens_from_detail_strings() {
        let message = "verify failed bearer abc.def token=abc123 api_key: xyz987";
        let redacted = redact_sensitive_detail(message);
        assert!(!redacted.contains("abc.def"));
        assert!(!redacted.contains("abc123"));
        assert!(!redacted.contains("xyz987"));
    }
}
