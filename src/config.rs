//! Configuration for the wallet runtime.
//!
//! Settings are loaded with priority: env var > default. `.env` files are
//! loaded via dotenvy early in `Config::from_env`, never overwriting vars
//! already present in the process environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Build mode for the bridge's origin-validation affordances.
///
/// In `Development`, a cross-window message from an unexpected origin is
/// logged and tolerated; in `Production` it is dropped without processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Development,
    Production,
}

impl BuildMode {
    fn parse(value: &str, key: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected 'development' or 'production', got '{value}'"),
            }),
        }
    }

    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main configuration for the wallet runtime.
#[derive(Debug, Clone)]
pub struct Config {
    pub bridge: BridgeConfig,
    pub registry: RegistryConfig,
    pub chain: ChainConfig,
    pub llm: LlmConfig,
    pub keystore: KeystoreConfig,
}

/// Cross-origin authorization bridge settings.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Fixed internal authorization URL the caller opens as a popup.
    pub auth_url: String,
    /// Fixed embed URL the connector points its iframe at.
    pub embed_url: String,
    /// Hard wall-clock deadline for a terminal bridge response.
    pub response_timeout: Duration,
    /// Interval between request resends while waiting for popup readiness.
    pub resend_interval: Duration,
    /// Bounded resend count; after this the caller waits for the timeout.
    pub max_resend_attempts: u32,
    /// Exact-match origin allowlist. When non-empty it replaces the
    /// loopback/same-origin affordance entirely.
    pub allowed_origins: Vec<String>,
    pub build_mode: BuildMode,
}

impl BridgeConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let auth_url =
            optional_env("INJPASS_AUTH_URL").unwrap_or_else(|| "https://injpass.xyz/auth".into());
        let embed_url =
            optional_env("INJPASS_EMBED_URL").unwrap_or_else(|| "https://injpass.xyz/embed".into());

        let response_timeout_ms =
            parse_env_u64("INJPASS_BRIDGE_TIMEOUT_MS")?.unwrap_or(60_000);
        if response_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "INJPASS_BRIDGE_TIMEOUT_MS".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        let resend_interval_ms =
            parse_env_u64("INJPASS_BRIDGE_RESEND_INTERVAL_MS")?.unwrap_or(1_000);
        if resend_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "INJPASS_BRIDGE_RESEND_INTERVAL_MS".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        let max_resend_attempts = parse_env_u64("INJPASS_BRIDGE_MAX_RESENDS")?
            .map(|v| v as u32)
            .unwrap_or(5);

        let allowed_origins = optional_env("INJPASS_ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().trim_end_matches('/').to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let build_mode = match optional_env("INJPASS_ENV") {
            Some(raw) => BuildMode::parse(&raw, "INJPASS_ENV")?,
            None => BuildMode::Development,
        };

        Ok(Self {
            auth_url,
            embed_url,
            response_timeout: Duration::from_millis(response_timeout_ms),
            resend_interval: Duration::from_millis(resend_interval_ms),
            max_resend_attempts,
            allowed_origins,
            build_mode,
        })
    }
}

/// Backend credential-registry settings.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl RegistryConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let base_url = optional_env("INJPASS_REGISTRY_URL")
            .unwrap_or_else(|| "https://api.injpass.xyz".into());
        let timeout_ms = parse_env_u64("INJPASS_REGISTRY_TIMEOUT_MS")?.unwrap_or(30_000);
        Ok(Self {
            base_url,
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}

/// Chain RPC settings.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub explorer_base_url: String,
    pub chain_id: u64,
    pub network_name: String,
    pub timeout: Duration,
}

impl ChainConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let rpc_url = optional_env("INJECTIVE_RPC_URL")
            .unwrap_or_else(|| "https://evm-rpc.injective.network".into());
        let explorer_base_url = optional_env("INJPASS_EXPLORER_URL")
            .unwrap_or_else(|| "https://blockscout.injective.network".into());
        let chain_id = parse_env_u64("INJPASS_CHAIN_ID")?.unwrap_or(1776);
        let network_name = optional_env("INJPASS_NETWORK_NAME")
            .unwrap_or_else(|| "Injective EVM Mainnet".into());
        let timeout_ms = parse_env_u64("INJPASS_CHAIN_TIMEOUT_MS")?.unwrap_or(30_000);
        Ok(Self {
            rpc_url,
            explorer_base_url,
            chain_id,
            network_name,
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}

/// Model endpoint settings for the agent loop.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub endpoint: String,
    pub model: String,
    pub timeout: Duration,
}

impl LlmConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let endpoint = optional_env("INJPASS_AGENT_ENDPOINT")
            .unwrap_or_else(|| "https://injpass.xyz/api/agents".into());
        let model =
            optional_env("INJPASS_AGENT_MODEL").unwrap_or_else(|| "claude-sonnet-4-6".into());
        let timeout_ms = parse_env_u64("INJPASS_AGENT_TIMEOUT_MS")?.unwrap_or(120_000);
        Ok(Self {
            endpoint,
            model,
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}

/// Keystore persistence settings.
#[derive(Debug, Clone)]
pub struct KeystoreConfig {
    /// Path to the single persisted keystore record.
    pub path: PathBuf,
}

impl KeystoreConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let path = optional_env("INJPASS_KEYSTORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(default_keystore_path);
        Ok(Self { path })
    }
}

/// Get the default keystore path (~/.injpass/keystore.json).
pub fn default_keystore_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".injpass")
        .join("keystore.json")
}

impl Config {
    /// Load configuration from environment variables, loading `.env` first.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Ok(Self {
            bridge: BridgeConfig::resolve()?,
            registry: RegistryConfig::resolve()?,
            chain: ChainConfig::resolve()?,
            llm: LlmConfig::resolve()?,
            keystore: KeystoreConfig::resolve()?,
        })
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    optional_env(key)
        .map(|s| s.parse())
        .transpose()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must be a non-negative integer: {e}"),
        })
}
