//! Chain access for the Injective EVM.
//!
//! Balance reads go straight to the JSON-RPC node; transfers and history go
//! through the wallet API, which owns transaction construction. The agent
//! tools only ever see the [`ChainClient`] and [`DexService`] traits.

use async_trait::async_trait;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::config::ChainConfig;
use crate::error::ChainError;

/// 18-decimal chain denomination.
const WEI_SCALE: u32 = 18;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendTokenRequest {
    pub from: String,
    pub to: String,
    pub amount: Decimal,
    pub denom: String,
    /// Compact wallet signature over the transfer intent, hex-encoded.
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub tx_hash: String,
    pub explorer_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TxSummary {
    pub tx_hash: String,
    pub direction: String,
    pub counterparty: String,
    pub amount: Decimal,
    pub denom: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SwapQuote {
    pub from_token: String,
    pub to_token: String,
    pub amount_in: Decimal,
    pub amount_out: Decimal,
    pub price_impact_pct: Decimal,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_balance(&self, address: &str) -> Result<Decimal, ChainError>;

    async fn send_token(&self, request: &SendTokenRequest) -> Result<TxReceipt, ChainError>;

    async fn get_tx_history(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<TxSummary>, ChainError>;
}

/// Swap execution is an external service; this runtime treats it as opaque.
#[async_trait]
pub trait DexService: Send + Sync {
    async fn get_quote(
        &self,
        from_token: &str,
        to_token: &str,
        amount: Decimal,
    ) -> Result<SwapQuote, ChainError>;

    async fn execute_swap(
        &self,
        quote: &SwapQuote,
        signature: &str,
    ) -> Result<TxReceipt, ChainError>;
}

pub fn is_evm_address(address: &str) -> bool {
    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("valid pattern"))
        .is_match(address)
}

/// Explorer link for a transaction hash.
pub fn explorer_tx_url(config: &ChainConfig, tx_hash: &str) -> String {
    format!(
        "{}/tx/{}",
        config.explorer_base_url.trim_end_matches('/'),
        tx_hash
    )
}

pub struct HttpChainClient {
    client: reqwest::Client,
    config: ChainConfig,
    api_base: String,
}

#[derive(Deserialize)]
struct JsonRpcReply {
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    message: String,
}

impl HttpChainClient {
    pub fn new(config: ChainConfig, api_base: impl Into<String>) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            config,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    async fn rpc(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, ChainError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let reply: JsonRpcReply = self
            .client
            .post(&self.config.rpc_url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        if let Some(err) = reply.error {
            return Err(ChainError::RpcFailed {
                method: method.to_string(),
                reason: err.message,
            });
        }
        reply.result.ok_or_else(|| ChainError::RpcFailed {
            method: method.to_string(),
            reason: "empty result".to_string(),
        })
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn get_balance(&self, address: &str) -> Result<Decimal, ChainError> {
        if !is_evm_address(address) {
            return Err(ChainError::InvalidAddress(address.to_string()));
        }
        let result = self
            .rpc("eth_getBalance", json!([address, "latest"]))
            .await?;
        let hex = result.as_str().ok_or_else(|| ChainError::RpcFailed {
            method: "eth_getBalance".to_string(),
            reason: "non-string result".to_string(),
        })?;
        let balance = wei_hex_to_decimal(hex).ok_or_else(|| ChainError::RpcFailed {
            method: "eth_getBalance".to_string(),
            reason: format!("unparseable balance {hex}"),
        })?;
        debug!(%address, %balance, "Balance fetched");
        Ok(balance)
    }

    async fn send_token(&self, request: &SendTokenRequest) -> Result<TxReceipt, ChainError> {
        if !is_evm_address(&request.to) {
            return Err(ChainError::InvalidAddress(request.to.clone()));
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct SendReply {
            tx_hash: String,
        }

        let url = format!("{}/wallet/send", self.api_base);
        let response = self.client.post(&url).json(request).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(ChainError::Rejected(format!("{status}: {detail}")));
        }
        let reply: SendReply = response.json().await?;
        Ok(TxReceipt {
            explorer_url: explorer_tx_url(&self.config, &reply.tx_hash),
            tx_hash: reply.tx_hash,
        })
    }

    async fn get_tx_history(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<TxSummary>, ChainError> {
        if !is_evm_address(address) {
            return Err(ChainError::InvalidAddress(address.to_string()));
        }
        let url = format!(
            "{}/wallet/{}/transactions?limit={}",
            self.api_base, address, limit
        );
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ChainError::RpcFailed {
                method: "tx_history".to_string(),
                reason: response.status().to_string(),
            });
        }
        Ok(response.json().await?)
    }
}

/// Convert a 0x-prefixed hex wei amount to a decimal token amount.
fn wei_hex_to_decimal(hex: &str) -> Option<Decimal> {
    let trimmed = hex.strip_prefix("0x").unwrap_or(hex);
    if trimmed.is_empty() {
        return None;
    }
    let wei = u128::from_str_radix(trimmed, 16).ok()?;
    let wei = i128::try_from(wei).ok()?;
    Decimal::try_from_i128_with_scale(wei, WEI_SCALE).ok()
}
