//! Agent tool catalogue.
//!
//! Safe tools read; destructive tools move funds and are gated behind an
//! explicit user confirmation by the runner. Execution failures are returned
//! as `ToolError` and folded into `{"error": …}` tool results upstream; a
//! tool never aborts an agent turn.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tokio::sync::RwLock;

use crate::chain::{ChainClient, DexService, SendTokenRequest, is_evm_address};
use crate::config::ChainConfig;
use crate::error::{Error, ToolError};
use crate::wallet::keystore::KeystoreStore;
use crate::wallet::session::{WalletSession, WalletStatus};

use super::provider::ToolSchema;

pub type SharedSession<S> = Arc<RwLock<WalletSession<S>>>;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> Value;

    /// Destructive tools require explicit confirmation before execution.
    fn destructive(&self) -> bool {
        false
    }

    async fn execute(&self, params: Value) -> Result<Value, ToolError>;

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.parameters_schema(),
        }
    }
}

fn required_str(params: &Value, key: &str, tool: &str) -> Result<String, ToolError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ToolError::InvalidParameters {
            name: tool.to_string(),
            reason: format!("missing required string parameter '{key}'"),
        })
}

fn optional_str(params: &Value, key: &str) -> Option<String> {
    params.get(key).and_then(Value::as_str).map(str::to_string)
}

fn required_amount(params: &Value, key: &str, tool: &str) -> Result<Decimal, ToolError> {
    let raw = params.get(key).ok_or_else(|| ToolError::InvalidParameters {
        name: tool.to_string(),
        reason: format!("missing required parameter '{key}'"),
    })?;
    let parsed = match raw {
        Value::String(s) => s.parse::<Decimal>().ok(),
        Value::Number(n) => n.to_string().parse::<Decimal>().ok(),
        _ => None,
    };
    let amount = parsed.ok_or_else(|| ToolError::InvalidParameters {
        name: tool.to_string(),
        reason: format!("'{key}' must be a decimal amount"),
    })?;
    if amount <= Decimal::ZERO {
        return Err(ToolError::InvalidParameters {
            name: tool.to_string(),
            reason: format!("'{key}' must be positive"),
        });
    }
    Ok(amount)
}

fn execution_failed(tool: &str, reason: impl std::fmt::Display) -> ToolError {
    ToolError::ExecutionFailed {
        name: tool.to_string(),
        reason: reason.to_string(),
    }
}

/// Unwrap a session error into a tool error, preserving the locked and
/// not-connected cases as their own variants.
fn session_error(tool: &str, error: Error) -> ToolError {
    match error {
        Error::Tool(e) => e,
        other => execution_failed(tool, other),
    }
}

/// Report the wallet status, address, and network.
pub struct GetWalletInfoTool<S: KeystoreStore> {
    session: SharedSession<S>,
    chain: ChainConfig,
}

impl<S: KeystoreStore> GetWalletInfoTool<S> {
    pub fn new(session: SharedSession<S>, chain: ChainConfig) -> Self {
        Self { session, chain }
    }
}

#[async_trait]
impl<S: KeystoreStore> Tool for GetWalletInfoTool<S> {
    fn name(&self) -> &str {
        "get_wallet_info"
    }

    fn description(&self) -> &str {
        "Get the connected wallet's address, lock status, and network."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}, "required": []})
    }

    async fn execute(&self, _params: Value) -> Result<Value, ToolError> {
        let session = self.session.read().await;
        let (status, address) = match session.status() {
            WalletStatus::None => ("none", None),
            WalletStatus::Locked { address } => ("locked", Some(address)),
            WalletStatus::Unlocked { address } => ("unlocked", Some(address)),
        };
        Ok(json!({
            "status": status,
            "address": address,
            "network": self.chain.network_name,
            "chainId": self.chain.chain_id,
        }))
    }
}

/// Fetch a native-token balance.
pub struct GetBalanceTool<S: KeystoreStore> {
    session: SharedSession<S>,
    chain: Arc<dyn ChainClient>,
}

impl<S: KeystoreStore> GetBalanceTool<S> {
    pub fn new(session: SharedSession<S>, chain: Arc<dyn ChainClient>) -> Self {
        Self { session, chain }
    }
}

#[async_trait]
impl<S: KeystoreStore> Tool for GetBalanceTool<S> {
    fn name(&self) -> &str {
        "get_balance"
    }

    fn description(&self) -> &str {
        "Get the INJ balance of an address. Defaults to the connected wallet."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "address": {
                    "type": "string",
                    "description": "0x address to query. Omit for the connected wallet."
                }
            },
            "required": []
        })
    }

    async fn execute(&self, params: Value) -> Result<Value, ToolError> {
        let address = match optional_str(&params, "address") {
            Some(address) => address,
            None => match self.session.read().await.status() {
                WalletStatus::Locked { address } | WalletStatus::Unlocked { address } => address,
                WalletStatus::None => return Err(ToolError::WalletNotConnected),
            },
        };
        let balance = self
            .chain
            .get_balance(&address)
            .await
            .map_err(|e| execution_failed(self.name(), e))?;
        Ok(json!({
            "address": address,
            "balance": balance.to_string(),
            "denom": "INJ",
        }))
    }
}

/// Fetch a swap quote from the dex.
pub struct GetSwapQuoteTool {
    dex: Arc<dyn DexService>,
}

impl GetSwapQuoteTool {
    pub fn new(dex: Arc<dyn DexService>) -> Self {
        Self { dex }
    }
}

#[async_trait]
impl Tool for GetSwapQuoteTool {
    fn name(&self) -> &str {
        "get_swap_quote"
    }

    fn description(&self) -> &str {
        "Quote a token swap without executing it."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "fromToken": {"type": "string", "description": "Token symbol to sell"},
                "toToken": {"type": "string", "description": "Token symbol to buy"},
                "amount": {"type": "string", "description": "Amount of fromToken to sell"}
            },
            "required": ["fromToken", "toToken", "amount"]
        })
    }

    async fn execute(&self, params: Value) -> Result<Value, ToolError> {
        let from_token = required_str(&params, "fromToken", self.name())?;
        let to_token = required_str(&params, "toToken", self.name())?;
        let amount = required_amount(&params, "amount", self.name())?;

        let quote = self
            .dex
            .get_quote(&from_token, &to_token, amount)
            .await
            .map_err(|e| execution_failed(self.name(), e))?;
        serde_json::to_value(&quote).map_err(|e| execution_failed(self.name(), e))
    }
}

/// Fetch recent transactions for an address.
pub struct GetTxHistoryTool<S: KeystoreStore> {
    session: SharedSession<S>,
    chain: Arc<dyn ChainClient>,
}

impl<S: KeystoreStore> GetTxHistoryTool<S> {
    pub fn new(session: SharedSession<S>, chain: Arc<dyn ChainClient>) -> Self {
        Self { session, chain }
    }
}

#[async_trait]
impl<S: KeystoreStore> Tool for GetTxHistoryTool<S> {
    fn name(&self) -> &str {
        "get_tx_history"
    }

    fn description(&self) -> &str {
        "List recent transactions for an address. Defaults to the connected wallet."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "address": {"type": "string", "description": "0x address. Omit for the connected wallet."},
                "limit": {"type": "integer", "description": "Maximum entries to return, default 10"}
            },
            "required": []
        })
    }

    async fn execute(&self, params: Value) -> Result<Value, ToolError> {
        let address = match optional_str(&params, "address") {
            Some(address) => address,
            None => match self.session.read().await.status() {
                WalletStatus::Locked { address } | WalletStatus::Unlocked { address } => address,
                WalletStatus::None => return Err(ToolError::WalletNotConnected),
            },
        };
        let limit = params
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(10)
            .min(100) as usize;

        let history = self
            .chain
            .get_tx_history(&address, limit)
            .await
            .map_err(|e| execution_failed(self.name(), e))?;
        Ok(json!({"address": address, "transactions": history}))
    }
}

/// Execute a token swap with the wallet key. Destructive.
pub struct ExecuteSwapTool<S: KeystoreStore> {
    session: SharedSession<S>,
    dex: Arc<dyn DexService>,
}

impl<S: KeystoreStore> ExecuteSwapTool<S> {
    pub fn new(session: SharedSession<S>, dex: Arc<dyn DexService>) -> Self {
        Self { session, dex }
    }
}

#[async_trait]
impl<S: KeystoreStore> Tool for ExecuteSwapTool<S> {
    fn name(&self) -> &str {
        "execute_swap"
    }

    fn description(&self) -> &str {
        "Swap tokens with the connected wallet. Requires user confirmation."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "fromToken": {"type": "string", "description": "Token symbol to sell"},
                "toToken": {"type": "string", "description": "Token symbol to buy"},
                "amount": {"type": "string", "description": "Amount of fromToken to sell"}
            },
            "required": ["fromToken", "toToken", "amount"]
        })
    }

    fn destructive(&self) -> bool {
        true
    }

    async fn execute(&self, params: Value) -> Result<Value, ToolError> {
        let from_token = required_str(&params, "fromToken", self.name())?;
        let to_token = required_str(&params, "toToken", self.name())?;
        let amount = required_amount(&params, "amount", self.name())?;

        let quote = self
            .dex
            .get_quote(&from_token, &to_token, amount)
            .await
            .map_err(|e| execution_failed(self.name(), e))?;

        let signature = {
            let mut session = self.session.write().await;
            let keypair = session
                .keypair()
                .map_err(|e| session_error(self.name(), e))?;
            let intent = format!("swap {amount} {from_token} for {to_token}");
            let signature = keypair
                .sign_message(&intent)
                .map_err(|e| execution_failed(self.name(), e))?;
            session.record_tx_auth();
            hex::encode(signature)
        };

        let receipt = self
            .dex
            .execute_swap(&quote, &signature)
            .await
            .map_err(|e| execution_failed(self.name(), e))?;
        Ok(json!({
            "txHash": receipt.tx_hash,
            "explorerUrl": receipt.explorer_url,
            "amountOut": quote.amount_out.to_string(),
            "toToken": quote.to_token,
        }))
    }
}

/// Send tokens from the wallet. Destructive.
pub struct SendTokenTool<S: KeystoreStore> {
    session: SharedSession<S>,
    chain: Arc<dyn ChainClient>,
}

impl<S: KeystoreStore> SendTokenTool<S> {
    pub fn new(session: SharedSession<S>, chain: Arc<dyn ChainClient>) -> Self {
        Self { session, chain }
    }
}

#[async_trait]
impl<S: KeystoreStore> Tool for SendTokenTool<S> {
    fn name(&self) -> &str {
        "send_token"
    }

    fn description(&self) -> &str {
        "Send tokens from the connected wallet to another address. Requires user confirmation."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "to": {"type": "string", "description": "Recipient 0x address"},
                "amount": {"type": "string", "description": "Amount to send"},
                "denom": {"type": "string", "description": "Token denom, default INJ"}
            },
            "required": ["to", "amount"]
        })
    }

    fn destructive(&self) -> bool {
        true
    }

    async fn execute(&self, params: Value) -> Result<Value, ToolError> {
        let to = required_str(&params, "to", self.name())?;
        if !is_evm_address(&to) {
            return Err(ToolError::InvalidParameters {
                name: self.name().to_string(),
                reason: format!("'{to}' is not a valid 0x address"),
            });
        }
        let amount = required_amount(&params, "amount", self.name())?;
        let denom = optional_str(&params, "denom").unwrap_or_else(|| "INJ".to_string());

        let (from, signature) = {
            let mut session = self.session.write().await;
            let keypair = session
                .keypair()
                .map_err(|e| session_error(self.name(), e))?;
            let intent = format!("send {amount} {denom} to {to}");
            let signature = keypair
                .sign_message(&intent)
                .map_err(|e| execution_failed(self.name(), e))?;
            let from = keypair.address().to_string();
            session.record_tx_auth();
            (from, hex::encode(signature))
        };

        let receipt = self
            .chain
            .send_token(&SendTokenRequest {
                from,
                to: to.clone(),
                amount,
                denom: denom.clone(),
                signature,
            })
            .await
            .map_err(|e| execution_failed(self.name(), e))?;
        Ok(json!({
            "txHash": receipt.tx_hash,
            "explorerUrl": receipt.explorer_url,
            "to": to,
            "amount": amount.to_string(),
            "denom": denom,
        }))
    }
}
