//! Model endpoint access.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::LlmError;

use super::conversation::{ContentBlock, ProtocolMessage};

/// A tool advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// One model turn: protocol messages and tool schemas in, content blocks
/// out. Implementations own transport and authentication.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        messages: &[ProtocolMessage],
        tools: &[ToolSchema],
    ) -> Result<Vec<ContentBlock>, LlmError>;
}

pub struct HttpCompletionProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ProtocolMessage],
    tools: &'a [ToolSchema],
}

#[derive(Deserialize)]
struct CompletionResponse {
    content: Vec<ContentBlock>,
}

impl HttpCompletionProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl CompletionProvider for HttpCompletionProvider {
    async fn complete(
        &self,
        messages: &[ProtocolMessage],
        tools: &[ToolSchema],
    ) -> Result<Vec<ContentBlock>, LlmError> {
        let request = CompletionRequest {
            model: &self.model,
            messages,
            tools,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed {
                reason: crate::error::redact_sensitive_detail(&format!("{status}: {detail}")),
            });
        }

        let body: CompletionResponse = response.json().await.map_err(|e| {
            LlmError::InvalidResponse {
                reason: e.to_string(),
            }
        })?;
        debug!(blocks = body.content.len(), "Model turn received");
        Ok(body.content)
    }
}
