//! The agent turn loop.
//!
//! One turn: append the user text, call the model, run the tools it asked
//! for, feed results back, repeat until the model answers without tools.
//! Safe tools run immediately in model order. The first destructive tool
//! stops the turn cold: nothing after it runs, and the caller gets a
//! [`PendingConfirmation`] to resolve with the user before anything moves.

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

use super::conversation::{ContentBlock, Conversation, ProtocolMessage};
use super::provider::{CompletionProvider, ToolSchema};
use super::tools::Tool;

/// A destructive tool call waiting for the user's verdict.
#[derive(Debug, Clone)]
pub struct PendingConfirmation {
    pub conversation_id: Uuid,
    pub tool_use_id: String,
    pub tool_name: String,
    pub tool_input: Value,
    /// The assistant protocol message that carried the call, already
    /// appended to the conversation.
    pub assistant_message: ProtocolMessage,
}

/// How a turn (or a confirmation) ended.
#[derive(Debug)]
pub enum TurnOutcome {
    /// The model answered without further tool calls.
    Completed,
    /// A destructive tool call awaits user confirmation.
    AwaitingConfirmation(PendingConfirmation),
    /// The model call failed; the error is already visible in the
    /// conversation. Never retried automatically.
    Aborted { error: String },
}

pub struct AgentRunner<P: CompletionProvider> {
    provider: P,
    tools: Vec<Box<dyn Tool>>,
}

impl<P: CompletionProvider> AgentRunner<P> {
    pub fn new(provider: P, tools: Vec<Box<dyn Tool>>) -> Self {
        Self { provider, tools }
    }

    pub fn tool_schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|t| t.schema()).collect()
    }

    /// Run one user turn to its outcome.
    pub async fn run_turn(
        &self,
        conversation: &mut Conversation,
        user_text: &str,
    ) -> Result<TurnOutcome> {
        conversation.push_user(user_text);
        self.drive(conversation).await
    }

    /// Execute a confirmed destructive call, then let the model continue.
    pub async fn confirm(
        &self,
        conversation: &mut Conversation,
        pending: PendingConfirmation,
    ) -> Result<TurnOutcome> {
        self.run_tool(
            conversation,
            &pending.tool_use_id,
            &pending.tool_name,
            pending.tool_input.clone(),
        )
        .await;
        self.drive(conversation).await
    }

    /// Decline a destructive call. The protocol history is untouched; the
    /// user sees one notice and the turn is over.
    pub fn cancel(&self, conversation: &mut Conversation, pending: &PendingConfirmation) {
        conversation.push_notice(
            format!("Cancelled {} - no transaction was made.", pending.tool_name),
            false,
        );
    }

    async fn drive(&self, conversation: &mut Conversation) -> Result<TurnOutcome> {
        loop {
            let messages = conversation.protocol_messages();
            let schemas = self.tool_schemas();
            let blocks = match self.provider.complete(&messages, &schemas).await {
                Ok(blocks) => blocks,
                Err(e) => {
                    let error = e.to_string();
                    warn!(%error, "Model call failed, aborting turn");
                    conversation.push_notice(&error, true);
                    return Ok(TurnOutcome::Aborted { error });
                }
            };

            conversation.push_assistant(blocks.clone());
            let assistant_message = ProtocolMessage {
                role: super::conversation::Role::Assistant,
                content: blocks.clone(),
            };

            let tool_uses: Vec<(String, String, Value)> = blocks
                .into_iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolUse { id, name, input } => Some((id, name, input)),
                    _ => None,
                })
                .collect();

            if tool_uses.is_empty() {
                return Ok(TurnOutcome::Completed);
            }

            for (id, name, input) in tool_uses {
                let destructive = self
                    .tools
                    .iter()
                    .find(|t| t.name() == name)
                    .map(|t| t.destructive())
                    .unwrap_or(false);

                if destructive {
                    debug!(tool = %name, "Destructive tool call held for confirmation");
                    return Ok(TurnOutcome::AwaitingConfirmation(PendingConfirmation {
                        conversation_id: conversation.id(),
                        tool_use_id: id,
                        tool_name: name,
                        tool_input: input,
                        assistant_message,
                    }));
                }
                self.run_tool(conversation, &id, &name, input).await;
            }
        }
    }

    /// Execute one tool call and append its result. Failures become
    /// `{"error": …}` results; they never abort the turn.
    async fn run_tool(
        &self,
        conversation: &mut Conversation,
        tool_use_id: &str,
        tool_name: &str,
        input: Value,
    ) {
        let outcome = match self.tools.iter().find(|t| t.name() == tool_name) {
            Some(tool) => tool.execute(input).await,
            None => Err(crate::error::ToolError::NotFound {
                name: tool_name.to_string(),
            }),
        };
        match outcome {
            Ok(value) => {
                conversation.push_tool_result(tool_use_id, tool_name, value.to_string(), false);
            }
            Err(e) => {
                let body = serde_json::json!({"error": e.to_string()});
                warn!(tool = %tool_name, error = %e, "Tool execution failed");
                conversation.push_tool_result(tool_use_id, tool_name, body.to_string(), true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::conversation::{DisplayMessage, Role};
    use crate::agent::tools::test_support::{StubChain, StubDex};
    use crate::agent::tools::{GetBalanceTool, SendTokenTool};
    use crate::error::LlmError;
    use crate::wallet::derive::Keypair;
    use crate::wallet::keystore::{
        FileKeystoreStore, KeySource, KeystoreRecord, encrypt_private_key,
    };
    use crate::wallet::session::WalletSession;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::RwLock;

    const RECIPIENT: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    /// Replays a fixed script of model turns.
    struct ScriptedProvider {
        turns: Vec<std::result::Result<Vec<ContentBlock>, LlmError>>,
        cursor: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(turns: Vec<std::result::Result<Vec<ContentBlock>, LlmError>>) -> Self {
            Self {
                turns,
                cursor: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.cursor.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        async fn complete(
            &self,
            _messages: &[ProtocolMessage],
            _tools: &[ToolSchema],
        ) -> std::result::Result<Vec<ContentBlock>, LlmError> {
            let index = self.cursor.fetch_add(1, Ordering::SeqCst);
            match self.turns.get(index) {
                Some(Ok(blocks)) => Ok(blocks.clone()),
                Some(Err(e)) => Err(LlmError::RequestFailed {
                    reason: e.to_string(),
                }),
                None => panic!("provider called more times than scripted"),
            }
        }
    }

    fn unlocked_session(
        dir: &tempfile::TempDir,
    ) -> Arc<RwLock<WalletSession<FileKeystoreStore>>> {
        let keypair = Keypair::derive(&[31u8; 32]).expect("derive");
        let record = KeystoreRecord {
            address: keypair.address().to_string(),
            encrypted_private_key: encrypt_private_key(&keypair.secret_bytes(), &[0xbb; 32])
                .expect("encrypt"),
            source: KeySource::Passkey,
            credential_id: Some("Y3JlZA==".to_string()),
            wallet_name: None,
            created_at: 1_756_500_000_000,
        };
        let mut session = WalletSession::new(
            FileKeystoreStore::new(dir.path().join("keystore.json")),
            Duration::from_secs(300),
        );
        session.install(record, keypair).expect("install");
        Arc::new(RwLock::new(session))
    }

    fn balance_tool(dir: &tempfile::TempDir) -> Box<dyn Tool> {
        Box::new(GetBalanceTool::new(
            unlocked_session(dir),
            Arc::new(StubChain {
                balance: dec!(42),
            }),
        ))
    }

    fn send_tool(dir: &tempfile::TempDir) -> Box<dyn Tool> {
        Box::new(SendTokenTool::new(
            unlocked_session(dir),
            Arc::new(StubChain { balance: dec!(1) }),
        ))
    }

    fn text(text: &str) -> ContentBlock {
        ContentBlock::Text {
            text: text.to_string(),
        }
    }

    fn tool_use(id: &str, name: &str, input: Value) -> ContentBlock {
        ContentBlock::ToolUse {
            id: id.to_string(),
            name: name.to_string(),
            input,
        }
    }

    #[tokio::test]
    async fn text_only_turn_completes_in_one_model_call() {
        let provider = ScriptedProvider::new(vec![Ok(vec![text("Hello!")])]);
        let runner = AgentRunner::new(provider, vec![]);
        let mut conversation = Conversation::new();

        let outcome = runner.run_turn(&mut conversation, "hi").await.expect("turn");
        assert!(matches!(outcome, TurnOutcome::Completed));
        assert_eq!(runner.provider.calls(), 1);
        assert_eq!(conversation.protocol_messages().len(), 2);
    }

    #[tokio::test]
    async fn safe_tool_turn_feeds_results_back_and_finishes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = ScriptedProvider::new(vec![
            Ok(vec![
                text("Checking your balance."),
                tool_use("toolu_1", "get_balance", json!({})),
            ]),
            Ok(vec![text("You have 42 INJ.")]),
        ]);
        let runner = AgentRunner::new(provider, vec![balance_tool(&dir)]);
        let mut conversation = Conversation::new();

        let outcome = runner
            .run_turn(&mut conversation, "what's my balance?")
            .await
            .expect("turn");
        assert!(matches!(outcome, TurnOutcome::Completed));
        assert_eq!(runner.provider.calls(), 2);

        // user, assistant(tool_use), user(tool_result), assistant(text)
        let protocol = conversation.protocol_messages();
        assert_eq!(protocol.len(), 4);
        assert_eq!(protocol[2].role, Role::User);
        assert!(matches!(
            &protocol[2].content[0],
            ContentBlock::ToolResult { tool_use_id, content }
                if tool_use_id == "toolu_1" && content.contains("42")
        ));
    }

    #[tokio::test]
    async fn first_destructive_tool_halts_the_remaining_list() {
        let dir_a = tempfile::tempdir().expect("tempdir");
        let dir_b = tempfile::tempdir().expect("tempdir");
        let provider = ScriptedProvider::new(vec![Ok(vec![
            tool_use("toolu_1", "get_balance", json!({})),
            tool_use("toolu_2", "send_token", json!({"to": RECIPIENT, "amount": "1"})),
            tool_use("toolu_3", "get_balance", json!({})),
        ])]);
        let runner = AgentRunner::new(provider, vec![balance_tool(&dir_a), send_tool(&dir_b)]);
        let mut conversation = Conversation::new();

        let outcome = runner
            .run_turn(&mut conversation, "send 1 INJ")
            .await
            .expect("turn");
        let TurnOutcome::AwaitingConfirmation(pending) = outcome else {
            panic!("expected confirmation");
        };
        assert_eq!(pending.tool_name, "send_token");
        assert_eq!(pending.tool_use_id, "toolu_2");
        assert_eq!(pending.conversation_id, conversation.id());
        assert_eq!(pending.assistant_message.role, Role::Assistant);

        // The safe tool before it ran; nothing after it did.
        let results: Vec<&str> = conversation
            .events()
            .iter()
            .filter_map(|e| match e {
                crate::agent::conversation::ConversationEvent::ToolResult {
                    tool_use_id, ..
                } => Some(tool_use_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(results, vec!["toolu_1"]);
        assert_eq!(runner.provider.calls(), 1);
    }

    #[tokio::test]
    async fn confirm_executes_and_resumes_the_loop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = ScriptedProvider::new(vec![
            Ok(vec![tool_use(
                "toolu_1",
                "send_token",
                json!({"to": RECIPIENT, "amount": "1"}),
            )]),
            Ok(vec![text("Sent. Here's the explorer link.")]),
        ]);
        let runner = AgentRunner::new(provider, vec![send_tool(&dir)]);
        let mut conversation = Conversation::new();

        let outcome = runner
            .run_turn(&mut conversation, "send 1 INJ")
            .await
            .expect("turn");
        let TurnOutcome::AwaitingConfirmation(pending) = outcome else {
            panic!("expected confirmation");
        };

        let outcome = runner
            .confirm(&mut conversation, pending)
            .await
            .expect("confirm");
        assert!(matches!(outcome, TurnOutcome::Completed));

        let protocol = conversation.protocol_messages();
        // user, assistant(tool_use), user(tool_result), assistant(text)
        assert_eq!(protocol.len(), 4);
        assert!(matches!(
            &protocol[2].content[0],
            ContentBlock::ToolResult { content, .. } if content.contains("txHash")
        ));
    }

    #[tokio::test]
    async fn cancel_leaves_the_protocol_history_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = ScriptedProvider::new(vec![Ok(vec![tool_use(
            "toolu_1",
            "send_token",
            json!({"to": RECIPIENT, "amount": "1"}),
        )])]);
        let runner = AgentRunner::new(provider, vec![send_tool(&dir)]);
        let mut conversation = Conversation::new();

        let outcome = runner
            .run_turn(&mut conversation, "send 1 INJ")
            .await
            .expect("turn");
        let TurnOutcome::AwaitingConfirmation(pending) = outcome else {
            panic!("expected confirmation");
        };

        let protocol_before = conversation.protocol_messages();
        runner.cancel(&mut conversation, &pending);

        assert_eq!(conversation.protocol_messages(), protocol_before);
        let display = conversation.display_messages();
        let notices: Vec<_> = display
            .iter()
            .filter(|m| matches!(m, DisplayMessage::Notice { is_error: false, .. }))
            .collect();
        assert_eq!(notices.len(), 1);
        assert_eq!(runner.provider.calls(), 1);
    }

    #[tokio::test]
    async fn model_errors_abort_visibly_and_are_not_retried() {
        let provider = ScriptedProvider::new(vec![Err(LlmError::RequestFailed {
            reason: "503 Service Unavailable".to_string(),
        })]);
        let runner = AgentRunner::new(provider, vec![]);
        let mut conversation = Conversation::new();

        let outcome = runner
            .run_turn(&mut conversation, "hello")
            .await
            .expect("turn");
        let TurnOutcome::Aborted { error } = outcome else {
            panic!("expected abort");
        };
        assert!(error.contains("503"));
        assert_eq!(runner.provider.calls(), 1);

        // Visible to the user, invisible to the model.
        assert!(conversation.display_messages().iter().any(|m| matches!(
            m,
            DisplayMessage::Notice { is_error: true, .. }
        )));
        assert_eq!(conversation.protocol_messages().len(), 1);
    }

    #[tokio::test]
    async fn unknown_tools_produce_error_results_not_aborts() {
        let provider = ScriptedProvider::new(vec![
            Ok(vec![tool_use("toolu_1", "does_not_exist", json!({}))]),
            Ok(vec![text("That tool isn't available.")]),
        ]);
        let runner = AgentRunner::new(provider, vec![]);
        let mut conversation = Conversation::new();

        let outcome = runner.run_turn(&mut conversation, "do it").await.expect("turn");
        assert!(matches!(outcome, TurnOutcome::Completed));

        let protocol = conversation.protocol_messages();
        assert!(matches!(
            &protocol[2].content[0],
            ContentBlock::ToolResult { content, .. } if content.contains("\"error\"")
        ));
    }
}
