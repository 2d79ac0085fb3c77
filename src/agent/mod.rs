//! Conversational agent over the wallet tools.

pub mod conversation;
pub mod provider;
pub mod runner;
pub mod tools;

pub use conversation::{
    ContentBlock, Conversation, ConversationEvent, DisplayMessage, ProtocolMessage, Role,
};
pub use provider::{CompletionProvider, HttpCompletionProvider, ToolSchema};
pub use runner::{AgentRunner, PendingConfirmation, TurnOutcome};
pub use tools::{
    ExecuteSwapTool, GetBalanceTool, GetSwapQuoteTool, GetTxHistoryTool, GetWalletInfoTool,
    SendTokenTool, SharedSession, Tool,
};
