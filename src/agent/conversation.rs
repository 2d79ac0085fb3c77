//! Conversation state for the agent loop.
//!
//! A conversation is one append-only event log with two projections. The
//! protocol projection is byte-faithful to what the model endpoint expects;
//! the display projection is what a UI renders, including notices that never
//! reach the model. Keeping both as views over the same log makes them
//! impossible to drift apart.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One content block in a protocol message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A message in the exact shape the model endpoint consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtocolMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

/// What a UI renders for one entry.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayMessage {
    User { text: String },
    Assistant { text: String },
    ToolCall { name: String, input: Value },
    ToolResult { name: String, content: String, is_error: bool },
    Notice { text: String, is_error: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    UserText {
        text: String,
    },
    /// A full assistant protocol message, text and tool_use blocks included.
    AssistantTurn {
        message: ProtocolMessage,
    },
    ToolResult {
        tool_use_id: String,
        tool_name: String,
        content: String,
        is_error: bool,
    },
    /// Display-only. Never appears in the protocol projection.
    Notice {
        text: String,
        is_error: bool,
    },
}

pub struct Conversation {
    id: Uuid,
    events: Vec<ConversationEvent>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            events: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn events(&self) -> &[ConversationEvent] {
        &self.events
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.events.push(ConversationEvent::UserText { text: text.into() });
    }

    pub fn push_assistant(&mut self, content: Vec<ContentBlock>) {
        self.events.push(ConversationEvent::AssistantTurn {
            message: ProtocolMessage {
                role: Role::Assistant,
                content,
            },
        });
    }

    pub fn push_tool_result(
        &mut self,
        tool_use_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) {
        self.events.push(ConversationEvent::ToolResult {
            tool_use_id: tool_use_id.into(),
            tool_name: tool_name.into(),
            content: content.into(),
            is_error,
        });
    }

    pub fn push_notice(&mut self, text: impl Into<String>, is_error: bool) {
        self.events.push(ConversationEvent::Notice {
            text: text.into(),
            is_error,
        });
    }

    /// The model-endpoint view. Notices are absent; consecutive tool results
    /// fold into a single user message, one `tool_result` block each.
    pub fn protocol_messages(&self) -> Vec<ProtocolMessage> {
        let mut messages: Vec<ProtocolMessage> = Vec::new();
        for event in &self.events {
            match event {
                ConversationEvent::UserText { text } => messages.push(ProtocolMessage {
                    role: Role::User,
                    content: vec![ContentBlock::Text { text: text.clone() }],
                }),
                ConversationEvent::AssistantTurn { message } => messages.push(message.clone()),
                ConversationEvent::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => {
                    let block = ContentBlock::ToolResult {
                        tool_use_id: tool_use_id.clone(),
                        content: content.clone(),
                    };
                    match messages.last_mut() {
                        Some(last)
                            if last.role == Role::User
                                && last
                                    .content
                                    .iter()
                                    .all(|b| matches!(b, ContentBlock::ToolResult { .. })) =>
                        {
                            last.content.push(block);
                        }
                        _ => messages.push(ProtocolMessage {
                            role: Role::User,
                            content: vec![block],
                        }),
                    }
                }
                ConversationEvent::Notice { .. } => {}
            }
        }
        messages
    }

    /// The UI view.
    pub fn display_messages(&self) -> Vec<DisplayMessage> {
        let mut display = Vec::new();
        for event in &self.events {
            match event {
                ConversationEvent::UserText { text } => {
                    display.push(DisplayMessage::User { text: text.clone() });
                }
                ConversationEvent::AssistantTurn { message } => {
                    for block in &message.content {
                        match block {
                            ContentBlock::Text { text } => {
                                display.push(DisplayMessage::Assistant { text: text.clone() });
                            }
                            ContentBlock::ToolUse { name, input, .. } => {
                                display.push(DisplayMessage::ToolCall {
                                    name: name.clone(),
                                    input: input.clone(),
                                });
                            }
                            ContentBlock::ToolResult { .. } => {}
                        }
                    }
                }
                ConversationEvent::ToolResult {
                    tool_name,
                    content,
                    is_error,
                    ..
                } => {
                    display.push(DisplayMessage::ToolResult {
                        name: tool_name.clone(),
                        content: content.clone(),
                        is_error: *is_error,
                    });
                }
                ConversationEvent::Notice { text, is_error } => {
                    display.push(DisplayMessage::Notice {
                        text: text.clone(),
                        is_error: *is_error,
                    });
                }
            }
        }
        display
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn content_blocks_serialize_to_the_protocol_shape() {
        let block = ContentBlock::ToolUse {
            id: "toolu_1".to_string(),
            name: "get_balance".to_string(),
            input: json!({"address": "0xabc"}),
        };
        let value = serde_json::to_value(&block).expect("serialize");
        assert_eq!(value["type"], "tool_use");
        assert_eq!(value["id"], "toolu_1");

        let result = ContentBlock::ToolResult {
            tool_use_id: "toolu_1".to_string(),
            content: "{\"balance\":\"5\"}".to_string(),
        };
        let value = serde_json::to_value(&result).expect("serialize");
        assert_eq!(value["type"], "tool_result");
        assert_eq!(value["tool_use_id"], "toolu_1");
    }

    #[test]
    fn notices_never_reach_the_protocol_projection() {
        let mut conversation = Conversation::new();
        conversation.push_user("hi");
        conversation.push_notice("Transaction cancelled", false);
        conversation.push_notice("Model unavailable", true);

        let protocol = conversation.protocol_messages();
        assert_eq!(protocol.len(), 1);
        assert_eq!(protocol[0].role, Role::User);

        let display = conversation.display_messages();
        assert_eq!(display.len(), 3);
    }

    #[test]
    fn consecutive_tool_results_fold_into_one_user_message() {
        let mut conversation = Conversation::new();
        conversation.push_user("check things");
        conversation.push_assistant(vec![
            ContentBlock::ToolUse {
                id: "toolu_1".to_string(),
                name: "get_balance".to_string(),
                input: json!({}),
            },
            ContentBlock::ToolUse {
                id: "toolu_2".to_string(),
                name: "get_wallet_info".to_string(),
                input: json!({}),
            },
        ]);
        conversation.push_tool_result("toolu_1", "get_balance", "{\"balance\":\"5\"}", false);
        conversation.push_tool_result("toolu_2", "get_wallet_info", "{\"address\":\"0xa\"}", false);

        let protocol = conversation.protocol_messages();
        assert_eq!(protocol.len(), 3);
        assert_eq!(protocol[2].role, Role::User);
        assert_eq!(protocol[2].content.len(), 2);
        assert!(matches!(
            &protocol[2].content[0],
            ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "toolu_1"
        ));
        assert!(matches!(
            &protocol[2].content[1],
            ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "toolu_2"
        ));
    }

    #[test]
    fn tool_results_after_new_user_text_start_a_fresh_message() {
        let mut conversation = Conversation::new();
        conversation.push_user("first");
        conversation.push_tool_result("toolu_1", "get_balance", "{}", false);
        conversation.push_user("second");
        conversation.push_tool_result("toolu_2", "get_balance", "{}", false);

        let protocol = conversation.protocol_messages();
        assert_eq!(protocol.len(), 4);
    }

    #[test]
    fn display_projection_expands_assistant_blocks() {
        let mut conversation = Conversation::new();
        conversation.push_assistant(vec![
            ContentBlock::Text {
                text: "Let me check.".to_string(),
            },
            ContentBlock::ToolUse {
                id: "toolu_1".to_string(),
                name: "get_balance".to_string(),
                input: json!({"address": "0xa"}),
            },
        ]);
        conversation.push_tool_result("toolu_1", "get_balance", "{\"error\":\"down\"}", true);

        let display = conversation.display_messages();
        assert_eq!(
            display,
            vec![
                DisplayMessage::Assistant {
                    text: "Let me check.".to_string()
                },
                DisplayMessage::ToolCall {
                    name: "get_balance".to_string(),
                    input: json!({"address": "0xa"}),
                },
                DisplayMessage::ToolResult {
                    name: "get_balance".to_string(),
                    content: "{\"error\":\"down\"}".to_string(),
                    is_error: true,
                },
            ]
        );
    }

    #[test]
    fn conversations_get_unique_ids() {
        assert_ne!(Conversation::new().id(), Conversation::new().id());
    }
}
