//! Core data model carried through the pipeline.
//!
//! Everything here is plain data: conversation [`Message`]s, the [`Prompt`] a caller
//! submits, the [`ToolCall`]s a backend asks for, and the [`ModelResponse`] that flows
//! back through the middleware chain. None of these types hold locks or handles, so
//! they can be cloned freely between tasks.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    /// Lowercase wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

/// A tool invocation requested by the model.
///
/// The `id` is an opaque token that is unique within one model response; the agent
/// loop echoes it back on the matching [`Message::Tool`] so the backend can correlate
/// results with requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Arguments as a JSON object value, the shape tool handlers receive.
    pub fn arguments_value(&self) -> Value {
        Value::Object(self.arguments.clone())
    }
}

/// One entry of a conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        name: String,
        content: String,
    },
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Message::System {
            content: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Message::User {
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Message::Assistant {
            content: text.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_with_tools(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Message::Assistant {
            content: text.into(),
            tool_calls,
        }
    }

    /// Result of one tool call, correlated by the originating call's id.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Message::Tool {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn role(&self) -> MessageRole {
        match self {
            Message::System { .. } => MessageRole::System,
            Message::User { .. } => MessageRole::User,
            Message::Assistant { .. } => MessageRole::Assistant,
            Message::Tool { .. } => MessageRole::Tool,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Message::System { content }
            | Message::User { content }
            | Message::Assistant { content, .. }
            | Message::Tool { content, .. } => content,
        }
    }

    /// Tool calls carried by an assistant message; empty for every other role.
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

/// What a caller submits to the pipeline: a bare string or a full message sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prompt {
    Text(String),
    Messages(Vec<Message>),
}

impl Prompt {
    /// Plain text used for similarity lookups.
    ///
    /// A bare string is used as is; a message sequence yields the content of its most
    /// recent user message. Returns `None` when no non-empty text exists.
    pub fn query_text(&self) -> Option<&str> {
        let text = match self {
            Prompt::Text(text) => text.as_str(),
            Prompt::Messages(messages) => messages
                .iter()
                .rev()
                .find(|m| m.role() == MessageRole::User)
                .map(Message::content)?,
        };
        if text.is_empty() { None } else { Some(text) }
    }

    /// Converts the prompt into the message sequence a backend receives.
    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Prompt::Text(text) => vec![Message::user(text)],
            Prompt::Messages(messages) => messages,
        }
    }
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Prompt::Text(text.to_string())
    }
}

impl From<String> for Prompt {
    fn from(text: String) -> Self {
        Prompt::Text(text)
    }
}

impl From<Vec<Message>> for Prompt {
    fn from(messages: Vec<Message>) -> Self {
        Prompt::Messages(messages)
    }
}

/// Token accounting reported by a backend for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// A parsed backend reply.
///
/// Immutable once built: middlewares that want to change a response return a new one
/// from `after_response` rather than mutating in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub raw: Value,
}

impl ModelResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
            usage: None,
            provider: String::new(),
            raw: Value::Null,
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = raw;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// One incremental piece of a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub text: String,
}

impl StreamChunk {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_roles_and_content() {
        let msgs = [
            Message::system("sys"),
            Message::user("hi"),
            Message::assistant("hello"),
            Message::tool_result("call_1", "lookup", "42"),
        ];
        let roles: Vec<_> = msgs.iter().map(Message::role).collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::System,
                MessageRole::User,
                MessageRole::Assistant,
                MessageRole::Tool
            ]
        );
        assert_eq!(msgs[3].content(), "42");
        assert!(msgs[2].tool_calls().is_empty());
    }

    #[test]
    fn test_message_serialization_is_role_tagged() {
        let call = ToolCall::new("1", "get_weather", json!({"city": "SF"}).as_object().cloned().unwrap());
        let msg = Message::assistant_with_tools("calling", vec![call]);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["tool_calls"][0]["arguments"]["city"], "SF");

        let plain = serde_json::to_value(Message::assistant("done")).unwrap();
        assert!(plain.get("tool_calls").is_none());
    }

    #[test]
    fn test_query_text_from_string_prompt() {
        assert_eq!(Prompt::from("hello").query_text(), Some("hello"));
        assert_eq!(Prompt::from("").query_text(), None);
    }

    #[test]
    fn test_query_text_uses_most_recent_user_message() {
        let prompt = Prompt::from(vec![
            Message::system("be brief"),
            Message::user("first"),
            Message::assistant("ok"),
            Message::user("second"),
            Message::assistant("sure"),
        ]);
        assert_eq!(prompt.query_text(), Some("second"));
    }

    #[test]
    fn test_query_text_without_user_message() {
        let prompt = Prompt::from(vec![Message::system("only system")]);
        assert_eq!(prompt.query_text(), None);
    }

    #[test]
    fn test_text_prompt_becomes_single_user_message() {
        let messages = Prompt::from("hi").into_messages();
        assert_eq!(messages, vec![Message::user("hi")]);
    }

    #[test]
    fn test_usage_total() {
        let usage = Usage::new(10, 5);
        assert_eq!(usage.total_tokens, 15);
    }
}
