//! OpenAI-compatible chat-completions adapter.
//!
//! [`OpenAiProvider`] translates between the pipeline's data model and the
//! `/chat/completions` JSON shape shared by OpenAI, xAI and most OpenAI-compatible
//! servers, hosted or local. Pair it with a transport through
//! [`ProviderBackend`](crate::ProviderBackend).
//!
//! Tool calls arrive with their arguments encoded as a JSON string; they are decoded
//! into objects here so the rest of the crate never sees the wire encoding.

use crate::backend::{ChatRequest, PreparedRequest, Provider};
use crate::tools::ToolSpec;
use crate::types::{Message, ModelResponse, StreamChunk, ToolCall, Usage};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// OpenAI message format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// OpenAI tool call format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: OpenAIFunction,
}

/// OpenAI function format; `arguments` is a JSON-encoded string
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

/// OpenAI API request
#[derive(Debug, Clone, Serialize)]
pub struct OpenAIRequest {
    pub model: String,
    pub messages: Vec<OpenAIMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
}

/// Non-streaming completion body
#[derive(Debug, Clone, Deserialize)]
struct OpenAICompletion {
    #[serde(default)]
    choices: Vec<OpenAICompletionChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAICompletionChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct OpenAIUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// OpenAI API streaming chunk
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIChunk {
    #[serde(default)]
    pub choices: Vec<OpenAIChoice>,
}

/// OpenAI choice in streaming response
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIChoice {
    #[serde(default)]
    pub delta: OpenAIDelta,
    pub finish_reason: Option<String>,
}

/// OpenAI delta in streaming response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAIDelta {
    #[serde(default)]
    pub content: Option<String>,
}

/// Provider for the chat-completions API.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    base_url: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl OpenAiProvider {
    /// `base_url` is the API root, e.g. `https://api.openai.com/v1`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Provider for OpenAiProvider {
    fn prepare_request(&self, request: &ChatRequest<'_>, stream: bool) -> Result<PreparedRequest> {
        let messages = request
            .messages
            .iter()
            .map(to_openai_message)
            .collect::<Result<Vec<_>>>()?;

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(request.tools.iter().map(to_openai_tool).collect())
        };

        let response_format = request.response_schema.map(|schema| {
            if request.strict {
                serde_json::json!({
                    "type": "json_schema",
                    "json_schema": {"name": "response", "schema": schema, "strict": true}
                })
            } else {
                serde_json::json!({"type": "json_object"})
            }
        });

        let body = OpenAIRequest {
            model: request.target.to_string(),
            messages,
            stream,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            tools,
            response_format,
        };

        Ok(PreparedRequest {
            endpoint: format!("{}/chat/completions", self.base_url),
            payload: serde_json::to_value(body)?,
        })
    }

    fn parse_response(&self, raw: Value) -> Result<ModelResponse> {
        let completion: OpenAICompletion = serde_json::from_value(raw.clone())?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::api("response contained no choices"))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(from_openai_tool_call)
            .collect::<Result<Vec<_>>>()?;

        let mut response = ModelResponse::new(choice.message.content.unwrap_or_default())
            .with_tool_calls(tool_calls)
            .with_provider("openai")
            .with_raw(raw);
        if let Some(usage) = completion.usage {
            response = response.with_usage(Usage::new(usage.prompt_tokens, usage.completion_tokens));
        }
        Ok(response)
    }

    fn parse_stream_chunk(&self, raw: &Value) -> Result<Option<StreamChunk>> {
        let chunk: OpenAIChunk = serde_json::from_value(raw.clone())
            .map_err(|e| Error::stream(format!("Failed to parse chunk: {}", e)))?;

        Ok(chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|text| !text.is_empty())
            .map(StreamChunk::new))
    }
}

fn to_openai_message(message: &Message) -> Result<OpenAIMessage> {
    let mut wire = OpenAIMessage {
        role: message.role().as_str().to_string(),
        content: message.content().to_string(),
        tool_calls: None,
        tool_call_id: None,
        name: None,
    };

    match message {
        Message::Assistant { tool_calls, .. } if !tool_calls.is_empty() => {
            let calls = tool_calls
                .iter()
                .map(|call| {
                    Ok::<_, Error>(OpenAIToolCall {
                        id: call.id.clone(),
                        call_type: function_type(),
                        function: OpenAIFunction {
                            name: call.name.clone(),
                            arguments: serde_json::to_string(&call.arguments)?,
                        },
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            wire.tool_calls = Some(calls);
        }
        Message::Tool {
            tool_call_id, name, ..
        } => {
            wire.tool_call_id = Some(tool_call_id.clone());
            wire.name = Some(name.clone());
        }
        _ => {}
    }

    Ok(wire)
}

fn to_openai_tool(spec: &ToolSpec) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": spec.name,
            "description": spec.description,
            "parameters": spec.parameters,
        }
    })
}

fn from_openai_tool_call(call: OpenAIToolCall) -> Result<ToolCall> {
    let arguments = if call.function.arguments.trim().is_empty() {
        Map::new()
    } else {
        match serde_json::from_str::<Value>(&call.function.arguments) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                return Err(Error::api(format!(
                    "arguments for tool call {} are not an object: {}",
                    call.function.name, other
                )));
            }
            Err(e) => {
                return Err(Error::api(format!(
                    "invalid arguments for tool call {}: {}",
                    call.function.name, e
                )));
            }
        }
    };
    Ok(ToolCall::new(call.id, call.function.name, arguments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider() -> OpenAiProvider {
        OpenAiProvider::new("http://localhost:1234/v1/")
    }

    #[test]
    fn test_prepare_request_shape() {
        let call = ToolCall::new("call_1", "lookup", json!({"q": "rust"}).as_object().cloned().unwrap());
        let messages = vec![
            Message::system("be brief"),
            Message::user("search rust"),
            Message::assistant_with_tools("", vec![call]),
            Message::tool_result("call_1", "lookup", "found"),
        ];
        let tools = vec![ToolSpec::new("lookup", "Search", json!({"type": "object"}))];
        let request = ChatRequest::new("gpt-4o", &messages).with_tools(&tools);

        let prepared = provider().with_temperature(0.2).prepare_request(&request, false).unwrap();
        assert_eq!(prepared.endpoint, "http://localhost:1234/v1/chat/completions");

        let payload = prepared.payload;
        assert_eq!(payload["model"], "gpt-4o");
        assert_eq!(payload["stream"], false);
        assert!((payload["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
        assert!(payload.get("max_tokens").is_none());
        assert_eq!(payload["messages"][0]["role"], "system");
        assert_eq!(
            payload["messages"][2]["tool_calls"][0]["function"]["arguments"],
            "{\"q\":\"rust\"}"
        );
        assert_eq!(payload["messages"][3]["tool_call_id"], "call_1");
        assert_eq!(payload["tools"][0]["function"]["name"], "lookup");
        assert!(payload.get("response_format").is_none());
    }

    #[test]
    fn test_prepare_request_with_schema() {
        let messages = vec![Message::user("x")];
        let schema = json!({"type": "object"});

        let loose = ChatRequest::new("m", &messages).with_response_schema(&schema, false);
        let payload = provider().prepare_request(&loose, true).unwrap().payload;
        assert_eq!(payload["response_format"]["type"], "json_object");
        assert_eq!(payload["stream"], true);

        let strict = ChatRequest::new("m", &messages).with_response_schema(&schema, true);
        let payload = provider().prepare_request(&strict, false).unwrap().payload;
        assert_eq!(payload["response_format"]["json_schema"]["strict"], true);
    }

    #[test]
    fn test_parse_response_with_tool_calls_and_usage() {
        let raw = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "get_weather", "arguments": "{\"city\":\"Paris\"}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        });

        let response = provider().parse_response(raw).unwrap();
        assert_eq!(response.text, "");
        assert_eq!(response.tool_calls[0].name, "get_weather");
        assert_eq!(response.tool_calls[0].arguments["city"], "Paris");
        assert_eq!(response.usage, Some(Usage::new(12, 3)));
        assert_eq!(response.provider, "openai");
    }

    #[test]
    fn test_parse_response_rejects_bad_arguments() {
        let raw = json!({
            "choices": [{"message": {"tool_calls": [{
                "id": "c", "function": {"name": "f", "arguments": "{not json"}
            }]}}]
        });
        assert!(matches!(provider().parse_response(raw), Err(Error::Api(_))));
    }

    #[test]
    fn test_parse_response_without_choices() {
        assert!(provider().parse_response(json!({"choices": []})).is_err());
    }

    #[test]
    fn test_parse_stream_chunk() {
        let p = provider();
        let chunk = p
            .parse_stream_chunk(&json!({"choices": [{"delta": {"content": "Hel"}, "finish_reason": null}]}))
            .unwrap();
        assert_eq!(chunk, Some(StreamChunk::new("Hel")));

        let done = p
            .parse_stream_chunk(&json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}))
            .unwrap();
        assert_eq!(done, None);
    }
}
