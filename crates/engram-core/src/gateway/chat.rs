//! OpenAI-compatible chat backend
//!
//! Speaks the `/chat/completions` wire format with the `tools` parameter
//! so models that support function calling return structured tool calls.

use serde_json::json;

use super::{ChatBackend, ChatRequest, ChatResponse, ChatRole, GatewayError, ToolCall, Usage};

/// HTTP client for any OpenAI-compatible chat completions endpoint
pub struct OpenAiCompatChat {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiCompatChat {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait::async_trait]
impl ChatBackend for OpenAiCompatChat {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        if self.api_key.trim().is_empty() {
            return Err(GatewayError::MissingKey("chat api key not configured".into()));
        }

        let endpoint = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut payload = json!({
            "model": request.model,
            "messages": messages_to_wire(request),
        });
        if let Some(tools) = &request.tools {
            payload["tools"] = tools.clone();
        }
        if let Some(max_tokens) = request.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            payload["temperature"] = json!(temperature);
        }

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        if !status.is_success() {
            let message = body
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string();
            return Err(match status.as_u16() {
                429 => GatewayError::RateLimited(message),
                500..=599 => GatewayError::Overloaded(message),
                other => GatewayError::Api { status: other, message },
            });
        }

        parse_chat_response(&body)
    }
}

/// Convert a request's messages to the OpenAI wire format
fn messages_to_wire(request: &ChatRequest) -> Vec<serde_json::Value> {
    request
        .messages
        .iter()
        .map(|m| {
            let mut msg = json!({
                "role": match m.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                    ChatRole::Tool => "tool",
                },
                "content": m.content,
            });
            if !m.tool_calls.is_empty() {
                let calls: Vec<serde_json::Value> = m
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": { "name": tc.name, "arguments": tc.arguments }
                        })
                    })
                    .collect();
                msg["tool_calls"] = json!(calls);
            }
            if let Some(id) = &m.tool_call_id {
                msg["tool_call_id"] = json!(id);
            }
            msg
        })
        .collect()
}

/// Parse a non-streaming `/chat/completions` response body
fn parse_chat_response(body: &serde_json::Value) -> Result<ChatResponse, GatewayError> {
    let choice = body.get("choices").and_then(|c| c.get(0));
    let message = choice.and_then(|c| c.get("message"));

    let content = message
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let tool_calls = message
        .and_then(|m| m.get("tool_calls"))
        .and_then(|v| v.as_array())
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .filter_map(|(i, tc)| {
                    let func = tc.get("function")?;
                    let name = func.get("name")?.as_str()?.to_string();
                    // Arguments arrive as a JSON string, occasionally as an
                    // object; normalize to JSON text.
                    let arguments = match func.get("arguments") {
                        Some(serde_json::Value::String(s)) => s.clone(),
                        Some(other) => other.to_string(),
                        None => "{}".to_string(),
                    };
                    let id = tc
                        .get("id")
                        .and_then(|v| v.as_str())
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .unwrap_or_else(|| format!("call_{i}"));
                    Some(ToolCall { id, name, arguments })
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let usage = body.get("usage").map(|u| Usage {
        prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
        completion_tokens: u
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
    });

    Ok(ChatResponse { content, tool_calls, usage })
}
