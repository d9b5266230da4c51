//! The reference [`ModelClient`] adapter, built directly against the
//! Anthropic Messages wire format with `reqwest`. Not layered over a
//! third-party Anthropic SDK crate: the runtime needs exact control over
//! per-block `cache_control` placement, `is_error` tool-result flags, and the
//! cache-creation/cache-read usage counters (§4.7, §6), which a higher-level
//! SDK does not expose at this granularity.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;
use crate::llm::{
    AssistantBlock, CacheControl, MessageRequest, MessageResponse, ModelClient, StopReason,
    SystemBlock, ToolDescriptor, Turn, Usage, UserBlock,
};

const DEFAULT_API_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_API_VERSION: &str = "2023-06-01";
const MESSAGES_PATH: &str = "/v1/messages";

/// Runtime configuration for [`AnthropicMessageClient`].
#[derive(Debug, Clone)]
pub struct AnthropicMessageClientConfig {
    pub api_key: String,
    pub api_base_url: Option<String>,
    pub api_version: String,
}

impl AnthropicMessageClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base_url: None,
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }
}

/// Anthropic Messages API adapter implementing [`ModelClient`].
#[derive(Debug, Clone)]
pub struct AnthropicMessageClient {
    client: Client,
    config: AnthropicMessageClientConfig,
}

impl AnthropicMessageClient {
    pub fn new(config: AnthropicMessageClientConfig) -> Result<Self, AgentError> {
        let client = Client::builder().build().map_err(|err| AgentError::Config {
            message: format!("failed to build http client: {err}"),
        })?;

        Ok(Self { client, config })
    }

    /// Builds a client from `ANTHROPIC_API_KEY`, optionally overriding the
    /// base URL with `ANTHROPIC_API_BASE_URL`.
    pub fn from_env() -> Result<Self, AgentError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| AgentError::Config {
            message: "ANTHROPIC_API_KEY is not set".to_string(),
        })?;

        let mut config = AnthropicMessageClientConfig::new(api_key);
        if let Ok(base_url) = std::env::var("ANTHROPIC_API_BASE_URL") {
            config.api_base_url = Some(base_url);
        }

        Self::new(config)
    }

    fn endpoint(&self) -> String {
        let base = self
            .config
            .api_base_url
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE_URL)
            .trim_end_matches('/');
        format!("{base}{MESSAGES_PATH}")
    }
}

#[async_trait]
impl ModelClient for AnthropicMessageClient {
    async fn create_message(
        &self,
        request: MessageRequest,
        cancel: &CancellationToken,
    ) -> Result<MessageResponse, AgentError> {
        let wire_request = to_wire_request(&request);

        let send = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.api_version)
            .header("content-type", "application/json")
            .json(&wire_request)
            .send();

        let response = tokio::select! {
            result = send => result.map_err(|err| AgentError::ApiError {
                attempt: 0,
                message: err.to_string(),
            })?,
            _ = cancel.cancelled() => {
                return Err(AgentError::ExecutionCancelled {
                    attempt: 0,
                    phase: crate::error::CancellationPhase::Iteration,
                });
            }
        };

        if !response.status().is_success() {
            return Err(AgentError::ApiError {
                attempt: 0,
                message: extract_api_error(response).await,
            });
        }

        let payload = response
            .json::<WireMessageResponse>()
            .await
            .map_err(|err| AgentError::ApiError {
                attempt: 0,
                message: format!("failed to decode response body: {err}"),
            })?;

        Ok(from_wire_response(payload))
    }
}

#[derive(Debug, Serialize)]
struct WireMessageRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    system: Vec<WireSystemBlock>,
    messages: Vec<WireTurn>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireToolDescriptor>,
}

#[derive(Debug, Serialize)]
struct WireSystemBlock {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<WireCacheControl>,
}

#[derive(Debug, Serialize)]
struct WireCacheControl {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct WireTurn {
    role: &'static str,
    content: Vec<WireBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<WireCacheControl>,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "is_false")]
        is_error: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<WireCacheControl>,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
}

#[derive(Debug, Serialize)]
struct WireToolDescriptor {
    name: String,
    description: String,
    input_schema: Value,
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn to_wire_request(request: &MessageRequest) -> WireMessageRequest {
    WireMessageRequest {
        model: request.model.clone(),
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        system: request.system.iter().map(to_wire_system_block).collect(),
        messages: request.messages.iter().map(to_wire_turn).collect(),
        tools: request.tools.iter().map(to_wire_tool).collect(),
    }
}

fn to_wire_system_block(block: &SystemBlock) -> WireSystemBlock {
    WireSystemBlock {
        kind: "text",
        text: block.text.clone(),
        cache_control: block.cache_control.map(to_wire_cache_control),
    }
}

fn to_wire_cache_control(cache_control: CacheControl) -> WireCacheControl {
    match cache_control {
        CacheControl::Ephemeral => WireCacheControl { kind: "ephemeral" },
    }
}

fn to_wire_turn(turn: &Turn) -> WireTurn {
    match turn {
        Turn::User(blocks) => WireTurn {
            role: "user",
            content: blocks.iter().map(to_wire_user_block).collect(),
        },
        Turn::Assistant(blocks) => WireTurn {
            role: "assistant",
            content: blocks.iter().map(to_wire_assistant_block).collect(),
        },
    }
}

fn to_wire_user_block(block: &UserBlock) -> WireBlock {
    match block {
        UserBlock::Text { text, cache_control } => WireBlock::Text {
            text: text.clone(),
            cache_control: cache_control.map(to_wire_cache_control),
        },
        UserBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
            cache_control,
        } => WireBlock::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: content.clone(),
            is_error: *is_error,
            cache_control: cache_control.map(to_wire_cache_control),
        },
    }
}

fn to_wire_assistant_block(block: &AssistantBlock) -> WireBlock {
    match block {
        AssistantBlock::Text { text } => WireBlock::Text {
            text: text.clone(),
            cache_control: None,
        },
        AssistantBlock::ToolUse { id, name, input } => WireBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        },
    }
}

fn to_wire_tool(tool: &ToolDescriptor) -> WireToolDescriptor {
    WireToolDescriptor {
        name: tool.name.clone(),
        description: tool.description.clone(),
        input_schema: tool.input_schema.clone(),
    }
}

#[derive(Debug, Deserialize)]
struct WireMessageResponse {
    id: String,
    content: Vec<WireResponseBlock>,
    stop_reason: Option<String>,
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireResponseBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    input_tokens: u64,
    output_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
}

fn from_wire_response(response: WireMessageResponse) -> MessageResponse {
    let content = response
        .content
        .into_iter()
        .filter_map(|block| match block {
            WireResponseBlock::Text { text } => Some(AssistantBlock::Text { text }),
            WireResponseBlock::ToolUse { id, name, input } => {
                Some(AssistantBlock::ToolUse { id, name, input })
            }
            WireResponseBlock::Unknown => None,
        })
        .collect();

    MessageResponse {
        id: response.id,
        content,
        stop_reason: parse_stop_reason(response.stop_reason.as_deref()),
        usage: Usage {
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
            cache_creation_input_tokens: response.usage.cache_creation_input_tokens,
            cache_read_input_tokens: response.usage.cache_read_input_tokens,
        },
    }
}

fn parse_stop_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("max_tokens") => StopReason::MaxTokens,
        Some("stop_sequence") => StopReason::StopSequence,
        Some("tool_use") => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

#[derive(Debug, Deserialize)]
struct WireErrorEnvelope {
    error: WireApiError,
}

#[derive(Debug, Deserialize)]
struct WireApiError {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<String>,
}

async fn extract_api_error(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if let Ok(parsed) = serde_json::from_str::<WireErrorEnvelope>(&body) {
        let kind = parsed.error.kind.unwrap_or_else(|| "unknown_error".to_string());
        let message = parsed
            .error
            .message
            .unwrap_or_else(|| "unknown anthropic api error".to_string());
        return format!("anthropic api error {status} ({kind}): {message}");
    }

    if body.is_empty() {
        format!("anthropic api request failed ({status})")
    } else {
        format!("anthropic api request failed ({status}): {body}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_request_round_trips_cache_control_and_tool_use() {
        let request = MessageRequest {
            model: "claude-test".to_string(),
            max_tokens: 1024,
            temperature: 0.0,
            system: vec![SystemBlock {
                text: "be helpful".to_string(),
                cache_control: Some(CacheControl::Ephemeral),
            }],
            messages: vec![
                Turn::user(vec![UserBlock::text("hello")]),
                Turn::assistant(vec![AssistantBlock::ToolUse {
                    id: "call_1".to_string(),
                    name: "generate_output".to_string(),
                    input: serde_json::json!({"result": "x"}),
                }]),
                Turn::user(vec![UserBlock::tool_result("call_1", "ok", false)]),
            ],
            tools: vec![ToolDescriptor {
                name: "generate_output".to_string(),
                description: "emit output".to_string(),
                input_schema: serde_json::json!({"type": "object"}),
            }],
        };

        let wire = to_wire_request(&request);
        let value = serde_json::to_value(&wire).expect("serializes");

        assert_eq!(value["system"][0]["cache_control"]["type"], "ephemeral");
        assert_eq!(value["messages"][1]["content"][0]["type"], "tool_use");
        assert_eq!(value["messages"][2]["content"][0]["type"], "tool_result");
        assert!(value["messages"][2]["content"][0]["is_error"].is_null());
    }

    #[test]
    fn from_wire_response_extracts_cache_usage_and_tool_use() {
        let wire = WireMessageResponse {
            id: "msg_1".to_string(),
            content: vec![
                WireResponseBlock::Text {
                    text: "thinking aloud".to_string(),
                },
                WireResponseBlock::ToolUse {
                    id: "call_1".to_string(),
                    name: "generate_output".to_string(),
                    input: serde_json::json!({"result": "done"}),
                },
            ],
            stop_reason: Some("tool_use".to_string()),
            usage: WireUsage {
                input_tokens: 100,
                output_tokens: 20,
                cache_creation_input_tokens: Some(50),
                cache_read_input_tokens: None,
            },
        };

        let response = from_wire_response(wire);
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.usage.cache_creation_input_tokens, Some(50));
        assert_eq!(response.usage.cache_read_input_tokens, None);
        assert_eq!(response.content.len(), 2);
    }

    #[test]
    fn parse_stop_reason_defaults_to_end_turn() {
        assert_eq!(parse_stop_reason(None), StopReason::EndTurn);
        assert_eq!(parse_stop_reason(Some("max_tokens")), StopReason::MaxTokens);
    }
}
