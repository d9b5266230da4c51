//! The model client contract (§6 of the design): the wire shape a messages-API
//! request/response pair must take, and the [`ModelClient`] trait every
//! provider adapter (and every test mock) implements against it.

mod anthropic;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub use anthropic::{AnthropicMessageClient, AnthropicMessageClientConfig};

use crate::error::AgentError;

/// A provider-agnostic prompt-cache hint. Anthropic's is the only kind this
/// runtime ever emits, so the wire shape carries no other variant — a future
/// provider with a different caching scheme would need a translation layer
/// in its own adapter, not a new variant here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheControl {
    Ephemeral,
}

/// One block of the system prompt. The runtime only ever sends a single
/// block, but the wire shape allows more so a future multi-block system
/// prompt does not require a breaking change here.
#[derive(Clone, Debug, PartialEq)]
pub struct SystemBlock {
    pub text: String,
    pub cache_control: Option<CacheControl>,
}

/// A block inside a user turn.
#[derive(Clone, Debug, PartialEq)]
pub enum UserBlock {
    Text {
        text: String,
        cache_control: Option<CacheControl>,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
        cache_control: Option<CacheControl>,
    },
}

impl UserBlock {
    pub fn text(text: impl Into<String>) -> Self {
        UserBlock::Text {
            text: text.into(),
            cache_control: None,
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        UserBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error,
            cache_control: None,
        }
    }

    pub(crate) fn cache_control_mut(&mut self) -> &mut Option<CacheControl> {
        match self {
            UserBlock::Text { cache_control, .. } => cache_control,
            UserBlock::ToolResult { cache_control, .. } => cache_control,
        }
    }

    pub(crate) fn cache_control_ref(&self) -> Option<CacheControl> {
        match self {
            UserBlock::Text { cache_control, .. } => *cache_control,
            UserBlock::ToolResult { cache_control, .. } => *cache_control,
        }
    }
}

/// A block inside an assistant turn, verbatim from the model's response.
#[derive(Clone, Debug, PartialEq)]
pub enum AssistantBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
}

/// One turn of the conversation. This is both the internal history
/// representation and the shape sent over the wire — the runtime never
/// needs a separate "internal" turn type because the two are identical.
#[derive(Clone, Debug, PartialEq)]
pub enum Turn {
    User(Vec<UserBlock>),
    Assistant(Vec<AssistantBlock>),
}

impl Turn {
    pub fn user(blocks: Vec<UserBlock>) -> Self {
        Turn::User(blocks)
    }

    pub fn assistant(blocks: Vec<AssistantBlock>) -> Self {
        Turn::Assistant(blocks)
    }

    /// Returns the last block of a user turn, mutably, so the cache-marker
    /// step can annotate it. `None` for an assistant turn or an empty turn.
    pub(crate) fn last_user_block_mut(&mut self) -> Option<&mut UserBlock> {
        match self {
            Turn::User(blocks) => blocks.last_mut(),
            Turn::Assistant(_) => None,
        }
    }
}

/// A tool made available to the model for one request.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A full messages-API request.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageRequest {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub system: Vec<SystemBlock>,
    pub messages: Vec<Turn>,
    pub tools: Vec<ToolDescriptor>,
}

/// Why the model stopped generating.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
}

/// Token accounting for one model call. `cache_creation_input` and
/// `cache_read_input` are `None` when the provider does not report them
/// (e.g. no cacheable prefix was present), distinct from `Some(0)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: Option<u64>,
    pub cache_read_input_tokens: Option<u64>,
}

/// A full messages-API response.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageResponse {
    pub id: String,
    pub content: Vec<AssistantBlock>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

/// A capability object exposing the single `messages.create` operation this
/// runtime depends on. Implemented in-tree by [`AnthropicMessageClient`]; test
/// modules throughout this crate implement it against a scripted queue of
/// canned responses (see the `ScriptedClient` mocks in `src/iteration.rs` and
/// `src/attempt.rs`).
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn create_message(
        &self,
        request: MessageRequest,
        cancel: &CancellationToken,
    ) -> Result<MessageResponse, AgentError>;
}
