use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use agent_runtime::definition::{ModelConfig, ObservabilityFlags, PromptBuilders, ValidationConfig};
use agent_runtime::llm::{AssistantBlock, MessageRequest, MessageResponse, StopReason, Usage};
use agent_runtime::validation::{LayerKind, ValidationError, ValidationLayer};
use agent_runtime::{
    execute, AgentDefinition, AgentError, Callbacks, ExecuteOptions, HelperOutcome, HelperTool,
    ModelClient, OutputTool,
};
use anyhow::anyhow;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

/// The output shape this demo validates the model's candidate against: a
/// one-line headline plus at least two supporting bullets.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Summary {
    headline: String,
    bullets: Vec<String>,
}

/// Rejects a candidate with fewer than two bullets, forcing a retry turn.
struct MinBulletCount(usize);

#[async_trait]
impl ValidationLayer<Summary> for MinBulletCount {
    fn name(&self) -> &str {
        "min_bullet_count"
    }
    fn description(&self) -> &str {
        "summary must list at least this many bullets"
    }
    fn kind(&self) -> LayerKind {
        LayerKind::Custom
    }
    async fn validate(&self, candidate: Summary) -> Result<Summary, ValidationError> {
        if candidate.bullets.len() >= self.0 {
            Ok(candidate)
        } else {
            Err(ValidationError::Custom(format!(
                "expected at least {} bullets, got {}",
                self.0,
                candidate.bullets.len()
            )))
        }
    }
}

/// A scripted model client standing in for the Anthropic adapter: replays a
/// fixed queue of responses so this demo runs with no network access and no
/// API key.
struct ScriptedClient {
    responses: Mutex<VecDeque<MessageResponse>>,
}

impl ScriptedClient {
    fn new(responses: Vec<MessageResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    async fn create_message(
        &self,
        _request: MessageRequest,
        _cancel: &CancellationToken,
    ) -> Result<MessageResponse, AgentError> {
        self.responses
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .ok_or_else(|| AgentError::ApiError {
                attempt: 0,
                message: "scripted client exhausted its responses".to_string(),
            })
    }
}

fn tool_use_response(id: &str, input: Value) -> MessageResponse {
    MessageResponse {
        id: id.to_string(),
        content: vec![AssistantBlock::ToolUse {
            id: format!("call_{id}"),
            name: "generate_summary".to_string(),
            input,
        }],
        stop_reason: StopReason::ToolUse,
        usage: Usage {
            input_tokens: 120,
            output_tokens: 40,
            cache_creation_input_tokens: None,
            cache_read_input_tokens: Some(0),
        },
    }
}

/// A helper tool the model can call before emitting its summary: counts the
/// words in the source text and records the count on the run tier so later
/// iterations (and the final state projection) can see it.
fn word_count_tool() -> HelperTool<Value, Value> {
    HelperTool::new(
        "word_count",
        "counts the words in a piece of text",
        json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"],
            "additionalProperties": false
        }),
        |state, input| async move {
            let text = input
                .get("text")
                .and_then(Value::as_str)
                .ok_or_else(|| "text missing".to_string())?;
            let count = text.split_whitespace().count();

            let mut run = state.run.clone();
            if let Value::Object(map) = &mut run {
                map.insert("last_word_count".to_string(), json!(count));
            }

            Ok(HelperOutcome::new(run, state.attempt.clone(), json!({ "words": count })))
        },
    )
}

fn build_definition() -> AgentDefinition<String, Summary, Value, Value> {
    let output_tool = OutputTool::new(
        "generate_summary",
        "emit the final headline and supporting bullets",
        json!({
            "type": "object",
            "properties": {
                "headline": {"type": "string"},
                "bullets": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["headline", "bullets"],
            "additionalProperties": false
        }),
    );

    AgentDefinition {
        model: ModelConfig {
            name: "claude-sonnet-4-5".to_string(),
            max_tokens: 1024,
            temperature: 0.0,
        },
        output_tool,
        helper_tools: vec![word_count_tool()],
        validation: ValidationConfig::new(json!({
            "type": "object",
            "properties": {
                "headline": {"type": "string"},
                "bullets": {"type": "array"}
            },
            "required": ["headline", "bullets"]
        }))
        .with_layer(Arc::new(MinBulletCount(2))),
        prompts: PromptBuilders::new(
            || async { Ok("You summarize articles into a headline and bullet points.".to_string()) },
            |input: Arc<String>| async move { Ok(format!("Summarize this article:\n\n{input}")) },
            |formatted, _context| async move {
                Ok(format!("Your previous summary did not pass validation:\n{formatted}\n\nPlease try again."))
            },
        ),
        observability: ObservabilityFlags {
            track_tokens: true,
            track_attempts: true,
            ..ObservabilityFlags::default()
        },
        max_attempts: 3,
        max_iterations: 5,
        initial_run: json!({}),
        initial_attempt: json!({}),
        project_final_state: Some(Arc::new(|run, _attempt| {
            Ok(json!({ "last_word_count": run.get("last_word_count").cloned().unwrap_or(Value::Null) }))
        })),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let article = "Rust's borrow checker prevents data races at compile time. \
        It does this without a garbage collector, by tracking ownership and \
        lifetimes statically.";

    // First attempt emits a single bullet, which fails `min_bullet_count` and
    // triggers a retry turn; the second attempt emits a conforming summary.
    let client = ScriptedClient::new(vec![
        tool_use_response(
            "1",
            json!({
                "headline": "Rust prevents data races",
                "bullets": ["No garbage collector needed"]
            }),
        ),
        tool_use_response(
            "2",
            json!({
                "headline": "Rust prevents data races without a garbage collector",
                "bullets": [
                    "The borrow checker enforces ownership rules at compile time",
                    "No garbage collector is needed because lifetimes are tracked statically"
                ]
            }),
        ),
    ]);

    let definition = build_definition();

    let mut callbacks = Callbacks::default();
    callbacks.on_attempt_start = Some(Box::new(|context| {
        println!("attempt {}/{} starting", context.attempt, context.max_attempts);
    }));
    callbacks.on_validation_failure = Some(Box::new(|_errors| {
        println!("validation failed, retrying with feedback");
    }));

    let options = ExecuteOptions {
        input: article.to_string(),
        max_attempts: None,
        callbacks,
        cancel: None,
    };

    match execute(&definition, options, &client).await {
        Ok(success) => {
            println!("succeeded after {} attempt(s)", success.attempts);
            println!("headline: {}", success.output.headline);
            for bullet in &success.output.bullets {
                println!("  - {bullet}");
            }
            if let Some(tokens) = success.metadata.tokens {
                println!("tokens: input={} output={}", tokens.input, tokens.output);
            }
            if let Some(projection) = success.state_projection {
                println!("state projection: {projection}");
            }
        }
        Err(failure) => {
            for error in &failure.errors {
                eprintln!("execution failed: {} ({})", error, error.code());
            }
            return Err(anyhow!("structured_summary demo did not succeed"));
        }
    }

    Ok(())
}
