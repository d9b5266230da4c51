//! # agent-runtime-rs
//!
//! **A deterministic control loop for tool-using LLM agents that must
//! produce validated, schema-conformant structured output.**
//!
//! Minimal by design: one attempt/iteration loop, one tool-use dispatcher,
//! one validation pipeline, explicit retry semantics.
//!
//! ## Why this crate?
//! | Capability | `agent-runtime-rs` | Typical abstraction-heavy frameworks | Why this helps agents |
//! |---|---|---|---|
//! | Core loop | Explicit two-tier retry in [`execute`] | Hidden planners / wrappers | Fewer moving parts, easier debugging |
//! | Action space | User-defined tools via [`tools::HelperTool`] JSON schema | Fixed or opinionated primitives | Start broad, then restrict by policy |
//! | Completion semantics | Output tool plus optional `submit`-gated reflection ([`tools::OutputTool::with_reflection`]) | Implicit stop when no tool calls | Prevents premature, unvalidated output |
//! | Provider interface | One trait ([`llm::ModelClient`]) and a reference adapter | Provider-specific runtime behavior | Swap models without rewriting agent logic |
//! | Reliability guards | Attempt retries + iteration cap + ordered validation pipeline | Often ad-hoc in app code | Safer autonomous runs |
//!
//! ## Shape of one execution
//! - [`definition::AgentDefinition`] is the immutable description of an agent:
//!   model parameters, the output tool plus helper tools, the validation
//!   pipeline, prompt builders, and attempt/iteration limits.
//! - [`attempt::execute`] drives it: an outer attempt loop (`maxAttempts`)
//!   wrapping an inner iteration loop (`maxIterations`) in [`iteration`].
//! - Each iteration's tool-use blocks are dispatched by [`tooluse`].
//! - A candidate output runs through [`validation`]'s ordered pipeline before
//!   an attempt is allowed to succeed; a recoverable failure feeds back into
//!   the conversation and the next attempt retries.
//! - [`callbacks::Callbacks`] gives an embedder fire-and-forget visibility
//!   into attempts, validation layers, tool calls, and the terminal outcome.
//!
//! ## Quickstart
//! ```rust,no_run
//! use agent_runtime::{AgentDefinition, execute};
//! use agent_runtime::definition::{ModelConfig, ObservabilityFlags, PromptBuilders, ValidationConfig};
//! use agent_runtime::attempt::ExecuteOptions;
//! use agent_runtime::llm::AnthropicMessageClient;
//! use agent_runtime::tools::OutputTool;
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let definition: AgentDefinition<String, Value, Value, Value> = AgentDefinition {
//!     model: ModelConfig { name: "claude-sonnet-4-5".to_string(), max_tokens: 1024, temperature: 0.0 },
//!     output_tool: OutputTool::new("generate_summary", "emit the final summary", json!({})),
//!     helper_tools: vec![],
//!     validation: ValidationConfig::new(json!({})),
//!     prompts: PromptBuilders::new(
//!         || async { Ok("Summarize the input in one sentence.".to_string()) },
//!         |input: Arc<String>| async move { Ok((*input).clone()) },
//!         |formatted, _ctx| async move { Ok(format!("Fix this and resubmit:\n{formatted}")) },
//!     ),
//!     observability: ObservabilityFlags { track_tokens: true, ..Default::default() },
//!     max_attempts: 3,
//!     max_iterations: 10,
//!     initial_run: json!({}),
//!     initial_attempt: json!({}),
//!     project_final_state: None,
//! };
//!
//! let client = AnthropicMessageClient::from_env()?;
//! let result = execute(&definition, ExecuteOptions::new("some input text".to_string()), &client).await;
//! # let _ = result;
//! # Ok(())
//! # }
//! ```
//!
//! ## Evidence in this repository
//! - Attempt/iteration retry semantics and the max-iterations-vs-output-not-used
//!   distinction: `src/iteration.rs`
//! - Tool-use dispatch order and exception safety: `src/tooluse.rs`
//! - Validation pipeline short-circuiting and the synthetic schema layer:
//!   `src/validation/mod.rs`
//! - Prompt-cache marker placement: `src/cache.rs`
//! - Structured, JSON-contextualized errors: `src/error.rs`, `src/domain_error.rs`

/// The two-tier attempt/validation-retry controller and [`execute`] itself.
pub mod attempt;
/// Fire-and-forget lifecycle hooks and token/latency accounting.
pub mod callbacks;
/// Prompt-cache marker placement (§4.7).
pub mod cache;
/// The immutable agent description: model params, tools, validation, prompts.
pub mod definition;
/// Model-facing domain error formatting (the "did you mean" suggestion engine).
pub mod domain_error;
/// Structured runtime errors ([`AgentError`]) and the functional `Result` vocabulary.
pub mod error;
/// The one-attempt iteration loop.
pub mod iteration;
/// `LogEvent`: a timestamped, serializable mirror of each lifecycle callback
/// firing, for consumers that want a `logs.jsonl`-shaped audit trail.
pub mod logging;
/// The model client contract and the Anthropic Messages API adapter.
pub mod llm;
/// The two mutable state tiers (`run`, `attempt`) threaded through an execution.
pub mod state;
/// Tool specification: the output tool, helper tools, and the runtime-injected submit tool.
pub mod tools;
/// The tool-use dispatcher (§4.3).
pub mod tooluse;
/// The output validation pipeline (§4.2).
pub mod validation;

pub use attempt::{execute, ExecuteFailure, ExecuteOptions, ExecuteSuccess};
pub use callbacks::{Callbacks, ExecutionMetadata, TokenMetrics};
pub use definition::AgentDefinition;
pub use error::{AgentError, AgentResult, ErrorCategory, ErrorSeverity};
pub use llm::{AnthropicMessageClient, AnthropicMessageClientConfig, ModelClient};
pub use logging::LogEvent;
pub use state::{AgentState, ExecutionContext};
pub use tools::{HelperOutcome, HelperTool, OutputTool, ToolTable};
pub use validation::{LayerKind, PipelineFailure, ValidationError, ValidationLayer};
