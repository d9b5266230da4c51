//! The one-attempt iteration loop (§4.4): builds the tool list once, then
//! repeatedly sends a model request, accumulates tokens, dispatches any tool
//! uses, and decides whether to continue, adopt an output, or fail.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::cache::{apply_cache_markers, build_system_blocks};
use crate::callbacks::{Callbacks, TokenMetrics};
use crate::definition::ModelConfig;
use crate::error::{AgentError, CancellationPhase};
use crate::llm::{MessageRequest, ModelClient, StopReason, Turn};
use crate::state::{AgentState, ExecutionContext, MergeRun};
use crate::tools::ToolTable;
use crate::tooluse::process_tool_uses;

/// What one attempt's iteration loop produced on success: the adopted
/// candidate output, the final `run`/`attempt` tiers, the conversation
/// history built up so far (handed to the attempt controller for
/// validation-failure feedback), and how many iterations it took.
pub struct IterationSuccess<Run, Attempt> {
    pub output: Value,
    pub run: Run,
    pub attempt: Attempt,
    pub history: Vec<Turn>,
    pub iterations: u32,
    /// The `tool_use_id` of the output-tool call that produced `output` —
    /// the attempt controller addresses the validation-failure `tool_result`
    /// at this id (§4.5 step 7).
    pub output_tool_use_id: String,
}

/// Runs up to `context.max_iterations` request/response round trips for one
/// attempt. `history` already contains the initial user turn; this function
/// appends to it as tool-use round trips occur.
#[instrument(skip(model_client, model, tool_table, history, run, attempt, callbacks, cancel, metrics), fields(attempt = context.attempt, max_iterations = context.max_iterations))]
pub async fn run_iteration_loop<Run, Attempt>(
    model_client: &dyn ModelClient,
    model: &ModelConfig,
    tool_table: &ToolTable<Run, Attempt>,
    system_prompt: &str,
    mut history: Vec<Turn>,
    mut run: Run,
    mut attempt: Attempt,
    context: ExecutionContext,
    callbacks: &Callbacks,
    cancel: &CancellationToken,
    metrics: &mut TokenMetrics,
) -> Result<IterationSuccess<Run, Attempt>, AgentError>
where
    Run: Clone + MergeRun + Send + Sync + 'static,
    Attempt: Clone + Send + Sync + 'static,
{
    let mut current_output: Option<Value> = None;
    let mut current_output_tool_use_id: Option<String> = None;

    for iteration in 1..=context.max_iterations {
        if cancel.is_cancelled() {
            return Err(AgentError::ExecutionCancelled {
                attempt: context.attempt,
                phase: CancellationPhase::Iteration,
            });
        }

        let iteration_context = ExecutionContext {
            iteration,
            ..context
        };

        let request = MessageRequest {
            model: model.name.clone(),
            max_tokens: model.max_tokens,
            temperature: model.temperature,
            system: build_system_blocks(system_prompt),
            messages: apply_cache_markers(&history),
            tools: tool_table.tool_descriptors(),
        };

        let response = model_client
            .create_message(request, cancel)
            .await
            .map_err(|error| rewrite_attempt(error, context.attempt))?;

        metrics.accumulate(&response.usage);

        if response.stop_reason != StopReason::ToolUse {
            return Err(AgentError::OutputToolNotUsed {
                attempt: context.attempt,
                iterations: iteration,
            });
        }

        let state = Arc::new(AgentState::new(iteration_context, run.clone(), attempt.clone()));
        let assistant_blocks = response.content.clone();
        let processed = process_tool_uses(
            &response.content,
            state,
            tool_table,
            callbacks,
            current_output.clone(),
            current_output_tool_use_id.clone(),
        )
        .await;

        run = processed.run;
        attempt = processed.attempt;
        current_output = processed.latest_output;
        current_output_tool_use_id = processed.latest_output_tool_use_id;

        if processed.was_submit_found {
            history.push(Turn::assistant(assistant_blocks));
            return match (current_output, current_output_tool_use_id) {
                (Some(output), Some(tool_use_id)) => Ok(IterationSuccess {
                    output,
                    run,
                    attempt,
                    history,
                    iterations: iteration,
                    output_tool_use_id: tool_use_id,
                }),
                _ => Err(AgentError::SubmitBeforeOutput {
                    attempt: context.attempt,
                }),
            };
        }

        if processed.was_output_found && !tool_table.reflection_enabled {
            history.push(Turn::assistant(assistant_blocks));
            return Ok(IterationSuccess {
                output: current_output.expect("output_found guarantees a candidate"),
                run,
                attempt,
                history,
                iterations: iteration,
                output_tool_use_id: current_output_tool_use_id
                    .expect("output_found guarantees a tool_use_id"),
            });
        }

        history.push(Turn::assistant(assistant_blocks));
        history.push(Turn::user(processed.tool_results));
    }

    Err(AgentError::MaxIterationsExceeded {
        attempt: context.attempt,
        iteration_count: context.max_iterations,
    })
}

fn rewrite_attempt(error: AgentError, attempt: u32) -> AgentError {
    match error {
        AgentError::ApiError { message, .. } => AgentError::ApiError { attempt, message },
        AgentError::ExecutionCancelled { phase, .. } => {
            AgentError::ExecutionCancelled { attempt, phase }
        }
        other => other,
    }
}
