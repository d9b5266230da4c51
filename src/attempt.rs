//! The attempt controller (§4.5) and the `execute` entrypoint (§6): runs up
//! to `maxAttempts` iteration loops, retries on recoverable validation
//! failure, and produces the final success or failure result.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::callbacks::{Callbacks, ExecutionMetadata, TokenMetrics};
use crate::definition::AgentDefinition;
use crate::error::{catch_panic, panic_message, AgentError, CancellationPhase};
use crate::iteration::{run_iteration_loop, IterationSuccess};
use crate::llm::{ModelClient, Turn, UserBlock};
use crate::state::{ExecutionContext, MergeRun};
use crate::tools::ToolTable;
use crate::validation::{run_pipeline, LayerKind, LayerResult, ValidationError};

/// Caller-supplied execution options: the typed input, overrides, callbacks,
/// and an optional cancellation token (a fresh, never-cancelled token is used
/// if the caller doesn't supply one).
pub struct ExecuteOptions<Input> {
    pub input: Input,
    pub max_attempts: Option<u32>,
    pub callbacks: Callbacks,
    pub cancel: Option<CancellationToken>,
}

impl<Input> ExecuteOptions<Input> {
    pub fn new(input: Input) -> Self {
        Self {
            input,
            max_attempts: None,
            callbacks: Callbacks::default(),
            cancel: None,
        }
    }
}

/// A successful execution's result.
pub struct ExecuteSuccess<Output, Run, Attempt> {
    pub output: Output,
    pub attempts: u32,
    pub metadata: ExecutionMetadata,
    pub run: Run,
    pub attempt: Attempt,
    pub state_projection: Option<Value>,
}

/// A failed execution's result: the terminal `AgentError` that ended the
/// execution, wrapped in a one-element vector so a consumer that expects a
/// list (mirroring the source's `errors` array) doesn't need a special case.
pub struct ExecuteFailure {
    pub errors: Vec<AgentError>,
    pub metadata: ExecutionMetadata,
}

/// Runs `definition` to completion against `options`. See §4.5 for the
/// attempt-retry contract and §4.6 for the reflection sub-protocol that plays
/// out inside each attempt's iteration loop.
#[instrument(skip_all)]
pub async fn execute<Input, Output, Run, Attempt>(
    definition: &AgentDefinition<Input, Output, Run, Attempt>,
    options: ExecuteOptions<Input>,
    model_client: &dyn ModelClient,
) -> Result<ExecuteSuccess<Output, Run, Attempt>, ExecuteFailure>
where
    Input: Send + Sync + 'static,
    Output: Send + Sync + Serialize + serde::de::DeserializeOwned + 'static,
    Run: Clone + MergeRun + Send + Sync + 'static,
    Attempt: Clone + Send + Sync + 'static,
{
    let started_at = Instant::now();

    if let Err(error) = definition.validate_config() {
        return Err(finish_failure(
            error,
            &options.callbacks,
            &TokenMetrics::default(),
            &definition.observability,
            started_at,
        ));
    }

    let max_attempts = options.max_attempts.unwrap_or(definition.max_attempts);
    let cancel = options.cancel.unwrap_or_default();
    let callbacks = options.callbacks;
    let input = Arc::new(options.input);

    let tool_table: ToolTable<Run, Attempt> = ToolTable::new(
        definition.output_tool.clone(),
        definition.helper_tools.clone(),
    );

    if cancel.is_cancelled() {
        let error = AgentError::ExecutionCancelled {
            attempt: 0,
            phase: CancellationPhase::PromptBuild,
        };
        return Err(finish_failure(
            error,
            &callbacks,
            &TokenMetrics::default(),
            &definition.observability,
            started_at,
        ));
    }

    let system_prompt = match catch_panic(definition.prompts.build_system_prompt()).await {
        Ok(Ok(prompt)) => prompt,
        Ok(Err(message)) | Err(message) => {
            return Err(finish_failure(
                AgentError::Config { message },
                &callbacks,
                &TokenMetrics::default(),
                &definition.observability,
                started_at,
            ));
        }
    };
    let initial_prompt = match catch_panic(definition.prompts.build_initial_prompt(input.clone())).await {
        Ok(Ok(prompt)) => prompt,
        Ok(Err(message)) | Err(message) => {
            return Err(finish_failure(
                AgentError::Config { message },
                &callbacks,
                &TokenMetrics::default(),
                &definition.observability,
                started_at,
            ));
        }
    };

    let mut history = vec![Turn::user(vec![UserBlock::text(initial_prompt)])];
    let mut run = definition.initial_run.clone();
    let mut metrics = TokenMetrics::default();

    for attempt_number in 1..=max_attempts {
        if cancel.is_cancelled() {
            let error = AgentError::ExecutionCancelled {
                attempt: attempt_number,
                phase: CancellationPhase::Iteration,
            };
            return Err(finish_failure(
                error,
                &callbacks,
                &metrics,
                &definition.observability,
                started_at,
            ));
        }

        let context = ExecutionContext {
            attempt: attempt_number,
            max_attempts,
            iteration: 0,
            max_iterations: definition.max_iterations,
        };
        callbacks.fire_attempt_start(context);

        let loop_result = run_iteration_loop(
            model_client,
            &definition.model,
            &tool_table,
            &system_prompt,
            history,
            run.clone(),
            definition.initial_attempt.clone(),
            context,
            &callbacks,
            &cancel,
            &mut metrics,
        )
        .await;

        let success = match loop_result {
            Ok(success) => success,
            Err(error) => {
                callbacks.fire_attempt_complete(context, false);
                error!(code = error.code(), attempt = attempt_number, "attempt failed");
                return Err(finish_failure(
                    error,
                    &callbacks,
                    &metrics,
                    &definition.observability,
                    started_at,
                ));
            }
        };

        if cancel.is_cancelled() {
            callbacks.fire_attempt_complete(context, false);
            let error = AgentError::ExecutionCancelled {
                attempt: attempt_number,
                phase: CancellationPhase::Validation,
            };
            return Err(finish_failure(
                error,
                &callbacks,
                &metrics,
                &definition.observability,
                started_at,
            ));
        }

        let typed: Result<Output, String> = serde_json::from_value(success.output.clone())
            .map_err(|error| format!("output does not conform to the output schema: {error}"));

        let validation_outcome: Result<Output, (LayerResult, String)> = match typed {
            Ok(candidate) => run_pipeline(&definition.validation.layers, candidate, &callbacks)
                .await
                .map_err(|failure| {
                    let layer_result = LayerResult::Failure {
                        name: failure.layer.name.clone(),
                        kind: failure.layer.kind,
                        error: failure.error.clone(),
                    };
                    (layer_result, failure.formatted)
                }),
            Err(message) => {
                let layer_result = LayerResult::Failure {
                    name: "schema".to_string(),
                    kind: LayerKind::Schema,
                    error: ValidationError::Custom(message.clone()),
                };
                Err((layer_result, message))
            }
        };

        match validation_outcome {
            Ok(validated) => {
                callbacks.fire_attempt_complete(context, true);

                let projection = match &definition.project_final_state {
                    Some(project) => {
                        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                            project(&success.run, &success.attempt)
                        }))
                        .unwrap_or_else(|payload| Err(panic_message(payload)));
                        match outcome {
                            Ok(value) => Some(value),
                            Err(message) => {
                                let error = AgentError::StateProjectionFailed {
                                    attempt: attempt_number,
                                    message,
                                };
                                return Err(finish_failure(
                                    error,
                                    &callbacks,
                                    &metrics,
                                    &definition.observability,
                                    started_at,
                                ));
                            }
                        }
                    }
                    None => None,
                };

                let metadata = build_metadata(&definition.observability, &metrics, &callbacks, started_at);
                callbacks.fire_success(
                    serde_json::to_value(&validated).unwrap_or(Value::Null),
                    metadata.clone(),
                );
                info!(code = "SUCCESS", attempt = attempt_number, "execution succeeded");

                return Ok(ExecuteSuccess {
                    output: validated,
                    attempts: attempt_number,
                    metadata,
                    run: success.run,
                    attempt: success.attempt,
                    state_projection: projection,
                });
            }
            Err((layer_result, formatted)) => {
                callbacks.fire_attempt_complete(context, false);
                let layer_name = match &layer_result {
                    LayerResult::Failure { name, .. } | LayerResult::Success { name, .. } => {
                        name.clone()
                    }
                };
                callbacks.fire_validation_failure(vec![layer_result]);

                if attempt_number == max_attempts {
                    let error = AgentError::ValidationFailed {
                        attempt: attempt_number,
                        layer: layer_name,
                        formatted,
                    };
                    return Err(finish_failure(
                        error,
                        &callbacks,
                        &metrics,
                        &definition.observability,
                        started_at,
                    ));
                }

                if cancel.is_cancelled() {
                    let error = AgentError::ExecutionCancelled {
                        attempt: attempt_number,
                        phase: CancellationPhase::PromptBuild,
                    };
                    return Err(finish_failure(
                        error,
                        &callbacks,
                        &metrics,
                        &definition.observability,
                        started_at,
                    ));
                }

                run = success.run.clone();
                history = append_validation_feedback(
                    definition,
                    success,
                    &formatted,
                    context,
                )
                .await;
            }
        }
    }

    let error = AgentError::MaxIterationsExceeded {
        attempt: max_attempts,
        iteration_count: definition.max_iterations,
    };
    Err(finish_failure(
        error,
        &callbacks,
        &metrics,
        &definition.observability,
        started_at,
    ))
}

/// Builds the two feedback turns a validation failure appends before the
/// next attempt (§4.5 step 7): a `tool_result{is_error:true}` addressed at
/// the output-tool call that produced the rejected candidate, followed by an
/// error-feedback user turn from the agent's prompt builder.
async fn append_validation_feedback<Input, Output, Run, Attempt>(
    definition: &AgentDefinition<Input, Output, Run, Attempt>,
    success: IterationSuccess<Run, Attempt>,
    formatted: &str,
    context: ExecutionContext,
) -> Vec<Turn> {
    let mut history = success.history;

    history.push(Turn::user(vec![UserBlock::tool_result(
        success.output_tool_use_id,
        format!("Validation failed:\n{formatted}"),
        true,
    )]));

    let feedback = match catch_panic(
        definition
            .prompts
            .build_error_feedback(formatted.to_string(), context),
    )
    .await
    {
        Ok(Ok(feedback)) => feedback,
        Ok(Err(_)) | Err(_) => format!("Validation failed:\n{formatted}"),
    };
    history.push(Turn::user(vec![UserBlock::text(feedback)]));

    history
}

fn build_metadata(
    flags: &crate::definition::ObservabilityFlags,
    metrics: &TokenMetrics,
    callbacks: &Callbacks,
    started_at: Instant,
) -> ExecutionMetadata {
    ExecutionMetadata {
        latency: if flags.track_latency { Some(started_at.elapsed()) } else { None },
        tokens: if flags.track_tokens { Some(*metrics) } else { None },
        callback_errors: callbacks.take_callback_errors(),
    }
}

fn finish_failure(
    error: AgentError,
    callbacks: &Callbacks,
    metrics: &TokenMetrics,
    flags: &crate::definition::ObservabilityFlags,
    started_at: Instant,
) -> ExecuteFailure {
    error!(code = error.code(), "execution failed");
    let metadata = ExecutionMetadata {
        latency: if flags.track_latency { Some(started_at.elapsed()) } else { None },
        tokens: if flags.track_tokens { Some(*metrics) } else { None },
        callback_errors: callbacks.take_callback_errors(),
    };
    callbacks.fire_failure(vec![error.clone()], metadata.clone());
    ExecuteFailure {
        errors: vec![error],
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ModelConfig, ObservabilityFlags, PromptBuilders, ValidationConfig};
    use crate::llm::{AssistantBlock, MessageResponse, StopReason, Usage};
    use crate::tools::OutputTool;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct ScriptedClient {
        responses: Mutex<std::collections::VecDeque<MessageResponse>>,
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
            _request: crate::llm::MessageRequest,
            _cancel: &CancellationToken,
        ) -> Result<MessageResponse, AgentError> {
            self.responses
                .lock()
                .expect("lock")
                .pop_front()
                .ok_or_else(|| AgentError::ApiError {
                    attempt: 0,
                    message: "script exhausted".to_string(),
                })
        }
    }

    fn output_response(id: &str, result: &str) -> MessageResponse {
        MessageResponse {
            id: id.to_string(),
            content: vec![AssistantBlock::ToolUse {
                id: format!("call_{id}"),
                name: "generate_output".to_string(),
                input: json!({"result": result}),
            }],
            stop_reason: StopReason::ToolUse,
            usage: Usage {
                input_tokens: 10,
                output_tokens: 5,
                cache_creation_input_tokens: None,
                cache_read_input_tokens: None,
            },
        }
    }

    fn definition() -> AgentDefinition<String, Value, Value, Value> {
        AgentDefinition {
            model: ModelConfig {
                name: "claude-test".to_string(),
                max_tokens: 1024,
                temperature: 0.0,
            },
            output_tool: OutputTool::new("generate_output", "emit output", json!({})),
            helper_tools: vec![],
            validation: ValidationConfig::new(json!({})),
            prompts: PromptBuilders::new(
                || async { Ok("be helpful".to_string()) },
                |_input: Arc<String>| async { Ok("go".to_string()) },
                |formatted, _ctx| async move { Ok(format!("fix this: {formatted}")) },
            ),
            observability: ObservabilityFlags {
                track_tokens: true,
                ..ObservabilityFlags::default()
            },
            max_attempts: 3,
            max_iterations: 5,
            initial_run: json!({}),
            initial_attempt: json!({}),
            project_final_state: None,
        }
    }

    #[tokio::test]
    async fn happy_path_succeeds_on_first_attempt() {
        let client = ScriptedClient::new(vec![output_response("1", "success result")]);
        let definition = definition();

        let result = execute(&definition, ExecuteOptions::new("go".to_string()), &client)
            .await
            .expect("succeeds");

        assert_eq!(result.attempts, 1);
        assert_eq!(result.output, json!({"result": "success result"}));
        assert_eq!(result.metadata.tokens.expect("tracked").input, 10);
    }

    #[tokio::test]
    async fn retries_once_then_succeeds() {
        let client = ScriptedClient::new(vec![
            output_response("1", "short"),
            output_response("2", "valid result"),
        ]);
        let mut definition = definition();
        definition.validation = ValidationConfig::new(json!({}))
            .with_layer(Arc::new(validation_tests_support::MinResultLength(10)));

        let result = execute(&definition, ExecuteOptions::new("go".to_string()), &client)
            .await
            .expect("succeeds on retry");

        assert_eq!(result.attempts, 2);
    }

    #[tokio::test]
    async fn exhausted_validation_failure_reports_the_failing_layer_name() {
        let client = ScriptedClient::new(vec![
            output_response("1", "short"),
            output_response("2", "still short"),
        ]);
        let mut definition = definition();
        definition.max_attempts = 2;
        definition.validation = ValidationConfig::new(json!({}))
            .with_layer(Arc::new(validation_tests_support::MinResultLength(100)));

        let failing_layers = Arc::new(Mutex::new(Vec::new()));
        let failing_layers_clone = failing_layers.clone();
        let mut callbacks = Callbacks::default();
        callbacks.on_validation_failure = Some(Box::new(move |results| {
            for result in results {
                if let crate::validation::LayerResult::Failure { name, .. } = result {
                    failing_layers_clone.lock().expect("lock").push(name);
                }
            }
        }));

        let mut options = ExecuteOptions::new("go".to_string());
        options.callbacks = callbacks;

        let failure = execute(&definition, options, &client)
            .await
            .expect_err("exhausts attempts without passing validation");

        match &failure.errors[0] {
            AgentError::ValidationFailed { layer, .. } => {
                assert_eq!(layer, "min_result_length")
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            *failing_layers.lock().expect("lock"),
            vec!["min_result_length".to_string(), "min_result_length".to_string()]
        );
    }
}

#[cfg(test)]
mod validation_tests_support {
    use async_trait::async_trait;
    use serde_json::Value;

    use crate::validation::{LayerKind, ValidationError, ValidationLayer};

    pub struct MinResultLength(pub usize);

    #[async_trait]
    impl ValidationLayer<Value> for MinResultLength {
        fn name(&self) -> &str {
            "min_result_length"
        }
        fn description(&self) -> &str {
            "result field must meet a minimum length"
        }
        fn kind(&self) -> LayerKind {
            LayerKind::Custom
        }
        async fn validate(&self, candidate: Value) -> Result<Value, ValidationError> {
            let text = candidate.get("result").and_then(Value::as_str).unwrap_or("");
            if text.len() >= self.0 {
                Ok(candidate)
            } else {
                Err(ValidationError::Custom(format!(
                    "expected at least {} characters, got {}",
                    self.0,
                    text.len()
                )))
            }
        }
    }
}
