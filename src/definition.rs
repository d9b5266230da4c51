//! The immutable description of an agent (§3): model parameters, the tool
//! table inputs, validation config, prompt builders, observability flags, and
//! attempt/iteration limits. Never mutated during execution — all mutable
//! state lives in [`crate::state::AgentState`].

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;

use crate::error::AgentError;
use crate::state::ExecutionContext;
use crate::tools::{HelperTool, OutputTool};
use crate::validation::ValidationLayer;

/// `{name, maxTokens, temperature}` model call parameters.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub name: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// The declared validation pipeline for one `Output` type: the schema used to
/// narrow raw tool-call JSON into `Output`, plus the ordered custom layers
/// that run after it.
pub struct ValidationConfig<Output> {
    pub output_schema: Value,
    pub layers: Vec<Arc<dyn ValidationLayer<Output>>>,
}

impl<Output> ValidationConfig<Output> {
    pub fn new(output_schema: Value) -> Self {
        Self {
            output_schema,
            layers: Vec::new(),
        }
    }

    pub fn with_layer(mut self, layer: Arc<dyn ValidationLayer<Output>>) -> Self {
        self.layers.push(layer);
        self
    }
}

type SystemPromptFn = dyn Fn() -> BoxFuture<'static, Result<String, String>> + Send + Sync;
type InitialPromptFn<Input> =
    dyn Fn(Arc<Input>) -> BoxFuture<'static, Result<String, String>> + Send + Sync;
type ErrorFeedbackFn =
    dyn Fn(String, ExecutionContext) -> BoxFuture<'static, Result<String, String>> + Send + Sync;

/// Asynchronous prompt builders: the system prompt, the initial user prompt
/// derived from `Input`, and the error-feedback prompt built from a formatted
/// validation error plus the current execution context.
pub struct PromptBuilders<Input> {
    system: Arc<SystemPromptFn>,
    initial_user: Arc<InitialPromptFn<Input>>,
    error_feedback: Arc<ErrorFeedbackFn>,
}

impl<Input: Send + Sync + 'static> PromptBuilders<Input> {
    pub fn new<S, SFut, U, UFut, E, EFut>(system: S, initial_user: U, error_feedback: E) -> Self
    where
        S: Fn() -> SFut + Send + Sync + 'static,
        SFut: Future<Output = Result<String, String>> + Send + 'static,
        U: Fn(Arc<Input>) -> UFut + Send + Sync + 'static,
        UFut: Future<Output = Result<String, String>> + Send + 'static,
        E: Fn(String, ExecutionContext) -> EFut + Send + Sync + 'static,
        EFut: Future<Output = Result<String, String>> + Send + 'static,
    {
        Self {
            system: Arc::new(move || Box::pin(system())),
            initial_user: Arc::new(move |input| Box::pin(initial_user(input))),
            error_feedback: Arc::new(move |formatted, context| {
                Box::pin(error_feedback(formatted, context))
            }),
        }
    }

    pub async fn build_system_prompt(&self) -> Result<String, String> {
        (self.system)().await
    }

    pub async fn build_initial_prompt(&self, input: Arc<Input>) -> Result<String, String> {
        (self.initial_user)(input).await
    }

    pub async fn build_error_feedback(
        &self,
        formatted: String,
        context: ExecutionContext,
    ) -> Result<String, String> {
        (self.error_feedback)(formatted, context).await
    }
}

/// `{trackLatency, trackTokens, trackAttempts, trackCost}` — which execution
/// metadata a given execution bothers to compute. `trackCost` is retained for
/// parity with the distilled contract even though the core has no pricing
/// table of its own; a consumer derives cost from `tokens` and its own rates.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObservabilityFlags {
    pub track_latency: bool,
    pub track_tokens: bool,
    pub track_attempts: bool,
    pub track_cost: bool,
}

/// The immutable bundle describing an agent. Holds no interior mutability
/// field, so "never mutated during execution" is enforced by the type
/// system, not by convention (§5).
pub struct AgentDefinition<Input, Output, Run, Attempt> {
    pub model: ModelConfig,
    pub output_tool: OutputTool,
    pub helper_tools: Vec<HelperTool<Run, Attempt>>,
    pub validation: ValidationConfig<Output>,
    pub prompts: PromptBuilders<Input>,
    pub observability: ObservabilityFlags,
    pub max_attempts: u32,
    pub max_iterations: u32,
    pub initial_run: Run,
    pub initial_attempt: Attempt,
    pub project_final_state: Option<ProjectFinalStateFn<Run, Attempt>>,
}

/// Extracts a user-visible projection from the final `Run`/`Attempt` tiers.
/// Fallible: a projection that fails produces `STATE_PROJECTION_FAILED`.
pub type ProjectFinalStateFn<Run, Attempt> =
    Arc<dyn Fn(&Run, &Attempt) -> Result<Value, String> + Send + Sync>;

impl<Input, Output, Run, Attempt> AgentDefinition<Input, Output, Run, Attempt>
where
    Run: Clone,
    Attempt: Clone,
    Output: Serialize,
{
    pub fn validate_config(&self) -> Result<(), AgentError> {
        if self.max_attempts == 0 {
            return Err(AgentError::Config {
                message: "maxAttempts must be at least 1".to_string(),
            });
        }
        if self.max_iterations == 0 {
            return Err(AgentError::Config {
                message: "maxIterations must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::OutputTool;

    fn sample_definition() -> AgentDefinition<String, Value, Value, Value> {
        AgentDefinition {
            model: ModelConfig {
                name: "claude-test".to_string(),
                max_tokens: 1024,
                temperature: 0.0,
            },
            output_tool: OutputTool::new("generate_output", "emit output", serde_json::json!({})),
            helper_tools: vec![],
            validation: ValidationConfig::new(serde_json::json!({})),
            prompts: PromptBuilders::new(
                || async { Ok("system".to_string()) },
                |_input: Arc<String>| async { Ok("initial".to_string()) },
                |_formatted, _ctx| async { Ok("feedback".to_string()) },
            ),
            observability: ObservabilityFlags::default(),
            max_attempts: 3,
            max_iterations: 10,
            initial_run: serde_json::json!({}),
            initial_attempt: serde_json::json!({}),
            project_final_state: None,
        }
    }

    #[test]
    fn rejects_zero_max_attempts() {
        let mut definition = sample_definition();
        definition.max_attempts = 0;
        assert!(definition.validate_config().is_err());
    }

    #[test]
    fn accepts_well_formed_definition() {
        assert!(sample_definition().validate_config().is_ok());
    }
}
