//! Lifecycle callbacks and execution metadata (§4.8). Every callback is
//! synchronous and fire-and-forget: a panic inside one is caught at the call
//! site and recorded into `metadata.callback_errors` rather than unwinding
//! across the component boundary (§4.1, §9's "fire-and-forget observability
//! callbacks").

use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use crate::error::{panic_message, AgentError};
use crate::state::ExecutionContext;
use crate::validation::{LayerDescriptor, LayerResult};

/// Accumulated token usage across every model call of an execution, all
/// attempts, all iterations. Monotonically non-decreasing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenMetrics {
    pub input: u64,
    pub output: u64,
    pub cache_creation_input: Option<u64>,
    pub cache_read_input: Option<u64>,
}

impl TokenMetrics {
    pub fn accumulate(&mut self, usage: &crate::llm::Usage) {
        self.input += usage.input_tokens;
        self.output += usage.output_tokens;
        if let Some(created) = usage.cache_creation_input_tokens {
            *self.cache_creation_input.get_or_insert(0) += created;
        }
        if let Some(read) = usage.cache_read_input_tokens {
            *self.cache_read_input.get_or_insert(0) += read;
        }
    }
}

/// Populated for both success and failure outcomes, per the observability
/// flags on the agent definition.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetadata {
    pub latency: Option<Duration>,
    pub tokens: Option<TokenMetrics>,
    pub callback_errors: Vec<String>,
}

type Hook<Args> = Box<dyn Fn(Args) + Send + Sync>;

/// The nine lifecycle callbacks, each optional. Modeled as a struct of
/// `Option<Box<dyn Fn>>` fields rather than a trait an embedder must
/// implement in full — most callers only care about a handful of these.
///
/// `on_success`/`on_failure` take the output/errors as JSON rather than the
/// typed `Output`/`AgentError` generics: the whole struct is therefore
/// non-generic, so one `Callbacks` value can be threaded through the
/// iteration loop, the validation pipeline, and the attempt controller
/// without propagating `Run`/`Attempt`/`Output` type parameters into every
/// signature that merely needs to fire a callback.
#[derive(Default)]
pub struct Callbacks {
    pub on_attempt_start: Option<Hook<ExecutionContext>>,
    pub on_attempt_complete: Option<Hook<(ExecutionContext, bool)>>,
    pub on_validation_failure: Option<Hook<Vec<LayerResult>>>,
    pub on_validation_layer_start: Option<Hook<LayerDescriptor>>,
    pub on_validation_layer_complete: Option<Hook<LayerResult>>,
    pub on_tool_call: Option<Hook<(String, Value)>>,
    pub on_tool_result: Option<Hook<(String, String, bool)>>,
    pub on_success: Option<Hook<(Value, ExecutionMetadata)>>,
    pub on_failure: Option<Hook<(Vec<AgentError>, ExecutionMetadata)>>,

    /// Errors captured from callback panics this execution, visible for
    /// assembly into the final `ExecutionMetadata`. A `Mutex` because
    /// callbacks fire from `&self` call sites scattered across the loop.
    callback_errors: Mutex<Vec<String>>,
}

/// Invokes `hook` with `arg` if present, catching any panic and recording it
/// rather than propagating.
fn fire<T>(hook: &Option<Hook<T>>, arg: T, errors: &Mutex<Vec<String>>, name: &str) {
    let Some(hook) = hook else { return };
    let arg = AssertUnwindSafe(arg);
    let hook = AssertUnwindSafe(hook);
    let result = panic::catch_unwind(move || (hook.0)(arg.0));
    if let Err(payload) = result {
        let message = panic_message(payload);
        errors
            .lock()
            .expect("callback_errors lock poisoned")
            .push(format!("{name} panicked: {message}"));
    }
}

impl Callbacks {
    pub fn fire_attempt_start(&self, context: ExecutionContext) {
        fire(&self.on_attempt_start, context, &self.callback_errors, "onAttemptStart");
    }

    pub fn fire_attempt_complete(&self, context: ExecutionContext, success: bool) {
        fire(
            &self.on_attempt_complete,
            (context, success),
            &self.callback_errors,
            "onAttemptComplete",
        );
    }

    pub fn fire_validation_failure(&self, errors: Vec<LayerResult>) {
        fire(
            &self.on_validation_failure,
            errors,
            &self.callback_errors,
            "onValidationFailure",
        );
    }

    pub fn fire_validation_layer_start(&self, layer: &LayerDescriptor) {
        fire(
            &self.on_validation_layer_start,
            layer.clone(),
            &self.callback_errors,
            "onValidationLayerStart",
        );
    }

    pub fn fire_validation_layer_complete(&self, result: &LayerResult) {
        fire(
            &self.on_validation_layer_complete,
            result.clone(),
            &self.callback_errors,
            "onValidationLayerComplete",
        );
    }

    pub fn fire_tool_call(&self, name: &str, input: &Value) {
        fire(
            &self.on_tool_call,
            (name.to_string(), input.clone()),
            &self.callback_errors,
            "onToolCall",
        );
    }

    pub fn fire_tool_result(&self, name: &str, result_text: &str, is_error: bool) {
        fire(
            &self.on_tool_result,
            (name.to_string(), result_text.to_string(), is_error),
            &self.callback_errors,
            "onToolResult",
        );
    }

    pub fn fire_success(&self, output: Value, metadata: ExecutionMetadata) {
        fire(&self.on_success, (output, metadata), &self.callback_errors, "onSuccess");
    }

    pub fn fire_failure(&self, errors: Vec<AgentError>, metadata: ExecutionMetadata) {
        fire(&self.on_failure, (errors, metadata), &self.callback_errors, "onFailure");
    }

    /// Drains the callback errors captured so far, for folding into an
    /// `ExecutionMetadata` value.
    pub fn take_callback_errors(&self) -> Vec<String> {
        std::mem::take(&mut self.callback_errors.lock().expect("callback_errors lock poisoned"))
    }
}
