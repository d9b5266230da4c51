use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use serde_json::{Value, json};
use thiserror::Error;

/// Severity of a structured error, independent of the category it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Warning,
    Error,
    Fatal,
}

/// Which part of the runtime an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Model,
    Execution,
    Validation,
    Data,
    Spec,
}

/// The phase cancellation was observed in, attached to `EXECUTION_CANCELLED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationPhase {
    Iteration,
    Validation,
    PromptBuild,
}

impl CancellationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancellationPhase::Iteration => "iteration",
            CancellationPhase::Validation => "validation",
            CancellationPhase::PromptBuild => "prompt-build",
        }
    }
}

/// Every failure the runtime can surface to a caller of [`crate::execute`].
///
/// Each variant carries a stable string identifier via [`AgentError::code`],
/// a [`ErrorSeverity`] via [`AgentError::severity`], an [`ErrorCategory`] via
/// [`AgentError::category`], and a JSON context bag via [`AgentError::context`].
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("model request failed: {message}")]
    ApiError { attempt: u32, message: String },

    #[error("the model never invoked the output tool (attempt {attempt}, {iterations} iterations)")]
    OutputToolNotUsed { attempt: u32, iterations: u32 },

    #[error("iteration limit exceeded on attempt {attempt} ({iteration_count} iterations)")]
    MaxIterationsExceeded { attempt: u32, iteration_count: u32 },

    #[error("submit tool was called before any output was produced (attempt {attempt})")]
    SubmitBeforeOutput { attempt: u32 },

    #[error("validation failed on attempt {attempt} at layer '{layer}': {formatted}")]
    ValidationFailed {
        attempt: u32,
        layer: String,
        formatted: String,
    },

    #[error("execution cancelled during {}", phase.as_str())]
    ExecutionCancelled {
        attempt: u32,
        phase: CancellationPhase,
    },

    #[error("final state projection failed: {message}")]
    StateProjectionFailed { attempt: u32, message: String },

    #[error("agent definition is invalid: {message}")]
    Config { message: String },
}

impl AgentError {
    /// Stable identifier, suitable for metrics and log filtering.
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::ApiError { .. } => "API_ERROR",
            AgentError::OutputToolNotUsed { .. } => "OUTPUT_TOOL_NOT_USED",
            AgentError::MaxIterationsExceeded { .. } => "MAX_ITERATIONS_EXCEEDED",
            AgentError::SubmitBeforeOutput { .. } => "SUBMIT_BEFORE_OUTPUT",
            AgentError::ValidationFailed { .. } => "VALIDATION_FAILED",
            AgentError::ExecutionCancelled { .. } => "EXECUTION_CANCELLED",
            AgentError::StateProjectionFailed { .. } => "STATE_PROJECTION_FAILED",
            AgentError::Config { .. } => "CONFIG_ERROR",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            AgentError::ApiError { .. }
            | AgentError::OutputToolNotUsed { .. }
            | AgentError::SubmitBeforeOutput { .. } => ErrorCategory::Model,
            AgentError::MaxIterationsExceeded { .. }
            | AgentError::ExecutionCancelled { .. }
            | AgentError::StateProjectionFailed { .. } => ErrorCategory::Execution,
            AgentError::ValidationFailed { .. } => ErrorCategory::Validation,
            AgentError::Config { .. } => ErrorCategory::Spec,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            AgentError::ValidationFailed { .. } => ErrorSeverity::Warning,
            AgentError::Config { .. } => ErrorSeverity::Fatal,
            _ => ErrorSeverity::Error,
        }
    }

    /// Structured context bag, always including `attempt` where the error carries one.
    pub fn context(&self) -> Value {
        match self {
            AgentError::ApiError { attempt, message } => json!({
                "attempt": attempt,
                "message": message,
            }),
            AgentError::OutputToolNotUsed { attempt, iterations } => json!({
                "attempt": attempt,
                "iterations": iterations,
            }),
            AgentError::MaxIterationsExceeded {
                attempt,
                iteration_count,
            } => json!({
                "attempt": attempt,
                "iterationCount": iteration_count,
            }),
            AgentError::SubmitBeforeOutput { attempt } => json!({ "attempt": attempt }),
            AgentError::ValidationFailed {
                attempt,
                layer,
                formatted,
            } => json!({
                "attempt": attempt,
                "layer": layer,
                "formatted": formatted,
            }),
            AgentError::ExecutionCancelled { attempt, phase } => json!({
                "attempt": attempt,
                "phase": phase.as_str(),
            }),
            AgentError::StateProjectionFailed { attempt, message } => json!({
                "attempt": attempt,
                "message": message,
            }),
            AgentError::Config { message } => json!({ "message": message }),
        }
    }

    /// Whether this error ends the whole execution rather than triggering a retry.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AgentError::ValidationFailed { .. })
    }
}

/// The runtime's result alias: every internal operation returns one of these.
pub type AgentResult<T> = Result<T, AgentError>;

/// Wraps a value in a successful [`AgentResult`]. Part of the explicit
/// success/failure vocabulary the runtime uses instead of throw-propagation.
pub fn ok<T>(value: T) -> AgentResult<T> {
    Ok(value)
}

/// Wraps an error in a failed [`AgentResult`].
pub fn err<T>(error: AgentError) -> AgentResult<T> {
    Err(error)
}

/// Maps the success value of a result, leaving a failure untouched.
pub fn map<T, U>(result: AgentResult<T>, f: impl FnOnce(T) -> U) -> AgentResult<U> {
    result.map(f)
}

/// Maps the error of a result, leaving a success untouched.
pub fn map_error<T>(
    result: AgentResult<T>,
    f: impl FnOnce(AgentError) -> AgentError,
) -> AgentResult<T> {
    result.map_err(f)
}

/// Sequences a fallible continuation onto a result, short-circuiting on failure.
pub fn chain<T, U>(result: AgentResult<T>, f: impl FnOnce(T) -> AgentResult<U>) -> AgentResult<U> {
    result.and_then(f)
}

/// Recovers a default value from a failed result.
pub fn unwrap_or<T>(result: AgentResult<T>, default: T) -> T {
    result.unwrap_or(default)
}

/// Collects an iterator of results into one result of a vector, short-circuiting
/// on the first failure encountered in iteration order.
pub fn all<T>(results: impl IntoIterator<Item = AgentResult<T>>) -> AgentResult<Vec<T>> {
    results.into_iter().collect()
}

/// Narrows a result to whether it succeeded, without consuming it.
pub fn is_ok<T>(result: &AgentResult<T>) -> bool {
    result.is_ok()
}

/// Narrows a result to whether it failed, without consuming it.
pub fn is_err<T>(result: &AgentResult<T>) -> bool {
    result.is_err()
}

/// Runs an async closure supplied by the embedding application (a prompt
/// builder, a validation layer, a tool handler, a reflection handler) and
/// converts a panic into an `Err(message)` instead of unwinding across the
/// component boundary (§4.1: "unexpected exceptions are always caught at
/// component boundaries and converted into failures"). A successful poll
/// (panic or not) still returns whatever `T` the future would have produced.
pub async fn catch_panic<F, T>(future: F) -> Result<T, String>
where
    F: Future<Output = T> + Send,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(panic_message)
}

/// Extracts a human-readable message from a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_matches_stable_identifiers() {
        assert_eq!(
            AgentError::ApiError {
                attempt: 1,
                message: "boom".into()
            }
            .code(),
            "API_ERROR"
        );
        assert_eq!(
            AgentError::MaxIterationsExceeded {
                attempt: 1,
                iteration_count: 3
            }
            .code(),
            "MAX_ITERATIONS_EXCEEDED"
        );
    }

    #[test]
    fn validation_failed_is_the_only_non_terminal_error() {
        let recoverable = AgentError::ValidationFailed {
            attempt: 1,
            layer: "schema".into(),
            formatted: "bad".into(),
        };
        assert!(!recoverable.is_terminal());

        let terminal = AgentError::SubmitBeforeOutput { attempt: 1 };
        assert!(terminal.is_terminal());
    }

    #[tokio::test]
    async fn catch_panic_converts_panic_to_message() {
        let result = catch_panic(async { panic!("boundary breach") }).await;
        assert_eq!(result.unwrap_err(), "boundary breach");
    }

    #[tokio::test]
    async fn catch_panic_passes_through_normal_output() {
        let result = catch_panic(async { 42 }).await;
        assert_eq!(result, Ok(42));
    }

    #[test]
    fn all_short_circuits_on_first_error() {
        let results: Vec<AgentResult<u32>> = vec![
            ok(1),
            err(AgentError::Config {
                message: "bad".into(),
            }),
            ok(3),
        ];
        assert!(is_err(&all(results)));
    }
}
