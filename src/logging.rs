//! `LogEvent` (§2.1/§6): a serializable mirror of each
//! lifecycle callback firing, timestamped, so a consumer can register a
//! [`crate::callbacks::Callbacks`] set that appends one `LogEvent` per
//! firing and serializes the stream with `serde_json` + `writeln!` into
//! whatever on-disk `logs.jsonl` layout it chooses. The core never writes
//! this file itself — persistence is a consumer concern (§1 non-goals).

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::AgentError;
use crate::state::ExecutionContext;
use crate::validation::{LayerDescriptor, LayerKind, LayerResult};

/// One JSON-serializable event, tagged by `type`, corresponding 1:1 to one
/// of the nine lifecycle callbacks firing.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEvent {
    AttemptStart {
        timestamp: DateTime<Utc>,
        attempt: u32,
        max_attempts: u32,
    },
    AttemptComplete {
        timestamp: DateTime<Utc>,
        attempt: u32,
        success: bool,
    },
    ValidationFailure {
        timestamp: DateTime<Utc>,
        failed_layers: Vec<String>,
    },
    ValidationLayerStart {
        timestamp: DateTime<Utc>,
        layer: String,
        kind: &'static str,
    },
    ValidationLayerComplete {
        timestamp: DateTime<Utc>,
        layer: String,
        success: bool,
    },
    ToolCall {
        timestamp: DateTime<Utc>,
        name: String,
        input: Value,
    },
    ToolResult {
        timestamp: DateTime<Utc>,
        name: String,
        result: String,
        is_error: bool,
    },
    Success {
        timestamp: DateTime<Utc>,
        output: Value,
    },
    Failure {
        timestamp: DateTime<Utc>,
        codes: Vec<&'static str>,
    },
}

fn kind_label(kind: LayerKind) -> &'static str {
    match kind {
        LayerKind::Schema => "schema",
        LayerKind::Custom => "custom",
    }
}

impl LogEvent {
    pub fn attempt_start(context: ExecutionContext) -> Self {
        LogEvent::AttemptStart {
            timestamp: Utc::now(),
            attempt: context.attempt,
            max_attempts: context.max_attempts,
        }
    }

    pub fn attempt_complete(context: ExecutionContext, success: bool) -> Self {
        LogEvent::AttemptComplete {
            timestamp: Utc::now(),
            attempt: context.attempt,
            success,
        }
    }

    pub fn validation_failure(errors: &[LayerResult]) -> Self {
        let failed_layers = errors
            .iter()
            .filter_map(|result| match result {
                LayerResult::Failure { name, .. } => Some(name.clone()),
                LayerResult::Success { .. } => None,
            })
            .collect();
        LogEvent::ValidationFailure {
            timestamp: Utc::now(),
            failed_layers,
        }
    }

    pub fn validation_layer_start(layer: &LayerDescriptor) -> Self {
        LogEvent::ValidationLayerStart {
            timestamp: Utc::now(),
            layer: layer.name.clone(),
            kind: kind_label(layer.kind),
        }
    }

    pub fn validation_layer_complete(result: &LayerResult) -> Self {
        let (layer, success) = match result {
            LayerResult::Success { name, .. } => (name.clone(), true),
            LayerResult::Failure { name, .. } => (name.clone(), false),
        };
        LogEvent::ValidationLayerComplete {
            timestamp: Utc::now(),
            layer,
            success,
        }
    }

    pub fn tool_call(name: &str, input: &Value) -> Self {
        LogEvent::ToolCall {
            timestamp: Utc::now(),
            name: name.to_string(),
            input: input.clone(),
        }
    }

    pub fn tool_result(name: &str, result: &str, is_error: bool) -> Self {
        LogEvent::ToolResult {
            timestamp: Utc::now(),
            name: name.to_string(),
            result: result.to_string(),
            is_error,
        }
    }

    pub fn success(output: &Value) -> Self {
        LogEvent::Success {
            timestamp: Utc::now(),
            output: output.clone(),
        }
    }

    pub fn failure(errors: &[AgentError]) -> Self {
        LogEvent::Failure {
            timestamp: Utc::now(),
            codes: errors.iter().map(AgentError::code).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn attempt_start_serializes_with_tag() {
        let event = LogEvent::attempt_start(ExecutionContext {
            attempt: 2,
            max_attempts: 3,
            iteration: 0,
            max_iterations: 5,
        });
        let value = serde_json::to_value(&event).expect("serializes");
        assert_eq!(value["type"], "attempt_start");
        assert_eq!(value["attempt"], 2);
        assert_eq!(value["max_attempts"], 3);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn validation_failure_lists_only_failed_layer_names() {
        let results = vec![
            LayerResult::Success {
                name: "schema".to_string(),
                kind: LayerKind::Schema,
            },
            LayerResult::Failure {
                name: "min_length".to_string(),
                kind: LayerKind::Custom,
                error: crate::validation::ValidationError::Custom("too short".to_string()),
            },
        ];
        let event = LogEvent::validation_failure(&results);
        let value = serde_json::to_value(&event).expect("serializes");
        assert_eq!(value["failed_layers"], json!(["min_length"]));
    }

    #[test]
    fn failure_event_carries_stable_error_codes() {
        let event = LogEvent::failure(&[AgentError::SubmitBeforeOutput { attempt: 1 }]);
        let value = serde_json::to_value(&event).expect("serializes");
        assert_eq!(value["codes"], json!(["SUBMIT_BEFORE_OUTPUT"]));
    }

    #[test]
    fn tool_call_round_trips_input_json() {
        let event = LogEvent::tool_call("word_count", &json!({"text": "hi"}));
        let value = serde_json::to_value(&event).expect("serializes");
        assert_eq!(value["name"], "word_count");
        assert_eq!(value["input"], json!({"text": "hi"}));
    }
}
