//! The tool-use processor (§4.3): given one assistant turn's blocks plus the
//! current state, dispatches every tool call in order and returns the
//! `tool_result` blocks to send back, output/submit flags, the latest
//! observed output candidate, and updated state tiers.
//!
//! Modeled as a single free async function rather than a struct with mutable
//! fields: the left-to-right, exception-safe, state-threading contract is
//! enforced by one sequential loop with no shared mutable borrow hazards.

use std::sync::Arc;

use serde_json::Value;

use crate::callbacks::Callbacks;
use crate::error::catch_panic;
use crate::llm::{AssistantBlock, UserBlock};
use crate::state::{AgentState, MergeRun};
use crate::tools::{ToolTable, SUBMIT_TOOL_NAME};

/// The result of processing one assistant turn's tool-use blocks.
pub struct ProcessedToolUses<Run, Attempt> {
    pub tool_results: Vec<UserBlock>,
    pub was_output_found: bool,
    pub was_submit_found: bool,
    pub latest_output: Option<Value>,
    /// The `tool_use_id` of the most recent output-tool call observed, carried
    /// across turns alongside `latest_output` — needed to address the
    /// `tool_result` a validation failure attaches on retry (§4.5 step 7).
    pub latest_output_tool_use_id: Option<String>,
    pub run: Run,
    pub attempt: Attempt,
}

/// Processes `blocks` left to right against `state`, dispatching each
/// `tool_use` to the output tool, a helper tool, or the runtime-injected
/// submit tool. `latest_output` carries forward across the loop so a later
/// block sees an earlier one's recorded candidate (§4.6: "a single assistant
/// turn may contain both an output call and a submit call").
pub async fn process_tool_uses<Run, Attempt>(
    blocks: &[AssistantBlock],
    state: Arc<AgentState<Run, Attempt>>,
    tool_table: &ToolTable<Run, Attempt>,
    callbacks: &Callbacks,
    carried_output: Option<Value>,
    carried_output_tool_use_id: Option<String>,
) -> ProcessedToolUses<Run, Attempt>
where
    Run: Clone + MergeRun + Send + Sync + 'static,
    Attempt: Clone + Send + Sync + 'static,
{
    let mut tool_results = Vec::new();
    let mut was_output_found = carried_output.is_some();
    let mut was_submit_found = false;
    let mut latest_output = carried_output;
    let mut latest_output_tool_use_id = carried_output_tool_use_id;
    let mut run = state.run.clone();
    let mut attempt = state.attempt.clone();

    for block in blocks {
        let AssistantBlock::ToolUse { id, name, input } = block else {
            continue;
        };

        if tool_table.reflection_enabled && name == SUBMIT_TOOL_NAME {
            callbacks.fire_tool_call(name, &Value::Null);
            callbacks.fire_tool_result(name, "", false);
            was_submit_found = true;
            continue;
        }

        if name == tool_table.output_tool.name() {
            callbacks.fire_tool_call(name, input);
            was_output_found = true;
            latest_output = Some(input.clone());
            latest_output_tool_use_id = Some(id.clone());

            if tool_table.reflection_enabled {
                let verdict = match tool_table.output_tool.reflection_handler() {
                    Some(handler) => match catch_panic(handler(input.clone())).await {
                        Ok(verdict) => verdict,
                        Err(panic_message) => Err(format!("Error: {panic_message}")),
                    },
                    None => Ok("accepted".to_string()),
                };
                let (content, is_error) = match verdict {
                    Ok(message) => (message, false),
                    Err(message) => (message, true),
                };
                callbacks.fire_tool_result(name, &content, is_error);
                tool_results.push(UserBlock::tool_result(id.clone(), content, is_error));
            }
            continue;
        }

        match tool_table.helpers.get(name) {
            None => {
                let content = format!("unknown tool '{name}'");
                callbacks.fire_tool_result(name, &content, true);
                tool_results.push(UserBlock::tool_result(id.clone(), content, true));
            }
            Some(helper) => {
                let current_state = Arc::new(AgentState::new(state.context, run.clone(), attempt.clone()));
                match catch_panic(helper.call(current_state, input.clone())).await {
                    Ok(Ok(outcome)) => {
                        run = run.merge(outcome.run);
                        attempt = outcome.attempt;
                        let content = outcome.tool_result.to_string();
                        callbacks.fire_tool_result(name, &content, false);
                        tool_results.push(UserBlock::tool_result(id.clone(), content, false));
                    }
                    Ok(Err(message)) => {
                        callbacks.fire_tool_result(name, &message, true);
                        tool_results.push(UserBlock::tool_result(id.clone(), message, true));
                    }
                    Err(panic_message) => {
                        let content = format!("Error: {panic_message}");
                        callbacks.fire_tool_result(name, &content, true);
                        tool_results.push(UserBlock::tool_result(id.clone(), content, true));
                    }
                }
            }
        }
    }

    ProcessedToolUses {
        tool_results,
        was_output_found,
        was_submit_found,
        latest_output,
        latest_output_tool_use_id,
        run,
        attempt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ExecutionContext;
    use crate::tools::{HelperOutcome, HelperTool, OutputTool};
    use serde_json::json;

    fn context() -> ExecutionContext {
        ExecutionContext {
            attempt: 1,
            max_attempts: 1,
            iteration: 1,
            max_iterations: 5,
        }
    }

    #[tokio::test]
    async fn output_tool_without_reflection_emits_no_tool_result() {
        let output_tool = OutputTool::new("generate_output", "emit output", json!({}));
        let table: ToolTable<Value, Value> = ToolTable::new(output_tool, vec![]);
        let state = Arc::new(AgentState::new(context(), json!({}), json!({})));
        let callbacks = Callbacks::default();

        let blocks = vec![AssistantBlock::ToolUse {
            id: "call_1".to_string(),
            name: "generate_output".to_string(),
            input: json!({"result": "done"}),
        }];

        let processed = process_tool_uses(&blocks, state, &table, &callbacks, None, None).await;
        assert!(processed.was_output_found);
        assert!(processed.tool_results.is_empty());
        assert_eq!(processed.latest_output, Some(json!({"result": "done"})));
    }

    #[tokio::test]
    async fn submit_without_output_still_reports_was_submit_found() {
        let output_tool = OutputTool::new("generate_output", "emit output", json!({}))
            .with_reflection(|_candidate| async move { Ok("ok".to_string()) });
        let table: ToolTable<Value, Value> = ToolTable::new(output_tool, vec![]);
        let state = Arc::new(AgentState::new(context(), json!({}), json!({})));
        let callbacks = Callbacks::default();

        let blocks = vec![AssistantBlock::ToolUse {
            id: "call_1".to_string(),
            name: SUBMIT_TOOL_NAME.to_string(),
            input: json!({}),
        }];

        let processed = process_tool_uses(&blocks, state, &table, &callbacks, None, None).await;
        assert!(processed.was_submit_found);
        assert!(!processed.was_output_found);
    }

    #[tokio::test]
    async fn helper_tool_merges_run_and_replaces_attempt() {
        let output_tool = OutputTool::new("generate_output", "emit output", json!({}));
        let helper = HelperTool::new("note", "records a note", json!({}), |state, input| async move {
            let mut run = state.run.clone();
            if let Value::Object(map) = &mut run {
                map.insert("note".to_string(), input.clone());
            }
            Ok(HelperOutcome::new(run, json!({"touched": true}), json!({"ok": true})))
        });
        let table: ToolTable<Value, Value> = ToolTable::new(output_tool, vec![helper]);
        let state = Arc::new(AgentState::new(context(), json!({"existing": 1}), json!({})));
        let callbacks = Callbacks::default();

        let blocks = vec![AssistantBlock::ToolUse {
            id: "call_1".to_string(),
            name: "note".to_string(),
            input: json!("hello"),
        }];

        let processed = process_tool_uses(&blocks, state, &table, &callbacks, None, None).await;
        assert_eq!(processed.run, json!({"existing": 1, "note": "hello"}));
        assert_eq!(processed.attempt, json!({"touched": true}));
        assert_eq!(processed.tool_results.len(), 1);
    }

    #[tokio::test]
    async fn unknown_tool_name_emits_error_tool_result() {
        let output_tool = OutputTool::new("generate_output", "emit output", json!({}));
        let table: ToolTable<Value, Value> = ToolTable::new(output_tool, vec![]);
        let state = Arc::new(AgentState::new(context(), json!({}), json!({})));
        let callbacks = Callbacks::default();

        let blocks = vec![AssistantBlock::ToolUse {
            id: "call_1".to_string(),
            name: "nonexistent".to_string(),
            input: json!({}),
        }];

        let processed = process_tool_uses(&blocks, state, &table, &callbacks, None, None).await;
        assert_eq!(processed.tool_results.len(), 1);
        let UserBlock::ToolResult { is_error, .. } = &processed.tool_results[0] else {
            panic!("expected tool result");
        };
        assert!(*is_error);
    }

    #[tokio::test]
    async fn panicking_helper_handler_is_caught_as_error_tool_result() {
        let output_tool = OutputTool::new("generate_output", "emit output", json!({}));
        let helper = HelperTool::<Value, Value>::new(
            "explode",
            "always panics",
            json!({}),
            |_state, _input| async move { panic!("handler exploded") },
        );
        let table: ToolTable<Value, Value> = ToolTable::new(output_tool, vec![helper]);
        let state = Arc::new(AgentState::new(context(), json!({}), json!({})));
        let callbacks = Callbacks::default();

        let blocks = vec![AssistantBlock::ToolUse {
            id: "call_1".to_string(),
            name: "explode".to_string(),
            input: json!({}),
        }];

        let processed = process_tool_uses(&blocks, state, &table, &callbacks, None, None).await;
        assert_eq!(processed.tool_results.len(), 1);
        let UserBlock::ToolResult { is_error, content, .. } = &processed.tool_results[0] else {
            panic!("expected tool result");
        };
        assert!(*is_error);
        assert!(content.contains("handler exploded"));
    }

    #[tokio::test]
    async fn panicking_reflection_handler_is_caught_as_error_tool_result() {
        let output_tool = OutputTool::new("generate_output", "emit output", json!({}))
            .with_reflection(|_candidate| async move { panic!("reflection exploded") });
        let table: ToolTable<Value, Value> = ToolTable::new(output_tool, vec![]);
        let state = Arc::new(AgentState::new(context(), json!({}), json!({})));
        let callbacks = Callbacks::default();

        let blocks = vec![AssistantBlock::ToolUse {
            id: "call_1".to_string(),
            name: "generate_output".to_string(),
            input: json!({"result": "draft"}),
        }];

        let processed = process_tool_uses(&blocks, state, &table, &callbacks, None, None).await;
        assert_eq!(processed.tool_results.len(), 1);
        let UserBlock::ToolResult { is_error, content, .. } = &processed.tool_results[0] else {
            panic!("expected tool result");
        };
        assert!(*is_error);
        assert!(content.contains("reflection exploded"));
    }
}
