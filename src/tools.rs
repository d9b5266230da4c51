//! The three tool kinds the runtime dispatches: the output tool (through
//! which the model emits its candidate output), helper tools (agent-supplied,
//! state-threading), and the runtime-injected submit tool used by the
//! reflection sub-protocol (§4.6). `ToolTable` is the per-execution, string-keyed
//! dispatch table built once from an [`crate::definition::AgentDefinition`],
//! generalizing the open union of tool handlers the source describes (§9) into
//! a `HashMap` lookup.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::llm::ToolDescriptor;
use crate::state::AgentState;

/// The fixed name and description of the runtime-injected submit tool.
pub const SUBMIT_TOOL_NAME: &str = "submit";
const SUBMIT_TOOL_DESCRIPTION: &str =
    "Call this once you are satisfied with your most recent output and are ready to finish. \
     Takes no arguments.";

/// Verdict returned by a reflection handler: `Ok` carries a continuation
/// message fed back to the model, `Err` carries a rejection message telling
/// it to revise.
pub type ReflectionVerdict = Result<String, String>;

/// An agent-supplied function consulted after each output-tool call in
/// reflection mode. Operates on the raw candidate JSON — before any typed
/// validation has run — since reflection is a cheap, model-facing nudge, not
/// the authoritative validation pass.
pub type ReflectionHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ReflectionVerdict> + Send + Sync>;

/// The tool through which the model emits its candidate output.
#[derive(Clone)]
pub struct OutputTool {
    name: String,
    description: String,
    input_schema: Value,
    reflection_handler: Option<ReflectionHandler>,
}

impl OutputTool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            reflection_handler: None,
        }
    }

    /// Enables the reflection sub-protocol for this output tool.
    pub fn with_reflection<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ReflectionVerdict> + Send + 'static,
    {
        self.reflection_handler = Some(Arc::new(move |candidate| Box::pin(handler(candidate))));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    pub fn reflection_handler(&self) -> Option<&ReflectionHandler> {
        self.reflection_handler.as_ref()
    }

    pub fn reflection_enabled(&self) -> bool {
        self.reflection_handler.is_some()
    }
}

/// What a helper tool handler returns on success: replacement `run`/`attempt`
/// tiers plus a JSON value to report back to the model as the tool result.
pub struct HelperOutcome<Run, Attempt> {
    pub run: Run,
    pub attempt: Attempt,
    pub tool_result: Value,
}

impl<Run, Attempt> HelperOutcome<Run, Attempt> {
    pub fn new(run: Run, attempt: Attempt, tool_result: Value) -> Self {
        Self {
            run,
            attempt,
            tool_result,
        }
    }
}

type HelperHandlerFn<Run, Attempt> = dyn Fn(Arc<AgentState<Run, Attempt>>, Value) -> BoxFuture<'static, Result<HelperOutcome<Run, Attempt>, String>>
    + Send
    + Sync;

/// An agent-supplied tool that reads the current state and returns
/// replacement `run`/`attempt` tiers plus a tool result. Mirrors the
/// `handler(state, input)` contract in §3, generalized in Rust to a boxed
/// async closure (§9: "tool handlers become trait/interface objects keyed by
/// tool name").
pub struct HelperTool<Run, Attempt> {
    name: String,
    description: String,
    input_schema: Value,
    handler: Arc<HelperHandlerFn<Run, Attempt>>,
}

impl<Run, Attempt> Clone for HelperTool<Run, Attempt> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
            handler: self.handler.clone(),
        }
    }
}

impl<Run, Attempt> HelperTool<Run, Attempt>
where
    Run: Send + Sync + 'static,
    Attempt: Send + Sync + 'static,
{
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Arc<AgentState<Run, Attempt>>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HelperOutcome<Run, Attempt>, String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            handler: Arc::new(move |state, input| Box::pin(handler(state, input))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    pub async fn call(
        &self,
        state: Arc<AgentState<Run, Attempt>>,
        input: Value,
    ) -> Result<HelperOutcome<Run, Attempt>, String> {
        (self.handler)(state, input).await
    }
}

/// The per-execution, string-keyed tool dispatch table: the output tool,
/// every helper tool by name, and whether reflection (and therefore the
/// injected submit tool) is enabled. Built once per attempt from the
/// immutable [`crate::definition::AgentDefinition`] (§4.4 step 1).
pub struct ToolTable<Run, Attempt> {
    pub output_tool: OutputTool,
    pub helpers: HashMap<String, HelperTool<Run, Attempt>>,
    pub reflection_enabled: bool,
}

impl<Run, Attempt> ToolTable<Run, Attempt> {
    pub fn new(output_tool: OutputTool, helper_tools: Vec<HelperTool<Run, Attempt>>) -> Self {
        let reflection_enabled = output_tool.reflection_enabled();
        let helpers = helper_tools
            .into_iter()
            .map(|tool| (tool.name().to_string(), tool))
            .collect();

        Self {
            output_tool,
            helpers,
            reflection_enabled,
        }
    }

    /// The tool descriptors sent to the model on every request of the
    /// attempt: the output tool, every helper tool, and — if reflection is
    /// enabled — the injected submit tool.
    pub fn tool_descriptors(&self) -> Vec<ToolDescriptor> {
        let mut descriptors = Vec::with_capacity(self.helpers.len() + 2);

        descriptors.push(ToolDescriptor {
            name: self.output_tool.name().to_string(),
            description: self.output_tool.description().to_string(),
            input_schema: self.output_tool.input_schema().clone(),
        });

        for helper in self.helpers.values() {
            descriptors.push(ToolDescriptor {
                name: helper.name().to_string(),
                description: helper.description().to_string(),
                input_schema: helper.input_schema().clone(),
            });
        }

        if self.reflection_enabled {
            descriptors.push(ToolDescriptor {
                name: SUBMIT_TOOL_NAME.to_string(),
                description: SUBMIT_TOOL_DESCRIPTION.to_string(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {},
                    "additionalProperties": false,
                }),
            });
        }

        descriptors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_descriptors_include_submit_only_when_reflection_enabled() {
        let plain_output = OutputTool::new("generate_output", "emit output", serde_json::json!({}));
        let table: ToolTable<(), ()> = ToolTable::new(plain_output, vec![]);
        assert!(
            !table
                .tool_descriptors()
                .iter()
                .any(|d| d.name == SUBMIT_TOOL_NAME)
        );

        let reflective_output = OutputTool::new("generate_output", "emit output", serde_json::json!({}))
            .with_reflection(|_candidate| async move { Ok("looks good".to_string()) });
        let table: ToolTable<(), ()> = ToolTable::new(reflective_output, vec![]);
        assert!(
            table
                .tool_descriptors()
                .iter()
                .any(|d| d.name == SUBMIT_TOOL_NAME)
        );
    }
}
