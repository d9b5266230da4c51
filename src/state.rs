//! The two mutable state tiers threaded through one execution (§3), owned
//! exclusively by the attempt controller and handed to tool handlers by
//! shared reference.

use serde_json::Value;

/// Framework-managed position within the execution. Handlers never modify
/// this — they only ever return replacement `run`/`attempt` tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionContext {
    pub attempt: u32,
    pub max_attempts: u32,
    pub iteration: u32,
    pub max_iterations: u32,
}

/// How a helper tool's returned `run` state is folded onto the live `run`
/// tier: fields may be added or replaced but never erased, so a buggy
/// handler that forgets a field can't silently discard previously captured
/// run state.
pub trait MergeRun: Sized {
    fn merge(self, incoming: Self) -> Self;
}

/// The run tier is frequently just "a bag of named fields" in the embedding
/// application (think: accumulated analysis results keyed by name). For that
/// shape, `serde_json::Value` gets a shallow, top-level-keys overlay for
/// free: keys present in `incoming` win, keys absent from `incoming` survive
/// from the base value untouched.
impl MergeRun for Value {
    fn merge(self, incoming: Value) -> Value {
        match (self, incoming) {
            (Value::Object(mut base), Value::Object(overlay)) => {
                for (key, value) in overlay {
                    base.insert(key, value);
                }
                Value::Object(base)
            }
            (_, incoming) => incoming,
        }
    }
}

/// The mutable state threaded through one execution. Owned by the attempt
/// controller; handlers receive it behind a shared reference (typically
/// `Arc<AgentState<Run, Attempt>>` so a boxed handler closure can capture it)
/// and return replacement `run`/`attempt` values rather than mutating in place.
#[derive(Debug, Clone)]
pub struct AgentState<Run, Attempt> {
    pub context: ExecutionContext,
    pub run: Run,
    pub attempt: Attempt,
}

impl<Run, Attempt> AgentState<Run, Attempt> {
    pub fn new(context: ExecutionContext, run: Run, attempt: Attempt) -> Self {
        Self {
            context,
            run,
            attempt,
        }
    }
}
