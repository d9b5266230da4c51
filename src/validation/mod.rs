//! The validation pipeline (§4.2): an ordered sequence of layers applied to a
//! candidate output, short-circuiting on the first failure. A synthetic
//! "schema" layer — implicit at position 0, always present — converts the
//! raw tool-call JSON into a typed `Output` before the agent's own declared
//! layers run, matching §3's "`validation.outputSchema` plus
//! `validation.layers`".

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::callbacks::Callbacks;
use crate::error::catch_panic;

/// Whether a layer validates against a structural schema or runs an ad-hoc
/// predicate. Carries no behavioral difference beyond labeling — both kinds
/// implement the same [`ValidationLayer`] method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Schema,
    Custom,
}

/// One path/message pair from a schema-typed layer's failure.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaIssue {
    pub path: String,
    pub message: String,
}

/// A validation layer's raw, unconstrained failure (§3: "deliberately
/// unconstrained to carry schema-library-specific structures").
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Schema(Vec<SchemaIssue>),
    Custom(String),
}

impl ValidationError {
    /// Renders the raw error to a model-facing string: a prettified
    /// path/message list for schema errors, the message verbatim for
    /// custom ones.
    pub fn describe(&self) -> String {
        match self {
            ValidationError::Schema(issues) => issues
                .iter()
                .map(|issue| format!("- `{}`: {}", issue.path, issue.message))
                .collect::<Vec<_>>()
                .join("\n"),
            ValidationError::Custom(message) => message.clone(),
        }
    }
}

/// Name, description, and kind of a layer, independent of its candidate
/// type — what gets reported to the formatter and to the
/// `onValidationLayerStart`/`onValidationLayerComplete` callbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerDescriptor {
    pub name: String,
    pub description: String,
    pub kind: LayerKind,
}

/// One stage of the output validation pipeline.
#[async_trait]
pub trait ValidationLayer<Output>: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn kind(&self) -> LayerKind;

    /// Validates (and may narrow/normalize) the candidate. Must not mutate
    /// the candidate in its failure case — only the narrowed success value
    /// is visible to subsequent layers.
    async fn validate(&self, candidate: Output) -> Result<Output, ValidationError>;

    fn descriptor(&self) -> LayerDescriptor {
        LayerDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            kind: self.kind(),
        }
    }
}

/// The outcome of one layer's run, as reported to
/// `onValidationLayerComplete` and accumulated for `onValidationFailure`.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerResult {
    Success { name: String, kind: LayerKind },
    Failure {
        name: String,
        kind: LayerKind,
        error: ValidationError,
    },
}

/// The pipeline's failure: which layer failed and the model-facing string a
/// caller feeds back into the conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineFailure {
    pub layer: LayerDescriptor,
    pub error: ValidationError,
    pub formatted: String,
}

impl PipelineFailure {
    fn new(layer: LayerDescriptor, error: ValidationError) -> Self {
        let formatted = format!(
            "Validation failed at layer '{}' ({}): {}\n\n{}",
            layer.name,
            match layer.kind {
                LayerKind::Schema => "schema",
                LayerKind::Custom => "custom",
            },
            layer.description,
            error.describe(),
        );
        Self {
            layer,
            error,
            formatted,
        }
    }
}

/// Runs the declared layers, in order, against `candidate`, firing
/// `onValidationLayerStart`/`onValidationLayerComplete` around each one and
/// short-circuiting on the first failure.
///
/// The synthetic schema-conversion layer (raw JSON → typed `Output`) is the
/// caller's responsibility — see [`crate::attempt`] — since it needs a
/// `Value`, not an `Output`, as input; everything past that point is exactly
/// the declared `layers` list.
pub async fn run_pipeline<Output: Send + 'static>(
    layers: &[Arc<dyn ValidationLayer<Output>>],
    mut candidate: Output,
    callbacks: &Callbacks,
) -> Result<Output, PipelineFailure> {
    for layer in layers {
        let descriptor = layer.descriptor();
        callbacks.fire_validation_layer_start(&descriptor);

        let outcome = match catch_panic(layer.validate(candidate)).await {
            Ok(outcome) => outcome,
            Err(panic_message) => Err(ValidationError::Custom(format!(
                "layer panicked: {panic_message}"
            ))),
        };

        match outcome {
            Ok(narrowed) => {
                callbacks.fire_validation_layer_complete(&LayerResult::Success {
                    name: descriptor.name.clone(),
                    kind: descriptor.kind,
                });
                candidate = narrowed;
            }
            Err(error) => {
                callbacks.fire_validation_layer_complete(&LayerResult::Failure {
                    name: descriptor.name.clone(),
                    kind: descriptor.kind,
                    error: error.clone(),
                });
                return Err(PipelineFailure::new(descriptor, error));
            }
        }
    }

    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MinLength(usize);

    #[async_trait]
    impl ValidationLayer<String> for MinLength {
        fn name(&self) -> &str {
            "min_length"
        }
        fn description(&self) -> &str {
            "result must meet a minimum length"
        }
        fn kind(&self) -> LayerKind {
            LayerKind::Custom
        }
        async fn validate(&self, candidate: String) -> Result<String, ValidationError> {
            if candidate.len() >= self.0 {
                Ok(candidate)
            } else {
                Err(ValidationError::Custom(format!(
                    "expected at least {} characters, got {}",
                    self.0,
                    candidate.len()
                )))
            }
        }
    }

    struct Uppercase;

    #[async_trait]
    impl ValidationLayer<String> for Uppercase {
        fn name(&self) -> &str {
            "uppercase"
        }
        fn description(&self) -> &str {
            "normalizes to uppercase"
        }
        fn kind(&self) -> LayerKind {
            LayerKind::Custom
        }
        async fn validate(&self, candidate: String) -> Result<String, ValidationError> {
            Ok(candidate.to_uppercase())
        }
    }

    #[tokio::test]
    async fn short_circuits_on_first_failure() {
        let layers: Vec<Arc<dyn ValidationLayer<String>>> =
            vec![Arc::new(MinLength(10)), Arc::new(Uppercase)];
        let callbacks = Callbacks::default();

        let failure = run_pipeline(&layers, "short".to_string(), &callbacks)
            .await
            .expect_err("too short");
        assert_eq!(failure.layer.name, "min_length");
    }

    struct Explodes;

    #[async_trait]
    impl ValidationLayer<String> for Explodes {
        fn name(&self) -> &str {
            "explodes"
        }
        fn description(&self) -> &str {
            "always panics"
        }
        fn kind(&self) -> LayerKind {
            LayerKind::Custom
        }
        async fn validate(&self, _candidate: String) -> Result<String, ValidationError> {
            panic!("layer blew up")
        }
    }

    #[tokio::test]
    async fn panicking_layer_is_caught_as_a_failure() {
        let layers: Vec<Arc<dyn ValidationLayer<String>>> = vec![Arc::new(Explodes)];
        let callbacks = Callbacks::default();

        let failure = run_pipeline(&layers, "anything".to_string(), &callbacks)
            .await
            .expect_err("panic becomes a failure, not an unwind");
        assert_eq!(failure.layer.name, "explodes");
        assert!(failure.formatted.contains("layer blew up"));
    }

    #[tokio::test]
    async fn later_layer_sees_narrowed_value() {
        let layers: Vec<Arc<dyn ValidationLayer<String>>> =
            vec![Arc::new(Uppercase), Arc::new(MinLength(2))];
        let callbacks = Callbacks::default();

        let result = run_pipeline(&layers, "hi".to_string(), &callbacks)
            .await
            .expect("passes");
        assert_eq!(result, "HI");
    }
}
