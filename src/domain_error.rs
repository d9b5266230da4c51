//! Structured domain errors raised by tool handlers and schema-typed validation
//! layers, plus the markdown formatter that turns them into model-facing text.

use crate::error::{ErrorCategory, ErrorSeverity};

/// One structured domain error, independent of any particular tool or layer.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainErrorCode {
    MissingComponent { component: String },
    NotArray { path: String, found: String },
    InvalidAccessor { accessor: String },
    FieldRequired { field: String },
}

impl DomainErrorCode {
    fn name(&self) -> &'static str {
        match self {
            DomainErrorCode::MissingComponent { .. } => "MISSING_COMPONENT",
            DomainErrorCode::NotArray { .. } => "NOT_ARRAY",
            DomainErrorCode::InvalidAccessor { .. } => "INVALID_ACCESSOR",
            DomainErrorCode::FieldRequired { .. } => "FIELD_REQUIRED",
        }
    }

    fn message(&self) -> String {
        match self {
            DomainErrorCode::MissingComponent { component } => {
                format!("component '{component}' is missing")
            }
            DomainErrorCode::NotArray { path, found } => {
                format!("expected an array at '{path}', found {found}")
            }
            DomainErrorCode::InvalidAccessor { accessor } => {
                format!("'{accessor}' is not a valid accessor")
            }
            DomainErrorCode::FieldRequired { field } => {
                format!("field '{field}' is required")
            }
        }
    }

    /// The field name this error relates to, if any — used to compute a
    /// "did you mean" suggestion against the set of known fields.
    fn field_hint(&self) -> Option<&str> {
        match self {
            DomainErrorCode::InvalidAccessor { accessor } => Some(accessor),
            DomainErrorCode::FieldRequired { field } => Some(field),
            _ => None,
        }
    }
}

/// A single domain error, grouped by severity when formatted.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainError {
    pub code: DomainErrorCode,
    pub severity: ErrorSeverity,
    pub category: ErrorCategory,
}

impl DomainError {
    pub fn new(code: DomainErrorCode, severity: ErrorSeverity, category: ErrorCategory) -> Self {
        Self {
            code,
            severity,
            category,
        }
    }
}

/// The minimum Jaro-Winkler similarity a known field must reach before it is
/// suggested as a "did you mean" correction.
const SUGGESTION_THRESHOLD: f64 = 0.75;

/// Renders a set of domain errors to markdown for model consumption: grouped
/// by severity (fatal first), one bullet per error, with an optional
/// "did you mean '<field>'?" suggestion computed by edit-distance similarity
/// against `known_fields`.
pub fn format_errors_markdown(errors: &[DomainError], known_fields: &[String]) -> String {
    if errors.is_empty() {
        return String::new();
    }

    let mut sections = String::new();
    for severity in [ErrorSeverity::Fatal, ErrorSeverity::Error, ErrorSeverity::Warning] {
        let group: Vec<&DomainError> = errors.iter().filter(|e| e.severity == severity).collect();
        if group.is_empty() {
            continue;
        }

        sections.push_str(&format!("**{}**\n", severity_heading(severity)));
        for error in group {
            let mut line = format!("- `{}`: {}", error.code.name(), error.code.message());
            if let Some(field) = error.code.field_hint() {
                if let Some(suggestion) = suggest_field(field, known_fields) {
                    line.push_str(&format!(" (did you mean `{suggestion}`?)"));
                }
            }
            sections.push_str(&line);
            sections.push('\n');
        }
        sections.push('\n');
    }

    sections.trim_end().to_string()
}

fn severity_heading(severity: ErrorSeverity) -> &'static str {
    match severity {
        ErrorSeverity::Fatal => "Fatal",
        ErrorSeverity::Error => "Errors",
        ErrorSeverity::Warning => "Warnings",
    }
}

fn suggest_field<'a>(field: &str, known_fields: &'a [String]) -> Option<&'a str> {
    known_fields
        .iter()
        .map(|candidate| (candidate.as_str(), strsim::jaro_winkler(field, candidate)))
        .filter(|(candidate, score)| *candidate != field && *score >= SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.1.partial_cmp(&b.1).expect("similarity is never NaN"))
        .map(|(candidate, _)| candidate)
}
