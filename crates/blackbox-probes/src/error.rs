//! Error types for the probes protocol

use thiserror::Error;

/// Errors that can occur while validating, publishing or merging probes
#[derive(Error, Debug)]
pub enum ProbesError {
    /// A probe or module failed structural validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// The static probes document is not valid structured data
    #[error("Failed to parse probes file: {0}")]
    ConfigParse(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Topology fields are unusable for building an identifier
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    /// The exporter URL cannot be used to route probes
    #[error("Invalid external url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The relation store refused a read or write
    #[error("Relation error: {0}")]
    Relation(String),
}

/// Result type for probes operations
pub type Result<T> = std::result::Result<T, ProbesError>;

impl ProbesError {
    /// Whether the error originates from user-supplied configuration
    /// rather than from the relation channel
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ProbesError::Validation(_)
                | ProbesError::ConfigParse(_)
                | ProbesError::InvalidUrl { .. }
        )
    }
}

impl From<validator::ValidationErrors> for ProbesError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ProbesError::Validation(describe_validation_errors(&errors))
    }
}

/// Flatten nested validator errors into `field: message` pairs
pub(crate) fn describe_validation_errors(errors: &validator::ValidationErrors) -> String {
    let mut messages = Vec::new();
    collect_messages("", errors, &mut messages);
    messages.sort();
    messages.join("; ")
}

fn collect_messages(prefix: &str, errors: &validator::ValidationErrors, out: &mut Vec<String>) {
    use validator::ValidationErrorsKind;

    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", prefix, field)
        };
        match kind {
            ValidationErrorsKind::Field(errs) => {
                for e in errs {
                    let message = e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string());
                    out.push(format!("{}: {}", path, message));
                }
            }
            ValidationErrorsKind::Struct(inner) => collect_messages(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect_messages(&format!("{}[{}]", path, index), inner, out);
                }
            }
        }
    }
}
