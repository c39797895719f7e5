//! Error types for the configuration engine.

use super::option::OptionType;

/// Errors raised while declaring, loading, or changing configuration options.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A value does not satisfy the declared type (or allowed values) of an option.
    /// The previous value of the option is retained.
    #[error("Option '{path}' expects {expected}, received {received}")]
    OptionType {
        path: String,
        expected: String,
        received: String,
    },
    /// A source or a caller referenced an option that was never declared.
    #[error("Unknown option '{0}'")]
    UnknownOption(String),
    /// Structural change attempted after the engine was locked, or an
    /// inconsistent declaration (duplicate names, invalid names).
    #[error("Invalid config structure: {0}")]
    Structure(String),
    /// Attaching a namespace would make it its own ancestor.
    #[error("Namespace '{namespace}' cannot be attached under '{parent}': it would create a cycle")]
    NamespaceCycle { namespace: String, parent: String },
    /// A source failed to produce its values (I/O, parse, async factory rejection).
    #[error("Failed to read config source '{source_name}': {message}")]
    Source {
        source_name: String,
        message: String,
    },
    /// The argument source was asked for `--help`; carries the rendered help.
    #[error("{0}")]
    DisplayHelp(String),
}

impl ConfigError {
    pub(crate) fn type_mismatch(
        path: impl Into<String>,
        expected: &OptionType,
        received: &serde_json::Value,
    ) -> Self {
        ConfigError::OptionType {
            path: path.into(),
            expected: format!("a value of type {expected}"),
            received: describe_value(received),
        }
    }

    pub(crate) fn source(source_name: impl Into<String>, message: impl ToString) -> Self {
        ConfigError::Source {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    /// Whether the error must abort startup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConfigError::NamespaceCycle { .. } | ConfigError::Structure(_)
        )
    }
}

/// Short human description of a JSON value used in error messages.
pub(crate) fn describe_value(value: &serde_json::Value) -> String {
    use serde_json::Value;
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("boolean {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("string \"{s}\""),
        Value::Array(_) => "an array".to_string(),
        Value::Object(_) => "an object".to_string(),
    }
}
