//! Output strategies for structured generation.
//!
//! A strategy is picked once per call from [`Output`] and owns every
//! format-specific decision: the schema sent to the model, partial
//! validation while streaming, and final validation.

pub mod array;
pub mod enumeration;
pub mod no_schema;
pub mod object;

use std::sync::Arc;

use serde_json::Value;

use crate::error::WeaveError;
use crate::types::{FinishReason, Usage};

pub use array::ArrayOutput;
pub use enumeration::EnumOutput;
pub use no_schema::NoSchemaOutput;
pub use object::ObjectOutput;

/// Requested output shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// An object matching `schema`.
    Object { schema: Value },
    /// An array whose elements match `element_schema`.
    Array { element_schema: Value },
    /// One of `values`.
    Enum { values: Vec<String> },
    /// Any JSON value.
    NoSchema,
}

impl Output {
    pub fn object(schema: Value) -> Self {
        Output::Object { schema }
    }

    pub fn array(element_schema: Value) -> Self {
        Output::Array { element_schema }
    }

    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Output::Enum {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Build the strategy for this output.
    pub fn strategy(&self) -> Result<Arc<dyn OutputStrategy>, WeaveError> {
        Ok(match self {
            Output::Object { schema } => Arc::new(ObjectOutput::new(schema.clone())),
            Output::Array { element_schema } => Arc::new(ArrayOutput::new(element_schema.clone())),
            Output::Enum { values } => {
                if values.is_empty() {
                    return Err(WeaveError::invalid_argument(
                        "enum",
                        "Enum values are required for enum output.",
                    ));
                }
                Arc::new(EnumOutput::new(values.clone()))
            }
            Output::NoSchema => Arc::new(NoSchemaOutput),
        })
    }
}

/// Strategy discriminant, used in spans and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum OutputKind {
    Object,
    Array,
    Enum,
    NoSchema,
}

/// One partial-validation request during streaming.
#[derive(Debug, Clone, Copy)]
pub struct PartialInput<'a> {
    /// Latest parsed (possibly repaired) document.
    pub value: &'a Value,
    /// Raw text received since the last published partial.
    pub text_delta: &'a str,
    /// Last published partial, if any.
    pub latest: Option<&'a Value>,
    pub is_first_delta: bool,
    /// The document parsed without repair.
    pub is_final_delta: bool,
}

/// A validated partial plus the text to publish alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialOutput {
    pub partial: Value,
    pub text_delta: String,
}

/// What the model produced, for error reporting during final validation.
#[derive(Debug, Clone, Default)]
pub struct FinalContext {
    pub text: String,
    pub usage: Usage,
    pub finish_reason: Option<FinishReason>,
}

pub trait OutputStrategy: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> OutputKind;

    /// Schema sent to the model; `None` for no-schema output.
    fn json_schema(&self) -> Option<Value>;

    fn validate_partial(&self, input: PartialInput<'_>) -> Result<PartialOutput, WeaveError>;

    /// Validate the complete document. `value` is `None` when nothing parsed.
    fn validate_final(&self, value: Option<Value>, context: &FinalContext)
        -> Result<Value, WeaveError>;

    /// Whether partial objects can be split into an element stream.
    fn supports_element_stream(&self) -> bool {
        false
    }
}

const SCHEMA_PREFIX: &str = "JSON schema:";
const SCHEMA_SUFFIX: &str = "You MUST answer with a JSON object that matches the JSON schema above.";
const GENERIC_SUFFIX: &str = "You MUST answer with JSON.";

/// Append JSON answering instructions to a system prompt.
pub fn inject_json_instruction(prompt: Option<&str>, schema: Option<&Value>) -> String {
    let mut lines: Vec<String> = Vec::new();
    if let Some(prompt) = prompt.filter(|p| !p.is_empty()) {
        lines.push(prompt.to_string());
        lines.push(String::new());
    }
    match schema {
        Some(schema) => {
            lines.push(SCHEMA_PREFIX.to_string());
            lines.push(schema.to_string());
            lines.push(SCHEMA_SUFFIX.to_string());
        }
        None => lines.push(GENERIC_SUFFIX.to_string()),
    }
    lines.join("\n")
}

/// Wrap an `undefined` value in a type-validation error.
pub(crate) fn missing_value() -> WeaveError {
    WeaveError::TypeValidation {
        value: Value::Null,
        message: "value is undefined".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn instruction_with_prompt_and_schema() {
        let schema = json!({ "type": "object" });

        let text = inject_json_instruction(Some("You are terse."), Some(&schema));

        assert_eq!(
            text,
            "You are terse.\n\nJSON schema:\n{\"type\":\"object\"}\nYou MUST answer with a JSON object that matches the JSON schema above."
        );
    }

    #[test]
    fn instruction_without_schema() {
        assert_eq!(inject_json_instruction(None, None), "You MUST answer with JSON.");
        assert_eq!(inject_json_instruction(Some(""), None), "You MUST answer with JSON.");
    }

    #[test]
    fn empty_enum_is_rejected() {
        let err = Output::enumeration(Vec::<String>::new()).strategy().unwrap_err();

        assert!(matches!(err, WeaveError::InvalidArgument { .. }));
    }
}
