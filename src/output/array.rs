use serde_json::{json, Value};

use super::{missing_value, FinalContext, OutputKind, OutputStrategy, PartialInput, PartialOutput};
use crate::error::WeaveError;
use crate::schema::validate_types;

/// Array output, sent to the model as `{"elements": [...]}`.
///
/// While streaming, the last element may still be incomplete, so it is only
/// published once the document parses without repair.
#[derive(Debug, Clone)]
pub struct ArrayOutput {
    element_schema: Value,
}

impl ArrayOutput {
    pub fn new(mut element_schema: Value) -> Self {
        if let Some(object) = element_schema.as_object_mut() {
            object.remove("$schema");
        }
        Self { element_schema }
    }

    fn elements(value: &Value) -> Result<&Vec<Value>, WeaveError> {
        value
            .get("elements")
            .and_then(Value::as_array)
            .ok_or_else(|| WeaveError::TypeValidation {
                value: value.clone(),
                message: "value must be an object that contains an array of elements".into(),
            })
    }
}

impl OutputStrategy for ArrayOutput {
    fn kind(&self) -> OutputKind {
        OutputKind::Array
    }

    fn json_schema(&self) -> Option<Value> {
        Some(json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "properties": {
                "elements": { "type": "array", "items": self.element_schema }
            },
            "required": ["elements"],
            "additionalProperties": false
        }))
    }

    fn validate_partial(&self, input: PartialInput<'_>) -> Result<PartialOutput, WeaveError> {
        let elements = Self::elements(input.value)?;

        let complete = if input.is_final_delta {
            elements.len()
        } else {
            elements.len().saturating_sub(1)
        };
        let mut validated = Vec::with_capacity(complete);
        for element in &elements[..complete] {
            validate_types(element, &self.element_schema)?;
            validated.push(element.clone());
        }

        let published = input
            .latest
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
            .min(validated.len());

        let mut text_delta = String::new();
        if input.is_first_delta {
            text_delta.push('[');
        }
        if published > 0 {
            text_delta.push(',');
        }
        text_delta.push_str(
            &validated[published..]
                .iter()
                .map(Value::to_string)
                .collect::<Vec<_>>()
                .join(","),
        );
        if input.is_final_delta {
            text_delta.push(']');
        }

        Ok(PartialOutput {
            partial: Value::Array(validated),
            text_delta,
        })
    }

    fn validate_final(
        &self,
        value: Option<Value>,
        _context: &FinalContext,
    ) -> Result<Value, WeaveError> {
        let value = value.ok_or_else(missing_value)?;
        let elements = Self::elements(&value)?;
        for element in elements {
            validate_types(element, &self.element_schema)?;
        }
        Ok(Value::Array(elements.clone()))
    }

    fn supports_element_stream(&self) -> bool {
        true
    }
}
