use serde_json::{json, Value};

use super::{missing_value, FinalContext, OutputKind, OutputStrategy, PartialInput, PartialOutput};
use crate::error::WeaveError;

/// One string out of a fixed set, wrapped as `{"result": ...}` for the model.
#[derive(Debug, Clone)]
pub struct EnumOutput {
    values: Vec<String>,
}

impl EnumOutput {
    pub fn new(values: Vec<String>) -> Self {
        Self { values }
    }
}

impl OutputStrategy for EnumOutput {
    fn kind(&self) -> OutputKind {
        OutputKind::Enum
    }

    fn json_schema(&self) -> Option<Value> {
        Some(json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "properties": {
                "result": { "type": "string", "enum": self.values }
            },
            "required": ["result"],
            "additionalProperties": false
        }))
    }

    fn validate_partial(&self, _input: PartialInput<'_>) -> Result<PartialOutput, WeaveError> {
        Err(WeaveError::UnsupportedFunctionality(
            "partial results in enum mode".into(),
        ))
    }

    fn validate_final(
        &self,
        value: Option<Value>,
        _context: &FinalContext,
    ) -> Result<Value, WeaveError> {
        let value = value.ok_or_else(missing_value)?;
        let Some(result) = value.get("result").and_then(Value::as_str) else {
            return Err(WeaveError::TypeValidation {
                value: value.clone(),
                message: r#"value must be an object that contains a string in the "result" property."#
                    .into(),
            });
        };
        if !self.values.iter().any(|v| v == result) {
            return Err(WeaveError::TypeValidation {
                value: value.clone(),
                message: "value must be a string in the enum".into(),
            });
        }
        Ok(Value::String(result.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy() -> EnumOutput {
        EnumOutput::new(vec!["sunny".into(), "rainy".into()])
    }

    #[test]
    fn unwraps_result() {
        let out = strategy()
            .validate_final(Some(json!({ "result": "rainy" })), &FinalContext::default())
            .unwrap();

        assert_eq!(out, json!("rainy"));
    }

    #[test]
    fn rejects_values_outside_enum() {
        let err = strategy()
            .validate_final(Some(json!({ "result": "snowy" })), &FinalContext::default())
            .unwrap_err();

        assert!(err.to_string().contains("value must be a string in the enum"));
    }

    #[test]
    fn partials_are_unsupported() {
        let value = json!({});
        let err = strategy()
            .validate_partial(PartialInput {
                value: &value,
                text_delta: "",
                latest: None,
                is_first_delta: true,
                is_final_delta: false,
            })
            .unwrap_err();

        assert!(matches!(err, WeaveError::UnsupportedFunctionality(_)));
    }
}
