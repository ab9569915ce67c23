use serde_json::Value;

use super::{missing_value, FinalContext, OutputKind, OutputStrategy, PartialInput, PartialOutput};
use crate::error::WeaveError;
use crate::schema::validate_types;

/// Object output. Partials are forwarded unchecked so fields can arrive
/// one at a time; the final value must match the schema.
#[derive(Debug, Clone)]
pub struct ObjectOutput {
    schema: Value,
}

impl ObjectOutput {
    pub fn new(schema: Value) -> Self {
        Self { schema }
    }
}

impl OutputStrategy for ObjectOutput {
    fn kind(&self) -> OutputKind {
        OutputKind::Object
    }

    fn json_schema(&self) -> Option<Value> {
        Some(self.schema.clone())
    }

    fn validate_partial(&self, input: PartialInput<'_>) -> Result<PartialOutput, WeaveError> {
        Ok(PartialOutput {
            partial: input.value.clone(),
            text_delta: input.text_delta.to_string(),
        })
    }

    fn validate_final(
        &self,
        value: Option<Value>,
        _context: &FinalContext,
    ) -> Result<Value, WeaveError> {
        let value = value.ok_or_else(missing_value)?;
        validate_types(&value, &self.schema)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strategy() -> ObjectOutput {
        ObjectOutput::new(json!({
            "type": "object",
            "properties": { "a": { "type": "number" }, "b": { "type": "string" } },
            "required": ["a", "b"]
        }))
    }

    #[test]
    fn partial_is_not_schema_checked() {
        let value = json!({ "a": 1 });

        let out = strategy()
            .validate_partial(PartialInput {
                value: &value,
                text_delta: "{\"a\": 1",
                latest: None,
                is_first_delta: true,
                is_final_delta: false,
            })
            .unwrap();

        assert_eq!(out.partial, value);
        assert_eq!(out.text_delta, "{\"a\": 1");
    }

    #[test]
    fn final_must_match_schema() {
        let ctx = FinalContext::default();

        assert!(strategy()
            .validate_final(Some(json!({ "a": 1, "b": "x" })), &ctx)
            .is_ok());
        assert!(matches!(
            strategy().validate_final(Some(json!({ "a": 1 })), &ctx),
            Err(WeaveError::TypeValidation { .. })
        ));
        assert!(strategy().validate_final(None, &ctx).is_err());
    }
}
