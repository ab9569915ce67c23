use serde_json::Value;

use super::{FinalContext, OutputKind, OutputStrategy, PartialInput, PartialOutput};
use crate::error::WeaveError;

/// Any JSON value, unvalidated.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSchemaOutput;

impl OutputStrategy for NoSchemaOutput {
    fn kind(&self) -> OutputKind {
        OutputKind::NoSchema
    }

    fn json_schema(&self) -> Option<Value> {
        None
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
        context: &FinalContext,
    ) -> Result<Value, WeaveError> {
        value.ok_or_else(|| WeaveError::NoObjectGenerated {
            message: "No object generated: response did not match schema.".into(),
            text: Some(context.text.clone()),
            usage: Some(context.usage),
            finish_reason: context.finish_reason,
            cause: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn any_value_passes() {
        let out = NoSchemaOutput
            .validate_final(Some(json!([1, "two"])), &FinalContext::default())
            .unwrap();

        assert_eq!(out, json!([1, "two"]));
    }

    #[test]
    fn missing_value_is_no_object() {
        let ctx = FinalContext {
            text: "not json".into(),
            ..Default::default()
        };

        let err = NoSchemaOutput.validate_final(None, &ctx).unwrap_err();

        match err {
            WeaveError::NoObjectGenerated { text, .. } => assert_eq!(text.as_deref(), Some("not json")),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
