//! Turning model-proposed tool calls into validated calls.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::set::ToolSet;
use crate::error::WeaveError;
use crate::schema::validate_value;
use crate::types::{ModelMessage, ToolCall, ToolCallRequest};

/// Input handed to a [`ToolCallRepair`] hook.
pub struct ToolCallRepairRequest<'a> {
    pub tool_call: &'a ToolCallRequest,
    pub tools: &'a ToolSet,
    pub system: Option<&'a str>,
    pub messages: &'a [ModelMessage],
    /// The `NoSuchTool` or `InvalidToolArguments` error that triggered repair.
    pub error: &'a WeaveError,
}

impl ToolCallRepairRequest<'_> {
    /// Parameter schema of a registered tool.
    pub fn parameters_schema(&self, tool_name: &str) -> Option<&Value> {
        self.tools.get(tool_name).map(|t| &t.parameters().schema)
    }
}

/// Hook that gets one chance to fix a tool call that failed to resolve.
#[async_trait]
pub trait ToolCallRepair: Send + Sync {
    /// Return a replacement call, or `None` to give up.
    async fn repair(
        &self,
        request: ToolCallRepairRequest<'_>,
    ) -> Result<Option<ToolCallRequest>, WeaveError>;
}

/// Validate a tool call against the registry, repairing it once if possible.
pub async fn resolve_tool_call(
    call: &ToolCallRequest,
    tools: &ToolSet,
    repair: Option<&dyn ToolCallRepair>,
    system: Option<&str>,
    messages: &[ModelMessage],
) -> Result<ToolCall, WeaveError> {
    let error = match parse_tool_call(call, tools) {
        Ok(resolved) => return Ok(resolved),
        Err(e) => e,
    };

    let Some(repair) = repair else {
        return Err(error);
    };
    if !matches!(
        error,
        WeaveError::NoSuchTool { .. } | WeaveError::InvalidToolArguments { .. }
    ) {
        return Err(error);
    }

    debug!(tool = %call.tool_name, error = %error, "attempting tool call repair");

    let repaired = repair
        .repair(ToolCallRepairRequest {
            tool_call: call,
            tools,
            system,
            messages,
            error: &error,
        })
        .await;

    match repaired {
        Ok(None) => Err(error),
        // Only failures of the hook itself are wrapped.
        Ok(Some(fixed)) => parse_tool_call(&fixed, tools),
        Err(cause) => Err(WeaveError::ToolCallRepair {
            original: Box::new(error),
            cause: Box::new(cause),
        }),
    }
}

/// Validate a call without repair. Blank arguments are read as `{}`.
pub fn parse_tool_call(call: &ToolCallRequest, tools: &ToolSet) -> Result<ToolCall, WeaveError> {
    let Some(tool) = tools.get(&call.tool_name) else {
        return Err(WeaveError::NoSuchTool {
            tool_name: call.tool_name.clone(),
            available_tools: tools.names(),
        });
    };

    let invalid = |message: String| WeaveError::InvalidToolArguments {
        tool_name: call.tool_name.clone(),
        tool_args: call.args.clone(),
        message,
    };

    let args = if call.args.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(&call.args).map_err(|e| invalid(format!("JSON parsing failed: {e}")))?
    };

    validate_value(&args, &tool.parameters().schema).map_err(invalid)?;

    Ok(ToolCall {
        tool_call_id: call.tool_call_id.clone(),
        tool_name: call.tool_name.clone(),
        args,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{AgentTool, ToolParameters};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tools() -> ToolSet {
        ToolSet::new()
            .with(AgentTool::client_side(
                "weather",
                "Get the weather",
                ToolParameters::object().string("city", "City", true).build(),
            ))
            .with(AgentTool::client_side("now", "Current time", ToolParameters::empty()))
    }

    struct RenameTo(&'static str, AtomicUsize);

    #[async_trait]
    impl ToolCallRepair for RenameTo {
        async fn repair(
            &self,
            request: ToolCallRepairRequest<'_>,
        ) -> Result<Option<ToolCallRequest>, WeaveError> {
            self.1.fetch_add(1, Ordering::SeqCst);
            assert!(request.parameters_schema(self.0).is_some());
            let mut fixed = request.tool_call.clone();
            fixed.tool_name = self.0.to_string();
            Ok(Some(fixed))
        }
    }

    struct GiveUp;

    #[async_trait]
    impl ToolCallRepair for GiveUp {
        async fn repair(
            &self,
            _request: ToolCallRepairRequest<'_>,
        ) -> Result<Option<ToolCallRequest>, WeaveError> {
            Ok(None)
        }
    }

    struct Broken;

    #[async_trait]
    impl ToolCallRepair for Broken {
        async fn repair(
            &self,
            _request: ToolCallRepairRequest<'_>,
        ) -> Result<Option<ToolCallRequest>, WeaveError> {
            Err(WeaveError::Stream("repair model unavailable".into()))
        }
    }

    #[test]
    fn empty_arguments_become_empty_object() {
        let call = ToolCallRequest::new("c1", "now", "  ");

        let resolved = parse_tool_call(&call, &tools()).unwrap();

        assert_eq!(resolved.args, json!({}));
    }

    #[test]
    fn unknown_tool_lists_available_tools() {
        let call = ToolCallRequest::new("c1", "stocks", "{}");

        let err = parse_tool_call(&call, &tools()).unwrap_err();

        assert_eq!(
            err.to_string(),
            "Model tried to call unavailable tool 'stocks'. Available tools: weather, now."
        );
    }

    #[test]
    fn schema_violation_is_invalid_arguments() {
        let call = ToolCallRequest::new("c1", "weather", r#"{"city": 5}"#);

        let err = parse_tool_call(&call, &tools()).unwrap_err();

        assert!(matches!(err, WeaveError::InvalidToolArguments { ref tool_name, .. } if tool_name == "weather"));
    }

    #[test]
    fn malformed_json_is_invalid_arguments() {
        let call = ToolCallRequest::new("c1", "weather", r#"{"city": "#);

        let err = parse_tool_call(&call, &tools()).unwrap_err();

        assert!(err.to_string().starts_with("Invalid arguments for tool weather:"));
    }

    #[tokio::test]
    async fn valid_call_does_not_invoke_repair() {
        let hook = RenameTo("now", AtomicUsize::new(0));
        let call = ToolCallRequest::new("c1", "now", "{}");

        let resolved = resolve_tool_call(&call, &tools(), Some(&hook), None, &[])
            .await
            .unwrap();

        assert_eq!(resolved.tool_name, "now");
        assert_eq!(hook.1.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn repair_fixes_unknown_tool_name() {
        let hook = RenameTo("now", AtomicUsize::new(0));
        let call = ToolCallRequest::new("c1", "clock", "{}");

        let resolved = resolve_tool_call(&call, &tools(), Some(&hook), None, &[])
            .await
            .unwrap();

        assert_eq!(resolved.tool_name, "now");
        assert_eq!(hook.1.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repair_returning_none_rethrows_original() {
        let call = ToolCallRequest::new("c1", "clock", "{}");

        let err = resolve_tool_call(&call, &tools(), Some(&GiveUp), None, &[])
            .await
            .unwrap_err();

        assert!(matches!(err, WeaveError::NoSuchTool { .. }));
    }

    #[tokio::test]
    async fn failing_hook_wraps_both_errors() {
        let call = ToolCallRequest::new("c1", "clock", "{}");

        let err = resolve_tool_call(&call, &tools(), Some(&Broken), None, &[])
            .await
            .unwrap_err();

        match err {
            WeaveError::ToolCallRepair { original, cause } => {
                assert!(matches!(*original, WeaveError::NoSuchTool { .. }));
                assert!(matches!(*cause, WeaveError::Stream(_)));
            }
            other => panic!("expected repair error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn repaired_call_that_still_fails_returns_the_validation_error() {
        let hook = RenameTo("weather", AtomicUsize::new(0));
        let call = ToolCallRequest::new("c1", "forecast", "{}");

        let err = resolve_tool_call(&call, &tools(), Some(&hook), None, &[])
            .await
            .unwrap_err();

        assert!(matches!(err, WeaveError::InvalidToolArguments { ref tool_name, .. } if tool_name == "weather"));
        assert_eq!(hook.1.load(Ordering::SeqCst), 1);
    }
}
