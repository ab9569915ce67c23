//! Running resolved tool calls.

use std::sync::Arc;

use futures::future;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::arguments::ToolArguments;
use super::set::ToolSet;
use super::tool::{Tool, ToolExecutionContext};
use crate::error::WeaveError;
use crate::telemetry::Tracer;
use crate::types::{ModelMessage, ToolCall, ToolResult};
use crate::util::timeout::with_timeout;

/// Execute one call.
///
/// Tool failures are folded into an error [`ToolResult`]; only an abort is
/// returned as `Err`.
pub async fn execute_tool_call(
    tool: Arc<dyn Tool>,
    call: ToolCall,
    messages: Arc<Vec<ModelMessage>>,
    abort: CancellationToken,
    timeout: Option<std::time::Duration>,
    tracer: &dyn Tracer,
) -> Result<ToolResult, WeaveError> {
    let mut span = tracer.start_span(
        "stepweave.tool_call",
        &[
            ("stepweave.tool_call.name", json!(call.tool_name)),
            ("stepweave.tool_call.id", json!(call.tool_call_id)),
        ],
    );

    let ctx = ToolExecutionContext {
        tool_call_id: call.tool_call_id.clone(),
        tool_name: call.tool_name.clone(),
        messages,
        abort: abort.clone(),
    };
    let args = ToolArguments::new(call.args.clone());

    debug!(tool = %call.tool_name, tool_call_id = %call.tool_call_id, "executing tool");

    let run = async {
        match timeout {
            Some(limit) => with_timeout(limit, tool.execute(&args, &ctx)).await,
            None => tool.execute(&args, &ctx).await,
        }
    };

    let outcome = tokio::select! {
        biased;
        _ = abort.cancelled() => Err(WeaveError::Aborted),
        outcome = run => outcome,
    };

    let result = match outcome {
        Ok(value) => {
            span.set_attribute("stepweave.tool_call.result", value.clone());
            ToolResult {
                tool_call_id: call.tool_call_id,
                tool_name: call.tool_name,
                args: call.args,
                result: value,
                is_error: false,
            }
        }
        Err(e) if e.is_abort() => {
            span.end();
            return Err(e);
        }
        Err(e) => {
            let error = WeaveError::ToolExecution {
                tool_call_id: call.tool_call_id.clone(),
                tool_name: call.tool_name.clone(),
                message: e.to_string(),
            };
            warn!(tool = %call.tool_name, error = %error, "Tool execution failed");
            span.record_error(&error);
            ToolResult {
                tool_call_id: call.tool_call_id,
                tool_name: call.tool_name,
                args: call.args,
                result: json!({ "error": error.to_string() }),
                is_error: true,
            }
        }
    };

    span.end();
    Ok(result)
}

/// Execute every call whose tool runs server-side, concurrently.
///
/// Results keep the order of `calls`. Client-side tools produce no result.
pub async fn execute_tools(
    calls: &[ToolCall],
    tools: &ToolSet,
    messages: Arc<Vec<ModelMessage>>,
    abort: &CancellationToken,
    tracer: &dyn Tracer,
) -> Result<Vec<ToolResult>, WeaveError> {
    let runs = calls.iter().filter_map(|call| {
        let tool = tools.get(&call.tool_name)?;
        if !tool.executes() {
            return None;
        }
        Some(execute_tool_call(
            tool.clone(),
            call.clone(),
            messages.clone(),
            abort.child_token(),
            tools.timeout(),
            tracer,
        ))
    });

    future::join_all(runs).await.into_iter().collect()
}
