//! Resolving and executing tool calls while a provider stream is read.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::WeaveError;
use crate::provider::{ModelStream, ModelStreamPart, ResponseInfo};
use crate::telemetry::Tracer;
use crate::tools::{execute_tool_call, resolve_tool_call, ToolCallRepair, ToolSet};
use crate::types::{FinishReason, ModelMessage, StreamPart, ToolResult, Usage};

/// Output of the tools transformation for one step.
#[derive(Debug)]
pub(crate) enum StepChunk {
    Part(StreamPart),
    Metadata(ResponseInfo),
    /// Sent last, once every tool execution has settled.
    Finish {
        finish_reason: FinishReason,
        usage: Usage,
    },
}

/// What the transformation needs to resolve and run tools.
pub(crate) struct ToolStreamContext {
    pub tools: ToolSet,
    pub repair: Option<Arc<dyn ToolCallRepair>>,
    pub system: Option<String>,
    pub messages: Arc<Vec<ModelMessage>>,
    pub tool_call_streaming: bool,
    pub abort: CancellationToken,
    pub tracer: Arc<dyn Tracer>,
}

enum Event {
    Provider(Option<Result<ModelStreamPart, WeaveError>>),
    Tool(Option<Result<Result<ToolResult, WeaveError>, JoinError>>),
    Aborted,
}

/// Forward content, resolve each tool call as it arrives and start its
/// execution, merge the results back in, and hold the provider's finish
/// until every execution has settled.
pub(crate) fn run_tools_transformation(
    stream: ModelStream,
    ctx: ToolStreamContext,
) -> BoxStream<'static, StepChunk> {
    Box::pin(async_stream::stream! {
        let mut provider = std::pin::pin!(stream);
        let mut running: JoinSet<Result<ToolResult, WeaveError>> = JoinSet::new();
        let mut streaming_calls: HashSet<String> = HashSet::new();
        let mut finish: Option<(FinishReason, Usage)> = None;
        let mut provider_done = false;
        let timeout: Option<Duration> = ctx.tools.timeout();

        loop {
            if provider_done && running.is_empty() {
                break;
            }

            let event = tokio::select! {
                biased;
                _ = ctx.abort.cancelled() => Event::Aborted,
                part = provider.next(), if !provider_done => Event::Provider(part),
                done = running.join_next(), if !running.is_empty() => Event::Tool(done),
            };

            match event {
                Event::Aborted => {
                    running.abort_all();
                    yield StepChunk::Part(StreamPart::Error(Arc::new(WeaveError::Aborted)));
                    return;
                }
                Event::Provider(None) => provider_done = true,
                Event::Provider(Some(Err(e))) | Event::Provider(Some(Ok(ModelStreamPart::Error(e)))) => {
                    yield StepChunk::Part(StreamPart::Error(Arc::new(e)));
                }
                Event::Provider(Some(Ok(part))) => match part {
                    ModelStreamPart::TextDelta(text) => yield StepChunk::Part(StreamPart::TextDelta(text)),
                    ModelStreamPart::Reasoning(text) => yield StepChunk::Part(StreamPart::Reasoning(text)),
                    ModelStreamPart::ReasoningSignature(signature) => {
                        yield StepChunk::Part(StreamPart::ReasoningSignature(signature));
                    }
                    ModelStreamPart::RedactedReasoning(data) => {
                        yield StepChunk::Part(StreamPart::RedactedReasoning(data));
                    }
                    ModelStreamPart::Source(source) => yield StepChunk::Part(StreamPart::Source(source)),
                    ModelStreamPart::File(file) => yield StepChunk::Part(StreamPart::File(file)),
                    ModelStreamPart::ResponseMetadata(info) => yield StepChunk::Metadata(info),
                    ModelStreamPart::Finish { finish_reason, usage } => finish = Some((finish_reason, usage)),
                    ModelStreamPart::ToolCallDelta { tool_call_id, tool_name, args_text_delta } => {
                        if !ctx.tool_call_streaming {
                            continue;
                        }
                        if streaming_calls.insert(tool_call_id.clone()) {
                            yield StepChunk::Part(StreamPart::ToolCallStreamingStart {
                                tool_call_id: tool_call_id.clone(),
                                tool_name: tool_name.clone(),
                            });
                        }
                        yield StepChunk::Part(StreamPart::ToolCallDelta {
                            tool_call_id,
                            tool_name,
                            args_text_delta,
                        });
                    }
                    ModelStreamPart::ToolCall(request) => {
                        let resolved = resolve_tool_call(
                            &request,
                            &ctx.tools,
                            ctx.repair.as_deref(),
                            ctx.system.as_deref(),
                            &ctx.messages,
                        )
                        .await;
                        let call = match resolved {
                            Ok(call) => call,
                            Err(e) => {
                                yield StepChunk::Part(StreamPart::Error(Arc::new(e)));
                                continue;
                            }
                        };
                        yield StepChunk::Part(StreamPart::ToolCall(call.clone()));

                        let Some(tool) = ctx.tools.get(&call.tool_name).filter(|t| t.executes()).cloned() else {
                            continue;
                        };
                        debug!(tool = %call.tool_name, tool_call_id = %call.tool_call_id, "spawning tool execution");
                        let messages = ctx.messages.clone();
                        let abort = ctx.abort.child_token();
                        let tracer = ctx.tracer.clone();
                        running.spawn(async move {
                            execute_tool_call(tool, call, messages, abort, timeout, tracer.as_ref()).await
                        });
                    }
                    ModelStreamPart::Error(_) => {}
                },
                Event::Tool(None) => {}
                Event::Tool(Some(Ok(Ok(result)))) => yield StepChunk::Part(StreamPart::ToolResult(result)),
                Event::Tool(Some(Ok(Err(e)))) => yield StepChunk::Part(StreamPart::Error(Arc::new(e))),
                Event::Tool(Some(Err(e))) => {
                    yield StepChunk::Part(StreamPart::Error(Arc::new(WeaveError::Stream(format!(
                        "tool task failed: {e}"
                    )))));
                }
            }
        }

        if let Some((finish_reason, usage)) = finish {
            yield StepChunk::Finish { finish_reason, usage };
        }
    })
}
