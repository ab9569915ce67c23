//! Streaming text generation with a multi-step tool loop.
//!
//! Each step's parts are sent into a stitched stream. Transforms run over
//! the stitched stream; a pump task records the transformed parts into a
//! replay log and settles the run's deferred values when the log closes.

use std::sync::Arc;

use bon::Builder;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::recorder::{run_deferreds, Recorder, RunDeferreds, StepContent};
use super::step::{
    append_to_last_message, next_step_type, regular_mode, response_metadata,
    split_on_last_whitespace, to_response_messages, StepOutcome,
};
use super::text::{LoopLimits, StepCallback};
use super::tool_stream::{run_tools_transformation, StepChunk, ToolStreamContext};
use crate::config::WeaveConfig;
use crate::error::{SharedError, WeaveError};
use crate::prompt::{standardize_prompt, Prompt, StandardizedPrompt};
use crate::provider::{CallMode, CallOptions, ModelProvider, ResponseInfo, StreamResponse};
use crate::stream::{
    apply_transforms, stitchable_stream, to_data_stream, DataStreamOptions, ReplayLog,
    StitchHandle, StreamTransform, TransformContext,
};
use crate::telemetry::{resolve_tracer, Tracer};
use crate::tools::{ToolCallRepair, ToolChoice, ToolSet};
use crate::types::{
    CallWarning, FinishReason, GeneratedFile, GenerationSettings, ModelMessage, ReasoningDetail,
    ResponseMetadata, Source, StepResult, StepType, StreamPart, ToolCall, ToolResult, Usage,
};
use crate::util::deferred::{deferred, Deferred};
use crate::util::id::message_id;
use crate::util::retry::RetryPolicy;

/// Options for [`stream_text`]. Unset limits fall back to [`WeaveConfig`].
#[derive(Clone, Builder)]
pub struct StreamTextOptions {
    pub model: Arc<dyn ModelProvider>,
    #[builder(into)]
    pub prompt: Prompt,
    #[builder(default)]
    pub settings: GenerationSettings,
    #[builder(default)]
    pub tools: ToolSet,
    pub tool_choice: Option<ToolChoice>,
    pub active_tools: Option<Vec<String>>,
    pub max_steps: Option<u32>,
    pub continue_steps: Option<bool>,
    pub max_retries: Option<u32>,
    /// Forward partial tool-call arguments as they stream in.
    pub tool_call_streaming: Option<bool>,
    pub repair_tool_call: Option<Arc<dyn ToolCallRepair>>,
    pub on_step_finish: Option<StepCallback>,
    /// Applied in order over the stitched full stream.
    #[builder(default)]
    pub transforms: Vec<Arc<dyn StreamTransform>>,
    #[builder(default)]
    pub abort: CancellationToken,
    pub tracer: Option<Arc<dyn Tracer>>,
    pub config: Option<WeaveConfig>,
}

/// Start streaming text.
///
/// Arguments are validated before anything is spawned; the run itself
/// proceeds in the background and is observed through the returned
/// [`StreamTextResult`]. Must be called inside a Tokio runtime.
pub fn stream_text(options: StreamTextOptions) -> Result<StreamTextResult, WeaveError> {
    let limits = LoopLimits::resolve(
        options.config.as_ref(),
        options.max_steps,
        options.continue_steps,
        options.max_retries,
    )?;
    let settings = options.settings.validate()?;
    let prompt = standardize_prompt(&options.prompt)?;
    let config = match options.config.as_ref() {
        Some(config) => config,
        None => WeaveConfig::global(),
    };
    let tool_call_streaming = options
        .tool_call_streaming
        .unwrap_or(config.tool_call_streaming);
    let data_stream_options = DataStreamOptions::from(config);

    let (stitch, stitched) = stitchable_stream::<StreamPart>();
    let ctx = TransformContext::new(stitch.clone());
    let mut output = apply_transforms(stitched, &options.transforms, &ctx);

    let (resolvers, deferreds) = run_deferreds();
    let mut recorder = Recorder::new(
        resolvers,
        limits.max_steps,
        limits.continue_steps,
        options.on_step_finish.clone(),
    );
    let log = ReplayLog::new();
    let (done_tx, done) = deferred::<()>();

    let pump_log = log.clone();
    tokio::spawn(async move {
        while let Some(part) = output.next().await {
            recorder.record(&part);
            pump_log.push(part);
        }
        recorder.finish();
        pump_log.close();
        done_tx.resolve(());
    });

    let run = StreamRun {
        mode: regular_mode(
            &options.tools,
            options.tool_choice.as_ref(),
            options.active_tools.as_deref(),
        ),
        model: options.model,
        prompt,
        settings,
        tools: options.tools,
        repair: options.repair_tool_call,
        limits,
        tool_call_streaming,
        abort: options.abort,
        tracer: resolve_tracer(options.tracer),
    };
    tokio::spawn(run.drive(stitch));

    Ok(StreamTextResult {
        log,
        done,
        deferreds,
        data_stream_options,
    })
}

/// Handle to a running [`stream_text`] call.
///
/// Streams can be taken any number of times; each replays the run from
/// its first part. The async accessors resolve once the run finishes and
/// fail with the run's error if it never did.
pub struct StreamTextResult {
    log: ReplayLog<StreamPart>,
    done: Deferred<()>,
    deferreds: RunDeferreds,
    data_stream_options: DataStreamOptions,
}

impl std::fmt::Debug for StreamTextResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTextResult")
            .field("closed", &self.log.is_closed())
            .finish_non_exhaustive()
    }
}

impl StreamTextResult {
    /// Every part of the run, after transforms.
    pub fn full_stream(&self) -> BoxStream<'static, StreamPart> {
        self.log.subscribe()
    }

    /// Text deltas only.
    pub fn text_stream(&self) -> BoxStream<'static, String> {
        Box::pin(self.log.subscribe().filter_map(|part| {
            futures::future::ready(match part {
                StreamPart::TextDelta(text) => Some(text),
                _ => None,
            })
        }))
    }

    /// The full stream encoded as data stream protocol lines.
    ///
    /// Uses the options derived from the run's config; see
    /// [`StreamTextResult::to_data_stream_with`] to override them.
    pub fn to_data_stream(&self) -> BoxStream<'static, String> {
        to_data_stream(self.log.subscribe(), self.data_stream_options.clone())
    }

    pub fn to_data_stream_with(&self, options: DataStreamOptions) -> BoxStream<'static, String> {
        to_data_stream(self.log.subscribe(), options)
    }

    /// Wait for the run to finish without reading its parts.
    pub async fn consume_stream(&self) {
        let _ = self.done.get().await;
    }

    /// Text of every step, concatenated.
    pub async fn text(&self) -> Result<String, SharedError> {
        self.deferreds.text.get().await
    }

    /// Usage summed over every step.
    pub async fn usage(&self) -> Result<Usage, SharedError> {
        self.deferreds.usage.get().await
    }

    pub async fn finish_reason(&self) -> Result<FinishReason, SharedError> {
        self.deferreds.finish_reason.get().await
    }

    pub async fn steps(&self) -> Result<Vec<StepResult>, SharedError> {
        self.deferreds.steps.get().await
    }

    /// Tool calls of the last step.
    pub async fn tool_calls(&self) -> Result<Vec<ToolCall>, SharedError> {
        self.deferreds.tool_calls.get().await
    }

    /// Tool results of the last step.
    pub async fn tool_results(&self) -> Result<Vec<ToolResult>, SharedError> {
        self.deferreds.tool_results.get().await
    }

    pub async fn reasoning(&self) -> Result<Option<String>, SharedError> {
        self.deferreds.reasoning.get().await
    }

    pub async fn reasoning_details(&self) -> Result<Vec<ReasoningDetail>, SharedError> {
        self.deferreds.reasoning_details.get().await
    }

    /// Sources of every step.
    pub async fn sources(&self) -> Result<Vec<Source>, SharedError> {
        self.deferreds.sources.get().await
    }

    pub async fn files(&self) -> Result<Vec<GeneratedFile>, SharedError> {
        self.deferreds.files.get().await
    }

    pub async fn response(&self) -> Result<ResponseMetadata, SharedError> {
        self.deferreds.response.get().await
    }

    pub async fn warnings(&self) -> Result<Vec<CallWarning>, SharedError> {
        self.deferreds.warnings.get().await
    }

    pub async fn request(&self) -> Result<Option<Value>, SharedError> {
        self.deferreds.request.get().await
    }
}

struct StreamRun {
    model: Arc<dyn ModelProvider>,
    prompt: StandardizedPrompt,
    settings: GenerationSettings,
    mode: CallMode,
    tools: ToolSet,
    repair: Option<Arc<dyn ToolCallRepair>>,
    limits: LoopLimits,
    tool_call_streaming: bool,
    abort: CancellationToken,
    tracer: Arc<dyn Tracer>,
}

/// Text publishing state of one step when continuation is enabled.
struct TextBuffer {
    pending: String,
    in_whitespace_prefix: bool,
    published: bool,
    ends_in_whitespace: bool,
}

impl TextBuffer {
    fn new() -> Self {
        Self {
            pending: String::new(),
            in_whitespace_prefix: true,
            published: false,
            ends_in_whitespace: false,
        }
    }

    fn note_published(&mut self, text: &str) {
        self.published = true;
        self.ends_in_whitespace = text.trim_end() != text;
    }
}

impl StreamRun {
    async fn drive(self, stitch: StitchHandle<StreamPart>) {
        let mut span = self.tracer.start_span(
            "stepweave.stream_text",
            &[
                ("stepweave.model.provider", json!(self.model.provider_name())),
                ("stepweave.model.id", json!(self.model.model_id())),
                ("stepweave.settings.max_steps", json!(self.limits.max_steps)),
            ],
        );

        match self.run_steps(&stitch).await {
            Ok(()) => {}
            Err(e) => {
                span.record_error(&e);
                debug!(error = %e, "stream_text: run failed");
                let failure = futures::stream::iter([StreamPart::Error(Arc::new(e))]);
                if stitch.add_stream(Box::pin(failure)).is_err() {
                    debug!("stream_text: output already closed");
                }
            }
        }
        stitch.close();
        span.end();
    }

    async fn run_steps(&self, stitch: &StitchHandle<StreamPart>) -> Result<(), WeaveError> {
        let mut response_messages: Vec<ModelMessage> = Vec::new();
        let mut usage = Usage::default();
        let mut step_type = StepType::Initial;
        let mut completed_steps: u32 = 0;
        let mut step_message_id = message_id();
        let mut has_leading_whitespace = false;

        loop {
            let step_input: Vec<ModelMessage> = self
                .prompt
                .messages
                .iter()
                .chain(&response_messages)
                .cloned()
                .collect();
            let mut messages = Vec::with_capacity(step_input.len() + 1);
            if let Some(system) = &self.prompt.system {
                messages.push(ModelMessage::system(system));
            }
            messages.extend(step_input.iter().cloned());
            let call = CallOptions {
                messages,
                mode: self.mode.clone(),
                settings: self.settings.clone(),
                abort: self.abort.clone(),
            };

            debug!(step = completed_steps, step_type = %step_type, "stream_text: calling provider");
            let mut step_span = self.tracer.start_span(
                "stepweave.stream_text.do_stream",
                &[("stepweave.model.id", json!(self.model.model_id()))],
            );
            let response = match open_stream(self.model.as_ref(), &call, &self.limits.retry).await {
                Ok(response) => response,
                Err(e) => {
                    step_span.record_error(&e);
                    step_span.end();
                    return Err(e);
                }
            };

            let (tx, rx) = mpsc::unbounded_channel::<StreamPart>();
            stitch.add_stream(Box::pin(UnboundedReceiverStream::new(rx)))?;
            let send = |part: StreamPart| {
                if tx.send(part).is_err() {
                    debug!("stream_text: output dropped a part");
                }
            };

            let StreamResponse {
                stream,
                warnings,
                request,
            } = response;
            let mut chunks = run_tools_transformation(
                stream,
                ToolStreamContext {
                    tools: self.tools.clone(),
                    repair: self.repair.clone(),
                    system: self.prompt.system.clone(),
                    messages: Arc::new(step_input),
                    tool_call_streaming: self.tool_call_streaming,
                    abort: self.abort.clone(),
                    tracer: self.tracer.clone(),
                },
            );

            let mut content = StepContent::default();
            let mut buffer = TextBuffer::new();
            let mut started = false;
            let mut info = ResponseInfo::default();
            let mut finish: Option<(FinishReason, Usage)> = None;
            let mut saw_error = false;

            loop {
                let chunk = tokio::select! {
                    biased;
                    _ = tx.closed() => {
                        debug!("stream_text: output closed, stopping run");
                        step_span.end();
                        return Ok(());
                    }
                    chunk = chunks.next() => chunk,
                };
                let Some(chunk) = chunk else {
                    break;
                };
                if !started {
                    started = true;
                    send(StreamPart::StepStart {
                        message_id: step_message_id.clone(),
                        warnings: warnings.clone(),
                    });
                }

                let part = match chunk {
                    StepChunk::Metadata(update) => {
                        info.id = update.id.or(info.id);
                        info.timestamp = update.timestamp.or(info.timestamp);
                        info.model_id = update.model_id.or(info.model_id);
                        continue;
                    }
                    StepChunk::Finish {
                        finish_reason,
                        usage,
                    } => {
                        finish = Some((finish_reason, usage));
                        continue;
                    }
                    StepChunk::Part(part) => part,
                };

                match part {
                    StreamPart::TextDelta(text) => {
                        if text.is_empty() {
                            continue;
                        }
                        if !self.limits.continue_steps {
                            buffer.note_published(&text);
                            content.text.push_str(&text);
                            send(StreamPart::TextDelta(text));
                            continue;
                        }

                        let trimmed = if buffer.in_whitespace_prefix && has_leading_whitespace {
                            text.trim_start()
                        } else {
                            text.as_str()
                        };
                        if trimmed.is_empty() {
                            continue;
                        }
                        buffer.in_whitespace_prefix = false;
                        buffer.pending.push_str(trimmed);

                        let split = split_on_last_whitespace(&buffer.pending)
                            .map(|(prefix, whitespace, suffix)| {
                                (format!("{prefix}{whitespace}"), suffix.to_string())
                            });
                        if let Some((publish, rest)) = split {
                            buffer.pending = rest;
                            buffer.note_published(&publish);
                            content.text.push_str(&publish);
                            send(StreamPart::TextDelta(publish));
                        }
                    }
                    StreamPart::Error(error) => {
                        saw_error = true;
                        send(StreamPart::Error(error));
                    }
                    part => match content.record(&part) {
                        Ok(()) => send(part),
                        Err(e) => {
                            saw_error = true;
                            send(StreamPart::Error(Arc::new(e)));
                        }
                    },
                }
            }

            if self.abort.is_cancelled() {
                step_span.record_error(&WeaveError::Aborted);
                step_span.end();
                return Ok(());
            }

            if !started {
                send(StreamPart::StepStart {
                    message_id: step_message_id.clone(),
                    warnings: warnings.clone(),
                });
            }

            completed_steps += 1;
            let (finish_reason, step_usage) = finish.unwrap_or_else(|| {
                let reason = if saw_error {
                    FinishReason::Error
                } else {
                    FinishReason::Unknown
                };
                (reason, Usage::default())
            });
            let next = next_step_type(StepOutcome {
                completed_steps,
                max_steps: self.limits.max_steps,
                continue_steps: self.limits.continue_steps,
                finish_reason,
                tool_calls: content.tool_calls.len(),
                tool_results: content.tool_results.len(),
            });

            let flush = !buffer.pending.is_empty()
                && (next != StepType::Continue
                    || (step_type == StepType::Continue && !buffer.published));
            if flush {
                let rest = std::mem::take(&mut buffer.pending);
                buffer.note_published(&rest);
                content.text.push_str(&rest);
                send(StreamPart::TextDelta(rest));
            }

            let mut next_messages = response_messages.clone();
            if step_type == StepType::Continue {
                append_to_last_message(&mut next_messages, &content.text);
            } else {
                next_messages.extend(to_response_messages(
                    &content.text,
                    &content.files,
                    &content.reasoning,
                    &content.tool_calls,
                    &content.tool_results,
                    step_message_id.clone(),
                ));
            }

            let mut metadata = response_metadata(Some(&info), self.model.as_ref());
            metadata.messages = next_messages.clone();

            send(StreamPart::StepFinish {
                finish_reason,
                usage: step_usage,
                is_continued: next == StepType::Continue,
                message_id: step_message_id.clone(),
                request,
                response: metadata.clone(),
                warnings,
            });
            usage += step_usage;

            step_span.set_attribute(
                "stepweave.response.finish_reason",
                json!(finish_reason.to_string()),
            );
            step_span.set_attribute("stepweave.usage.prompt_tokens", json!(step_usage.prompt_tokens));
            step_span.set_attribute(
                "stepweave.usage.completion_tokens",
                json!(step_usage.completion_tokens),
            );
            step_span.end();
            debug!(step = completed_steps - 1, next = %next, "stream_text: step finished");

            if next == StepType::Done {
                send(StreamPart::Finish {
                    finish_reason,
                    usage,
                    response: metadata,
                });
                return Ok(());
            }

            if next != StepType::Continue {
                step_message_id = message_id();
            }
            response_messages = next_messages;
            has_leading_whitespace = buffer.ends_in_whitespace;
            step_type = next;
        }
    }
}

/// Open one provider stream under the retry policy, raced against the abort token.
async fn open_stream(
    model: &dyn ModelProvider,
    call: &CallOptions,
    retry: &RetryPolicy,
) -> Result<StreamResponse, WeaveError> {
    retry
        .execute(&call.abort, move || async move {
            let outcome = tokio::select! {
                biased;
                _ = call.abort.cancelled() => Err(WeaveError::Aborted),
                outcome = model.do_stream(call) => outcome,
            };
            if let Err(e) = &outcome {
                warn!(error = %e, "stream_text: provider stream failed to open");
            }
            outcome
        })
        .await
}
