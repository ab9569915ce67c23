//! Rebuilding step results from a full stream and settling the deferred
//! values of a streamed run.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use super::step::{next_step_type, StepOutcome};
use super::text::StepCallback;
use crate::error::{SharedError, WeaveError};
use crate::types::{
    reasoning_text, CallWarning, FinishReason, GeneratedFile, ReasoningDetail, ResponseMetadata,
    Source, StepResult, StepType, StreamPart, ToolCall, ToolResult, Usage,
};
use crate::util::deferred::{deferred, Deferred, Resolver};

/// Content collected for one step.
#[derive(Debug, Default)]
pub(crate) struct StepContent {
    pub text: String,
    pub reasoning: Vec<ReasoningDetail>,
    active_reasoning: Option<usize>,
    pub files: Vec<GeneratedFile>,
    pub sources: Vec<Source>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
}

impl StepContent {
    /// Fold one part into the step.
    pub fn record(&mut self, part: &StreamPart) -> Result<(), WeaveError> {
        match part {
            StreamPart::TextDelta(text) => self.text.push_str(text),
            StreamPart::Reasoning(delta) => match self.active_reasoning {
                Some(index) => {
                    if let Some(ReasoningDetail::Text { text, .. }) = self.reasoning.get_mut(index) {
                        text.push_str(delta);
                    }
                }
                None => {
                    self.reasoning.push(ReasoningDetail::Text {
                        text: delta.clone(),
                        signature: None,
                    });
                    self.active_reasoning = Some(self.reasoning.len() - 1);
                }
            },
            StreamPart::ReasoningSignature(value) => {
                let Some(index) = self.active_reasoning.take() else {
                    return Err(WeaveError::InvalidStreamPart(
                        "reasoning-signature without reasoning".into(),
                    ));
                };
                if let Some(ReasoningDetail::Text { signature, .. }) = self.reasoning.get_mut(index) {
                    *signature = Some(value.clone());
                }
            }
            StreamPart::RedactedReasoning(data) => {
                self.reasoning.push(ReasoningDetail::Redacted { data: data.clone() });
            }
            StreamPart::File(file) => self.files.push(file.clone()),
            StreamPart::Source(source) => self.sources.push(source.clone()),
            StreamPart::ToolCall(call) => self.tool_calls.push(call.clone()),
            StreamPart::ToolResult(result) => self.tool_results.push(result.clone()),
            _ => {}
        }
        Ok(())
    }
}

/// Write sides of every deferred value of a streamed run.
pub(crate) struct RunResolvers {
    pub text: Resolver<String>,
    pub usage: Resolver<Usage>,
    pub finish_reason: Resolver<FinishReason>,
    pub steps: Resolver<Vec<StepResult>>,
    pub tool_calls: Resolver<Vec<ToolCall>>,
    pub tool_results: Resolver<Vec<ToolResult>>,
    pub reasoning: Resolver<Option<String>>,
    pub reasoning_details: Resolver<Vec<ReasoningDetail>>,
    pub sources: Resolver<Vec<Source>>,
    pub files: Resolver<Vec<GeneratedFile>>,
    pub response: Resolver<ResponseMetadata>,
    pub warnings: Resolver<Vec<CallWarning>>,
    pub request: Resolver<Option<Value>>,
}

/// Read sides matching [`RunResolvers`].
#[derive(Clone)]
pub(crate) struct RunDeferreds {
    pub text: Deferred<String>,
    pub usage: Deferred<Usage>,
    pub finish_reason: Deferred<FinishReason>,
    pub steps: Deferred<Vec<StepResult>>,
    pub tool_calls: Deferred<Vec<ToolCall>>,
    pub tool_results: Deferred<Vec<ToolResult>>,
    pub reasoning: Deferred<Option<String>>,
    pub reasoning_details: Deferred<Vec<ReasoningDetail>>,
    pub sources: Deferred<Vec<Source>>,
    pub files: Deferred<Vec<GeneratedFile>>,
    pub response: Deferred<ResponseMetadata>,
    pub warnings: Deferred<Vec<CallWarning>>,
    pub request: Deferred<Option<Value>>,
}

pub(crate) fn run_deferreds() -> (RunResolvers, RunDeferreds) {
    let (text, text_rx) = deferred();
    let (usage, usage_rx) = deferred();
    let (finish_reason, finish_reason_rx) = deferred();
    let (steps, steps_rx) = deferred();
    let (tool_calls, tool_calls_rx) = deferred();
    let (tool_results, tool_results_rx) = deferred();
    let (reasoning, reasoning_rx) = deferred();
    let (reasoning_details, reasoning_details_rx) = deferred();
    let (sources, sources_rx) = deferred();
    let (files, files_rx) = deferred();
    let (response, response_rx) = deferred();
    let (warnings, warnings_rx) = deferred();
    let (request, request_rx) = deferred();
    (
        RunResolvers {
            text,
            usage,
            finish_reason,
            steps,
            tool_calls,
            tool_results,
            reasoning,
            reasoning_details,
            sources,
            files,
            response,
            warnings,
            request,
        },
        RunDeferreds {
            text: text_rx,
            usage: usage_rx,
            finish_reason: finish_reason_rx,
            steps: steps_rx,
            tool_calls: tool_calls_rx,
            tool_results: tool_results_rx,
            reasoning: reasoning_rx,
            reasoning_details: reasoning_details_rx,
            sources: sources_rx,
            files: files_rx,
            response: response_rx,
            warnings: warnings_rx,
            request: request_rx,
        },
    )
}

impl RunResolvers {
    fn reject_all(&self, error: SharedError) {
        self.text.reject(error.clone());
        self.usage.reject(error.clone());
        self.finish_reason.reject(error.clone());
        self.steps.reject(error.clone());
        self.tool_calls.reject(error.clone());
        self.tool_results.reject(error.clone());
        self.reasoning.reject(error.clone());
        self.reasoning_details.reject(error.clone());
        self.sources.reject(error.clone());
        self.files.reject(error.clone());
        self.response.reject(error.clone());
        self.warnings.reject(error.clone());
        self.request.reject(error);
    }
}

/// Observes the full stream and settles the run's deferred values at its end.
pub(crate) struct Recorder {
    resolvers: RunResolvers,
    max_steps: u32,
    continue_steps: bool,
    on_step_finish: Option<StepCallback>,
    step_type: StepType,
    step: StepContent,
    full_text: String,
    sources: Vec<Source>,
    steps: Vec<StepResult>,
    finish: Option<(FinishReason, Usage, ResponseMetadata)>,
    last_error: Option<SharedError>,
}

impl Recorder {
    pub fn new(
        resolvers: RunResolvers,
        max_steps: u32,
        continue_steps: bool,
        on_step_finish: Option<StepCallback>,
    ) -> Self {
        Self {
            resolvers,
            max_steps,
            continue_steps,
            on_step_finish,
            step_type: StepType::Initial,
            step: StepContent::default(),
            full_text: String::new(),
            sources: Vec::new(),
            steps: Vec::new(),
            finish: None,
            last_error: None,
        }
    }

    pub fn record(&mut self, part: &StreamPart) {
        match part {
            StreamPart::TextDelta(text) => self.full_text.push_str(text),
            StreamPart::Source(source) => self.sources.push(source.clone()),
            StreamPart::Error(error) => self.last_error = Some(error.clone()),
            StreamPart::StepFinish {
                finish_reason,
                usage,
                is_continued,
                request,
                response,
                warnings,
                ..
            } => {
                self.finish_step(*finish_reason, *usage, *is_continued, request, response, warnings);
                return;
            }
            StreamPart::Finish {
                finish_reason,
                usage,
                response,
            } => {
                self.finish = Some((*finish_reason, *usage, response.clone()));
                return;
            }
            _ => {}
        }
        if let Err(e) = self.step.record(part) {
            warn!(error = %e, "dropping malformed stream part");
        }
    }

    fn finish_step(
        &mut self,
        finish_reason: FinishReason,
        usage: Usage,
        is_continued: bool,
        request: &Option<Value>,
        response: &ResponseMetadata,
        warnings: &[CallWarning],
    ) {
        let content = std::mem::take(&mut self.step);
        let next = next_step_type(StepOutcome {
            completed_steps: self.steps.len() as u32 + 1,
            max_steps: self.max_steps,
            continue_steps: self.continue_steps,
            finish_reason,
            tool_calls: content.tool_calls.len(),
            tool_results: content.tool_results.len(),
        });

        let step = StepResult {
            step_type: self.step_type,
            text: content.text,
            reasoning: reasoning_text(&content.reasoning),
            reasoning_details: content.reasoning,
            files: content.files,
            sources: content.sources,
            tool_calls: content.tool_calls,
            tool_results: content.tool_results,
            finish_reason,
            usage,
            warnings: warnings.to_vec(),
            request: request.clone(),
            response: response.clone(),
            is_continued,
        };

        if let Some(callback) = &self.on_step_finish {
            if let Err(e) = callback(&step) {
                warn!(step = self.steps.len(), error = %e, "step callback failed");
            }
        }
        self.steps.push(step);
        if next != StepType::Done {
            self.step_type = next;
        }
    }

    /// Settle every deferred value. Runs that never reached `Finish` reject
    /// with the last error seen.
    pub fn finish(self) {
        let (Some((finish_reason, usage, _)), Some(last)) = (self.finish, self.steps.last().cloned())
        else {
            let error = self.last_error.unwrap_or_else(|| {
                Arc::new(WeaveError::InvalidState(
                    "stream ended before the run finished".into(),
                ))
            });
            self.resolvers.reject_all(error);
            return;
        };

        let r = &self.resolvers;
        r.text.resolve(self.full_text);
        r.usage.resolve(usage);
        r.finish_reason.resolve(finish_reason);
        r.tool_calls.resolve(last.tool_calls);
        r.tool_results.resolve(last.tool_results);
        r.reasoning.resolve(last.reasoning);
        r.reasoning_details.resolve(last.reasoning_details);
        r.sources.resolve(self.sources);
        r.files.resolve(last.files);
        r.response.resolve(last.response);
        r.warnings.resolve(last.warnings);
        r.request.resolve(last.request);
        r.steps.resolve(self.steps);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn metadata() -> ResponseMetadata {
        ResponseMetadata {
            id: "r1".into(),
            timestamp: Utc::now(),
            model_id: "mock".into(),
            messages: Vec::new(),
        }
    }

    #[test]
    fn signature_attaches_to_open_reasoning() {
        let mut step = StepContent::default();
        step.record(&StreamPart::Reasoning("a".into())).unwrap();
        step.record(&StreamPart::Reasoning("b".into())).unwrap();
        step.record(&StreamPart::ReasoningSignature("sig".into())).unwrap();
        step.record(&StreamPart::Reasoning("c".into())).unwrap();

        assert_eq!(
            step.reasoning,
            vec![
                ReasoningDetail::Text {
                    text: "ab".into(),
                    signature: Some("sig".into())
                },
                ReasoningDetail::Text {
                    text: "c".into(),
                    signature: None
                },
            ]
        );
    }

    #[test]
    fn signature_without_reasoning_is_rejected() {
        let mut step = StepContent::default();

        let err = step
            .record(&StreamPart::ReasoningSignature("sig".into()))
            .unwrap_err();

        assert!(matches!(err, WeaveError::InvalidStreamPart(_)));
    }

    #[tokio::test]
    async fn resolves_from_finished_run() {
        let (resolvers, deferreds) = run_deferreds();
        let mut recorder = Recorder::new(resolvers, 1, false, None);

        for part in [
            StreamPart::StepStart {
                message_id: "m1".into(),
                warnings: vec![],
            },
            StreamPart::TextDelta("Hello".into()),
            StreamPart::StepFinish {
                finish_reason: FinishReason::Stop,
                usage: Usage::new(1, 2),
                is_continued: false,
                message_id: "m1".into(),
                request: None,
                response: metadata(),
                warnings: vec![],
            },
            StreamPart::Finish {
                finish_reason: FinishReason::Stop,
                usage: Usage::new(1, 2),
                response: metadata(),
            },
        ] {
            recorder.record(&part);
        }
        recorder.finish();

        assert_eq!(deferreds.text.get().await.unwrap(), "Hello");
        assert_eq!(deferreds.usage.get().await.unwrap(), Usage::new(1, 2));
        assert_eq!(deferreds.steps.get().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unfinished_run_rejects_with_last_error() {
        let (resolvers, deferreds) = run_deferreds();
        let mut recorder = Recorder::new(resolvers, 1, false, None);

        recorder.record(&StreamPart::Error(Arc::new(WeaveError::api(500, "boom"))));
        recorder.finish();

        let err = deferreds.text.get().await.unwrap_err();
        assert!(matches!(*err, WeaveError::Api { status: 500, .. }));
        assert!(deferreds.finish_reason.get().await.is_err());
    }
}
