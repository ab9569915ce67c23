//! Shared test helpers and a scriptable mock provider.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use stepweave::config::WeaveConfig;
use stepweave::error::WeaveError;
use stepweave::provider::{
    CallOptions, GenerateResponse, ModelProvider, ModelStreamPart, StreamResponse,
};
use stepweave::types::*;

/// Scripted outcome of one `do_stream` call.
pub enum ScriptedStream {
    /// Emit the parts, then end.
    Parts(Vec<ModelStreamPart>),
    /// Emit the parts, then never end.
    Hang(Vec<ModelStreamPart>),
    /// Fail to open the stream.
    Fail(WeaveError),
}

/// A provider that replays queued responses and records every call.
pub struct MockProvider {
    model_id: String,
    structured_outputs: bool,
    generate: Mutex<VecDeque<Result<GenerateResponse, WeaveError>>>,
    streams: Mutex<VecDeque<ScriptedStream>>,
    calls: Mutex<Vec<CallOptions>>,
}

impl MockProvider {
    pub fn new(model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            structured_outputs: false,
            generate: Mutex::new(VecDeque::new()),
            streams: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_structured_outputs(mut self) -> Self {
        self.structured_outputs = true;
        self
    }

    pub fn push_generate(&self, response: GenerateResponse) {
        self.generate.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_generate_error(&self, error: WeaveError) {
        self.generate.lock().unwrap().push_back(Err(error));
    }

    pub fn push_stream(&self, parts: Vec<ModelStreamPart>) {
        self.streams
            .lock()
            .unwrap()
            .push_back(ScriptedStream::Parts(parts));
    }

    pub fn push_hanging_stream(&self, parts: Vec<ModelStreamPart>) {
        self.streams
            .lock()
            .unwrap()
            .push_back(ScriptedStream::Hang(parts));
    }

    pub fn push_stream_error(&self, error: WeaveError) {
        self.streams
            .lock()
            .unwrap()
            .push_back(ScriptedStream::Fail(error));
    }

    pub fn calls(&self) -> Vec<CallOptions> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn provider_name(&self) -> &str {
        "mock"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn supports_structured_outputs(&self) -> bool {
        self.structured_outputs
    }

    async fn do_generate(&self, options: &CallOptions) -> Result<GenerateResponse, WeaveError> {
        self.calls.lock().unwrap().push(options.clone());
        self.generate
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(WeaveError::InvalidState("no scripted response".into())))
    }

    async fn do_stream(&self, options: &CallOptions) -> Result<StreamResponse, WeaveError> {
        self.calls.lock().unwrap().push(options.clone());
        let scripted = self.streams.lock().unwrap().pop_front();
        let stream = match scripted {
            Some(ScriptedStream::Parts(parts)) => stream::iter(parts.into_iter().map(Ok)).boxed(),
            Some(ScriptedStream::Hang(parts)) => stream::iter(parts.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed(),
            Some(ScriptedStream::Fail(error)) => return Err(error),
            None => return Err(WeaveError::InvalidState("no scripted stream".into())),
        };
        Ok(StreamResponse {
            stream,
            warnings: Vec::new(),
            request: None,
        })
    }
}

pub fn mock() -> Arc<MockProvider> {
    Arc::new(MockProvider::new("mock-model"))
}

/// Config with library defaults, unaffected by the environment.
pub fn config() -> WeaveConfig {
    WeaveConfig::default()
}

pub fn text_response(text: &str, finish_reason: FinishReason, usage: Usage) -> GenerateResponse {
    GenerateResponse {
        text: Some(text.to_string()),
        finish_reason,
        usage,
        ..Default::default()
    }
}

pub fn tool_call_response(calls: Vec<ToolCallRequest>) -> GenerateResponse {
    GenerateResponse {
        tool_calls: calls,
        finish_reason: FinishReason::ToolCalls,
        usage: Usage::new(10, 5),
        ..Default::default()
    }
}

/// Provider parts for a text answer split into `deltas`.
pub fn text_parts(deltas: &[&str], finish_reason: FinishReason, usage: Usage) -> Vec<ModelStreamPart> {
    let mut parts: Vec<ModelStreamPart> = deltas
        .iter()
        .map(|d| ModelStreamPart::TextDelta(d.to_string()))
        .collect();
    parts.push(ModelStreamPart::Finish {
        finish_reason,
        usage,
    });
    parts
}

/// Short labels for asserting the shape of a full stream.
pub fn label(part: &StreamPart) -> String {
    match part {
        StreamPart::TextDelta(t) => format!("text:{t}"),
        StreamPart::Reasoning(t) => format!("reasoning:{t}"),
        StreamPart::ToolCall(c) => format!("call:{}", c.tool_name),
        StreamPart::ToolResult(r) => format!("result:{}", r.tool_name),
        StreamPart::ToolCallStreamingStart { tool_name, .. } => format!("start:{tool_name}"),
        StreamPart::ToolCallDelta { args_text_delta, .. } => format!("delta:{args_text_delta}"),
        StreamPart::StepStart { .. } => "step-start".into(),
        StreamPart::StepFinish { finish_reason, .. } => format!("step-finish:{finish_reason}"),
        StreamPart::Finish { finish_reason, .. } => format!("finish:{finish_reason}"),
        StreamPart::Error(e) => format!("error:{e}"),
        _ => "other".into(),
    }
}
