//! Generation result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use super::generation::{CallWarning, FinishReason};
use super::message::{ModelMessage, ToolCall, ToolResult};
use super::stream::{GeneratedFile, Source};
use super::usage::Usage;

/// How a step came to be issued.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StepType {
    Initial,
    Continue,
    ToolResult,
    Done,
}

/// Reasoning emitted by the model during a step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ReasoningDetail {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    Redacted {
        data: String,
    },
}

/// Response metadata for a model call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub model_id: String,
    /// Messages produced so far in the run, this step included.
    #[serde(default)]
    pub messages: Vec<ModelMessage>,
}

/// A single generation step (one model call plus its tool executions).
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub step_type: StepType,
    /// Text generated in this step.
    pub text: String,
    pub reasoning: Option<String>,
    pub reasoning_details: Vec<ReasoningDetail>,
    pub files: Vec<GeneratedFile>,
    pub sources: Vec<Source>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
    pub warnings: Vec<CallWarning>,
    /// Raw request body, when the provider reports one.
    pub request: Option<serde_json::Value>,
    pub response: ResponseMetadata,
    /// Whether the next step continues this step's text.
    pub is_continued: bool,
}

/// Result of a text generation call.
#[derive(Debug, Clone)]
pub struct GenerateTextResult {
    /// Final generated text.
    pub text: String,
    pub reasoning: Option<String>,
    pub reasoning_details: Vec<ReasoningDetail>,
    pub files: Vec<GeneratedFile>,
    /// Sources from every step.
    pub sources: Vec<Source>,
    /// Tool calls of the last step.
    pub tool_calls: Vec<ToolCall>,
    /// Tool results of the last step.
    pub tool_results: Vec<ToolResult>,
    pub finish_reason: FinishReason,
    /// Aggregated usage across all steps.
    pub usage: Usage,
    pub warnings: Vec<CallWarning>,
    pub steps: Vec<StepResult>,
    pub response: ResponseMetadata,
}

/// Result of a structured object generation call.
#[derive(Debug, Clone)]
pub struct GenerateObjectResult {
    pub object: serde_json::Value,
    /// Raw text the object was parsed from.
    pub raw_text: String,
    pub finish_reason: FinishReason,
    pub usage: Usage,
    pub warnings: Vec<CallWarning>,
    pub request: Option<serde_json::Value>,
    pub response: ResponseMetadata,
}

impl GenerateObjectResult {
    /// Deserialize the object into a typed value.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, crate::error::WeaveError> {
        Ok(serde_json::from_value(self.object.clone())?)
    }
}

/// Join the text parts of reasoning details, `None` when there are none.
pub fn reasoning_text(details: &[ReasoningDetail]) -> Option<String> {
    let text: String = details
        .iter()
        .filter_map(|detail| match detail {
            ReasoningDetail::Text { text, .. } => Some(text.as_str()),
            ReasoningDetail::Redacted { .. } => None,
        })
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
