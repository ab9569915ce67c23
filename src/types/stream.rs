//! Events emitted on the caller-facing full stream.

use serde::{Deserialize, Serialize};

use super::generation::{CallWarning, FinishReason};
use super::message::{ToolCall, ToolResult};
use super::results::ResponseMetadata;
use super::usage::Usage;
use crate::error::SharedError;

/// A source document cited by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub source_type: String,
    pub id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// A file produced by the model, base64 encoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedFile {
    pub data: String,
    pub mime_type: String,
}

/// One event of a stitched multi-step stream.
///
/// Within a step the order is fixed: `StepStart`, content parts, then a
/// single `StepFinish`. The terminal step is followed by one `Finish`.
#[derive(Debug, Clone)]
pub enum StreamPart {
    TextDelta(String),
    Reasoning(String),
    ReasoningSignature(String),
    RedactedReasoning(String),
    Source(Source),
    File(GeneratedFile),
    ToolCallStreamingStart {
        tool_call_id: String,
        tool_name: String,
    },
    ToolCallDelta {
        tool_call_id: String,
        tool_name: String,
        args_text_delta: String,
    },
    ToolCall(ToolCall),
    ToolResult(ToolResult),
    StepStart {
        message_id: String,
        warnings: Vec<CallWarning>,
    },
    StepFinish {
        finish_reason: FinishReason,
        usage: Usage,
        is_continued: bool,
        message_id: String,
        /// Raw request body, when the provider reports one.
        request: Option<serde_json::Value>,
        response: ResponseMetadata,
        warnings: Vec<CallWarning>,
    },
    Finish {
        finish_reason: FinishReason,
        usage: Usage,
        response: ResponseMetadata,
    },
    Error(SharedError),
}

impl StreamPart {
    /// Text carried by a text delta, if any.
    pub fn text_delta(&self) -> Option<&str> {
        match self {
            StreamPart::TextDelta(text) => Some(text),
            _ => None,
        }
    }
}
