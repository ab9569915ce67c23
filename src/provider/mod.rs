//! Model provider capability consumed by the generation loop.

pub mod middleware;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::WeaveError;
use crate::tools::ToolChoice;
use crate::types::{
    CallWarning, FinishReason, GeneratedFile, GenerationSettings, ModelMessage, ReasoningDetail,
    Source, ToolCallRequest, Usage,
};

pub use middleware::{wrap_provider, CallKind, ProviderMiddleware};

/// Tool definition sent to the provider API.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// What the provider is asked to produce.
#[derive(Debug, Clone, PartialEq)]
pub enum CallMode {
    /// Free text, optionally with tools.
    Regular {
        tools: Vec<ToolDefinition>,
        tool_choice: Option<ToolChoice>,
    },
    /// A JSON document, using the provider's response-format support.
    ObjectJson {
        schema: Option<Value>,
        name: Option<String>,
        description: Option<String>,
    },
    /// A JSON document returned as the arguments of a forced tool call.
    ObjectTool { tool: ToolDefinition },
}

impl Default for CallMode {
    fn default() -> Self {
        CallMode::Regular {
            tools: Vec::new(),
            tool_choice: None,
        }
    }
}

/// A single model call. `messages` already contains the system message.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub messages: Vec<ModelMessage>,
    pub mode: CallMode,
    /// Validated settings; request headers travel in `settings.headers`.
    pub settings: GenerationSettings,
    pub abort: CancellationToken,
}

/// Response metadata reported by the provider. Missing fields are filled in
/// by the loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseInfo {
    pub id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub model_id: Option<String>,
}

/// Result of `do_generate`.
#[derive(Debug, Clone, Default)]
pub struct GenerateResponse {
    pub text: Option<String>,
    pub reasoning: Vec<ReasoningDetail>,
    pub files: Vec<GeneratedFile>,
    pub sources: Vec<Source>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
    pub warnings: Vec<CallWarning>,
    /// Raw request body, for diagnostics.
    pub request: Option<Value>,
    pub response: Option<ResponseInfo>,
}

/// Parts of a provider stream.
#[derive(Debug)]
pub enum ModelStreamPart {
    TextDelta(String),
    Reasoning(String),
    ReasoningSignature(String),
    RedactedReasoning(String),
    Source(Source),
    File(GeneratedFile),
    ToolCallDelta {
        tool_call_id: String,
        tool_name: String,
        args_text_delta: String,
    },
    /// A complete tool call; arguments are raw text.
    ToolCall(ToolCallRequest),
    ResponseMetadata(ResponseInfo),
    Finish {
        finish_reason: FinishReason,
        usage: Usage,
    },
    Error(WeaveError),
}

/// Stream of provider parts. An `Err` item is handled like an `Error` part.
pub type ModelStream = BoxStream<'static, Result<ModelStreamPart, WeaveError>>;

/// Result of `do_stream`.
pub struct StreamResponse {
    pub stream: ModelStream,
    pub warnings: Vec<CallWarning>,
    pub request: Option<Value>,
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("warnings", &self.warnings)
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

/// Core trait implemented by model providers.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name (e.g., "openai", "google").
    fn provider_name(&self) -> &str;
    /// The model ID this provider instance serves.
    fn model_id(&self) -> &str;

    /// Whether `CallMode::ObjectJson` honours a schema natively. When false
    /// the schema is injected into the system prompt instead.
    fn supports_structured_outputs(&self) -> bool {
        false
    }

    /// Generate a complete response.
    async fn do_generate(&self, options: &CallOptions) -> Result<GenerateResponse, WeaveError>;

    /// Generate a streamed response.
    async fn do_stream(&self, options: &CallOptions) -> Result<StreamResponse, WeaveError>;
}
