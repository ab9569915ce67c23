//! Convenience re-exports for common use.

pub use crate::config::WeaveConfig;
pub use crate::error::{Result, SharedError, WeaveError};
pub use crate::generation::{
    generate_object, generate_text, stream_object, stream_text, GenerateObjectOptions,
    GenerateTextOptions, ObjectMode, StreamObjectOptions, StreamTextOptions,
};
pub use crate::output::Output;
pub use crate::prompt::Prompt;
pub use crate::provider::ModelProvider;
pub use crate::stream::{DataStreamOptions, SmoothStream, StreamTransform};
pub use crate::telemetry::{LogTracer, NoopTracer, Tracer};
pub use crate::tools::{AgentTool, Tool, ToolArguments, ToolChoice, ToolParameters, ToolSet};
pub use crate::types::{
    ContentPart, FinishReason, GenerateObjectResult, GenerateTextResult, GenerationSettings,
    ModelMessage, Role, StepResult, StepType, StreamPart, Usage,
};
