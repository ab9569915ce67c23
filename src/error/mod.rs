//! Error types for stepweave.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion, RetryReason};

use std::sync::Arc;

use thiserror::Error;

use crate::types::{FinishReason, Usage};

/// Primary error type for all stepweave operations.
#[derive(Error, Debug)]
pub enum WeaveError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error (status {status}): {message}")]
    Api {
        status: u16,
        message: String,
        /// Provider-supplied retry hint; overrides the status-based default.
        retryable: Option<bool>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid argument for parameter {parameter}: {message}")]
    InvalidArgument { parameter: String, message: String },

    #[error("Invalid prompt: {0}")]
    InvalidPrompt(String),

    #[error("Message conversion error: {0}")]
    MessageConversion(String),

    #[error("The operation was aborted")]
    Aborted,

    #[error("{message}")]
    RetryExhausted {
        reason: RetryReason,
        message: String,
        errors: Vec<WeaveError>,
    },

    #[error("{}", no_such_tool_message(.tool_name, .available_tools))]
    NoSuchTool {
        tool_name: String,
        available_tools: Vec<String>,
    },

    #[error("Invalid arguments for tool {tool_name}: {message}")]
    InvalidToolArguments {
        tool_name: String,
        tool_args: String,
        message: String,
    },

    #[error("Error repairing tool call: {cause}")]
    ToolCallRepair {
        original: Box<WeaveError>,
        cause: Box<WeaveError>,
    },

    #[error("Error executing tool {tool_name}: {message}")]
    ToolExecution {
        tool_call_id: String,
        tool_name: String,
        message: String,
    },

    #[error("{message}")]
    NoObjectGenerated {
        message: String,
        text: Option<String>,
        usage: Option<Usage>,
        finish_reason: Option<FinishReason>,
        #[source]
        cause: Option<Box<WeaveError>>,
    },

    #[error("Type validation failed: {message}")]
    TypeValidation {
        value: serde_json::Value,
        message: String,
    },

    #[error("'{0}' functionality not supported")]
    UnsupportedFunctionality(String),

    #[error("Invalid stream part: {0}")]
    InvalidStreamPart(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// An error observed by more than one reader (deferred values, stream events).
    #[error(transparent)]
    Shared(SharedError),
}

/// Error handle that can be handed to several readers.
pub type SharedError = Arc<WeaveError>;

fn no_such_tool_message(tool_name: &str, available: &[String]) -> String {
    if available.is_empty() {
        format!("Model tried to call unavailable tool '{tool_name}'. No tools are available.")
    } else {
        format!(
            "Model tried to call unavailable tool '{tool_name}'. Available tools: {}.",
            available.join(", ")
        )
    }
}

impl WeaveError {
    /// Create an API error whose retryability follows its status code.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
            retryable: None,
        }
    }

    /// Create an invalid-argument error for a named parameter.
    pub fn invalid_argument(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a no-object error without response details.
    pub fn no_object(message: impl Into<String>) -> Self {
        Self::NoObjectGenerated {
            message: message.into(),
            text: None,
            usage: None,
            finish_reason: None,
            cause: None,
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Aborted => ErrorCategory::Cancellation,
            Self::Api { status, .. } => match status {
                408 => ErrorCategory::Timeout,
                429 => ErrorCategory::RateLimit,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Api,
            },
            Self::InvalidArgument { .. }
            | Self::InvalidPrompt(_)
            | Self::MessageConversion(_) => ErrorCategory::Validation,
            Self::NoSuchTool { .. }
            | Self::InvalidToolArguments { .. }
            | Self::ToolCallRepair { .. } => ErrorCategory::ToolResolution,
            Self::ToolExecution { .. } => ErrorCategory::ToolExecution,
            Self::NoObjectGenerated { .. } | Self::TypeValidation { .. } => {
                ErrorCategory::OutputShape
            }
            Self::RetryExhausted { .. } => ErrorCategory::Provider,
            Self::Shared(inner) => inner.category(),
            _ => ErrorCategory::Unknown,
        }
    }

    /// Whether the retry policy may try the failed operation again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api {
                retryable: Some(flag),
                ..
            } => *flag,
            Self::Api { status: 409, .. } => true,
            Self::Shared(inner) => inner.is_retryable(),
            _ => matches!(
                self.category(),
                ErrorCategory::RateLimit | ErrorCategory::Timeout | ErrorCategory::Server
            ),
        }
    }

    /// Whether this error represents cancellation through the abort signal.
    pub fn is_abort(&self) -> bool {
        match self {
            Self::Aborted => true,
            Self::Shared(inner) => inner.is_abort(),
            _ => false,
        }
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::RateLimit | ErrorCategory::Server => RecoverySuggestion::RetryWithBackoff,
            ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::Validation => RecoverySuggestion::FixRequest,
            ErrorCategory::ToolResolution | ErrorCategory::ToolExecution => {
                RecoverySuggestion::CheckToolImplementation
            }
            ErrorCategory::OutputShape => RecoverySuggestion::RepairOutput,
            _ => RecoverySuggestion::None,
        }
    }
}

impl From<SharedError> for WeaveError {
    fn from(err: SharedError) -> Self {
        Self::Shared(err)
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, WeaveError>;
