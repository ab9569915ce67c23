//! Error classification shared by retry and recovery logic.

use serde::{Deserialize, Serialize};
use strum::Display;

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Provider,
    RateLimit,
    Timeout,
    Server,
    Api,
    Cancellation,
    Configuration,
    Serialization,
    ToolResolution,
    ToolExecution,
    OutputShape,
    Unknown,
}

/// Why the retry policy gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum RetryReason {
    MaxRetriesExceeded,
    ErrorNotRetryable,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    RetryWithBackoff,
    IncreaseTimeout,
    CheckConfiguration,
    FixRequest,
    CheckToolImplementation,
    RepairOutput,
    None,
}
