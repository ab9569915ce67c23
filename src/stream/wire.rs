//! Line-oriented data stream protocol: `<code>:<json>\n` per part.

use std::str::FromStr;
use std::sync::Arc;

use futures::stream::{BoxStream, Stream};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::WeaveConfig;
use crate::error::WeaveError;
use crate::types::{FinishReason, StreamPart, Usage};

/// Token counts as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl From<Usage> for WireUsage {
    fn from(usage: Usage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        }
    }
}

/// One decoded protocol line.
#[derive(Debug, Clone, PartialEq)]
pub enum DataStreamPart {
    Text(String),
    Data(Vec<Value>),
    Error(String),
    MessageAnnotations(Vec<Value>),
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        args: Value,
    },
    ToolResult {
        tool_call_id: String,
        result: Value,
    },
    ToolCallStreamingStart {
        tool_call_id: String,
        tool_name: String,
    },
    ToolCallDelta {
        tool_call_id: String,
        args_text_delta: String,
    },
    FinishMessage {
        finish_reason: FinishReason,
        usage: Option<WireUsage>,
    },
    FinishStep {
        finish_reason: FinishReason,
        usage: Option<WireUsage>,
        is_continued: bool,
    },
    StartStep {
        message_id: String,
    },
    Reasoning(String),
    Source(Value),
    RedactedReasoning {
        data: String,
    },
    ReasoningSignature {
        signature: String,
    },
    File {
        data: String,
        mime_type: String,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallPayload {
    tool_call_id: String,
    tool_name: String,
    args: Value,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolResultPayload {
    tool_call_id: String,
    result: Value,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamingStartPayload {
    tool_call_id: String,
    tool_name: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeltaPayload {
    tool_call_id: String,
    args_text_delta: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinishPayload {
    finish_reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    usage: Option<WireUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    is_continued: Option<bool>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartStepPayload {
    message_id: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilePayload {
    data: String,
    mime_type: String,
}

impl DataStreamPart {
    /// Single-character protocol code.
    pub fn code(&self) -> char {
        match self {
            DataStreamPart::Text(_) => '0',
            DataStreamPart::Data(_) => '2',
            DataStreamPart::Error(_) => '3',
            DataStreamPart::MessageAnnotations(_) => '8',
            DataStreamPart::ToolCall { .. } => '9',
            DataStreamPart::ToolResult { .. } => 'a',
            DataStreamPart::ToolCallStreamingStart { .. } => 'b',
            DataStreamPart::ToolCallDelta { .. } => 'c',
            DataStreamPart::FinishMessage { .. } => 'd',
            DataStreamPart::FinishStep { .. } => 'e',
            DataStreamPart::StartStep { .. } => 'f',
            DataStreamPart::Reasoning(_) => 'g',
            DataStreamPart::Source(_) => 'h',
            DataStreamPart::RedactedReasoning { .. } => 'i',
            DataStreamPart::ReasoningSignature { .. } => 'j',
            DataStreamPart::File { .. } => 'k',
        }
    }

    fn payload(&self) -> Value {
        match self {
            DataStreamPart::Text(text)
            | DataStreamPart::Error(text)
            | DataStreamPart::Reasoning(text) => Value::String(text.clone()),
            DataStreamPart::Data(values) | DataStreamPart::MessageAnnotations(values) => {
                Value::Array(values.clone())
            }
            DataStreamPart::ToolCall {
                tool_call_id,
                tool_name,
                args,
            } => to_value(ToolCallPayload {
                tool_call_id: tool_call_id.clone(),
                tool_name: tool_name.clone(),
                args: args.clone(),
            }),
            DataStreamPart::ToolResult {
                tool_call_id,
                result,
            } => to_value(ToolResultPayload {
                tool_call_id: tool_call_id.clone(),
                result: result.clone(),
            }),
            DataStreamPart::ToolCallStreamingStart {
                tool_call_id,
                tool_name,
            } => to_value(StreamingStartPayload {
                tool_call_id: tool_call_id.clone(),
                tool_name: tool_name.clone(),
            }),
            DataStreamPart::ToolCallDelta {
                tool_call_id,
                args_text_delta,
            } => to_value(DeltaPayload {
                tool_call_id: tool_call_id.clone(),
                args_text_delta: args_text_delta.clone(),
            }),
            DataStreamPart::FinishMessage {
                finish_reason,
                usage,
            } => to_value(FinishPayload {
                finish_reason: finish_reason.to_string(),
                usage: *usage,
                is_continued: None,
            }),
            DataStreamPart::FinishStep {
                finish_reason,
                usage,
                is_continued,
            } => to_value(FinishPayload {
                finish_reason: finish_reason.to_string(),
                usage: *usage,
                is_continued: Some(*is_continued),
            }),
            DataStreamPart::StartStep { message_id } => to_value(StartStepPayload {
                message_id: message_id.clone(),
            }),
            DataStreamPart::Source(source) => source.clone(),
            DataStreamPart::RedactedReasoning { data } => json!({ "data": data }),
            DataStreamPart::ReasoningSignature { signature } => json!({ "signature": signature }),
            DataStreamPart::File { data, mime_type } => to_value(FilePayload {
                data: data.clone(),
                mime_type: mime_type.clone(),
            }),
        }
    }

    fn decode(code: char, value: Value) -> Result<Option<Self>, WeaveError> {
        let invalid = |expected: &str| {
            WeaveError::InvalidStreamPart(format!("\"{}\" parts expect {expected}.", code_name(code)))
        };

        let part = match code {
            '0' | '3' | 'g' => {
                let Value::String(text) = value else {
                    return Err(invalid("a string value"));
                };
                match code {
                    '0' => DataStreamPart::Text(text),
                    '3' => DataStreamPart::Error(text),
                    _ => DataStreamPart::Reasoning(text),
                }
            }
            '2' | '8' => {
                let Value::Array(values) = value else {
                    return Err(invalid("an array value"));
                };
                if code == '2' {
                    DataStreamPart::Data(values)
                } else {
                    DataStreamPart::MessageAnnotations(values)
                }
            }
            '9' => {
                let p: ToolCallPayload = serde_json::from_value(value).map_err(|_| {
                    invalid(r#"an object with a "toolCallId", "toolName", and "args" property"#)
                })?;
                DataStreamPart::ToolCall {
                    tool_call_id: p.tool_call_id,
                    tool_name: p.tool_name,
                    args: p.args,
                }
            }
            'a' => {
                let p: ToolResultPayload = serde_json::from_value(value).map_err(|_| {
                    invalid(r#"an object with a "toolCallId" and a "result" property"#)
                })?;
                DataStreamPart::ToolResult {
                    tool_call_id: p.tool_call_id,
                    result: p.result,
                }
            }
            'b' => {
                let p: StreamingStartPayload = serde_json::from_value(value).map_err(|_| {
                    invalid(r#"an object with a "toolCallId" and "toolName" property"#)
                })?;
                DataStreamPart::ToolCallStreamingStart {
                    tool_call_id: p.tool_call_id,
                    tool_name: p.tool_name,
                }
            }
            'c' => {
                let p: DeltaPayload = serde_json::from_value(value).map_err(|_| {
                    invalid(r#"an object with a "toolCallId" and "argsTextDelta" property"#)
                })?;
                DataStreamPart::ToolCallDelta {
                    tool_call_id: p.tool_call_id,
                    args_text_delta: p.args_text_delta,
                }
            }
            'd' | 'e' => {
                let p: FinishPayload = serde_json::from_value(value)
                    .map_err(|_| invalid(r#"an object with a "finishReason" property"#))?;
                let finish_reason = FinishReason::from_str(&p.finish_reason).unwrap_or_default();
                if code == 'd' {
                    DataStreamPart::FinishMessage {
                        finish_reason,
                        usage: p.usage,
                    }
                } else {
                    DataStreamPart::FinishStep {
                        finish_reason,
                        usage: p.usage,
                        is_continued: p.is_continued.unwrap_or(false),
                    }
                }
            }
            'f' => {
                let p: StartStepPayload = serde_json::from_value(value)
                    .map_err(|_| invalid(r#"an object with a "messageId" property"#))?;
                DataStreamPart::StartStep {
                    message_id: p.message_id,
                }
            }
            'h' => {
                if !value.is_object() {
                    return Err(invalid("a Source object"));
                }
                DataStreamPart::Source(value)
            }
            'i' => match value.get("data").and_then(Value::as_str) {
                Some(data) => DataStreamPart::RedactedReasoning {
                    data: data.to_string(),
                },
                None => return Err(invalid(r#"an object with a "data" property"#)),
            },
            'j' => match value.get("signature").and_then(Value::as_str) {
                Some(signature) => DataStreamPart::ReasoningSignature {
                    signature: signature.to_string(),
                },
                None => return Err(invalid(r#"an object with a "signature" property"#)),
            },
            'k' => {
                let p: FilePayload = serde_json::from_value(value).map_err(|_| {
                    invalid(r#"an object with a "data" and "mimeType" property"#)
                })?;
                DataStreamPart::File {
                    data: p.data,
                    mime_type: p.mime_type,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(part))
    }
}

fn code_name(code: char) -> &'static str {
    match code {
        '0' => "text",
        '2' => "data",
        '3' => "error",
        '8' => "message_annotations",
        '9' => "tool_call",
        'a' => "tool_result",
        'b' => "tool_call_streaming_start",
        'c' => "tool_call_delta",
        'd' => "finish_message",
        'e' => "finish_step",
        'f' => "start_step",
        'g' => "reasoning",
        'h' => "source",
        'i' => "redacted_reasoning",
        'j' => "reasoning_signature",
        'k' => "file",
        _ => "unknown",
    }
}

fn to_value<T: Serialize>(payload: T) -> Value {
    serde_json::to_value(payload).unwrap_or(Value::Null)
}

/// Encode one part as a protocol line, newline included.
pub fn format_data_stream_part(part: &DataStreamPart) -> String {
    format!("{}:{}\n", part.code(), part.payload())
}

/// Decode one protocol line. Unknown codes decode to `Ok(None)`.
pub fn parse_data_stream_part(line: &str) -> Result<Option<DataStreamPart>, WeaveError> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let Some((code, payload)) = line.split_once(':') else {
        return Err(WeaveError::InvalidStreamPart(
            "Failed to parse stream string. No separator found.".into(),
        ));
    };
    let mut chars = code.chars();
    let (Some(code), None) = (chars.next(), chars.next()) else {
        return Err(WeaveError::InvalidStreamPart(format!(
            "Failed to parse stream string. Invalid code {code}."
        )));
    };
    let value: Value = serde_json::from_str(payload)?;
    DataStreamPart::decode(code, value)
}

type ErrorFormatter = Arc<dyn Fn(&WeaveError) -> String + Send + Sync>;

/// What [`to_data_stream`] includes.
#[derive(Clone)]
pub struct DataStreamOptions {
    pub send_reasoning: bool,
    pub send_sources: bool,
    pub send_usage: bool,
    /// Error text formatter. `None` masks every error.
    pub error_message: Option<ErrorFormatter>,
}

impl Default for DataStreamOptions {
    fn default() -> Self {
        Self {
            send_reasoning: false,
            send_sources: false,
            send_usage: true,
            error_message: None,
        }
    }
}

impl DataStreamOptions {
    pub fn with_error_message<F>(mut self, formatter: F) -> Self
    where
        F: Fn(&WeaveError) -> String + Send + Sync + 'static,
    {
        self.error_message = Some(Arc::new(formatter));
        self
    }

    fn format_error(&self, error: &WeaveError) -> String {
        match &self.error_message {
            Some(formatter) => formatter(error),
            None => MASKED_ERROR.to_string(),
        }
    }
}

impl From<&WeaveConfig> for DataStreamOptions {
    fn from(config: &WeaveConfig) -> Self {
        let options = Self {
            send_reasoning: config.send_reasoning,
            send_sources: config.send_sources,
            ..Self::default()
        };
        if config.mask_errors {
            options
        } else {
            options.with_error_message(|e| e.to_string())
        }
    }
}

const MASKED_ERROR: &str = "An error occurred.";

/// Map a stream part to its protocol part, if it is sent at all.
pub fn to_data_stream_part(part: &StreamPart, options: &DataStreamOptions) -> Option<DataStreamPart> {
    let usage = |usage: &Usage| options.send_usage.then(|| WireUsage::from(*usage));
    Some(match part {
        StreamPart::TextDelta(text) => DataStreamPart::Text(text.clone()),
        StreamPart::Reasoning(text) if options.send_reasoning => DataStreamPart::Reasoning(text.clone()),
        StreamPart::RedactedReasoning(data) if options.send_reasoning => {
            DataStreamPart::RedactedReasoning { data: data.clone() }
        }
        StreamPart::ReasoningSignature(signature) if options.send_reasoning => {
            DataStreamPart::ReasoningSignature {
                signature: signature.clone(),
            }
        }
        StreamPart::Reasoning(_)
        | StreamPart::RedactedReasoning(_)
        | StreamPart::ReasoningSignature(_) => return None,
        StreamPart::Source(source) if options.send_sources => {
            DataStreamPart::Source(to_value(source))
        }
        StreamPart::Source(_) => return None,
        StreamPart::File(file) => DataStreamPart::File {
            data: file.data.clone(),
            mime_type: file.mime_type.clone(),
        },
        StreamPart::ToolCallStreamingStart {
            tool_call_id,
            tool_name,
        } => DataStreamPart::ToolCallStreamingStart {
            tool_call_id: tool_call_id.clone(),
            tool_name: tool_name.clone(),
        },
        StreamPart::ToolCallDelta {
            tool_call_id,
            args_text_delta,
            ..
        } => DataStreamPart::ToolCallDelta {
            tool_call_id: tool_call_id.clone(),
            args_text_delta: args_text_delta.clone(),
        },
        StreamPart::ToolCall(call) => DataStreamPart::ToolCall {
            tool_call_id: call.tool_call_id.clone(),
            tool_name: call.tool_name.clone(),
            args: call.args.clone(),
        },
        StreamPart::ToolResult(result) => DataStreamPart::ToolResult {
            tool_call_id: result.tool_call_id.clone(),
            result: result.result.clone(),
        },
        StreamPart::Error(error) => DataStreamPart::Error(options.format_error(error)),
        StreamPart::StepStart { message_id, .. } => DataStreamPart::StartStep {
            message_id: message_id.clone(),
        },
        StreamPart::StepFinish {
            finish_reason,
            usage: step_usage,
            is_continued,
            ..
        } => DataStreamPart::FinishStep {
            finish_reason: *finish_reason,
            usage: usage(step_usage),
            is_continued: *is_continued,
        },
        StreamPart::Finish {
            finish_reason,
            usage: total,
            ..
        } => DataStreamPart::FinishMessage {
            finish_reason: *finish_reason,
            usage: usage(total),
        },
    })
}

/// Encode a full stream as protocol lines.
pub fn to_data_stream<S>(stream: S, options: DataStreamOptions) -> BoxStream<'static, String>
where
    S: Stream<Item = StreamPart> + Send + 'static,
{
    Box::pin(stream.filter_map(move |part| {
        let line = to_data_stream_part(&part, &options).map(|p| format_data_stream_part(&p));
        futures::future::ready(line)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCall;
    use pretty_assertions::assert_eq;

    #[test]
    fn formats_text_and_tool_call() {
        assert_eq!(
            format_data_stream_part(&DataStreamPart::Text("Hi \"there\"".into())),
            "0:\"Hi \\\"there\\\"\"\n"
        );
        assert_eq!(
            format_data_stream_part(&DataStreamPart::ToolCall {
                tool_call_id: "c1".into(),
                tool_name: "weather".into(),
                args: json!({ "city": "Oslo" }),
            }),
            "9:{\"toolCallId\":\"c1\",\"toolName\":\"weather\",\"args\":{\"city\":\"Oslo\"}}\n"
        );
    }

    #[test]
    fn finish_step_round_trips_through_text() {
        let part = DataStreamPart::FinishStep {
            finish_reason: FinishReason::ToolCalls,
            usage: Some(WireUsage {
                prompt_tokens: 3,
                completion_tokens: 4,
            }),
            is_continued: true,
        };

        let line = format_data_stream_part(&part);

        assert_eq!(
            line,
            "e:{\"finishReason\":\"tool-calls\",\"usage\":{\"promptTokens\":3,\"completionTokens\":4},\"isContinued\":true}\n"
        );
        assert_eq!(parse_data_stream_part(&line).unwrap(), Some(part));
    }

    #[test]
    fn unknown_codes_are_ignored() {
        assert_eq!(parse_data_stream_part("z:{\"x\":1}\n").unwrap(), None);
    }

    #[test]
    fn malformed_lines_are_errors() {
        assert!(parse_data_stream_part("no separator").is_err());
        assert!(parse_data_stream_part("0:not json").is_err());
        let err = parse_data_stream_part("0:42").unwrap_err();
        assert_eq!(err.to_string(), "Invalid stream part: \"text\" parts expect a string value.");
    }

    #[test]
    fn finish_step_defaults_is_continued() {
        let part = parse_data_stream_part(r#"e:{"finishReason":"stop"}"#).unwrap();

        assert_eq!(
            part,
            Some(DataStreamPart::FinishStep {
                finish_reason: FinishReason::Stop,
                usage: None,
                is_continued: false,
            })
        );
    }

    #[tokio::test]
    async fn data_stream_masks_errors_and_hides_reasoning() {
        let parts = vec![
            StreamPart::Reasoning("hmm".into()),
            StreamPart::TextDelta("Hello".into()),
            StreamPart::ToolCall(ToolCall {
                tool_call_id: "c1".into(),
                tool_name: "t".into(),
                args: json!({}),
            }),
            StreamPart::Error(Arc::new(WeaveError::Stream("secret".into()))),
        ];

        let lines: Vec<String> = to_data_stream(futures::stream::iter(parts), DataStreamOptions::default())
            .collect()
            .await;

        assert_eq!(
            lines,
            vec![
                "0:\"Hello\"\n".to_string(),
                "9:{\"toolCallId\":\"c1\",\"toolName\":\"t\",\"args\":{}}\n".to_string(),
                "3:\"An error occurred.\"\n".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn custom_error_formatter_and_reasoning() {
        let options = DataStreamOptions {
            send_reasoning: true,
            ..Default::default()
        }
        .with_error_message(|e| e.to_string());
        let parts = vec![
            StreamPart::Reasoning("hmm".into()),
            StreamPart::Error(Arc::new(WeaveError::Stream("boom".into()))),
        ];

        let lines: Vec<String> = to_data_stream(futures::stream::iter(parts), options)
            .collect()
            .await;

        assert_eq!(lines, vec!["g:\"hmm\"\n", "3:\"Stream error: boom\"\n"]);
    }
}
