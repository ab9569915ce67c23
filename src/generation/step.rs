//! Step transitions and the bookkeeping shared by the text loops.

use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;

use crate::error::WeaveError;
use crate::provider::{CallMode, ModelProvider, ResponseInfo};
use crate::tools::{ToolChoice, ToolSet};
use crate::types::{
    ContentPart, FinishReason, GeneratedFile, ModelMessage, ReasoningDetail, ResponseMetadata,
    Role, StepType, ToolCall, ToolResult,
};
use crate::util::id::{message_id, response_id};

static LAST_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([\s\S]*?)(\s+)(\S*)$").expect("last whitespace regex must compile")
});

/// Inputs of the step transition rule.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StepOutcome {
    /// Steps completed so far, this one included.
    pub completed_steps: u32,
    pub max_steps: u32,
    pub continue_steps: bool,
    pub finish_reason: FinishReason,
    pub tool_calls: usize,
    pub tool_results: usize,
}

/// Decide what the loop does after a step.
pub(crate) fn next_step_type(outcome: StepOutcome) -> StepType {
    if outcome.completed_steps >= outcome.max_steps {
        return StepType::Done;
    }
    if outcome.continue_steps
        && outcome.finish_reason == FinishReason::Length
        && outcome.tool_calls == 0
    {
        return StepType::Continue;
    }
    if outcome.tool_calls > 0 && outcome.tool_results == outcome.tool_calls {
        return StepType::ToolResult;
    }
    StepType::Done
}

/// Split `text` around its last run of whitespace: `(prefix, whitespace, suffix)`.
pub fn split_on_last_whitespace(text: &str) -> Option<(&str, &str, &str)> {
    let caps = LAST_WHITESPACE.captures(text)?;
    Some((
        caps.get(1)?.as_str(),
        caps.get(2)?.as_str(),
        caps.get(3)?.as_str(),
    ))
}

/// Drop the trailing partial word, keeping the whitespace before it.
pub fn remove_text_after_last_whitespace(text: &str) -> &str {
    match split_on_last_whitespace(text) {
        Some((prefix, whitespace, _)) => &text[..prefix.len() + whitespace.len()],
        None => text,
    }
}

/// Text contributed by one step, after continuation splicing.
///
/// A continuation loses its leading whitespace when the accumulated text
/// already ends in whitespace; a step that will be continued loses its
/// trailing partial word.
// Trimming keys on the accumulated text *ending* in whitespace, matching
// the streaming path. Do not invert the check.
pub(crate) fn step_text(
    step_type: StepType,
    accumulated: &str,
    generated: &str,
    next: StepType,
) -> String {
    let text = if step_type == StepType::Continue && accumulated.trim_end() != accumulated {
        generated.trim_start()
    } else {
        generated
    };
    if next == StepType::Continue {
        remove_text_after_last_whitespace(text).to_string()
    } else {
        text.to_string()
    }
}

/// Messages that record one step in the conversation: the assistant turn
/// and, when tools ran, a tool turn.
pub(crate) fn to_response_messages(
    text: &str,
    files: &[GeneratedFile],
    reasoning: &[ReasoningDetail],
    tool_calls: &[ToolCall],
    tool_results: &[ToolResult],
    assistant_id: String,
) -> Vec<ModelMessage> {
    let mut content: Vec<ContentPart> = reasoning
        .iter()
        .map(|detail| match detail {
            ReasoningDetail::Text { text, signature } => ContentPart::Reasoning {
                text: text.clone(),
                signature: signature.clone(),
            },
            ReasoningDetail::Redacted { data } => ContentPart::RedactedReasoning { data: data.clone() },
        })
        .collect();
    content.extend(files.iter().map(|file| ContentPart::File {
        data: file.data.clone(),
        mime_type: file.mime_type.clone(),
    }));
    content.push(ContentPart::text(text));
    content.extend(tool_calls.iter().cloned().map(ContentPart::ToolCall));

    let mut messages = vec![ModelMessage::new(Role::Assistant, content).with_id(assistant_id)];
    if !tool_results.is_empty() {
        messages.push(ModelMessage::tool(tool_results.to_vec()).with_id(message_id()));
    }
    messages
}

/// Append continuation text to the last assistant message.
pub(crate) fn append_to_last_message(messages: &mut [ModelMessage], text: &str) {
    if let Some(last) = messages
        .iter_mut()
        .rev()
        .find(|m| m.role == Role::Assistant)
    {
        last.content.push(ContentPart::text(text));
    }
}

/// Provider-facing call mode for a regular step.
pub(crate) fn regular_mode(
    tools: &ToolSet,
    tool_choice: Option<&ToolChoice>,
    active_tools: Option<&[String]>,
) -> CallMode {
    if tools.is_empty() {
        return CallMode::default();
    }
    CallMode::Regular {
        tools: tools.definitions(active_tools),
        tool_choice: Some(tool_choice.cloned().unwrap_or_default()),
    }
}

/// Fill in response metadata the provider left out.
pub(crate) fn response_metadata(
    info: Option<&ResponseInfo>,
    model: &dyn ModelProvider,
) -> ResponseMetadata {
    let info = info.cloned().unwrap_or_default();
    ResponseMetadata {
        id: info.id.unwrap_or_else(response_id),
        timestamp: info.timestamp.unwrap_or_else(Utc::now),
        model_id: info.model_id.unwrap_or_else(|| model.model_id().to_string()),
        messages: Vec::new(),
    }
}

pub(crate) fn check_max_steps(max_steps: u32) -> Result<(), WeaveError> {
    if max_steps < 1 {
        return Err(WeaveError::invalid_argument(
            "maxSteps",
            "maxSteps must be at least 1",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn outcome() -> StepOutcome {
        StepOutcome {
            completed_steps: 1,
            max_steps: 5,
            continue_steps: true,
            finish_reason: FinishReason::Stop,
            tool_calls: 0,
            tool_results: 0,
        }
    }

    #[test]
    fn budget_exhaustion_wins() {
        let step = StepOutcome {
            completed_steps: 1,
            max_steps: 1,
            tool_calls: 1,
            tool_results: 1,
            ..outcome()
        };

        assert_eq!(next_step_type(step), StepType::Done);
    }

    #[test]
    fn length_without_tools_continues() {
        let step = StepOutcome {
            finish_reason: FinishReason::Length,
            ..outcome()
        };

        assert_eq!(next_step_type(step), StepType::Continue);
        assert_eq!(
            next_step_type(StepOutcome {
                continue_steps: false,
                ..step
            }),
            StepType::Done
        );
    }

    #[test]
    fn tool_results_for_every_call_loop_back() {
        let all = StepOutcome {
            tool_calls: 2,
            tool_results: 2,
            ..outcome()
        };
        let client_side = StepOutcome {
            tool_calls: 2,
            tool_results: 1,
            ..outcome()
        };

        assert_eq!(next_step_type(all), StepType::ToolResult);
        assert_eq!(next_step_type(client_side), StepType::Done);
    }

    #[test]
    fn stop_without_tools_is_done() {
        assert_eq!(next_step_type(outcome()), StepType::Done);
    }

    #[test]
    fn splits_on_last_whitespace() {
        assert_eq!(
            split_on_last_whitespace("The quick  brown"),
            Some(("The quick", "  ", "brown"))
        );
        assert_eq!(split_on_last_whitespace("word"), None);
        assert_eq!(remove_text_after_last_whitespace("Hello wor"), "Hello ");
        assert_eq!(remove_text_after_last_whitespace("Hello "), "Hello ");
        assert_eq!(remove_text_after_last_whitespace("Hello"), "Hello");
    }

    #[test]
    fn continuation_splicing() {
        let first = step_text(StepType::Initial, "", "The quick bro", StepType::Continue);
        let second = step_text(StepType::Continue, &first, "  brown fox.", StepType::Done);

        assert_eq!(first, "The quick ");
        assert_eq!(second, "brown fox.");
        assert_eq!(
            step_text(StepType::Continue, "ends-without-space", " next", StepType::Done),
            " next"
        );
    }

    #[test]
    fn response_messages_order_content() {
        let call = ToolCall {
            tool_call_id: "c1".into(),
            tool_name: "t".into(),
            args: json!({}),
        };
        let result = ToolResult {
            tool_call_id: "c1".into(),
            tool_name: "t".into(),
            args: json!({}),
            result: json!(1),
            is_error: false,
        };

        let messages = to_response_messages(
            "hi",
            &[],
            &[ReasoningDetail::Text {
                text: "think".into(),
                signature: None,
            }],
            &[call.clone()],
            &[result],
            "msg-1".into(),
        );

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id.as_deref(), Some("msg-1"));
        assert!(matches!(messages[0].content[0], ContentPart::Reasoning { .. }));
        assert_eq!(messages[0].content[1], ContentPart::text("hi"));
        assert_eq!(messages[0].content[2], ContentPart::ToolCall(call));
        assert_eq!(messages[1].role, Role::Tool);
    }

    #[test]
    fn zero_max_steps_is_rejected() {
        let err = check_max_steps(0).unwrap_err();

        assert_eq!(
            err.to_string(),
            "Invalid argument for parameter maxSteps: maxSteps must be at least 1"
        );
    }
}
