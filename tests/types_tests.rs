//! Tests for core types.

use std::str::FromStr;

use pretty_assertions::assert_eq;
use serde_json::json;
use stepweave::types::*;

#[test]
fn model_message_constructors() {
    let msg = ModelMessage::system("You are helpful.");
    assert_eq!(msg.role, Role::System);
    assert_eq!(msg.text(), "You are helpful.");

    assert_eq!(ModelMessage::user("Hello").role, Role::User);
    assert_eq!(ModelMessage::assistant("Hi there!").text(), "Hi there!");
}

#[test]
fn tool_message_carries_results() {
    let msg = ModelMessage::tool(vec![ToolResult {
        tool_call_id: "call_1".into(),
        tool_name: "calc".into(),
        args: json!({ "a": 1 }),
        result: json!({ "result": 42 }),
        is_error: false,
    }]);

    assert_eq!(msg.role, Role::Tool);
    assert_eq!(msg.tool_results().len(), 1);
    assert_eq!(msg.tool_results()[0].result, json!({ "result": 42 }));
    assert_eq!(msg.text(), "");
}

#[test]
fn model_message_serde_shape() {
    let msg = ModelMessage::new(
        Role::Assistant,
        vec![
            ContentPart::text("Checking."),
            ContentPart::ToolCall(ToolCall {
                tool_call_id: "c1".into(),
                tool_name: "weather".into(),
                args: json!({ "city": "Oslo" }),
            }),
        ],
    )
    .with_id("msg-1");

    let value = serde_json::to_value(&msg).unwrap();
    assert_eq!(
        value,
        json!({
            "role": "assistant",
            "content": [
                { "type": "text", "text": "Checking." },
                {
                    "type": "tool-call",
                    "toolCallId": "c1",
                    "toolName": "weather",
                    "args": { "city": "Oslo" }
                }
            ],
            "id": "msg-1"
        })
    );

    let back: ModelMessage = serde_json::from_value(value).unwrap();
    assert_eq!(back, msg);
    assert_eq!(back.tool_calls()[0].tool_name, "weather");
}

#[test]
fn usage_adds_pairwise() {
    let mut total = Usage::new(10, 20);
    total += Usage::new(5, 15);

    assert_eq!(total, Usage::new(15, 35));
    assert_eq!(total.total_tokens, 50);
    assert_eq!(
        serde_json::to_value(total).unwrap(),
        json!({ "promptTokens": 15, "completionTokens": 35, "totalTokens": 50 })
    );
}

#[test]
fn generation_settings_builder() {
    let settings = GenerationSettings::builder()
        .max_tokens(1000)
        .temperature(0.7)
        .build();
    assert_eq!(settings.max_tokens, Some(1000));
    assert_eq!(settings.temperature, Some(0.7));
    assert!(settings.top_p.is_none());
}

#[test]
fn finish_reason_round_trips_kebab_case() {
    assert_eq!(FinishReason::Stop.to_string(), "stop");
    assert_eq!(FinishReason::ToolCalls.to_string(), "tool-calls");
    assert_eq!(
        FinishReason::from_str("content-filter").unwrap(),
        FinishReason::ContentFilter
    );
    assert_eq!(FinishReason::default(), FinishReason::Unknown);
}

#[test]
fn step_type_display() {
    assert_eq!(StepType::ToolResult.to_string(), "tool-result");
    assert_eq!(StepType::Continue.to_string(), "continue");
}

#[test]
fn call_warning_is_tagged() {
    let warning = CallWarning::UnsupportedSetting {
        setting: "seed".into(),
        details: None,
    };

    assert_eq!(
        serde_json::to_value(&warning).unwrap(),
        json!({ "type": "unsupported-setting", "setting": "seed" })
    );
}

#[test]
fn reasoning_text_joins_text_details() {
    let details = vec![
        ReasoningDetail::Text {
            text: "First, ".into(),
            signature: None,
        },
        ReasoningDetail::Redacted { data: "xyz".into() },
        ReasoningDetail::Text {
            text: "then.".into(),
            signature: Some("sig".into()),
        },
    ];

    assert_eq!(reasoning_text(&details).as_deref(), Some("First, then."));
    assert_eq!(reasoning_text(&[]), None);
}

#[test]
fn text_delta_accessor() {
    assert_eq!(StreamPart::TextDelta("hi".into()).text_delta(), Some("hi"));
    assert_eq!(StreamPart::Reasoning("hmm".into()).text_delta(), None);
}
