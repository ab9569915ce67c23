//! Classification of untyped message payloads.

use serde_json::Value;

/// Shape of a JSON message list supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum PromptShape {
    Messages,
    UiMessages,
    Other,
}

#[derive(PartialEq)]
enum Characteristic {
    UiSpecific,
    CanonicalSpecific,
    PlainMessage,
    Other,
}

/// Decide whether `messages` are canonical messages, UI messages, or neither.
///
/// One UI-only field anywhere makes the whole list UI messages. An empty
/// list counts as canonical.
pub fn detect_prompt_shape(messages: &[Value]) -> PromptShape {
    let characteristics: Vec<Characteristic> = messages.iter().map(characteristic).collect();

    if characteristics.contains(&Characteristic::UiSpecific) {
        PromptShape::UiMessages
    } else if characteristics.iter().all(|c| {
        matches!(
            c,
            Characteristic::CanonicalSpecific | Characteristic::PlainMessage
        )
    }) {
        PromptShape::Messages
    } else {
        PromptShape::Other
    }
}

fn characteristic(message: &Value) -> Characteristic {
    let Some(object) = message.as_object() else {
        return Characteristic::Other;
    };
    let role = object.get("role").and_then(Value::as_str);

    if matches!(role, Some("function" | "data"))
        || ["toolInvocations", "parts", "experimental_attachments"]
            .iter()
            .any(|key| object.contains_key(*key))
    {
        return Characteristic::UiSpecific;
    }

    let Some(content) = object.get("content") else {
        return Characteristic::Other;
    };
    if content.is_array()
        || object.contains_key("providerOptions")
        || object.contains_key("experimental_providerMetadata")
    {
        return Characteristic::CanonicalSpecific;
    }
    if content.is_string() && matches!(role, Some("system" | "user" | "assistant" | "tool")) {
        return Characteristic::PlainMessage;
    }
    Characteristic::Other
}
