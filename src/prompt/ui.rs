//! UI-flavored chat messages and their lowering to canonical messages.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::WeaveError;
use crate::types::{ContentPart, ModelMessage, ReasoningDetail, Role, ToolCall, ToolResult};

/// A message as kept by a chat front end.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UiMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: UiRole,
    #[serde(default)]
    pub content: String,
    #[serde(
        default,
        rename = "experimental_attachments",
        skip_serializing_if = "Option::is_none"
    )]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<UiPart>>,
    /// Legacy tool invocation list, used when `parts` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_invocations: Option<Vec<ToolInvocation>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UiRole {
    System,
    User,
    Assistant,
    Data,
    Function,
}

/// A file attached to a user message, by URL or `data:` URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiPart {
    Text {
        text: String,
    },
    File {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Reasoning {
        #[serde(default)]
        reasoning: String,
        #[serde(default)]
        details: Vec<ReasoningDetail>,
    },
    ToolInvocation {
        #[serde(rename = "toolInvocation")]
        tool_invocation: ToolInvocation,
    },
    Source {
        source: Value,
    },
    StepStart,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: Value,
    /// `None` only when the field is absent; a JSON `null` result is kept.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl ToolInvocation {
    fn step(&self) -> u32 {
        self.step.unwrap_or(0)
    }

    fn to_call(&self) -> ContentPart {
        ContentPart::ToolCall(ToolCall {
            tool_call_id: self.tool_call_id.clone(),
            tool_name: self.tool_name.clone(),
            args: self.args.clone(),
        })
    }

    fn to_result(&self) -> Result<ToolResult, WeaveError> {
        let Some(result) = &self.result else {
            let json = serde_json::to_string(self)?;
            return Err(WeaveError::MessageConversion(format!(
                "ToolInvocation must have a result: {json}"
            )));
        };
        Ok(ToolResult {
            tool_call_id: self.tool_call_id.clone(),
            tool_name: self.tool_name.clone(),
            args: self.args.clone(),
            result: result.clone(),
            is_error: false,
        })
    }
}

/// Lower UI messages to canonical model messages.
pub fn convert_ui_messages(messages: &[UiMessage]) -> Result<Vec<ModelMessage>, WeaveError> {
    let mut out = Vec::new();

    for (index, message) in messages.iter().enumerate() {
        let is_last = index + 1 == messages.len();
        match message.role {
            UiRole::System => out.push(ModelMessage::system(&message.content)),
            UiRole::User => {
                let mut content = vec![ContentPart::text(&message.content)];
                if let Some(attachments) = &message.attachments {
                    content.extend(attachments_to_parts(attachments)?);
                }
                out.push(ModelMessage::new(Role::User, content));
            }
            UiRole::Assistant => match (&message.parts, &message.tool_invocations) {
                (Some(parts), _) => lower_parts(parts, &mut out)?,
                (None, Some(invocations)) if !invocations.is_empty() => {
                    lower_legacy_invocations(message, invocations, is_last, &mut out)?
                }
                _ => out.push(ModelMessage::assistant(&message.content)),
            },
            UiRole::Data => {}
            UiRole::Function => {
                return Err(WeaveError::MessageConversion(
                    "Unsupported role: function".into(),
                ))
            }
        }
    }

    Ok(out)
}

/// Split assistant parts into blocks. A block ends when a tool invocation
/// moves to another step, or when text follows a tool invocation.
fn lower_parts(parts: &[UiPart], out: &mut Vec<ModelMessage>) -> Result<(), WeaveError> {
    let mut block: Vec<&UiPart> = Vec::new();
    let mut block_has_invocations = false;
    let mut current_step = 0;

    for part in parts {
        match part {
            UiPart::Text { .. } => {
                if block_has_invocations {
                    flush_block(&mut block, out)?;
                    block_has_invocations = false;
                }
                block.push(part);
            }
            UiPart::File { .. } | UiPart::Reasoning { .. } => block.push(part),
            UiPart::ToolInvocation { tool_invocation } => {
                if tool_invocation.step() != current_step {
                    flush_block(&mut block, out)?;
                    current_step = tool_invocation.step();
                }
                block.push(part);
                block_has_invocations = true;
            }
            UiPart::Source { .. } | UiPart::StepStart => {}
        }
    }

    flush_block(&mut block, out)
}

fn flush_block(block: &mut Vec<&UiPart>, out: &mut Vec<ModelMessage>) -> Result<(), WeaveError> {
    if block.is_empty() {
        return Ok(());
    }

    let mut content = Vec::new();
    let mut results = Vec::new();
    for part in block.drain(..) {
        match part {
            UiPart::Text { text } => content.push(ContentPart::text(text)),
            UiPart::File { data, mime_type } => content.push(ContentPart::File {
                data: data.clone(),
                mime_type: mime_type.clone(),
            }),
            UiPart::Reasoning { details, .. } => {
                content.extend(details.iter().map(|detail| match detail {
                    ReasoningDetail::Text { text, signature } => ContentPart::Reasoning {
                        text: text.clone(),
                        signature: signature.clone(),
                    },
                    ReasoningDetail::Redacted { data } => {
                        ContentPart::RedactedReasoning { data: data.clone() }
                    }
                }))
            }
            UiPart::ToolInvocation { tool_invocation } => {
                content.push(tool_invocation.to_call());
                results.push(tool_invocation.to_result()?);
            }
            UiPart::Source { .. } | UiPart::StepStart => {}
        }
    }

    out.push(ModelMessage::new(Role::Assistant, content));
    if !results.is_empty() {
        out.push(ModelMessage::tool(results));
    }
    Ok(())
}

fn lower_legacy_invocations(
    message: &UiMessage,
    invocations: &[ToolInvocation],
    is_last: bool,
    out: &mut Vec<ModelMessage>,
) -> Result<(), WeaveError> {
    let max_step = invocations.iter().map(ToolInvocation::step).max().unwrap_or(0);

    for step in 0..=max_step {
        let step_invocations: Vec<&ToolInvocation> =
            invocations.iter().filter(|inv| inv.step() == step).collect();
        if step_invocations.is_empty() {
            continue;
        }

        let mut content = Vec::new();
        if is_last && step == 0 && !message.content.is_empty() {
            content.push(ContentPart::text(&message.content));
        }
        content.extend(step_invocations.iter().map(|inv| inv.to_call()));
        out.push(ModelMessage::new(Role::Assistant, content));

        let results = step_invocations
            .iter()
            .map(|inv| inv.to_result())
            .collect::<Result<Vec<_>, _>>()?;
        out.push(ModelMessage::tool(results));
    }

    if !is_last && !message.content.is_empty() {
        out.push(ModelMessage::assistant(&message.content));
    }
    Ok(())
}

fn attachments_to_parts(attachments: &[Attachment]) -> Result<Vec<ContentPart>, WeaveError> {
    attachments.iter().map(attachment_to_part).collect()
}

fn attachment_to_part(attachment: &Attachment) -> Result<ContentPart, WeaveError> {
    let url = attachment.url.as_str();
    let content_type = attachment.content_type.as_deref();
    let is_image = content_type.is_some_and(|t| t.starts_with("image/"));

    let Some((scheme, _)) = url.split_once(':') else {
        return Err(WeaveError::MessageConversion(format!("Invalid URL: {url}")));
    };

    match scheme {
        "http" | "https" => {
            if is_image {
                return Ok(ContentPart::Image {
                    image: url.to_string(),
                    mime_type: None,
                });
            }
            let mime_type = content_type.ok_or_else(|| {
                WeaveError::MessageConversion(
                    "If the attachment is not an image, it must specify a content type".into(),
                )
            })?;
            Ok(ContentPart::File {
                data: url.to_string(),
                mime_type: mime_type.to_string(),
            })
        }
        "data" => {
            let (header, payload) = url.split_once(',').ok_or_else(|| {
                WeaveError::MessageConversion(format!("Invalid data URL format: {url}"))
            })?;
            let header_type = header
                .trim_start_matches("data:")
                .split(';')
                .next()
                .filter(|t| !t.is_empty());
            if header_type.is_none() {
                return Err(WeaveError::MessageConversion(format!(
                    "Invalid data URL format: {url}"
                )));
            }
            let bytes = STANDARD.decode(payload).map_err(|_| {
                WeaveError::MessageConversion(format!("Error processing data URL: {url}"))
            })?;

            if is_image {
                return Ok(ContentPart::Image {
                    image: payload.to_string(),
                    mime_type: content_type.map(str::to_string),
                });
            }
            if content_type.is_some_and(|t| t.starts_with("text/")) {
                return Ok(ContentPart::text(String::from_utf8_lossy(&bytes)));
            }
            let mime_type = content_type.ok_or_else(|| {
                WeaveError::MessageConversion(
                    "If the attachment is not an image or text, it must specify a content type"
                        .into(),
                )
            })?;
            Ok(ContentPart::File {
                data: payload.to_string(),
                mime_type: mime_type.to_string(),
            })
        }
        other => Err(WeaveError::MessageConversion(format!(
            "Unsupported URL protocol: {other}:"
        ))),
    }
}
