//! Prompt normalization.
//!
//! Callers hand in a [`Prompt`]; the loop only ever sees the
//! [`StandardizedPrompt`] it is lowered to.

pub mod detect;
pub mod ui;

use serde::Deserialize;
use serde_json::Value;

use crate::error::WeaveError;
use crate::types::{ContentPart, ModelMessage, Role};

pub use detect::{detect_prompt_shape, PromptShape};
pub use ui::{convert_ui_messages, Attachment, ToolInvocation, UiMessage, UiPart, UiRole};

/// Caller-supplied prompt content.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptInput {
    /// A single user turn.
    Text(String),
    Messages(Vec<ModelMessage>),
    UiMessages(Vec<UiMessage>),
    /// Untyped messages, classified with [`detect_prompt_shape`].
    Raw(Vec<Value>),
}

/// A system prompt plus exactly one kind of input.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: Option<String>,
    pub input: PromptInput,
}

impl Prompt {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self::from_input(PromptInput::Text(prompt.into()))
    }

    pub fn messages(messages: Vec<ModelMessage>) -> Self {
        Self::from_input(PromptInput::Messages(messages))
    }

    pub fn ui_messages(messages: Vec<UiMessage>) -> Self {
        Self::from_input(PromptInput::UiMessages(messages))
    }

    pub fn raw(messages: Vec<Value>) -> Self {
        Self::from_input(PromptInput::Raw(messages))
    }

    fn from_input(input: PromptInput) -> Self {
        Self {
            system: None,
            input,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Build a prompt from the optional `prompt` / `messages` pair used by
    /// untyped callers. Exactly one of them must be set.
    pub fn from_parts(
        system: Option<String>,
        prompt: Option<String>,
        messages: Option<Vec<Value>>,
    ) -> Result<Self, WeaveError> {
        let input = match (prompt, messages) {
            (None, None) => {
                return Err(WeaveError::InvalidPrompt(
                    "prompt or messages must be defined".into(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(WeaveError::InvalidPrompt(
                    "prompt and messages cannot be defined at the same time".into(),
                ))
            }
            (Some(text), None) => PromptInput::Text(text),
            (None, Some(messages)) => PromptInput::Raw(messages),
        };
        Ok(Self { system, input })
    }
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Prompt::text(text)
    }
}

impl From<String> for Prompt {
    fn from(text: String) -> Self {
        Prompt::text(text)
    }
}

impl From<Vec<ModelMessage>> for Prompt {
    fn from(messages: Vec<ModelMessage>) -> Self {
        Prompt::messages(messages)
    }
}

/// Whether the prompt came in as a single text or as a message list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum PromptKind {
    Prompt,
    Messages,
}

/// Canonical prompt. `messages` never contains the system prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardizedPrompt {
    pub kind: PromptKind,
    pub system: Option<String>,
    pub messages: Vec<ModelMessage>,
}

impl StandardizedPrompt {
    /// Messages as sent to the provider, system message first.
    pub fn model_messages(&self) -> Vec<ModelMessage> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        if let Some(system) = &self.system {
            out.push(ModelMessage::system(system));
        }
        out.extend(self.messages.iter().cloned());
        out
    }
}

/// Lower any [`Prompt`] to a [`StandardizedPrompt`].
pub fn standardize_prompt(prompt: &Prompt) -> Result<StandardizedPrompt, WeaveError> {
    let (kind, messages) = match &prompt.input {
        PromptInput::Text(text) => (PromptKind::Prompt, vec![ModelMessage::user(text)]),
        PromptInput::Messages(messages) => (PromptKind::Messages, messages.clone()),
        PromptInput::UiMessages(messages) => (PromptKind::Messages, convert_ui_messages(messages)?),
        PromptInput::Raw(values) => (PromptKind::Messages, lower_raw(values)?),
    };

    Ok(StandardizedPrompt {
        kind,
        system: prompt.system.clone(),
        messages,
    })
}

const INVALID_MESSAGES: &str = "messages must be an array of CoreMessage or UIMessage";

fn lower_raw(values: &[Value]) -> Result<Vec<ModelMessage>, WeaveError> {
    match detect_prompt_shape(values) {
        PromptShape::Other => Err(WeaveError::InvalidPrompt(INVALID_MESSAGES.into())),
        PromptShape::UiMessages => {
            let messages: Vec<UiMessage> = serde_json::from_value(Value::Array(values.to_vec()))
                .map_err(|e| WeaveError::InvalidPrompt(format!("{INVALID_MESSAGES}: {e}")))?;
            convert_ui_messages(&messages)
        }
        PromptShape::Messages => values
            .iter()
            .map(|value| {
                RawMessage::deserialize(value)
                    .map(ModelMessage::from)
                    .map_err(|e| WeaveError::InvalidPrompt(format!("{INVALID_MESSAGES}: {e}")))
            })
            .collect(),
    }
}

/// Canonical message whose content may be a bare string.
#[derive(Deserialize)]
struct RawMessage {
    role: Role,
    content: RawContent,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl From<RawMessage> for ModelMessage {
    fn from(raw: RawMessage) -> Self {
        let content = match raw.content {
            RawContent::Text(text) => vec![ContentPart::text(text)],
            RawContent::Parts(parts) => parts,
        };
        ModelMessage {
            role: raw.role,
            content,
            id: raw.id,
        }
    }
}
