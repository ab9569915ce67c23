//! Best-effort parsing of JSON that is still being streamed.

use serde_json::Value;
use strum::Display;

use super::repair::fix_json;

/// Which path produced a partial parse result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ParseState {
    UndefinedInput,
    SuccessfulParse,
    RepairedParse,
    FailedParse,
}

/// Outcome of [`parse_partial_json`].
#[derive(Debug, Clone, PartialEq)]
pub struct PartialJson {
    pub value: Option<Value>,
    pub state: ParseState,
}

impl PartialJson {
    /// Whether the text parsed without repair, i.e. the document is complete.
    pub fn is_complete(&self) -> bool {
        self.state == ParseState::SuccessfulParse
    }
}

/// Parse `text` as-is, falling back to [`fix_json`] when it is truncated.
pub fn parse_partial_json(text: Option<&str>) -> PartialJson {
    let Some(text) = text else {
        return PartialJson {
            value: None,
            state: ParseState::UndefinedInput,
        };
    };

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return PartialJson {
            value: Some(value),
            state: ParseState::SuccessfulParse,
        };
    }

    match serde_json::from_str::<Value>(&fix_json(text)) {
        Ok(value) => PartialJson {
            value: Some(value),
            state: ParseState::RepairedParse,
        },
        Err(_) => PartialJson {
            value: None,
            state: ParseState::FailedParse,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_text_is_undefined_input() {
        assert_eq!(parse_partial_json(None).state, ParseState::UndefinedInput);
    }

    #[test]
    fn complete_text_is_successful_parse() {
        let parsed = parse_partial_json(Some(r#"{"a": 1}"#));

        assert!(parsed.is_complete());
        assert_eq!(parsed.value, Some(json!({"a": 1})));
    }

    #[test]
    fn truncated_text_is_repaired() {
        let parsed = parse_partial_json(Some(r#"{"a": 1, "b": "x"#));

        assert_eq!(parsed.state, ParseState::RepairedParse);
        assert_eq!(parsed.value, Some(json!({"a": 1, "b": "x"})));
    }

    #[test]
    fn prose_fails_to_parse() {
        let parsed = parse_partial_json(Some("hello there"));

        assert_eq!(parsed.state, ParseState::FailedParse);
        assert_eq!(parsed.value, None);
    }
}
