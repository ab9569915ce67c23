//! Generation settings and related enums.

use std::collections::HashMap;

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::WeaveError;

/// Settings controlling a single model call.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, Default, PartialEq)]
pub struct GenerationSettings {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub stop_sequences: Option<Vec<String>>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub seed: Option<i64>,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl GenerationSettings {
    /// Validate the settings and normalize them for the provider.
    ///
    /// `temperature` defaults to 0 and an empty stop list is dropped.
    pub fn validate(&self) -> Result<GenerationSettings, WeaveError> {
        if let Some(max_tokens) = self.max_tokens {
            if max_tokens < 1 {
                return Err(WeaveError::invalid_argument(
                    "maxTokens",
                    "maxTokens must be >= 1",
                ));
            }
        }

        check_finite("temperature", self.temperature)?;
        check_finite("topP", self.top_p)?;
        check_finite("presencePenalty", self.presence_penalty)?;
        check_finite("frequencyPenalty", self.frequency_penalty)?;

        Ok(GenerationSettings {
            temperature: Some(self.temperature.unwrap_or(0.0)),
            stop_sequences: self
                .stop_sequences
                .clone()
                .filter(|stops| !stops.is_empty()),
            ..self.clone()
        })
    }
}

fn check_finite(parameter: &str, value: Option<f64>) -> Result<(), WeaveError> {
    match value {
        Some(v) if !v.is_finite() => Err(WeaveError::invalid_argument(
            parameter,
            format!("{parameter} must be a number"),
        )),
        _ => Ok(()),
    }
}

/// Why a model call finished.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, Default)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Error,
    Other,
    #[default]
    Unknown,
}

/// A non-fatal provider warning about the call options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CallWarning {
    UnsupportedSetting {
        setting: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    UnsupportedTool {
        tool_name: String,
    },
    Other {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_defaults_temperature_to_zero() {
        let settings = GenerationSettings::default().validate().unwrap();

        assert_eq!(settings.temperature, Some(0.0));
    }

    #[test]
    fn validate_rejects_zero_max_tokens() {
        let settings = GenerationSettings::builder().max_tokens(0).build();

        let err = settings.validate().unwrap_err();

        assert!(matches!(err, WeaveError::InvalidArgument { ref parameter, .. } if parameter == "maxTokens"));
    }

    #[test]
    fn validate_rejects_nan_top_p() {
        let settings = GenerationSettings::builder().top_p(f64::NAN).build();

        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_drops_empty_stop_sequences() {
        let settings = GenerationSettings::builder()
            .stop_sequences(vec![])
            .temperature(0.7)
            .build();

        let validated = settings.validate().unwrap();

        assert_eq!(validated.stop_sequences, None);
        assert_eq!(validated.temperature, Some(0.7));
    }

    #[test]
    fn finish_reason_parses_kebab_case() {
        assert_eq!("tool-calls".parse::<FinishReason>().unwrap(), FinishReason::ToolCalls);
        assert_eq!(FinishReason::ContentFilter.to_string(), "content-filter");
    }
}
