//! Typed access to resolved tool arguments.

use serde_json::Value;

use crate::error::WeaveError;

/// Wrapper around validated tool arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolArguments {
    value: Value,
}

impl ToolArguments {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// Get the raw JSON value.
    pub fn raw(&self) -> &Value {
        &self.value
    }

    pub fn get_str(&self, key: &str) -> Result<&str, WeaveError> {
        self.value
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| missing(key, "string"))
    }

    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(|v| v.as_str())
    }

    pub fn get_i64(&self, key: &str) -> Result<i64, WeaveError> {
        self.value
            .get(key)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| missing(key, "integer"))
    }

    pub fn get_f64(&self, key: &str) -> Result<f64, WeaveError> {
        self.value
            .get(key)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| missing(key, "number"))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, WeaveError> {
        self.value
            .get(key)
            .and_then(|v| v.as_bool())
            .ok_or_else(|| missing(key, "boolean"))
    }

    /// Deserialize the arguments into a typed struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, WeaveError> {
        Ok(serde_json::from_value(self.value.clone())?)
    }
}

fn missing(key: &str, kind: &str) -> WeaveError {
    WeaveError::invalid_argument(key, format!("missing {kind} argument"))
}
