//! Configuration system (layered: code > env > config file > defaults).

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::WeaveError;
use crate::util::retry::RetryPolicy;

/// Global default config (lazy-initialized from file and env).
static DEFAULT_CONFIG: OnceLock<WeaveConfig> = OnceLock::new();

const ENV_PREFIX: &str = "STEPWEAVE_";
const CONFIG_FILE: &str = "stepweave.toml";

/// Engine-wide defaults. Per-call options take precedence over these.
#[derive(Debug, Clone, PartialEq)]
pub struct WeaveConfig {
    pub max_retries: u32,
    pub initial_retry_delay: Duration,
    pub backoff_factor: f64,
    pub max_steps: u32,
    pub continue_steps: bool,
    /// Emit `ToolCallStreamingStart` and argument deltas while streaming.
    pub tool_call_streaming: bool,
    pub send_reasoning: bool,
    pub send_sources: bool,
    /// Replace error text with a generic message on the wire.
    pub mask_errors: bool,
}

impl Default for WeaveConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_retry_delay: Duration::from_millis(2000),
            backoff_factor: 2.0,
            max_steps: 1,
            continue_steps: false,
            tool_call_streaming: false,
            send_reasoning: false,
            send_sources: false,
            mask_errors: true,
        }
    }
}

/// On-disk form; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    max_retries: Option<u32>,
    initial_retry_delay_ms: Option<u64>,
    backoff_factor: Option<f64>,
    max_steps: Option<u32>,
    continue_steps: Option<bool>,
    tool_call_streaming: Option<bool>,
    send_reasoning: Option<bool>,
    send_sources: Option<bool>,
    mask_errors: Option<bool>,
}

impl WeaveConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, then the default config file if present, then the environment.
    pub fn load() -> Result<Self, WeaveError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut config = Self::default();
        if let Some(path) = default_config_path().filter(|p| p.exists()) {
            config = config.merge_file(&path)?;
        }
        config.with_env_vars(std::env::vars())
    }

    /// Defaults overlaid with one TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, WeaveError> {
        Self::default().merge_file(path.as_ref())
    }

    /// Overlay the keys present in a TOML file.
    pub fn merge_file(self, path: &Path) -> Result<Self, WeaveError> {
        let raw = std::fs::read_to_string(path)?;
        let file: ConfigFile = toml::from_str(&raw).map_err(|e| {
            WeaveError::Configuration(format!("invalid config file {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "loaded config file");
        Ok(self.merge(file))
    }

    fn merge(mut self, file: ConfigFile) -> Self {
        if let Some(v) = file.max_retries {
            self.max_retries = v;
        }
        if let Some(ms) = file.initial_retry_delay_ms {
            self.initial_retry_delay = Duration::from_millis(ms);
        }
        if let Some(v) = file.backoff_factor {
            self.backoff_factor = v;
        }
        if let Some(v) = file.max_steps {
            self.max_steps = v;
        }
        if let Some(v) = file.continue_steps {
            self.continue_steps = v;
        }
        if let Some(v) = file.tool_call_streaming {
            self.tool_call_streaming = v;
        }
        if let Some(v) = file.send_reasoning {
            self.send_reasoning = v;
        }
        if let Some(v) = file.send_sources {
            self.send_sources = v;
        }
        if let Some(v) = file.mask_errors {
            self.mask_errors = v;
        }
        self
    }

    /// Overlay `STEPWEAVE_*` variables. Unrelated variables are ignored.
    pub fn with_env_vars<I, K, V>(mut self, vars: I) -> Result<Self, WeaveError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();
            match name {
                "MAX_RETRIES" => self.max_retries = parse_env(name, value)?,
                "INITIAL_RETRY_DELAY_MS" => {
                    self.initial_retry_delay = Duration::from_millis(parse_env(name, value)?)
                }
                "BACKOFF_FACTOR" => self.backoff_factor = parse_env(name, value)?,
                "MAX_STEPS" => self.max_steps = parse_env(name, value)?,
                "CONTINUE_STEPS" => self.continue_steps = parse_env(name, value)?,
                "TOOL_CALL_STREAMING" => self.tool_call_streaming = parse_env(name, value)?,
                "SEND_REASONING" => self.send_reasoning = parse_env(name, value)?,
                "SEND_SOURCES" => self.send_sources = parse_env(name, value)?,
                "MASK_ERRORS" => self.mask_errors = parse_env(name, value)?,
                _ => {}
            }
        }
        Ok(self)
    }

    /// Get (or create) the global default config.
    pub fn global() -> &'static WeaveConfig {
        DEFAULT_CONFIG.get_or_init(|| {
            Self::load().unwrap_or_else(|e| {
                warn!(error = %e, "falling back to default config");
                Self::default()
            })
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: self.initial_retry_delay,
            backoff_factor: self.backoff_factor,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_retry_delay(mut self, delay: Duration) -> Self {
        self.initial_retry_delay = delay;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_continue_steps(mut self, enabled: bool) -> Self {
        self.continue_steps = enabled;
        self
    }

    pub fn with_tool_call_streaming(mut self, enabled: bool) -> Self {
        self.tool_call_streaming = enabled;
        self
    }

    pub fn with_send_reasoning(mut self, enabled: bool) -> Self {
        self.send_reasoning = enabled;
        self
    }

    pub fn with_send_sources(mut self, enabled: bool) -> Self {
        self.send_sources = enabled;
        self
    }

    pub fn with_mask_errors(mut self, enabled: bool) -> Self {
        self.mask_errors = enabled;
        self
    }
}

/// `stepweave.toml` in the platform config directory.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "stepweave")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, WeaveError> {
    value.parse().map_err(|_| {
        WeaveError::Configuration(format!("invalid value for {ENV_PREFIX}{name}: '{value}'"))
    })
}
