//! Tests for configuration loading.

use std::io::Write;
use std::time::Duration;

use pretty_assertions::assert_eq;
use stepweave::config::WeaveConfig;
use stepweave::error::WeaveError;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn config_file_overrides_defaults() {
    let file = write_config(
        r#"
max_retries = 5
initial_retry_delay_ms = 250
max_steps = 4
continue_steps = true
mask_errors = false
"#,
    );

    let config = WeaveConfig::from_file(file.path()).unwrap();

    assert_eq!(config.max_retries, 5);
    assert_eq!(config.initial_retry_delay, Duration::from_millis(250));
    assert_eq!(config.max_steps, 4);
    assert!(config.continue_steps);
    assert!(!config.mask_errors);
    assert_eq!(config.backoff_factor, 2.0);
    assert!(!config.tool_call_streaming);
}

#[test]
fn empty_file_keeps_defaults() {
    let file = write_config("");

    let config = WeaveConfig::from_file(file.path()).unwrap();

    assert_eq!(config, WeaveConfig::default());
}

#[test]
fn environment_wins_over_file() {
    let file = write_config("max_steps = 4\nsend_sources = true\n");

    let config = WeaveConfig::default()
        .merge_file(file.path())
        .unwrap()
        .with_env_vars([("STEPWEAVE_MAX_STEPS", "8")])
        .unwrap();

    assert_eq!(config.max_steps, 8);
    assert!(config.send_sources);
}

#[test]
fn builder_methods_win_over_everything() {
    let file = write_config("max_steps = 4\n");

    let config = WeaveConfig::from_file(file.path())
        .unwrap()
        .with_env_vars([("STEPWEAVE_MAX_STEPS", "8")])
        .unwrap()
        .with_max_steps(2)
        .with_tool_call_streaming(true);

    assert_eq!(config.max_steps, 2);
    assert!(config.tool_call_streaming);
}

#[test]
fn unknown_keys_are_rejected() {
    let file = write_config("max_stepz = 4\n");

    let err = WeaveConfig::from_file(file.path()).unwrap_err();

    assert!(matches!(err, WeaveError::Configuration(_)));
    assert!(err.to_string().contains("max_stepz"));
}

#[test]
fn wrong_value_type_is_configuration_error() {
    let file = write_config("continue_steps = \"yes\"\n");

    let err = WeaveConfig::from_file(file.path()).unwrap_err();

    assert!(matches!(err, WeaveError::Configuration(_)));
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();

    let err = WeaveConfig::from_file(dir.path().join("absent.toml")).unwrap_err();

    assert!(matches!(err, WeaveError::Io(_)));
}

#[test]
fn env_values_are_trimmed_and_parsed() {
    let config = WeaveConfig::default()
        .with_env_vars([
            ("STEPWEAVE_INITIAL_RETRY_DELAY_MS", " 50 "),
            ("STEPWEAVE_BACKOFF_FACTOR", "1.5"),
            ("STEPWEAVE_SEND_REASONING", "true"),
        ])
        .unwrap();

    assert_eq!(config.initial_retry_delay, Duration::from_millis(50));
    assert_eq!(config.backoff_factor, 1.5);
    assert!(config.send_reasoning);
}

#[test]
fn retry_policy_reflects_loaded_values() {
    let file = write_config("max_retries = 0\n");

    let policy = WeaveConfig::from_file(file.path()).unwrap().retry_policy();

    assert_eq!(policy.max_retries, 0);
    assert_eq!(policy.initial_delay, Duration::from_millis(2000));
}
