//! Operator configuration loading tests.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use dcluster::config::{ENV_API_HOST, ENV_REQUEUE_AFTER_SECS, ENV_WORKERS};
use dcluster::{ConfigError, OperatorConfig};
use dcluster_reconciler::DEFAULT_GUARD_NAME;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn write_config(suffix: &str, content: &str) -> Result<tempfile::NamedTempFile, std::io::Error> {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile()?;
    file.write_all(content.as_bytes())?;
    Ok(file)
}

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |name| vars.get(name).cloned()
}

#[test]
fn defaults_are_valid() -> TestResult {
    let config = OperatorConfig::default();
    config.validate()?;

    let reconciler = config.to_reconciler_config();
    assert_eq!(reconciler.guard_name, DEFAULT_GUARD_NAME);
    assert_eq!(reconciler.requeue_after, Duration::from_secs(30));
    assert_eq!(reconciler.max_conflict_retries, 5);

    let dispatcher = config.to_loop_config();
    assert_eq!(dispatcher.workers, 4);
    assert_eq!(dispatcher.resync_interval, Duration::from_secs(300));
    assert_eq!(dispatcher.backoff.base_delay, Duration::from_millis(500));
    assert_eq!(dispatcher.backoff.max_delay, Duration::from_secs(300));
    Ok(())
}

#[test]
fn toml_file_with_partial_sections() -> TestResult {
    let file = write_config(
        ".toml",
        r#"
[api]
host = "https://adb-123.4.azuredatabricks.net"
timeout_secs = 10

[reconciler]
requeue_after_secs = 60

[dispatcher]
workers = 8
backoff_max_ms = 60000
"#,
    )?;

    let config = OperatorConfig::from_file(file.path())?;
    config.validate()?;

    assert_eq!(
        config.api.host.as_ref().map(url::Url::host_str),
        Some(Some("adb-123.4.azuredatabricks.net"))
    );
    assert_eq!(config.api.timeout, Duration::from_secs(10));
    assert_eq!(config.api.token_env, "DATABRICKS_TOKEN");
    assert_eq!(
        config.to_reconciler_config().requeue_after,
        Duration::from_secs(60)
    );
    assert_eq!(config.reconciler.guard_name, DEFAULT_GUARD_NAME);
    assert_eq!(config.dispatcher.workers, 8);
    assert_eq!(config.dispatcher.resync_interval_secs, 300);
    assert_eq!(
        config.to_loop_config().backoff.max_delay,
        Duration::from_secs(60)
    );
    Ok(())
}

#[test]
fn json_file_by_extension() -> TestResult {
    let file = write_config(
        ".json",
        r#"{"reconciler": {"guard_name": "example.com/cleanup"}, "dispatcher": {"workers": 2}}"#,
    )?;

    let config = OperatorConfig::from_file(file.path())?;
    assert_eq!(config.reconciler.guard_name, "example.com/cleanup");
    assert_eq!(config.dispatcher.workers, 2);
    Ok(())
}

#[test]
fn malformed_file_reports_path() -> TestResult {
    let file = write_config(".toml", "[dispatcher]\nworkers = \"many\"\n")?;

    match OperatorConfig::from_file(file.path()) {
        Err(ConfigError::Parse { path, .. }) => assert_eq!(path, file.path()),
        other => return Err(format!("expected parse error, got {other:?}").into()),
    }
    Ok(())
}

#[test]
fn missing_explicit_file_is_an_error() {
    let result = OperatorConfig::load(
        Some(Path::new("/nonexistent/dcluster.toml")),
        Path::new("/nonexistent/default.toml"),
    );
    assert!(matches!(result, Err(ConfigError::Read { .. })));
}

#[test]
fn missing_default_file_falls_back_to_defaults() -> TestResult {
    let config = OperatorConfig::load(None, Path::new("/nonexistent/dcluster.toml"))?;
    assert_eq!(config.dispatcher.workers, 4);
    Ok(())
}

#[test]
fn env_overrides_win_over_file() -> TestResult {
    let file = write_config(".toml", "[dispatcher]\nworkers = 8\n")?;
    let mut config = OperatorConfig::from_file(file.path())?;

    config.apply_overrides(env(&[
        (ENV_API_HOST, "https://adb-9.9.azuredatabricks.net"),
        (ENV_WORKERS, "16"),
        (ENV_REQUEUE_AFTER_SECS, " 45 "),
    ]))?;

    assert_eq!(
        config.api.host.as_ref().map(url::Url::as_str),
        Some("https://adb-9.9.azuredatabricks.net/")
    );
    assert_eq!(config.dispatcher.workers, 16);
    assert_eq!(config.reconciler.requeue_after_secs, 45);
    Ok(())
}

#[test]
fn unparsable_override_names_the_variable() {
    let mut config = OperatorConfig::default();
    let result = config.apply_overrides(env(&[(ENV_WORKERS, "lots")]));
    assert!(matches!(
        result,
        Err(ConfigError::InvalidOverride { name, .. }) if name == ENV_WORKERS
    ));
}

#[test]
fn validation_rejects_bad_values() {
    let mut zero_workers = OperatorConfig::default();
    zero_workers.dispatcher.workers = 0;
    assert!(zero_workers.validate().is_err());

    let mut zero_requeue = OperatorConfig::default();
    zero_requeue.reconciler.requeue_after_secs = 0;
    assert!(zero_requeue.validate().is_err());

    let mut inverted_backoff = OperatorConfig::default();
    inverted_backoff.dispatcher.backoff_base_ms = 10_000;
    inverted_backoff.dispatcher.backoff_max_ms = 1_000;
    assert!(inverted_backoff.validate().is_err());

    let mut wild_jitter = OperatorConfig::default();
    wild_jitter.dispatcher.jitter_factor = 1.5;
    assert!(wild_jitter.validate().is_err());
}
