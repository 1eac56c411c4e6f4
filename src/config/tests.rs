//! Config module tests

use std::time::Duration;

use super::*;
use pretty_assertions::assert_eq;

#[test]
fn test_substitute_env_vars_simple() {
    std::env::set_var("SHIM_TEST_VAR_SIMPLE", "hello");
    let result = substitute_env_vars("value = \"${SHIM_TEST_VAR_SIMPLE}\"");
    assert_eq!(result, "value = \"hello\"");
    std::env::remove_var("SHIM_TEST_VAR_SIMPLE");
}

#[test]
fn test_substitute_env_vars_with_default() {
    std::env::remove_var("SHIM_TEST_VAR_UNSET");
    let result = substitute_env_vars("value = \"${SHIM_TEST_VAR_UNSET:-default_value}\"");
    assert_eq!(result, "value = \"default_value\"");

    std::env::set_var("SHIM_TEST_VAR_SET", "env_value");
    let result = substitute_env_vars("value = \"${SHIM_TEST_VAR_SET:-default_value}\"");
    assert_eq!(result, "value = \"env_value\"");
    std::env::remove_var("SHIM_TEST_VAR_SET");
}

#[test]
fn test_substitute_env_vars_missing_no_default() {
    std::env::remove_var("SHIM_TEST_VAR_MISSING");
    let result = substitute_env_vars("value = \"${SHIM_TEST_VAR_MISSING}\"");
    assert_eq!(result, "value = \"\"");
}

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.server.bind.port(), 8080);
    assert_eq!(config.broker.service_url, "pulsar://localhost:6650");
    assert_eq!(config.broker.reply_timeout, Duration::from_secs(60));
    assert_eq!(config.broker.producer_name, "TestAppPusher");
    assert!(config.metrics.enabled);
    assert!(config.validate().is_ok());
}

#[test]
fn test_parse_minimal_config() {
    let toml = r#"
[broker]
service_url = "memory://"
"#;

    let config = Config::parse(toml).unwrap();
    assert_eq!(config.broker.service_url, "memory://");
    assert_eq!(config.broker.reply_timeout, Duration::from_secs(60));
    assert_eq!(config.log.level, "info");
}

#[test]
fn test_parse_full_config() {
    let toml = r#"
[log]
level = "debug"

[server]
bind = "127.0.0.1:9000"
max_body_size = 1024

[broker]
service_url = "pulsar+ssl://pulsar.example.com:6651"
reply_timeout = "1m 30s"
subscription_name = "it-suite"
consumer_name = "it-consumer"
producer_name = "it-producer"

[metrics]
enabled = false
"#;

    let config = Config::parse(toml).unwrap();
    assert_eq!(config.log.level, "debug");
    assert_eq!(config.server.bind.to_string(), "127.0.0.1:9000");
    assert_eq!(config.server.max_body_size, 1024);
    assert_eq!(config.broker.reply_timeout, Duration::from_secs(90));
    assert_eq!(config.broker.subscription_name, "it-suite");
    assert!(!config.metrics.enabled);

    let options = config.broker.bridge_options();
    assert_eq!(options.reply_timeout, Duration::from_secs(90));
    assert_eq!(options.consumer_name, "it-consumer");
    assert_eq!(options.producer_name, "it-producer");
}

#[test]
fn test_invalid_service_url() {
    let toml = r#"
[broker]
service_url = "localhost 6650"
"#;
    assert!(matches!(
        Config::parse(toml),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn test_unknown_scheme() {
    let toml = r#"
[broker]
service_url = "amqp://localhost:5672"
"#;
    assert!(matches!(
        Config::parse(toml),
        Err(ConfigError::Validation(msg)) if msg.contains("amqp")
    ));
}

#[test]
fn test_zero_reply_timeout() {
    let toml = r#"
[broker]
reply_timeout = "0s"
"#;
    assert!(Config::parse(toml).is_err());
}

#[test]
fn test_empty_subscription_name() {
    let toml = r#"
[broker]
subscription_name = "  "
"#;
    assert!(Config::parse(toml).is_err());
}

#[test]
fn test_bad_duration_is_parse_error() {
    let toml = r#"
[broker]
reply_timeout = "soon"
"#;
    assert!(matches!(Config::parse(toml), Err(ConfigError::Parse(_))));
}

#[test]
fn test_load_config_with_env_substitution() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("shim.toml");

    std::env::set_var("SHIM_TEST_BIND_HOST", "127.0.0.1");
    std::env::set_var("SHIM_TEST_BIND_PORT", "8181");

    let config_content = r#"
[server]
bind = "${SHIM_TEST_BIND_HOST}:${SHIM_TEST_BIND_PORT}"

[broker]
service_url = "${SHIM_TEST_BROKER_URL:-memory://local}"
reply_timeout = "5s"
"#;
    std::fs::write(&config_path, config_content).unwrap();

    let config = Config::load(&config_path).unwrap();
    assert_eq!(config.server.bind.to_string(), "127.0.0.1:8181");
    assert_eq!(config.broker.service_url, "memory://local");
    assert_eq!(config.broker.reply_timeout, Duration::from_secs(5));

    std::env::remove_var("SHIM_TEST_BIND_HOST");
    std::env::remove_var("SHIM_TEST_BIND_PORT");
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.broker.subscription_name, "pulsar-http-shim");
    assert!(config.metrics.enabled);
}

#[test]
fn test_env_override() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("shim.toml");
    std::fs::write(&config_path, "[server]\nmax_body_size = 100\n").unwrap();

    std::env::set_var("SHIM__SERVER__MAX_BODY_SIZE", "2048");
    let config = Config::load(&config_path).unwrap();
    std::env::remove_var("SHIM__SERVER__MAX_BODY_SIZE");

    assert_eq!(config.server.max_body_size, 2048);
}

#[test]
fn test_load_defers_validation_to_caller() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("shim.toml");
    std::fs::write(&config_path, "[broker]\nreply_timeout = \"0s\"\n").unwrap();

    let mut config = Config::load(&config_path).unwrap();
    assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

    // As with --reply-timeout on the command line
    config.broker.reply_timeout = Duration::from_secs(5);
    assert!(config.validate().is_ok());
}
