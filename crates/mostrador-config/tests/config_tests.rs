// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for configuration loading and diagnostics.

use std::io::Write;

use mostrador_config::diagnostic::ConfigError;
use mostrador_config::model::MostradorConfig;
use mostrador_config::{load_and_validate_path, load_and_validate_str, load_config_from_str};
use mostrador_core::Role;

#[test]
fn full_toml_deserializes() {
    let toml = r#"
[service]
name = "mostrador-test"
log_level = "debug"

[gateway]
host = "0.0.0.0"
port = 8088
cors_origins = ["https://dash.example.com"]

[[operators]]
id = "ana"
display_name = "Ana"
role = "admin"
token_sha256 = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"

[whatsapp]
phone_number_id = "1055"
access_token = "EAAG"
app_secret = "s3cret"
verify_token = "verify-me"
api_version = "v20.0"

[storage]
database_path = "/tmp/mostrador.db"

[resilience.retry]
max_attempts = 5
backoff_ms = [500, 1000]

[queue]
max_size = 50
workers = 2

[recovery]
interval_secs = 30
max_retries = 5

[hub]
idle_timeout_secs = 60

[responder]
enabled = true
endpoint = "http://localhost:9000/reply"
"#;

    let config = load_and_validate_str(toml).expect("valid config");
    assert_eq!(config.service.name, "mostrador-test");
    assert_eq!(config.gateway.port, 8088);
    assert_eq!(config.operators.len(), 1);
    assert_eq!(config.operators[0].role, Role::Admin);
    assert_eq!(config.whatsapp.phone_number_id.as_deref(), Some("1055"));
    assert_eq!(config.whatsapp.api_version, "v20.0");
    assert_eq!(config.whatsapp.api_base_url, "https://graph.facebook.com");
    assert_eq!(config.resilience.retry.max_attempts, 5);
    assert_eq!(config.resilience.retry.backoff_ms, vec![500, 1000]);
    assert_eq!(config.queue.max_size, 50);
    assert_eq!(config.queue.max_job_age_secs, 1800);
    assert_eq!(config.recovery.max_retries, 5);
    assert_eq!(config.recovery.batch_size, 10);
    assert_eq!(config.hub.idle_timeout_secs, 60);
    assert!(config.responder.enabled);
}

#[test]
fn empty_toml_uses_defaults() {
    let config = load_config_from_str("").expect("defaults");
    assert_eq!(config.service.name, "mostrador");
    assert_eq!(config.gateway.host, "127.0.0.1");
    assert_eq!(config.gateway.port, 3100);
    assert!(config.operators.is_empty());
    assert!(config.whatsapp.access_token.is_none());
    assert_eq!(config.storage.database_path, "mostrador.db");
    assert_eq!(config.resilience.circuit_breaker.failure_threshold, 5);
    assert_eq!(config.resilience.circuit_breaker.recovery_timeout_secs, 60);
    assert_eq!(config.resilience.whatsapp_breaker.failure_threshold, 3);
    assert_eq!(config.resilience.whatsapp_breaker.recovery_timeout_secs, 30);
    assert_eq!(config.resilience.retry.backoff_ms, vec![1000, 2000, 4000]);
    assert_eq!(config.dedup.ttl_secs, 3600);
    assert_eq!(config.queue.workers, 5);
    assert_eq!(config.recovery.interval_secs, 120);
    assert_eq!(config.recovery.retention_hours, 24);
    assert_eq!(config.hub.ping_interval_secs, 5);
    assert_eq!(config.hub.latency_warn_ms, 2000);
    assert!(!config.responder.enabled);
    assert!(config.prometheus.enabled);
}

#[test]
fn partial_breaker_table_keeps_profile_defaults() {
    let toml = r#"
[resilience.whatsapp_breaker]
failure_threshold = 4
"#;
    let config = load_config_from_str(toml).expect("partial table");
    assert_eq!(config.resilience.whatsapp_breaker.failure_threshold, 4);
    assert_eq!(config.resilience.whatsapp_breaker.recovery_timeout_secs, 30);
    assert_eq!(config.resilience.whatsapp_breaker.call_timeout_secs, Some(15));
}

#[test]
fn unknown_key_gets_suggestion() {
    let toml = r#"
[queue]
max_sise = 10
"#;
    let errors = load_and_validate_str(toml).unwrap_err();
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        ConfigError::UnknownKey {
            key, suggestion, ..
        } => {
            assert!(key.ends_with("max_sise"), "{key}");
            assert_eq!(suggestion.as_deref(), Some("max_size"));
        }
        other => panic!("expected UnknownKey, got {other:?}"),
    }
}

#[test]
fn unknown_top_level_section_rejected() {
    let err = load_config_from_str("[telegram]\nbot_token = \"x\"\n").unwrap_err();
    let text = format!("{err}");
    assert!(text.contains("unknown field") || text.contains("telegram"));
}

#[test]
fn wrong_type_is_reported() {
    let errors = load_and_validate_str("[gateway]\nport = \"eighty\"\n").unwrap_err();
    assert!(errors
        .iter()
        .any(|e| matches!(e, ConfigError::InvalidType { .. } | ConfigError::Other(_))));
}

#[test]
fn validation_errors_surface_from_loader() {
    let errors = load_and_validate_str("[queue]\nworkers = 0\n").unwrap_err();
    assert!(errors
        .iter()
        .any(|e| matches!(e, ConfigError::Validation { message } if message.contains("queue.workers"))));
}

#[test]
fn dotted_overrides_map_like_env_vars() {
    use figment::{
        providers::{Format, Serialized, Toml},
        Figment,
    };

    let config: MostradorConfig = Figment::new()
        .merge(Serialized::defaults(MostradorConfig::default()))
        .merge(Toml::string("[whatsapp]\naccess_token = \"from-file\"\n"))
        .merge(("whatsapp.access_token", "from-env"))
        .merge(("resilience.whatsapp_breaker.failure_threshold", 7))
        .extract()
        .expect("dotted overrides");

    assert_eq!(config.whatsapp.access_token.as_deref(), Some("from-env"));
    assert_eq!(config.resilience.whatsapp_breaker.failure_threshold, 7);
}

#[test]
fn explicit_path_is_loaded() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[gateway]\nport = 9911\n").unwrap();
    let config = load_and_validate_path(file.path()).expect("file config");
    assert_eq!(config.gateway.port, 9911);
}

#[test]
fn missing_explicit_path_falls_back_to_defaults() {
    let config = load_and_validate_path(std::path::Path::new("/nonexistent/mostrador.toml"))
        .expect("missing file is skipped");
    assert_eq!(config.gateway.port, 3100);
}
