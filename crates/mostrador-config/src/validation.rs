// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Semantic checks that serde attributes cannot express.
//!
//! All problems are collected; validation never stops at the first one.

use std::collections::HashSet;

use crate::diagnostic::ConfigError;
use crate::model::{BreakerSettings, MostradorConfig};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

pub fn validate_config(config: &MostradorConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if !LOG_LEVELS.contains(&config.service.log_level.as_str()) {
        errors.push(ConfigError::validation(format!(
            "service.log_level `{}` must be one of {}",
            config.service.log_level,
            LOG_LEVELS.join(", ")
        )));
    }

    let host = config.gateway.host.trim();
    if host.is_empty() {
        errors.push(ConfigError::validation("gateway.host must not be empty"));
    } else {
        let is_valid_ip = host.parse::<std::net::IpAddr>().is_ok();
        let is_valid_hostname = host
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-' || c == ':');
        if !is_valid_ip && !is_valid_hostname {
            errors.push(ConfigError::validation(format!(
                "gateway.host `{host}` is not a valid IP address or hostname"
            )));
        }
    }

    validate_operators(config, &mut errors);
    validate_whatsapp(config, &mut errors);

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::validation(
            "storage.database_path must not be empty",
        ));
    }

    validate_breaker(
        "resilience.circuit_breaker",
        &config.resilience.circuit_breaker,
        &mut errors,
    );
    validate_breaker(
        "resilience.whatsapp_breaker",
        &config.resilience.whatsapp_breaker,
        &mut errors,
    );

    let retry = &config.resilience.retry;
    if retry.max_attempts < 1 {
        errors.push(ConfigError::validation(
            "resilience.retry.max_attempts must be at least 1",
        ));
    }
    if retry.backoff_ms.is_empty() {
        errors.push(ConfigError::validation(
            "resilience.retry.backoff_ms must list at least one delay",
        ));
    }
    if !(0.0..=1.0).contains(&retry.jitter_ratio) {
        errors.push(ConfigError::validation(format!(
            "resilience.retry.jitter_ratio must be between 0 and 1, got {}",
            retry.jitter_ratio
        )));
    }
    positive(
        "resilience.decay_interval_secs",
        config.resilience.decay_interval_secs,
        &mut errors,
    );

    positive("dedup.ttl_secs", config.dedup.ttl_secs, &mut errors);
    positive(
        "dedup.eviction_interval_secs",
        config.dedup.eviction_interval_secs,
        &mut errors,
    );

    positive("queue.max_size", config.queue.max_size as u64, &mut errors);
    positive("queue.workers", config.queue.workers as u64, &mut errors);
    positive(
        "queue.max_job_age_secs",
        config.queue.max_job_age_secs,
        &mut errors,
    );
    positive(
        "queue.sweep_interval_secs",
        config.queue.sweep_interval_secs,
        &mut errors,
    );

    positive(
        "recovery.interval_secs",
        config.recovery.interval_secs,
        &mut errors,
    );
    positive(
        "recovery.batch_size",
        config.recovery.batch_size as u64,
        &mut errors,
    );
    positive(
        "recovery.max_retries",
        config.recovery.max_retries as u64,
        &mut errors,
    );
    positive(
        "recovery.cleanup_interval_secs",
        config.recovery.cleanup_interval_secs,
        &mut errors,
    );

    positive(
        "hub.ping_interval_secs",
        config.hub.ping_interval_secs,
        &mut errors,
    );
    positive(
        "hub.idle_timeout_secs",
        config.hub.idle_timeout_secs,
        &mut errors,
    );
    positive(
        "hub.liveness_check_interval_secs",
        config.hub.liveness_check_interval_secs,
        &mut errors,
    );
    positive(
        "hub.outbound_buffer",
        config.hub.outbound_buffer as u64,
        &mut errors,
    );

    if config.responder.enabled {
        match config.responder.endpoint.as_deref() {
            None => errors.push(ConfigError::validation(
                "responder.endpoint is required when responder.enabled = true",
            )),
            Some(url) if !is_http_url(url) => errors.push(ConfigError::validation(format!(
                "responder.endpoint `{url}` must be an http(s) URL"
            ))),
            Some(_) => {}
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn positive(key: &str, value: u64, errors: &mut Vec<ConfigError>) {
    if value == 0 {
        errors.push(ConfigError::validation(format!(
            "{key} must be greater than 0"
        )));
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn validate_breaker(section: &str, breaker: &BreakerSettings, errors: &mut Vec<ConfigError>) {
    positive(
        &format!("{section}.failure_threshold"),
        breaker.failure_threshold as u64,
        errors,
    );
    positive(
        &format!("{section}.recovery_timeout_secs"),
        breaker.recovery_timeout_secs,
        errors,
    );
    if breaker.call_timeout_secs == Some(0) {
        errors.push(ConfigError::validation(format!(
            "{section}.call_timeout_secs must be greater than 0 when set"
        )));
    }
}

fn validate_operators(config: &MostradorConfig, errors: &mut Vec<ConfigError>) {
    let mut ids = HashSet::new();
    let mut tokens = HashSet::new();
    for (i, operator) in config.operators.iter().enumerate() {
        if operator.id.trim().is_empty() {
            errors.push(ConfigError::validation(format!(
                "operators[{i}].id must not be empty"
            )));
        } else if !ids.insert(operator.id.as_str()) {
            errors.push(ConfigError::validation(format!(
                "duplicate operator id `{}`",
                operator.id
            )));
        }

        let digest = operator.token_sha256.as_str();
        if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            errors.push(ConfigError::validation(format!(
                "operators[{i}].token_sha256 must be a 64-character hex SHA-256 digest"
            )));
        } else if !tokens.insert(digest.to_ascii_lowercase()) {
            errors.push(ConfigError::validation(format!(
                "operators[{i}] reuses another operator's token"
            )));
        }
    }
}

fn validate_whatsapp(config: &MostradorConfig, errors: &mut Vec<ConfigError>) {
    let whatsapp = &config.whatsapp;
    if whatsapp.phone_number_id.is_some() && whatsapp.access_token.is_none() {
        errors.push(ConfigError::validation(
            "whatsapp.access_token is required when whatsapp.phone_number_id is set",
        ));
    }
    if !is_http_url(&whatsapp.api_base_url) {
        errors.push(ConfigError::validation(format!(
            "whatsapp.api_base_url `{}` must be an http(s) URL",
            whatsapp.api_base_url
        )));
    }
    positive(
        "whatsapp.request_timeout_secs",
        whatsapp.request_timeout_secs,
        errors,
    );
}
