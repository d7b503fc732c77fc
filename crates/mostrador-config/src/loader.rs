// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration loading with Figment.
//!
//! Lookup order: `./mostrador.toml` > `~/.config/mostrador/mostrador.toml` >
//! `/etc/mostrador/mostrador.toml`, with `MOSTRADOR_` environment overrides.

#![allow(clippy::result_large_err)] // figment::Error is external

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::MostradorConfig;

/// Section prefixes recognised in environment variable names, longest first
/// so nested sections win over their parents.
const ENV_SECTIONS: &[(&str, &str)] = &[
    ("resilience_circuit_breaker_", "resilience.circuit_breaker."),
    ("resilience_whatsapp_breaker_", "resilience.whatsapp_breaker."),
    ("resilience_retry_", "resilience.retry."),
    ("resilience_", "resilience."),
    ("service_", "service."),
    ("gateway_", "gateway."),
    ("whatsapp_", "whatsapp."),
    ("storage_", "storage."),
    ("dedup_", "dedup."),
    ("queue_", "queue."),
    ("recovery_", "recovery."),
    ("hub_", "hub."),
    ("responder_", "responder."),
    ("prometheus_", "prometheus."),
];

/// Load from the standard hierarchy with env overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/mostrador/mostrador.toml`
/// 3. `~/.config/mostrador/mostrador.toml`
/// 4. `./mostrador.toml`
/// 5. `MOSTRADOR_*` environment variables
pub fn load_config() -> Result<MostradorConfig, figment::Error> {
    build_figment().extract()
}

/// Load from a TOML string over the compiled defaults only.
pub fn load_config_from_str(toml_content: &str) -> Result<MostradorConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(MostradorConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load from one explicit file with env overrides.
pub fn load_config_from_path(path: &Path) -> Result<MostradorConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(MostradorConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(MostradorConfig::default()))
        .merge(Toml::file("/etc/mostrador/mostrador.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("mostrador/mostrador.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("mostrador.toml"))
        .merge(env_provider())
}

/// Map a lowercased, prefix-stripped env key to its dotted config path.
///
/// Uses explicit section prefixes instead of `split("_")` because field names
/// contain underscores: `MOSTRADOR_WHATSAPP_ACCESS_TOKEN` must become
/// `whatsapp.access_token`.
pub fn map_env_key(key: &str) -> String {
    for (prefix, dotted) in ENV_SECTIONS {
        if let Some(rest) = key.strip_prefix(prefix) {
            return format!("{dotted}{rest}");
        }
    }
    key.to_string()
}

fn env_provider() -> Env {
    Env::prefixed("MOSTRADOR_").map(|key| map_env_key(key.as_str()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_keys_map_to_sections() {
        assert_eq!(map_env_key("whatsapp_access_token"), "whatsapp.access_token");
        assert_eq!(map_env_key("queue_max_size"), "queue.max_size");
        assert_eq!(
            map_env_key("resilience_whatsapp_breaker_failure_threshold"),
            "resilience.whatsapp_breaker.failure_threshold"
        );
        assert_eq!(
            map_env_key("resilience_decay_interval_secs"),
            "resilience.decay_interval_secs"
        );
        assert_eq!(map_env_key("unrelated"), "unrelated");
    }
}
