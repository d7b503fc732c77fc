// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model.
//!
//! All structs use `#[serde(deny_unknown_fields)]` so a misspelled key is
//! reported at startup instead of silently ignored.

use std::fmt;
use std::time::Duration;

use mostrador_core::Role;
use serde::{Deserialize, Serialize};

/// Top-level configuration. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MostradorConfig {
    #[serde(default)]
    pub service: ServiceConfig,

    /// HTTP/WebSocket listener.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Operators allowed to use the REST API and realtime socket.
    #[serde(default)]
    pub operators: Vec<OperatorConfig>,

    /// WhatsApp Cloud API credentials and endpoint.
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Circuit breakers and retry policy.
    #[serde(default)]
    pub resilience: ResilienceConfig,

    #[serde(default)]
    pub dedup: DedupConfig,

    /// Outbound delivery queue.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Failed-message recovery sweep.
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Realtime fan-out hub.
    #[serde(default)]
    pub hub: HubSettings,

    /// Automated responder endpoint.
    #[serde(default)]
    pub responder: ResponderConfig,

    #[serde(default)]
    pub prometheus: PrometheusConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error). `RUST_LOG` wins.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_service_name() -> String {
    "mostrador".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins for the operator dashboard. Empty allows none.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3100
}

/// A dashboard operator. Tokens are stored as SHA-256 hex digests.
#[derive(Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OperatorConfig {
    pub id: String,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default = "default_role")]
    pub role: Role,

    /// Lowercase hex SHA-256 of the operator's bearer token.
    pub token_sha256: String,
}

impl fmt::Debug for OperatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorConfig")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("role", &self.role)
            .field("token_sha256", &"[redacted]")
            .finish()
    }
}

fn default_role() -> Role {
    Role::Agent
}

#[derive(Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WhatsAppConfig {
    /// Business phone number id. `None` leaves the gateway unconfigured.
    #[serde(default)]
    pub phone_number_id: Option<String>,

    #[serde(default)]
    pub access_token: Option<String>,

    /// App secret for `X-Hub-Signature-256` verification. `None` skips it.
    #[serde(default)]
    pub app_secret: Option<String>,

    /// Token echoed back during webhook subscription.
    #[serde(default)]
    pub verify_token: Option<String>,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            phone_number_id: None,
            access_token: None,
            app_secret: None,
            verify_token: None,
            api_base_url: default_api_base_url(),
            api_version: default_api_version(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl fmt::Debug for WhatsAppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "[redacted]");
        f.debug_struct("WhatsAppConfig")
            .field("phone_number_id", &self.phone_number_id)
            .field("access_token", &redact(&self.access_token))
            .field("app_secret", &redact(&self.app_secret))
            .field("verify_token", &redact(&self.verify_token))
            .field("api_base_url", &self.api_base_url)
            .field("api_version", &self.api_version)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl WhatsAppConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_api_base_url() -> String {
    "https://graph.facebook.com".to_string()
}

fn default_api_version() -> String {
    "v21.0".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

fn default_database_path() -> String {
    "mostrador.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ResilienceConfig {
    /// Defaults for every dependency without its own profile.
    #[serde(default)]
    pub circuit_breaker: BreakerSettings,

    /// Profile for the WhatsApp Cloud API.
    #[serde(default = "BreakerSettings::whatsapp")]
    pub whatsapp_breaker: BreakerSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    /// How often breaker counters are checked for decay.
    #[serde(default = "default_decay_interval_secs")]
    pub decay_interval_secs: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: BreakerSettings::default(),
            whatsapp_breaker: BreakerSettings::whatsapp(),
            retry: RetrySettings::default(),
            decay_interval_secs: default_decay_interval_secs(),
        }
    }
}

fn default_decay_interval_secs() -> u64 {
    60
}

/// Circuit breaker thresholds.
///
/// Missing fields in a partial `[resilience.whatsapp_breaker]` table are
/// filled from the compiled WhatsApp profile when loaded through Figment.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,

    #[serde(default = "default_monitoring_period_secs")]
    pub monitoring_period_secs: u64,

    /// Per-call timeout. `None` disables it.
    #[serde(default)]
    pub call_timeout_secs: Option<u64>,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            monitoring_period_secs: default_monitoring_period_secs(),
            call_timeout_secs: None,
        }
    }
}

impl BreakerSettings {
    pub fn whatsapp() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout_secs: 30,
            monitoring_period_secs: 180,
            call_timeout_secs: Some(15),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_secs() -> u64 {
    60
}

fn default_monitoring_period_secs() -> u64 {
    300
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: Vec<u64>,

    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,

    /// Error-text markers retried regardless of class.
    #[serde(default = "default_retryable_markers")]
    pub retryable_markers: Vec<String>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            jitter_ratio: default_jitter_ratio(),
            retryable_markers: default_retryable_markers(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> Vec<u64> {
    vec![1000, 2000, 4000]
}

fn default_jitter_ratio() -> f64 {
    0.1
}

fn default_retryable_markers() -> Vec<String> {
    [
        "ECONNRESET",
        "ENOTFOUND",
        "ECONNREFUSED",
        "ETIMEDOUT",
        "NETWORK_ERROR",
        "RATE_LIMIT",
        "TEMPORARY_FAILURE",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DedupConfig {
    #[serde(default = "default_dedup_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_dedup_ttl_secs(),
            eviction_interval_secs: default_eviction_interval_secs(),
        }
    }
}

impl DedupConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn default_dedup_ttl_secs() -> u64 {
    3600
}

fn default_eviction_interval_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    #[serde(default = "default_queue_max_size")]
    pub max_size: usize,

    /// Maximum concurrent delivery workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Jobs older than this are dropped by the sweep.
    #[serde(default = "default_max_job_age_secs")]
    pub max_job_age_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// How long shutdown waits for queued jobs.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: default_queue_max_size(),
            workers: default_workers(),
            max_job_age_secs: default_max_job_age_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

fn default_queue_max_size() -> usize {
    1000
}

fn default_workers() -> usize {
    5
}

fn default_max_job_age_secs() -> u64 {
    30 * 60
}

fn default_sweep_interval_secs() -> u64 {
    5 * 60
}

fn default_drain_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RecoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_recovery_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between batches within one sweep.
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,

    /// Attempts before a failed message is left alone for good.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Failed messages older than this are deleted by the cleanup.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_recovery_interval_secs(),
            batch_size: default_batch_size(),
            batch_pause_ms: default_batch_pause_ms(),
            max_retries: default_max_retries(),
            retention_hours: default_retention_hours(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_recovery_interval_secs() -> u64 {
    120
}

fn default_batch_size() -> usize {
    10
}

fn default_batch_pause_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retention_hours() -> u64 {
    24
}

fn default_cleanup_interval_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HubSettings {
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    #[serde(default = "default_latency_warn_ms")]
    pub latency_warn_ms: u64,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_liveness_check_interval_secs")]
    pub liveness_check_interval_secs: u64,

    /// Frames buffered per connection before events are dropped.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval_secs(),
            latency_warn_ms: default_latency_warn_ms(),
            idle_timeout_secs: default_idle_timeout_secs(),
            liveness_check_interval_secs: default_liveness_check_interval_secs(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

fn default_ping_interval_secs() -> u64 {
    5
}

fn default_latency_warn_ms() -> u64 {
    2000
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_liveness_check_interval_secs() -> u64 {
    60
}

fn default_outbound_buffer() -> usize {
    256
}

#[derive(Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ResponderConfig {
    /// Disabled responders decline every conversation.
    #[serde(default)]
    pub enabled: bool,

    /// URL that receives the transcript and returns `{"text": ...}` or 204.
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_responder_timeout_secs")]
    pub timeout_secs: u64,

    /// Messages of history sent with each request.
    #[serde(default = "default_transcript_limit")]
    pub transcript_limit: usize,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            api_key: None,
            timeout_secs: default_responder_timeout_secs(),
            transcript_limit: default_transcript_limit(),
        }
    }
}

impl fmt::Debug for ResponderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponderConfig")
            .field("enabled", &self.enabled)
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[redacted]"))
            .field("timeout_secs", &self.timeout_secs)
            .field("transcript_limit", &self.transcript_limit)
            .finish()
    }
}

fn default_responder_timeout_secs() -> u64 {
    20
}

fn default_transcript_limit() -> usize {
    20
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PrometheusConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
