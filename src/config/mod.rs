//! Configuration management
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! TOML file (path from `RINGDESK_CONFIG`, default `ringdesk.toml`), then
//! `RINGDESK__SECTION__KEY` environment variables.

use crate::domain::pipeline::StorePrompts;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub webhook: WebhookConfig,
    pub admission: AdmissionConfig,
    pub session: SessionConfig,
    pub bridge: BridgeConfig,
    pub media: MediaConfig,
    pub pipeline: PipelineConfig,
    pub notifications: NotificationConfig,
    pub failover: FailoverConfig,
    pub pricing: PricingConfig,
    pub database: DatabaseConfig,
    pub persistence: PersistenceConfig,
    pub directory: DirectoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Shared HMAC secret for carrier signatures
    pub signing_secret: String,
    pub timestamp_tolerance_secs: u64,
    /// Hard ceiling on handling one webhook before falling back
    pub response_budget_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub ttl_secs: u64,
    /// How long a finalized record survives for late duplicate hangups
    pub eviction_grace_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub reorder_window: u64,
    pub reorder_max_wait_ms: u64,
    pub connect_timeout_ms: u64,
    pub stage_timeout_ms: u64,
    pub response_timeout_ms: u64,
    pub max_retries: u32,
    pub state_poll_interval_ms: u64,
    pub shutdown_grace_ms: u64,
    pub transcript_queue: usize,
    pub inbound_queue: usize,
    pub outbound_queue: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Base of the websocket URL handed to the carrier in `stream` actions
    pub stream_url_base: String,
    pub stream_track: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Speech pipeline websocket endpoint
    pub url: String,
    pub prompt_cache_ttl_secs: u64,
    /// Store prompts preloaded into the cache, keyed by store id
    pub stores: BTreeMap<String, StorePrompts>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Notification engine endpoint; empty logs envelopes instead
    pub endpoint: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    pub default_locale: String,
    pub voice: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub cents_per_minute: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `memory` or `postgres`
    pub backend: String,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
}

/// Numbers provisioned into the in-memory admission directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub numbers: Vec<ProvisionedNumber>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionedNumber {
    pub number: String,
    pub business_id: String,
    pub store_id: String,
    pub phone_number_id: String,
    /// Calls per billing period; absent is unlimited
    #[serde(default)]
    pub call_limit: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            signing_secret: String::new(),
            timestamp_tolerance_secs: 300,
            response_budget_ms: 4000,
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self { timeout_ms: 1000 }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            eviction_grace_secs: 30,
            sweep_interval_secs: 15,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            reorder_window: 16,
            reorder_max_wait_ms: 200,
            connect_timeout_ms: 1000,
            stage_timeout_ms: 800,
            response_timeout_ms: 8000,
            max_retries: 1,
            state_poll_interval_ms: 1000,
            shutdown_grace_ms: 2000,
            transcript_queue: 256,
            inbound_queue: 512,
            outbound_queue: 512,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            stream_url_base: "wss://localhost:8080/media".to_string(),
            stream_track: "inbound_track".to_string(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:9000/conversation".to_string(),
            prompt_cache_ttl_secs: 300,
            stores: BTreeMap::new(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout_ms: 5000,
        }
    }
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            default_locale: "en-US".to_string(),
            voice: "female".to_string(),
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self { cents_per_minute: 12 }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            url: "postgres://postgres@localhost/ringdesk".to_string(),
            max_connections: 10,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_backoff_ms: 50,
        }
    }
}

impl Config {
    /// Load defaults, then the optional config file, then the environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let path = std::env::var("RINGDESK_CONFIG").unwrap_or_else(|_| "ringdesk.toml".to_string());

        config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::with_name(&path).required(false))
            .add_source(
                config::Environment::with_prefix("RINGDESK")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize::<Config>()
            .and_then(|config| config.validate().map(|_| config))
    }

    /// Reject timeouts that cannot fit inside the webhook response budget
    ///
    /// The slowest handled event (`call.answered` on a fresh call) waits on
    /// route lookup and admission, then the prompt lookup and the pipeline
    /// connect, before it can answer.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let worst_case = self.admission.timeout_ms * 2
            + self.bridge.stage_timeout_ms
            + self.bridge.connect_timeout_ms;
        if self.webhook.response_budget_ms <= worst_case {
            return Err(config::ConfigError::Message(format!(
                "webhook.response_budget_ms ({}) must exceed the inner timeouts ({} ms)",
                self.webhook.response_budget_ms, worst_case
            )));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl WebhookConfig {
    pub fn response_budget(&self) -> Duration {
        Duration::from_millis(self.response_budget_ms)
    }
}

impl AdmissionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs as i64)
    }

    pub fn eviction_grace(&self) -> Duration {
        Duration::from_secs(self.eviction_grace_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl BridgeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn state_poll_interval(&self) -> Duration {
        Duration::from_millis(self.state_poll_interval_ms.max(10))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn reorder(&self) -> crate::domain::audio::ReorderConfig {
        crate::domain::audio::ReorderConfig {
            window: self.reorder_window.max(1),
            max_wait: Duration::from_millis(self.reorder_max_wait_ms),
            first_seq: 1,
        }
    }
}

impl MediaConfig {
    pub fn stream_url(&self, call_control_id: &str) -> String {
        format!("{}/{}", self.stream_url_base.trim_end_matches('/'), call_control_id)
    }
}

impl PipelineConfig {
    pub fn prompt_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.prompt_cache_ttl_secs)
    }
}

impl NotificationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl PersistenceConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.bridge.reorder_window, 16);
        assert_eq!(config.bridge.max_retries, 1);
        assert_eq!(config.failover.default_locale, "en-US");
        assert_eq!(config.database.backend, "memory");
        assert_eq!(config.notifications.timeout(), Duration::from_secs(5));
        assert!(config.pipeline.stores.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_response_budget() {
        let mut config = Config::default();
        config.webhook.response_budget_ms = 3800;
        assert!(config.validate().is_err());

        config.webhook.response_budget_ms = 3801;
        assert!(config.validate().is_ok());

        config.bridge.connect_timeout_ms = 5000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stream_url() {
        let media = MediaConfig {
            stream_url_base: "wss://calls.example.com/media/".to_string(),
            ..Default::default()
        };
        assert_eq!(media.stream_url("v3:abc"), "wss://calls.example.com/media/v3:abc");
    }

    #[test]
    fn test_reorder_config_from_bridge() {
        let bridge = BridgeConfig::default();
        let reorder = bridge.reorder();
        assert_eq!(reorder.window, 16);
        assert_eq!(reorder.max_wait, Duration::from_millis(200));
        assert_eq!(reorder.first_seq, 1);
    }
}
